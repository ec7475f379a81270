//! Invoice markup composer.
//!
//! Builds a self-contained HTML document from an invoice and its employee. The layout is
//! fixed; page size and margins are declared through `@page` so the renderer needs no
//! extra print options.

use std::fmt::Write;

use super::common::{escape_html, format_currency, format_locale_date};
use crate::employee::models::Employee;
use crate::invoice::models::Invoice;

const STYLE: &str = r#"
    @page { size: A4; margin: 20px; }
    * { margin: 0; padding: 0; box-sizing: border-box; }
    body { font-family: Arial, sans-serif; padding: 40px; color: #333; }
    .header { text-align: center; margin-bottom: 40px; border-bottom: 3px solid #3b82f6; padding-bottom: 20px; }
    .company-name { font-size: 28px; font-weight: bold; color: #3b82f6; margin-bottom: 10px; }
    .invoice-title { font-size: 24px; font-weight: bold; margin-top: 20px; }
    .info-block { width: 100%; margin-bottom: 20px; }
    .info-block h3 { font-size: 14px; color: #666; margin-bottom: 10px; text-transform: uppercase; }
    .info-block p { margin: 5px 0; font-size: 14px; }
    table { width: 100%; border-collapse: collapse; margin: 30px 0; }
    th, td { padding: 12px; text-align: left; border-bottom: 1px solid #ddd; }
    th { background-color: #f8fafc; font-weight: bold; text-transform: uppercase; font-size: 12px; color: #666; }
    .text-right { text-align: right; }
    .total-section { margin-top: 30px; text-align: right; }
    .total-row { display: flex; justify-content: flex-end; font-size: 20px; font-weight: bold; color: #3b82f6; border-top: 2px solid #3b82f6; padding-top: 15px; margin-top: 15px; }
    .total-label { margin-right: 40px; min-width: 150px; }
    .footer { margin-top: 60px; text-align: center; font-size: 12px; color: #666; border-top: 1px solid #ddd; padding-top: 20px; }
"#;

/// Company lines printed at the top of every invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Letterhead {
    pub company_name: String,
    pub address: String,
    pub contact: String,
}

impl Default for Letterhead {
    fn default() -> Self {
        Self {
            company_name: "COMPANY NAME".to_string(),
            address: "123 Business Street, City, State 12345".to_string(),
            contact: "Phone: (555) 123-4567 | Email: contact@company.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InvoiceComposer {
    letterhead: Letterhead,
}

impl InvoiceComposer {
    pub fn new(letterhead: Letterhead) -> Self {
        Self { letterhead }
    }

    /// Compose the invoice document.
    ///
    /// Pure function of its inputs. The totals block shows the invoice's stored `amount`,
    /// which is not recomputed from the line items.
    pub fn compose(&self, invoice: &Invoice, employee: &Employee) -> String {
        let mut html = String::with_capacity(STYLE.len() + 2048);

        html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n");
        let _ = writeln!(
            html,
            "<title>Invoice {}</title>",
            escape_html(&invoice.invoice_number)
        );
        let _ = writeln!(html, "<style>{STYLE}</style>\n</head>\n<body>");

        self.write_header(&mut html);
        write_details(&mut html, invoice);
        write_bill_to(&mut html, employee);
        write_items(&mut html, invoice);

        let _ = write!(
            html,
            concat!(
                "<div class=\"total-section\">\n",
                "  <div class=\"total-row\">\n",
                "    <div class=\"total-label\">TOTAL AMOUNT:</div>\n",
                "    <div>{}</div>\n",
                "  </div>\n",
                "</div>\n",
            ),
            format_currency(invoice.amount)
        );

        html.push_str(concat!(
            "<div class=\"footer\">\n",
            "  <p>Thank you for your business!</p>\n",
            "  <p>Please make payment within 30 days of receiving this invoice.</p>\n",
            "</div>\n",
            "</body>\n</html>\n",
        ));

        html
    }

    fn write_header(&self, html: &mut String) {
        let _ = write!(
            html,
            concat!(
                "<div class=\"header\">\n",
                "  <div class=\"company-name\">{}</div>\n",
                "  <p>{}</p>\n",
                "  <p>{}</p>\n",
                "  <div class=\"invoice-title\">INVOICE</div>\n",
                "</div>\n",
            ),
            escape_html(&self.letterhead.company_name),
            escape_html(&self.letterhead.address),
            escape_html(&self.letterhead.contact),
        );
    }
}

fn write_details(html: &mut String, invoice: &Invoice) {
    let _ = write!(
        html,
        concat!(
            "<div class=\"info-block\">\n",
            "  <h3>Invoice Details</h3>\n",
            "  <p><strong>Invoice Number:</strong> {}</p>\n",
            "  <p><strong>Date:</strong> {}</p>\n",
            "  <p><strong>Status:</strong> {}</p>\n",
            "</div>\n",
        ),
        escape_html(&invoice.invoice_number),
        format_locale_date(&invoice.created_at),
        invoice.status.as_str().to_uppercase(),
    );
}

fn write_bill_to(html: &mut String, employee: &Employee) {
    let _ = write!(
        html,
        concat!(
            "<div class=\"info-block\">\n",
            "  <h3>Bill To</h3>\n",
            "  <p><strong>{}</strong></p>\n",
            "  <p>NIK: {}</p>\n",
            "  <p>Position: {}</p>\n",
        ),
        escape_html(&employee.name),
        escape_html(&employee.nik),
        escape_html(&employee.position),
    );
    if let Some(account) = employee
        .bank_account
        .as_deref()
        .filter(|account| !account.trim().is_empty())
    {
        let _ = writeln!(html, "  <p>Bank Account: {}</p>", escape_html(account));
    }
    html.push_str("</div>\n");
}

fn write_items(html: &mut String, invoice: &Invoice) {
    html.push_str(concat!(
        "<table>\n",
        "  <thead>\n",
        "    <tr>\n",
        "      <th>Description</th>\n",
        "      <th class=\"text-right\">Quantity</th>\n",
        "      <th class=\"text-right\">Unit Price</th>\n",
        "      <th class=\"text-right\">Total</th>\n",
        "    </tr>\n",
        "  </thead>\n",
        "  <tbody>\n",
    ));
    for item in &invoice.items {
        let _ = write!(
            html,
            concat!(
                "    <tr>\n",
                "      <td>{}</td>\n",
                "      <td class=\"text-right\">{}</td>\n",
                "      <td class=\"text-right\">{}</td>\n",
                "      <td class=\"text-right\">{}</td>\n",
                "    </tr>\n",
            ),
            escape_html(item.description_or_default()),
            item.display_quantity(),
            format_currency(item.display_unit_price()),
            format_currency(item.line_total()),
        );
    }
    html.push_str("  </tbody>\n</table>\n");
}
