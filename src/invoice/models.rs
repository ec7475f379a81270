use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    #[default]
    Pending,
    Paid,
    Overdue,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
        }
    }
}

/// One billed line. Quantity and price are descriptive; the invoice total is `amount`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceLineItem {
    #[serde(default)]
    #[schema(example = "Consulting")]
    pub description: String,
    #[serde(default)]
    #[schema(example = 2)]
    pub quantity: Option<u64>,
    #[serde(default, alias = "price")]
    #[schema(example = 1500)]
    pub unit_price: Option<u64>,
}

impl InvoiceLineItem {
    pub fn description_or_default(&self) -> &str {
        match self.description.trim() {
            "" => "Service",
            description => description,
        }
    }

    /// Quantity shown on documents; a missing or zero quantity counts as one.
    pub fn display_quantity(&self) -> u64 {
        match self.quantity {
            None | Some(0) => 1,
            Some(quantity) => quantity,
        }
    }

    pub fn display_unit_price(&self) -> u64 {
        self.unit_price.unwrap_or(0)
    }

    pub fn line_total(&self) -> u64 {
        self.display_quantity()
            .saturating_mul(self.display_unit_price())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: Uuid,
    #[schema(example = "INV-2025-001")]
    pub invoice_number: String,
    pub employee_id: Uuid,
    #[schema(example = 5000)]
    pub amount: u64,
    #[serde(default)]
    pub items: Vec<InvoiceLineItem>,
    #[serde(default)]
    pub pdf_path: Option<String>,
    #[serde(default)]
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoiceRequest {
    #[schema(example = "INV-2025-004")]
    pub invoice_number: String,
    pub employee_id: Uuid,
    #[schema(example = 5000)]
    pub amount: u64,
    #[serde(default)]
    pub items: Vec<InvoiceLineItem>,
    #[serde(default)]
    pub status: InvoiceStatus,
}

impl CreateInvoiceRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.invoice_number.trim().is_empty() {
            return Err("invoiceNumber must not be empty".to_string());
        }
        Ok(())
    }
}

impl Invoice {
    pub fn from_request(request: CreateInvoiceRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            invoice_number: request.invoice_number.trim().to_string(),
            employee_id: request.employee_id,
            amount: request.amount,
            items: request.items,
            pdf_path: None,
            status: request.status,
            created_at: Utc::now(),
        }
    }
}
