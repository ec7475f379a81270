use actix_files::NamedFile;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpRequest, HttpResponse};
use uuid::Uuid;

use crate::generators::common::sanitize_filename;
use crate::generators::{request_scope, GeneratorError};
use crate::invoice::models::{CreateInvoiceRequest, Invoice};
use crate::{AppState, ErrorResponse};

#[utoipa::path(
    get,
    path = "/api/invoices",
    tag = "Invoices",
    responses(
        (status = 200, description = "List all invoices", body = Vec<Invoice>)
    )
)]
pub async fn get_all_invoices(state: web::Data<AppState>) -> Result<HttpResponse, GeneratorError> {
    let invoices = state.records.list_invoices().await?;
    Ok(HttpResponse::Ok().json(invoices))
}

#[utoipa::path(
    post,
    path = "/api/invoices",
    tag = "Invoices",
    request_body = CreateInvoiceRequest,
    responses(
        (status = 201, description = "Invoice created", body = Invoice),
        (status = 400, description = "Invalid or duplicate invoice", body = ErrorResponse),
        (status = 404, description = "Employee not found", body = ErrorResponse)
    )
)]
pub async fn create_invoice(
    state: web::Data<AppState>,
    item: web::Json<CreateInvoiceRequest>,
) -> Result<HttpResponse, GeneratorError> {
    let request = item.into_inner();
    if let Err(message) = request.validate() {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse::bad_request(&message)));
    }

    let invoice = state
        .records
        .create_invoice(Invoice::from_request(request))
        .await?;
    log::info!("Invoice {} created", invoice.invoice_number);
    Ok(HttpResponse::Created().json(invoice))
}

#[utoipa::path(
    get,
    path = "/api/invoices/{id}/pdf",
    tag = "Invoices",
    params(
        ("id" = Uuid, Path, description = "Invoice ID")
    ),
    responses(
        (status = 200, description = "Rendered invoice", body = Vec<u8>, content_type = "application/pdf"),
        (status = 404, description = "Invoice or employee not found", body = ErrorResponse),
        (status = 503, description = "Rendering busy, retry later", body = ErrorResponse),
        (status = 504, description = "Rendering timed out", body = ErrorResponse)
    )
)]
pub async fn get_invoice_pdf(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, GeneratorError> {
    let invoice_id = path.into_inner();
    let (cancel, _scope) = request_scope(state.config.generation_deadline);

    let (invoice, artifact) = state
        .documents
        .generate_invoice_pdf(invoice_id, &cancel)
        .await?;

    let download_name = format!(
        "invoice-{}.pdf",
        sanitize_filename(&invoice.invoice_number, "invoice")
    );
    let file = NamedFile::open_async(&artifact.output_path)
        .await
        .map_err(GeneratorError::Storage)?
        .set_content_disposition(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(download_name)],
        });

    Ok(file.into_response(&req))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/invoices")
            .route(web::get().to(get_all_invoices))
            .route(web::post().to(create_invoice)),
    )
    .service(web::resource("/invoices/{id}/pdf").route(web::get().to(get_invoice_pdf)));
}
