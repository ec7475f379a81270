use actix_files::NamedFile;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpRequest, HttpResponse};
use uuid::Uuid;

use crate::generators::common::sanitize_filename;
use crate::generators::{request_scope, GeneratorError};
use crate::report::models::{FillReportRequest, FillReportResponse, Report};
use crate::template::handlers::DeleteResponse;
use crate::{AppState, ErrorResponse};

#[utoipa::path(
    get,
    path = "/api/reports",
    tag = "Reports",
    responses(
        (status = 200, description = "List all reports, newest first", body = Vec<Report>)
    )
)]
pub async fn get_all_reports(state: web::Data<AppState>) -> Result<HttpResponse, GeneratorError> {
    let reports = state.records.list_reports().await?;
    Ok(HttpResponse::Ok().json(reports))
}

#[utoipa::path(
    post,
    path = "/api/reports/fill",
    tag = "Reports",
    request_body = FillReportRequest,
    responses(
        (status = 201, description = "Report generated", body = FillReportResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 404, description = "Template not found", body = ErrorResponse),
        (status = 422, description = "Template is not a readable workbook", body = ErrorResponse)
    )
)]
pub async fn fill_report(
    state: web::Data<AppState>,
    item: web::Json<FillReportRequest>,
) -> Result<HttpResponse, GeneratorError> {
    let (cancel, _scope) = request_scope(state.config.generation_deadline);
    let filled = state
        .documents
        .fill_report(item.into_inner(), &cancel)
        .await?;

    Ok(HttpResponse::Created().json(FillReportResponse {
        report_id: filled.report.id,
        generated_path: filled.report.generated_path.clone(),
        unresolved_placeholders: filled.substitution.unresolved.into_iter().collect(),
        report: filled.report,
    }))
}

#[utoipa::path(
    get,
    path = "/api/reports/{id}/download",
    tag = "Reports",
    params(
        ("id" = Uuid, Path, description = "Report ID")
    ),
    responses(
        (status = 200, description = "Filled workbook", body = Vec<u8>,
            content_type = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        (status = 404, description = "Report or file not found", body = ErrorResponse)
    )
)]
pub async fn download_report(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, GeneratorError> {
    let id = path.into_inner();
    let report = state.records.get_report(id).await?;

    let file = match NamedFile::open_async(&report.generated_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GeneratorError::not_found("report file", id));
        }
        Err(e) => return Err(GeneratorError::Storage(e)),
    };

    let download_name = format!("{}.xlsx", sanitize_filename(&report.name, "report"));
    Ok(file
        .set_content_disposition(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(download_name)],
        })
        .into_response(&req))
}

#[utoipa::path(
    delete,
    path = "/api/reports/{id}",
    tag = "Reports",
    params(
        ("id" = Uuid, Path, description = "Report ID")
    ),
    responses(
        (status = 200, description = "Report deleted", body = DeleteResponse),
        (status = 404, description = "Report not found", body = ErrorResponse)
    )
)]
pub async fn delete_report(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, GeneratorError> {
    state.documents.delete_report(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(DeleteResponse {
        message: "Report deleted successfully".to_string(),
    }))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/reports").route(web::get().to(get_all_reports)))
        .service(web::resource("/reports/fill").route(web::post().to(fill_report)))
        .service(web::resource("/reports/{id}/download").route(web::get().to(download_report)))
        .service(web::resource("/reports/{id}").route(web::delete().to(delete_report)));
}
