use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use log::{error, info};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::generators::GeneratorError;
use crate::template::models::Template;
use crate::template::multipart_parser::MultipartParser;
use crate::{AppState, ErrorResponse};

#[derive(Debug, serde::Deserialize, ToSchema)]
pub struct UploadTemplateRequest {
    #[allow(unused)]
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
    #[allow(unused)]
    pub name: Option<String>,
    /// `workbook` or `invoice_markup` (`excel` and `invoice_html` are accepted too).
    #[allow(unused)]
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// JSON array of strings or a comma separated list.
    #[allow(unused)]
    pub placeholders: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteResponse {
    pub message: String,
}

#[utoipa::path(
    post,
    path = "/api/templates/upload",
    tag = "Templates",
    request_body(content = inline(UploadTemplateRequest), content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Template stored", body = Template),
        (status = 400, description = "Missing file or unsupported extension", body = ErrorResponse),
        (status = 413, description = "File exceeds the upload limit", body = ErrorResponse),
        (status = 500, description = "Internal Server Error", body = ErrorResponse)
    )
)]
pub async fn upload_template(
    payload: Multipart,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GeneratorError> {
    let upload = match MultipartParser::parse_template_multipart(payload).await {
        Ok(upload) => upload,
        Err(e) => {
            error!("Rejected template upload: {}", e);
            return Ok(e.into());
        }
    };
    info!(
        "Uploading template '{}' from {} ({} bytes)",
        upload.template.name,
        upload.original_filename,
        upload.file_data.len()
    );

    let template = state
        .templates
        .create_template(upload.template, upload.file_data)
        .await?;
    Ok(HttpResponse::Created().json(template))
}

#[utoipa::path(
    get,
    path = "/api/templates",
    tag = "Templates",
    responses(
        (status = 200, description = "List all templates, newest first", body = Vec<Template>)
    )
)]
pub async fn get_all_templates(state: web::Data<AppState>) -> Result<HttpResponse, GeneratorError> {
    let templates = state.templates.list_templates().await?;
    Ok(HttpResponse::Ok().json(templates))
}

#[utoipa::path(
    delete,
    path = "/api/templates/{id}",
    tag = "Templates",
    params(
        ("id" = Uuid, Path, description = "Template ID")
    ),
    responses(
        (status = 200, description = "Template and its reports deleted", body = DeleteResponse),
        (status = 404, description = "Template not found", body = ErrorResponse)
    )
)]
pub async fn delete_template(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, GeneratorError> {
    let id = path.into_inner();
    state.documents.delete_template(id).await?;
    Ok(HttpResponse::Ok().json(DeleteResponse {
        message: "Template deleted successfully".to_string(),
    }))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/templates/upload").route(web::post().to(upload_template)))
        .service(web::resource("/templates").route(web::get().to(get_all_templates)))
        .service(web::resource("/templates/{id}").route(web::delete().to(delete_template)));
}
