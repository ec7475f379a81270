use actix_cors::Cors;
use actix_web::error::InternalError;
use actix_web::middleware::Compress;
use actix_web::{http::header, web, App, HttpResponse, HttpServer};
use actix_web_prometheus::PrometheusMetricsBuilder;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

pub mod config;
pub mod db;
pub mod employee;
pub mod generators;
pub mod invoice;
pub mod report;
pub mod storage;
pub mod template;

pub use crate::config::AppConfig;
pub use crate::db::AppState;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            error: error_type.to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn not_found(message: &str) -> Self {
        Self::new("NotFound", message)
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new("BadRequest", message)
    }

    pub fn internal_error(message: &str) -> Self {
        Self::new("InternalServerError", message)
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::employee::handlers::get_all_employees,
        crate::employee::handlers::create_employee,
        crate::invoice::handlers::get_all_invoices,
        crate::invoice::handlers::create_invoice,
        crate::invoice::handlers::get_invoice_pdf,
        crate::template::handlers::upload_template,
        crate::template::handlers::get_all_templates,
        crate::template::handlers::delete_template,
        crate::report::handlers::get_all_reports,
        crate::report::handlers::fill_report,
        crate::report::handlers::download_report,
        crate::report::handlers::delete_report
    ),
    components(
        schemas(
            employee::models::Employee,
            employee::models::CreateEmployeeRequest,
            invoice::models::Invoice,
            invoice::models::InvoiceLineItem,
            invoice::models::InvoiceStatus,
            invoice::models::CreateInvoiceRequest,
            template::models::Template,
            template::models::TemplateKind,
            template::handlers::UploadTemplateRequest,
            template::handlers::DeleteResponse,
            report::models::Report,
            report::models::FillReportRequest,
            report::models::FillReportResponse,
            generators::GeneratedArtifact,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Employees", description = "Employee records."),
        (name = "Invoices", description = "Invoice records and PDF rendering."),
        (name = "Templates", description = "Template upload and management."),
        (name = "Reports", description = "Workbook filling and report downloads.")
    ),
    servers(
        (url = "http://127.0.0.1:8080", description = "Localhost server")
    )
)]
pub struct ApiDoc;

/// Register every `/api` route.
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .configure(employee::handlers::config)
            .configure(invoice::handlers::config)
            .configure(template::handlers::config)
            .configure(report::handlers::config),
    );
}

/// JSON extractor settings that report malformed bodies as `ErrorResponse`.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(4 * 1024 * 1024)
        .error_handler(|err, _req| {
            let message = err.to_string();
            InternalError::from_response(
                err,
                HttpResponse::BadRequest().json(ErrorResponse::bad_request(&message)),
            )
            .into()
        })
}

async fn render_metrics(state: web::Data<AppState>) -> HttpResponse {
    let mut buffer = Vec::new();
    match TextEncoder::new().encode(&state.metrics.gather(), &mut buffer) {
        Ok(()) => HttpResponse::Ok()
            .content_type(prometheus::TEXT_FORMAT)
            .body(buffer),
        Err(e) => HttpResponse::InternalServerError()
            .json(ErrorResponse::internal_error(&e.to_string())),
    }
}

pub async fn run() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let bind = (config.bind_addr.clone(), config.port);
    let cors_origins = config.cors_origins.clone();

    let app_state = match AppState::new(config) {
        Ok(state) => web::Data::new(state),
        Err(e) => {
            log::error!(
                "Failed to initialise storage. Check UPLOAD_DIR and DATA_FILE in .env. Error: {}",
                e
            );
            std::process::exit(1);
        }
    };

    let prometheus = PrometheusMetricsBuilder::new("payroll_docgen_server")
        .endpoint("/metrics")
        .build()
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    log::info!("Starting server at http://{}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        let app_state = app_state.clone();
        let prometheus = prometheus.clone();
        let cors = cors_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
            .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
            .expose_headers(vec![header::CONTENT_DISPOSITION])
            .max_age(3600);

        App::new()
            .wrap(Compress::default())
            .wrap(prometheus)
            .wrap(cors)
            .app_data(app_state)
            .app_data(json_config())
            .configure(configure_api)
            .service(web::resource("/metrics/render").route(web::get().to(render_metrics)))
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
    })
    .keep_alive(actix_web::http::KeepAlive::Os)
    .bind(bind)?
    .run()
    .await
}
