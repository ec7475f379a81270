use actix_web::{web, HttpResponse};

use crate::employee::models::{CreateEmployeeRequest, Employee};
use crate::generators::GeneratorError;
use crate::{AppState, ErrorResponse};

#[utoipa::path(
    get,
    path = "/api/employees",
    tag = "Employees",
    responses(
        (status = 200, description = "List all employees", body = Vec<Employee>)
    )
)]
pub async fn get_all_employees(state: web::Data<AppState>) -> Result<HttpResponse, GeneratorError> {
    let employees = state.records.list_employees().await?;
    Ok(HttpResponse::Ok().json(employees))
}

#[utoipa::path(
    post,
    path = "/api/employees",
    tag = "Employees",
    request_body = CreateEmployeeRequest,
    responses(
        (status = 201, description = "Employee created", body = Employee),
        (status = 400, description = "Invalid or duplicate employee", body = ErrorResponse)
    )
)]
pub async fn create_employee(
    state: web::Data<AppState>,
    item: web::Json<CreateEmployeeRequest>,
) -> Result<HttpResponse, GeneratorError> {
    let request = item.into_inner();
    if let Err(message) = request.validate() {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse::bad_request(&message)));
    }

    let employee = state
        .records
        .create_employee(Employee::from_request(request))
        .await?;
    log::info!("Employee {} created ({})", employee.id, employee.nik);
    Ok(HttpResponse::Created().json(employee))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/employees")
            .route(web::get().to(get_all_employees))
            .route(web::post().to(create_employee)),
    );
}
