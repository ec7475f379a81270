use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    #[schema(example = "a1b2c3d4-e5f6-7890-1234-567890abcdef")]
    pub id: Uuid,
    /// Employee identifier shown on documents.
    #[schema(example = "EMP001")]
    pub nik: String,
    #[schema(example = "John Doe")]
    pub name: String,
    #[schema(example = "Software Engineer")]
    pub position: String,
    #[schema(example = "1234567890")]
    pub bank_account: Option<String>,
    #[schema(example = 50000)]
    pub salary: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateEmployeeRequest {
    #[schema(example = "EMP004")]
    pub nik: String,
    #[schema(example = "Alice Walker")]
    pub name: String,
    #[schema(example = "Accountant")]
    pub position: String,
    #[serde(default)]
    pub bank_account: Option<String>,
    #[schema(example = 42000)]
    pub salary: u64,
}

impl CreateEmployeeRequest {
    pub fn validate(&self) -> Result<(), String> {
        for (value, field) in [
            (&self.nik, "nik"),
            (&self.name, "name"),
            (&self.position, "position"),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{field} must not be empty"));
            }
        }
        Ok(())
    }
}

impl Employee {
    pub fn from_request(request: CreateEmployeeRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            nik: request.nik.trim().to_string(),
            name: request.name,
            position: request.position,
            bank_account: request.bank_account.filter(|account| !account.trim().is_empty()),
            salary: request.salary,
            created_at: Utc::now(),
        }
    }
}
