use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::generators::DataRecord;

/// A filled workbook produced from a template.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: Uuid,
    pub template_id: Uuid,
    #[schema(example = "January Payroll")]
    pub name: String,
    pub generated_path: String,
    /// The data record the report was filled with.
    #[schema(value_type = Object)]
    pub meta: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FillReportRequest {
    pub template_id: Uuid,
    #[schema(example = "January Payroll")]
    pub name: String,
    #[schema(value_type = Object, example = json!({"name": "Ada", "period": "Jan"}))]
    pub data: DataRecord,
}

impl FillReportRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FillReportResponse {
    pub report_id: Uuid,
    pub generated_path: String,
    /// Placeholder keys that had no value and were left in the workbook.
    pub unresolved_placeholders: Vec<String>,
    pub report: Report,
}
