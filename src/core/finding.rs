use crate::core::{Category, Evidence, Severity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    #[serde(rename = "type")]
    pub finding_type: String,
    pub title: String,
    pub category: Category,
    pub severity: Severity,
    pub penalty: u32,
    pub evidence: Vec<Evidence>,
}
