use crate::core::{Finding, RiskLevel, Verdict};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub checks_passed: u32,
    pub checks_failed: u32,
    pub operations_total: u32,
    pub operations_would_fail: u32,
    pub estimated_duration_secs: u64,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub schema_version: String,
    pub tool_version: String,
    pub workdir: String,
    pub generated_at: String,
    pub confidence: u32,
    pub risk_level: RiskLevel,
    pub verdict: Verdict,
    pub summary: ReportSummary,
    pub findings: Vec<Finding>,
}
