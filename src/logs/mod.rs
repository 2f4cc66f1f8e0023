use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::Report;

#[derive(Debug, Serialize)]
struct GateLog {
    schema_version: &'static str,
    tool_version: String,
    command: &'static str,
    started_at: String,
    finished_at: String,
    workdir: String,
    confidence: u32,
    risk_level: String,
    banner: String,
    blocking: bool,
    findings: Vec<GateLogFinding>,
}

#[derive(Debug, Serialize)]
struct GateLogFinding {
    id: String,
    #[serde(rename = "type")]
    finding_type: String,
    title: String,
    category: String,
    severity: String,
    penalty: u32,
}

pub fn logs_dir(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/riskgate/logs")
}

/// ブロック判定の監査ログを書く。判定がブロックのときだけ呼ばれる。
pub fn write_gate_log(
    home_dir: &Path,
    command: &'static str,
    started_at: OffsetDateTime,
    finished_at: OffsetDateTime,
    report: &Report,
) -> Result<PathBuf> {
    let dir = logs_dir(home_dir);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("ログディレクトリの作成に失敗しました: {}", dir.display()))?;

    let pid = std::process::id();
    let ts = finished_at.unix_timestamp_nanos();
    let file_name = format!("{command}-{pid}-{ts}.json");
    let path = dir.join(file_name);

    let log = GateLog {
        schema_version: "1.0",
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        command,
        started_at: started_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string()),
        finished_at: finished_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string()),
        workdir: report.workdir.clone(),
        confidence: report.confidence,
        risk_level: report.risk_level.to_string(),
        banner: report.verdict.banner.clone(),
        blocking: report.verdict.blocking,
        findings: report
            .findings
            .iter()
            .map(|f| GateLogFinding {
                id: f.id.clone(),
                finding_type: f.finding_type.clone(),
                title: f.title.clone(),
                category: f.category.to_string(),
                severity: f.severity.to_string(),
                penalty: f.penalty,
            })
            .collect(),
    };

    let buf = serde_json::to_vec_pretty(&log).context("ログ(JSON)のシリアライズに失敗しました")?;
    std::fs::write(&path, buf)
        .with_context(|| format!("ログの書き込みに失敗しました: {}", path.display()))?;
    Ok(path)
}
