use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::{Category, Evidence, Finding, Severity};
use crate::detect::{self, DetectorContext};

#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub operation: Vec<PlannedOp>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PlannedOp {
    File {
        op: FileOp,
        path: String,
        #[serde(default)]
        content: Option<String>,
    },
    Command {
        cmd: String,
    },
    Api {
        endpoint: String,
        method: String,
        #[serde(default)]
        payload_keys: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOp {
    Create,
    Read,
    Update,
    Delete,
}

impl FileOp {
    const fn as_str(self) -> &'static str {
        match self {
            FileOp::Create => "create",
            FileOp::Read => "read",
            FileOp::Update => "update",
            FileOp::Delete => "delete",
        }
    }

    const fn needs_existing(self) -> bool {
        matches!(self, FileOp::Read | FileOp::Update | FileOp::Delete)
    }

    const fn writes(self) -> bool {
        matches!(self, FileOp::Create | FileOp::Update | FileOp::Delete)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulationOutcome {
    pub findings: Vec<Finding>,
    pub notes: Vec<String>,
    pub operations_total: u32,
    pub operations_would_fail: u32,
    pub estimated_duration_secs: u64,
}

pub fn load_plan(path: &Path) -> Result<Plan> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("プランの読み取りに失敗しました: {}", path.display()))?;
    toml::from_str(&s).context("プラン(TOML)の解析に失敗しました")
}

/// プランの各操作を実行せずに評価する。実際の変更は一切行わない。
pub fn evaluate(ctx: &DetectorContext, plan: &Plan) -> SimulationOutcome {
    let has_auth_token =
        std::env::var_os("API_TOKEN").is_some() || std::env::var_os("AUTH_TOKEN").is_some();

    let mut out = SimulationOutcome::default();
    let mut endpoint_counts: BTreeMap<String, usize> = BTreeMap::new();

    for (idx, op) in plan.operation.iter().enumerate() {
        let label = format!("op-{}", idx + 1);
        out.operations_total += 1;
        match op {
            PlannedOp::File { op, path, content } => {
                evaluate_file(ctx, &label, *op, path, content.as_deref(), &mut out);
            }
            PlannedOp::Command { cmd } => {
                evaluate_command(ctx, &label, cmd, &mut out);
            }
            PlannedOp::Api {
                endpoint,
                method,
                payload_keys,
            } => {
                *endpoint_counts.entry(endpoint.clone()).or_insert(0) += 1;
                evaluate_api(ctx, &label, endpoint, method, payload_keys, has_auth_token, &mut out);
            }
        }
    }

    for (endpoint, count) in endpoint_counts {
        if count <= 10 {
            continue;
        }
        out.findings.push(Finding {
            id: format!("rate-limit:{endpoint}"),
            finding_type: "RATE_LIMIT_RISK".to_string(),
            title: format!("レート制限の可能性: {endpoint}（{count}回）"),
            category: Category::OperationalRisk,
            severity: Severity::Low,
            penalty: ctx.weights.penalty(Severity::Low),
            evidence: vec![Evidence::stat(format!("endpoint={endpoint} count={count}"))],
        });
    }

    out
}

fn evaluate_file(
    ctx: &DetectorContext,
    label: &str,
    op: FileOp,
    path: &str,
    content: Option<&str>,
    out: &mut SimulationOutcome,
) {
    let resolved = resolve(ctx, path);
    let masked = ctx.mask_path(&resolved);
    let mut would_succeed = true;
    let mut reason = None;

    if op.needs_existing() && !resolved.exists() {
        would_succeed = false;
        reason = Some("ファイルが存在しません".to_string());
        out.findings.push(Finding {
            id: format!("file-missing:{label}"),
            finding_type: "FILE_MISSING".to_string(),
            title: format!("対象ファイルが存在しません: {masked}（{}）", op.as_str()),
            category: Category::OperationalRisk,
            severity: Severity::High,
            penalty: ctx.weights.penalty(Severity::High),
            evidence: vec![Evidence::path(masked.clone(), ctx.privacy_mask_home)],
        });
    }

    if would_succeed && op.writes() {
        let parent = resolved
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| ctx.workdir.clone());
        if !parent.is_dir() {
            would_succeed = false;
            reason = Some("親ディレクトリが存在しません".to_string());
            out.findings.push(Finding {
                id: format!("no-parent-dir:{label}"),
                finding_type: "NO_PARENT_DIR".to_string(),
                title: format!(
                    "書き込み先の親ディレクトリがありません: {}",
                    ctx.mask_path(&parent)
                ),
                category: Category::OperationalRisk,
                severity: Severity::High,
                penalty: ctx.weights.penalty(Severity::High),
                evidence: vec![Evidence::path(ctx.mask_path(&parent), ctx.privacy_mask_home)],
            });
        } else if std::fs::metadata(&parent)
            .map(|m| m.permissions().readonly())
            .unwrap_or(false)
        {
            would_succeed = false;
            reason = Some("書き込み権限がありません".to_string());
            out.findings.push(Finding {
                id: format!("no-write-permission:{label}"),
                finding_type: "NO_WRITE_PERMISSION".to_string(),
                title: format!(
                    "書き込み権限がありません: {}",
                    ctx.mask_path(&parent)
                ),
                category: Category::OperationalRisk,
                severity: Severity::High,
                penalty: ctx.weights.penalty(Severity::High),
                evidence: vec![Evidence::path(ctx.mask_path(&parent), ctx.privacy_mask_home)],
            });
        }
    }

    if matches!(op, FileOp::Create | FileOp::Update) {
        if let Some(content) = content {
            out.findings
                .extend(detect::breaking_markers(ctx, &masked, content));
        }
    }

    if would_succeed {
        out.notes
            .push(format!("シミュレーション: {label} file {} {masked} -> OK", op.as_str()));
    } else {
        out.operations_would_fail += 1;
        out.notes.push(format!(
            "シミュレーション: {label} file {} {masked} -> 失敗見込み（{}）",
            op.as_str(),
            reason.unwrap_or_else(|| "不明".to_string())
        ));
    }
}

fn evaluate_command(ctx: &DetectorContext, label: &str, cmd: &str, out: &mut SimulationOutcome) {
    out.findings.extend(detect::dangerous_command(ctx, label, cmd));

    let mut would_succeed = true;
    let mut reason = None;
    if let Some(finding) = detect::command_availability(ctx, label, cmd) {
        if finding.finding_type == "COMMAND_NOT_FOUND" {
            would_succeed = false;
            reason = Some(finding.title.clone());
        }
        out.findings.push(finding);
    }

    let duration = estimated_duration_secs(cmd);
    out.estimated_duration_secs += duration;

    if would_succeed {
        out.notes.push(format!(
            "シミュレーション: {label} command `{cmd}` -> OK（推定 {duration}s）"
        ));
    } else {
        out.operations_would_fail += 1;
        out.notes.push(format!(
            "シミュレーション: {label} command `{cmd}` -> 失敗見込み（{}）",
            reason.unwrap_or_else(|| "不明".to_string())
        ));
    }
}

fn evaluate_api(
    ctx: &DetectorContext,
    label: &str,
    endpoint: &str,
    method: &str,
    payload_keys: &[String],
    has_auth_token: bool,
    out: &mut SimulationOutcome,
) {
    let method = method.trim().to_ascii_uppercase();

    if !has_auth_token {
        out.findings.push(Finding {
            id: format!("no-auth-token:{label}"),
            finding_type: "NO_AUTH_TOKEN".to_string(),
            title: "認証トークンが見つかりません（API_TOKEN / AUTH_TOKEN）".to_string(),
            category: Category::Environment,
            severity: Severity::Medium,
            penalty: ctx.weights.penalty(Severity::Medium),
            evidence: vec![Evidence::stat(format!("endpoint={endpoint} method={method}"))],
        });
    }

    if matches!(method.as_str(), "POST" | "PUT" | "PATCH") && payload_keys.is_empty() {
        out.findings.push(Finding {
            id: format!("empty-payload:{label}"),
            finding_type: "EMPTY_PAYLOAD".to_string(),
            title: format!("更新系リクエストのペイロードが空です: {method} {endpoint}"),
            category: Category::OperationalRisk,
            severity: Severity::Medium,
            penalty: ctx.weights.penalty(Severity::Medium),
            evidence: vec![Evidence::stat(format!("method={method} payload_keys=0"))],
        });
    }

    out.notes
        .push(format!("シミュレーション: {label} api {method} {endpoint} -> OK"));
}

fn resolve(ctx: &DetectorContext, path: &str) -> PathBuf {
    let p = PathBuf::from(path);
    if p.is_absolute() {
        p
    } else {
        ctx.workdir.join(p)
    }
}

fn estimated_duration_secs(cmd: &str) -> u64 {
    let mut secs = 0u64;
    if cmd.contains("npm install") {
        secs += 30;
    }
    if cmd.contains("npm test") || cmd.contains("cargo test") {
        secs += 60;
    }
    if cmd.contains("build") {
        secs += 120;
    }
    secs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PenaltyWeights;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    fn make_temp_workdir() -> PathBuf {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "riskgate-simulate-test-{}-{seq}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("create workdir");
        dir
    }

    fn ctx(workdir: PathBuf) -> DetectorContext {
        DetectorContext {
            workdir,
            home_dir: std::env::temp_dir(),
            timeout: Duration::from_secs(5),
            deadline: None,
            privacy_mask_home: true,
            weights: PenaltyWeights::default(),
            exclude: vec![],
        }
    }

    #[test]
    fn plan_toml_parses_operations() {
        let plan: Plan = toml::from_str(
            r#"
[[operation]]
kind = "file"
op = "create"
path = "generated.js"
content = "const x = 1;\n"

[[operation]]
kind = "command"
cmd = "npm test"

[[operation]]
kind = "api"
endpoint = "/api/users"
method = "GET"
"#,
        )
        .expect("parse plan");
        assert_eq!(plan.operation.len(), 3);
        assert!(matches!(
            plan.operation[0],
            PlannedOp::File {
                op: FileOp::Create,
                ..
            }
        ));
    }

    #[test]
    fn missing_file_for_read_is_a_high_finding() {
        let dir = make_temp_workdir();
        let c = ctx(dir.clone());
        let mut out = SimulationOutcome::default();
        evaluate_file(&c, "op-1", FileOp::Read, "missing.txt", None, &mut out);
        assert_eq!(out.operations_would_fail, 1);
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.findings[0].finding_type, "FILE_MISSING");
        assert_eq!(out.findings[0].penalty, 25);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn create_in_writable_dir_succeeds_without_findings() {
        let dir = make_temp_workdir();
        let c = ctx(dir.clone());
        let mut out = SimulationOutcome::default();
        evaluate_file(&c, "op-1", FileOp::Create, "new.txt", None, &mut out);
        assert_eq!(out.operations_would_fail, 0);
        assert!(out.findings.is_empty());
        assert!(out.notes.iter().any(|n| n.ends_with("-> OK")));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn create_under_missing_parent_would_fail() {
        let dir = make_temp_workdir();
        let c = ctx(dir.clone());
        let mut out = SimulationOutcome::default();
        evaluate_file(&c, "op-1", FileOp::Create, "no/such/dir/new.txt", None, &mut out);
        assert_eq!(out.operations_would_fail, 1);
        assert_eq!(out.findings[0].finding_type, "NO_PARENT_DIR");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn update_content_with_markers_adds_breaking_findings() {
        let dir = make_temp_workdir();
        std::fs::write(dir.join("mod.js"), b"old\n").expect("write");
        let c = ctx(dir.clone());
        let mut out = SimulationOutcome::default();
        evaluate_file(
            &c,
            "op-1",
            FileOp::Update,
            "mod.js",
            Some("module.exports = x;\n"),
            &mut out,
        );
        assert_eq!(out.operations_would_fail, 0);
        assert!(
            out.findings
                .iter()
                .any(|f| f.finding_type == "BREAKING_MARKER_MODULE_EXPORTS")
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn mutating_api_without_payload_is_flagged() {
        let dir = make_temp_workdir();
        let c = ctx(dir.clone());
        let mut out = SimulationOutcome::default();
        evaluate_api(&c, "op-1", "/api/users", "post", &[], true, &mut out);
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.findings[0].finding_type, "EMPTY_PAYLOAD");

        let mut out = SimulationOutcome::default();
        evaluate_api(
            &c,
            "op-2",
            "/api/users",
            "GET",
            &[],
            true,
            &mut out,
        );
        assert!(out.findings.is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_auth_token_is_flagged_per_call() {
        let dir = make_temp_workdir();
        let c = ctx(dir.clone());
        let mut out = SimulationOutcome::default();
        evaluate_api(&c, "op-1", "/api/users", "GET", &[], false, &mut out);
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.findings[0].finding_type, "NO_AUTH_TOKEN");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn duration_estimates_accumulate() {
        assert_eq!(estimated_duration_secs("npm install"), 30);
        assert_eq!(estimated_duration_secs("npm test"), 60);
        assert_eq!(estimated_duration_secs("cargo build --release"), 120);
        assert_eq!(estimated_duration_secs("ls"), 0);
    }
}
