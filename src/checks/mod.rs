use std::path::Path;
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::core::{Category, Evidence, Finding, Severity};
use crate::detect::DetectorContext;
use crate::platform;

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
    pub findings: Vec<Finding>,
}

impl CheckOutcome {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            detail: detail.into(),
            findings: vec![],
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>, findings: Vec<Finding>) -> Self {
        Self {
            name,
            passed: false,
            detail: detail.into(),
            findings,
        }
    }
}

const MANIFESTS: &[&str] = &["Cargo.toml", "package.json", "pyproject.toml", "go.mod"];

const LOCKFILES: &[(&str, &[&str])] = &[
    ("Cargo.toml", &["Cargo.lock"]),
    (
        "package.json",
        &["package-lock.json", "yarn.lock", "pnpm-lock.yaml"],
    ),
    ("pyproject.toml", &["poetry.lock", "uv.lock"]),
    ("go.mod", &["go.sum"]),
];

const SOURCE_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "rs", "py"];

const MAX_DEBUG_PRINT_FINDINGS: usize = 5;
const MAX_SCANNED_FILES: usize = 2000;

pub fn preflight_checks(ctx: &DetectorContext) -> Vec<CheckOutcome> {
    let mut out = Vec::new();
    let manifest = manifest_present(ctx);
    let manifest_name = manifest
        .passed
        .then(|| manifest.detail.clone());
    out.push(manifest);
    out.push(git_repository(ctx));
    if let Some(outcome) = dependencies_installed(ctx) {
        out.push(outcome);
    }
    if let Some(name) = manifest_name {
        if let Some(outcome) = lockfile_present(ctx, &name) {
            out.push(outcome);
        }
    }
    if let Some(outcome) = dependency_audit(ctx) {
        out.push(outcome);
    }
    out.push(debug_prints(ctx));
    out
}

fn manifest_present(ctx: &DetectorContext) -> CheckOutcome {
    for name in MANIFESTS {
        if ctx.workdir.join(name).is_file() {
            return CheckOutcome::pass("manifest", *name);
        }
    }

    let finding = Finding {
        id: "manifest-missing".to_string(),
        finding_type: "MANIFEST_MISSING".to_string(),
        title: "マニフェストが見つかりません（Cargo.toml / package.json など）".to_string(),
        category: Category::Environment,
        severity: Severity::Critical,
        penalty: ctx.weights.penalty(Severity::Critical),
        evidence: vec![
            Evidence::path(ctx.mask_path(&ctx.workdir), ctx.privacy_mask_home),
            Evidence::stat(format!("candidates={}", MANIFESTS.join(","))),
        ],
    };
    CheckOutcome::fail("manifest", "マニフェストなし", vec![finding])
}

fn git_repository(ctx: &DetectorContext) -> CheckOutcome {
    let cmd = "git rev-parse --git-dir";
    let cmd_timeout = ctx.command_timeout();

    if cmd_timeout == Duration::from_secs(0) {
        let finding = Finding {
            id: "git-repo-unobserved".to_string(),
            finding_type: "GIT_REPO_UNOBSERVED".to_string(),
            title: "Gitリポジトリの確認ができませんでした（タイムアウト予算消化）".to_string(),
            category: Category::Environment,
            severity: Severity::Medium,
            penalty: ctx.weights.penalty(Severity::Medium),
            evidence: vec![
                Evidence::command(cmd),
                Evidence::stat("タイムアウト予算消化".to_string()),
            ],
        };
        return CheckOutcome::fail("git", "未観測", vec![finding]);
    }

    match platform::run_command_in(
        "git",
        &["rev-parse", "--git-dir"],
        Some(&ctx.workdir),
        cmd_timeout,
    ) {
        Ok(output) if output.exit_code == 0 => CheckOutcome::pass("git", "リポジトリあり"),
        Ok(output) => {
            let finding = Finding {
                id: "git-repo-missing".to_string(),
                finding_type: "GIT_REPO_MISSING".to_string(),
                title: "Gitリポジトリではありません".to_string(),
                category: Category::Environment,
                severity: Severity::Medium,
                penalty: ctx.weights.penalty(Severity::Medium),
                evidence: vec![
                    Evidence::command(cmd),
                    Evidence::stat(format!("exit_code={}", output.exit_code)),
                ],
            };
            CheckOutcome::fail("git", "リポジトリなし", vec![finding])
        }
        Err(err) => {
            let finding = Finding {
                id: "git-repo-unobserved".to_string(),
                finding_type: "GIT_REPO_UNOBSERVED".to_string(),
                title: "Gitリポジトリの確認ができませんでした".to_string(),
                category: Category::Environment,
                severity: Severity::Medium,
                penalty: ctx.weights.penalty(Severity::Medium),
                evidence: vec![Evidence::command(cmd), Evidence::stat(err.to_string())],
            };
            CheckOutcome::fail("git", "未観測", vec![finding])
        }
    }
}

fn dependencies_installed(ctx: &DetectorContext) -> Option<CheckOutcome> {
    if !ctx.workdir.join("package.json").is_file() {
        return None;
    }

    if ctx.workdir.join("node_modules").is_dir() {
        return Some(CheckOutcome::pass("dependencies", "node_modules あり"));
    }

    let finding = Finding {
        id: "dependencies-missing".to_string(),
        finding_type: "DEPENDENCIES_MISSING".to_string(),
        title: "依存関係が未インストールです（node_modules がありません）".to_string(),
        category: Category::Dependency,
        severity: Severity::Medium,
        penalty: ctx.weights.penalty(Severity::Medium),
        evidence: vec![
            Evidence::path(ctx.mask_path(&ctx.workdir.join("node_modules")), ctx.privacy_mask_home),
            Evidence::stat("node_modules が存在しません（npm install を検討）".to_string()),
        ],
    };
    Some(CheckOutcome::fail(
        "dependencies",
        "node_modules なし",
        vec![finding],
    ))
}

fn lockfile_present(ctx: &DetectorContext, manifest: &str) -> Option<CheckOutcome> {
    let candidates = LOCKFILES
        .iter()
        .find(|(m, _)| *m == manifest)
        .map(|(_, locks)| *locks)?;

    for lock in candidates {
        if ctx.workdir.join(lock).is_file() {
            return Some(CheckOutcome::pass("lockfile", *lock));
        }
    }

    let finding = Finding {
        id: "lockfile-missing".to_string(),
        finding_type: "LOCKFILE_MISSING".to_string(),
        title: format!("ロックファイルが見つかりません（{manifest} に対応するもの）"),
        category: Category::Dependency,
        severity: Severity::Low,
        penalty: ctx.weights.penalty(Severity::Low),
        evidence: vec![Evidence::stat(format!(
            "candidates={}",
            candidates.join(",")
        ))],
    };
    Some(CheckOutcome::fail(
        "lockfile",
        "ロックファイルなし",
        vec![finding],
    ))
}

fn dependency_audit(ctx: &DetectorContext) -> Option<CheckOutcome> {
    if !ctx.workdir.join("package.json").is_file() || !ctx.workdir.join("node_modules").is_dir() {
        return None;
    }

    let cmd = "npm audit --audit-level=high";
    let cmd_timeout = ctx.command_timeout();
    if cmd_timeout == Duration::from_secs(0) {
        let finding = audit_unobserved(ctx, cmd, "タイムアウト予算消化");
        return Some(CheckOutcome::fail("audit", "未観測", vec![finding]));
    }

    match platform::run_command_in(
        "npm",
        &["audit", "--audit-level=high"],
        Some(&ctx.workdir),
        cmd_timeout,
    ) {
        Ok(output) if output.exit_code == 0 => {
            Some(CheckOutcome::pass("audit", "高リスクの脆弱性なし"))
        }
        Ok(output) => {
            let finding = Finding {
                id: "audit-vulnerabilities".to_string(),
                finding_type: "AUDIT_VULNERABILITIES".to_string(),
                title: "依存関係に脆弱性の疑いがあります（npm audit）".to_string(),
                category: Category::Dependency,
                severity: Severity::Medium,
                penalty: ctx.weights.penalty(Severity::Medium),
                evidence: vec![
                    Evidence::command(cmd),
                    Evidence::stat(format!("exit_code={}", output.exit_code)),
                ],
            };
            Some(CheckOutcome::fail("audit", "脆弱性の疑い", vec![finding]))
        }
        Err(err) => {
            let finding = audit_unobserved(ctx, cmd, &err.to_string());
            Some(CheckOutcome::fail("audit", "未観測", vec![finding]))
        }
    }
}

fn audit_unobserved(ctx: &DetectorContext, cmd: &str, reason: &str) -> Finding {
    Finding {
        id: "audit-unobserved".to_string(),
        finding_type: "AUDIT_UNOBSERVED".to_string(),
        title: "依存関係の監査ができませんでした（npm audit）".to_string(),
        category: Category::Dependency,
        severity: Severity::Low,
        penalty: ctx.weights.penalty(Severity::Low),
        evidence: vec![Evidence::command(cmd), Evidence::stat(reason.to_string())],
    }
}

/// ソース中のデバッグ出力（console.log / dbg! など）を走査する。
/// 所見は件数を抑える（上限超過は統計で補足）。
fn debug_prints(ctx: &DetectorContext) -> CheckOutcome {
    let Ok(exclude_set) = build_exclude_set(&ctx.exclude) else {
        return CheckOutcome::pass("debug-prints", "除外パターンが不正のためスキップ");
    };

    let mut findings = Vec::new();
    let mut hit_files = 0usize;
    let mut scanned = 0usize;
    let mut truncated = false;

    let walker = WalkDir::new(&ctx.workdir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !exclude_set.is_match(e.path()));

    for entry in walker {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !has_source_extension(path) || is_test_path(path) {
            continue;
        }

        if scanned >= MAX_SCANNED_FILES {
            truncated = true;
            break;
        }
        scanned += 1;

        let Ok(text) = std::fs::read_to_string(path) else {
            continue;
        };
        let Some((line, needle)) = first_debug_print(path, &text) else {
            continue;
        };

        hit_files += 1;
        if findings.len() >= MAX_DEBUG_PRINT_FINDINGS {
            continue;
        }

        let masked = ctx.mask_path(path);
        findings.push(Finding {
            id: format!("debug-print:{masked}"),
            finding_type: "DEBUG_PRINT_FOUND".to_string(),
            title: format!("デバッグ出力が残っています: {masked}"),
            category: Category::CodeQuality,
            severity: Severity::Low,
            penalty: ctx.weights.penalty(Severity::Low),
            evidence: vec![
                Evidence::path(masked.clone(), ctx.privacy_mask_home),
                Evidence::pattern(needle.to_string()),
                Evidence::stat(format!("line={line}")),
            ],
        });
    }

    if findings.is_empty() && !truncated {
        return CheckOutcome::pass("debug-prints", format!("走査: files={scanned}"));
    }

    let mut detail = format!("files={scanned} hit_files={hit_files}");
    if hit_files > findings.len() {
        detail.push_str(&format!(
            " 省略={}",
            hit_files.saturating_sub(findings.len())
        ));
    }
    if truncated {
        detail.push_str(" 走査打ち切り");
    }
    CheckOutcome::fail("debug-prints", detail, findings)
}

fn has_source_extension(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    SOURCE_EXTENSIONS.contains(&ext)
}

fn is_test_path(path: &Path) -> bool {
    path.components().any(|c| {
        let s = c.as_os_str().to_string_lossy();
        s == "tests" || s == "test" || s == "__tests__"
    }) || path
        .file_name()
        .map(|n| {
            let n = n.to_string_lossy();
            n.contains(".test.") || n.contains("_test.")
        })
        .unwrap_or(false)
}

fn first_debug_print(path: &Path, text: &str) -> Option<(usize, &'static str)> {
    let needles: &[&str] = match path.extension().and_then(|e| e.to_str()) {
        Some("js" | "jsx" | "ts" | "tsx") => &["console.log("],
        Some("rs") => &["dbg!("],
        Some("py") => &["print("],
        _ => return None,
    };

    for (idx, line) in text.lines().enumerate() {
        for needle in needles {
            if line.contains(needle) {
                return Some((idx + 1, needle));
            }
        }
    }
    None
}

fn build_exclude_set(excludes: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pat in [
        "**/node_modules",
        "**/node_modules/**",
        "**/.git",
        "**/.git/**",
        "**/target",
        "**/target/**",
    ] {
        builder.add(Glob::new(pat)?);
    }
    for pat in excludes {
        builder.add(Glob::new(pat)?);
    }
    builder.build()
}
