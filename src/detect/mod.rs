use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::core::{Category, Evidence, Finding, PenaltyWeights, Severity};
use crate::platform;

#[derive(Debug, Clone)]
pub struct DetectorContext {
    pub workdir: PathBuf,
    pub home_dir: PathBuf,
    pub timeout: Duration,
    pub deadline: Option<Instant>,
    pub privacy_mask_home: bool,
    pub weights: PenaltyWeights,
    pub exclude: Vec<String>,
}

impl DetectorContext {
    pub fn command_timeout(&self) -> Duration {
        let Some(deadline) = self.deadline else {
            return self.timeout;
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::cmp::min(self.timeout, remaining)
    }

    pub fn mask_path(&self, path: &Path) -> String {
        maybe_mask_home(path, &self.home_dir, self.privacy_mask_home)
    }
}

struct TextPattern {
    needle: &'static str,
    slug: &'static str,
    finding_type: &'static str,
    title: &'static str,
    severity: Severity,
}

const DANGEROUS_CALLS: &[TextPattern] = &[
    TextPattern {
        needle: "eval(",
        slug: "eval",
        finding_type: "DANGEROUS_CALL_EVAL",
        title: "危険な呼び出し: eval()（コード注入の可能性）",
        severity: Severity::Medium,
    },
    TextPattern {
        needle: "innerHTML",
        slug: "innerhtml",
        finding_type: "DANGEROUS_CALL_INNERHTML",
        title: "危険な代入: innerHTML =（XSSの可能性）",
        severity: Severity::Medium,
    },
];

const SECRET_IDENTIFIERS: &[&str] = &["password", "token", "secret", "apikey"];

const ENV_ACCESS_NEEDLES: &[&str] = &["process.env", "std::env::var"];

const BREAKING_MARKERS: &[TextPattern] = &[
    TextPattern {
        needle: "export default",
        slug: "export-default",
        finding_type: "BREAKING_MARKER_EXPORT_DEFAULT",
        title: "公開面に触れる変更: export default",
        severity: Severity::Low,
    },
    TextPattern {
        needle: "module.exports",
        slug: "module-exports",
        finding_type: "BREAKING_MARKER_MODULE_EXPORTS",
        title: "公開面に触れる変更: module.exports",
        severity: Severity::Low,
    },
    TextPattern {
        needle: "require(",
        slug: "require",
        finding_type: "BREAKING_MARKER_REQUIRE",
        title: "公開面に触れる変更: require()",
        severity: Severity::Low,
    },
];

const DANGEROUS_COMMANDS: &[(&str, &str)] = &[
    ("rm -rf", "rm-rf"),
    ("drop database", "drop-database"),
    ("delete from", "delete-from"),
    ("truncate", "truncate"),
];

/// eval / innerHTML= の検出。パターン種別ごとに所見は1件（出現数は統計に含める）。
pub fn dangerous_calls(ctx: &DetectorContext, origin: &str, text: &str) -> Vec<Finding> {
    let mut out = Vec::new();
    for pattern in DANGEROUS_CALLS {
        let hits = if pattern.slug == "innerhtml" {
            assignment_hits(text, pattern.needle)
        } else {
            substring_hits(text, pattern.needle, false)
        };
        if let Some(finding) = pattern_finding(ctx, origin, pattern, Category::Security, &hits) {
            out.push(finding);
        }
    }
    out
}

pub fn secret_identifiers(ctx: &DetectorContext, origin: &str, text: &str) -> Option<Finding> {
    let mut total = 0usize;
    let mut first_line = 0usize;
    let mut matched = Vec::new();
    for needle in SECRET_IDENTIFIERS {
        let hits = substring_hits(text, needle, true);
        if hits.is_empty() {
            continue;
        }
        if first_line == 0 || hits[0] < first_line {
            first_line = hits[0];
        }
        total += hits.len();
        matched.push(*needle);
    }
    if matched.is_empty() {
        return None;
    }

    Some(Finding {
        id: format!("secret-identifiers:{origin}"),
        finding_type: "SECRET_IDENTIFIER".to_string(),
        title: format!("秘密情報らしき識別子: {origin}"),
        category: Category::Security,
        severity: Severity::Medium,
        penalty: ctx.weights.penalty(Severity::Medium),
        evidence: vec![
            Evidence::path(origin, ctx.privacy_mask_home),
            Evidence::pattern(matched.join("|")),
            Evidence::stat(format!("line={first_line} hits={total}")),
        ],
    })
}

pub fn env_access(ctx: &DetectorContext, origin: &str, text: &str) -> Option<Finding> {
    for needle in ENV_ACCESS_NEEDLES {
        let hits = substring_hits(text, needle, false);
        if hits.is_empty() {
            continue;
        }
        return Some(Finding {
            id: format!("env-access:{origin}"),
            finding_type: "ENV_ACCESS".to_string(),
            title: format!("環境変数へのアクセス: {origin}"),
            category: Category::Security,
            severity: Severity::Low,
            penalty: ctx.weights.penalty(Severity::Low),
            evidence: vec![
                Evidence::path(origin, ctx.privacy_mask_home),
                Evidence::pattern((*needle).to_string()),
                Evidence::stat(format!("line={} hits={}", hits[0], hits.len())),
            ],
        });
    }
    None
}

pub fn breaking_markers(ctx: &DetectorContext, origin: &str, text: &str) -> Vec<Finding> {
    let mut out = Vec::new();
    for pattern in BREAKING_MARKERS {
        let hits = substring_hits(text, pattern.needle, false);
        if let Some(finding) =
            pattern_finding(ctx, origin, pattern, Category::BreakingChange, &hits)
        {
            out.push(finding);
        }
    }

    let import_hits = import_from_hits(text);
    if !import_hits.is_empty() {
        out.push(Finding {
            id: format!("breaking-marker:import-from:{origin}"),
            finding_type: "BREAKING_MARKER_IMPORT".to_string(),
            title: "公開面に触れる変更: import ... from".to_string(),
            category: Category::BreakingChange,
            severity: Severity::Low,
            penalty: ctx.weights.penalty(Severity::Low),
            evidence: vec![
                Evidence::path(origin, ctx.privacy_mask_home),
                Evidence::pattern("import ... from".to_string()),
                Evidence::stat(format!(
                    "line={} hits={}",
                    import_hits[0],
                    import_hits.len()
                )),
            ],
        });
    }
    out
}

pub fn dangerous_command(ctx: &DetectorContext, label: &str, cmd: &str) -> Vec<Finding> {
    let lowered = cmd.to_ascii_lowercase();
    let mut out = Vec::new();
    for (needle, slug) in DANGEROUS_COMMANDS {
        if !lowered.contains(needle) {
            continue;
        }
        out.push(Finding {
            id: format!("dangerous-command:{label}:{slug}"),
            finding_type: "DANGEROUS_COMMAND".to_string(),
            title: format!("破壊的コマンド: `{needle}` を含みます"),
            category: Category::Security,
            severity: Severity::Critical,
            penalty: ctx.weights.penalty(Severity::Critical),
            evidence: vec![
                Evidence::command(cmd.to_string()),
                Evidence::pattern((*needle).to_string()),
            ],
        });
    }
    out
}

/// argv0 の存在確認。存在しない場合と未観測の場合で所見を分ける。
pub fn command_availability(ctx: &DetectorContext, label: &str, cmd: &str) -> Option<Finding> {
    let argv0 = cmd.split_whitespace().next()?;
    let probe = format!("which {argv0}");

    let cmd_timeout = ctx.command_timeout();
    if cmd_timeout == Duration::from_secs(0) {
        return Some(Finding {
            id: format!("command-unobserved:{label}"),
            finding_type: "COMMAND_UNOBSERVED".to_string(),
            title: format!("コマンドの存在を確認できませんでした: {argv0}（タイムアウト予算消化）"),
            category: Category::OperationalRisk,
            severity: Severity::Low,
            penalty: ctx.weights.penalty(Severity::Low),
            evidence: vec![
                Evidence::command(probe),
                Evidence::stat("タイムアウト予算消化".to_string()),
            ],
        });
    }

    match platform::command_exists(argv0, cmd_timeout) {
        Ok(true) => None,
        Ok(false) => Some(Finding {
            id: format!("command-not-found:{label}"),
            finding_type: "COMMAND_NOT_FOUND".to_string(),
            title: format!("コマンドが見つかりません: {argv0}"),
            category: Category::OperationalRisk,
            severity: Severity::High,
            penalty: ctx.weights.penalty(Severity::High),
            evidence: vec![
                Evidence::command(probe),
                Evidence::stat(format!("argv0={argv0} 見つかりませんでした")),
            ],
        }),
        Err(err) => Some(Finding {
            id: format!("command-unobserved:{label}"),
            finding_type: "COMMAND_UNOBSERVED".to_string(),
            title: format!("コマンドの存在を確認できませんでした: {argv0}"),
            category: Category::OperationalRisk,
            severity: Severity::Low,
            penalty: ctx.weights.penalty(Severity::Low),
            evidence: vec![Evidence::command(probe), Evidence::stat(err.to_string())],
        }),
    }
}

fn pattern_finding(
    ctx: &DetectorContext,
    origin: &str,
    pattern: &TextPattern,
    category: Category,
    hits: &[usize],
) -> Option<Finding> {
    if hits.is_empty() {
        return None;
    }
    Some(Finding {
        id: format!("{}:{origin}", pattern.slug),
        finding_type: pattern.finding_type.to_string(),
        title: pattern.title.to_string(),
        category,
        severity: pattern.severity,
        penalty: ctx.weights.penalty(pattern.severity),
        evidence: vec![
            Evidence::path(origin, ctx.privacy_mask_home),
            Evidence::pattern(pattern.needle.to_string()),
            Evidence::stat(format!("line={} hits={}", hits[0], hits.len())),
        ],
    })
}

fn substring_hits(text: &str, needle: &str, case_insensitive: bool) -> Vec<usize> {
    let needle_lower = needle.to_ascii_lowercase();
    let mut hits = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let matched = if case_insensitive {
            line.to_ascii_lowercase().contains(&needle_lower)
        } else {
            line.contains(needle)
        };
        if matched {
            hits.push(idx + 1);
        }
    }
    hits
}

fn assignment_hits(text: &str, ident: &str) -> Vec<usize> {
    let mut hits = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if is_assignment_to(line, ident) {
            hits.push(idx + 1);
        }
    }
    hits
}

fn is_assignment_to(line: &str, ident: &str) -> bool {
    let Some(pos) = line.find(ident) else {
        return false;
    };
    let rest = line[pos + ident.len()..].trim_start();
    rest.starts_with('=') && !rest.starts_with("==")
}

fn import_from_hits(text: &str) -> Vec<usize> {
    let mut hits = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("import ") && trimmed.contains(" from ") {
            hits.push(idx + 1);
        }
    }
    hits
}

fn maybe_mask_home(path: &Path, home_dir: &Path, mask_home: bool) -> String {
    if !mask_home {
        return path.display().to_string();
    }

    let Ok(stripped) = path.strip_prefix(home_dir) else {
        return path.display().to_string();
    };
    let stripped = stripped.display().to_string();
    if stripped.is_empty() {
        "~".to_string()
    } else {
        format!("~/{stripped}")
    }
}
