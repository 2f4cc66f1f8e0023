use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::core::{Category, Evidence, Finding, Severity};
use crate::detect::{self, DetectorContext};

#[derive(Debug, Clone)]
pub struct ImpactRequest {
    pub files: Vec<PathBuf>,
    pub before: Option<PathBuf>,
    pub after: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ImpactOutput {
    pub findings: Vec<Finding>,
    pub notes: Vec<String>,
}

const MAX_DEPENDENT_FINDINGS: usize = 25;

pub fn analyze(ctx: &DetectorContext, req: &ImpactRequest) -> Result<ImpactOutput> {
    let mut out = ImpactOutput::default();

    for file in &req.files {
        analyze_file(ctx, file, &mut out)?;
    }

    if let (Some(before), Some(after)) = (&req.before, &req.after) {
        let before_text = std::fs::read_to_string(before)
            .with_context(|| format!("変更前ファイルの読み取りに失敗しました: {}", before.display()))?;
        let after_text = std::fs::read_to_string(after)
            .with_context(|| format!("変更後ファイルの読み取りに失敗しました: {}", after.display()))?;
        out.findings
            .extend(breaking_diff(ctx, &before_text, &after_text));
    }

    Ok(out)
}

fn analyze_file(ctx: &DetectorContext, file: &Path, out: &mut ImpactOutput) -> Result<()> {
    let path = if file.is_absolute() {
        file.to_path_buf()
    } else {
        ctx.workdir.join(file)
    };
    let masked = ctx.mask_path(&path);

    if !path.exists() {
        out.notes.push(format!("新規ファイル: {masked}"));
        return Ok(());
    }
    out.notes.push(format!("変更対象: {masked}"));

    match std::fs::read_to_string(&path) {
        Ok(text) => {
            out.findings
                .extend(detect::dangerous_calls(ctx, &masked, &text));
            out.findings
                .extend(detect::secret_identifiers(ctx, &masked, &text));
            out.findings.extend(detect::env_access(ctx, &masked, &text));
        }
        Err(err) => {
            out.findings.push(Finding {
                id: format!("file-unreadable:{masked}"),
                finding_type: "FILE_UNREADABLE".to_string(),
                title: format!("対象ファイルを読み取れませんでした: {masked}"),
                category: Category::OperationalRisk,
                severity: Severity::Medium,
                penalty: ctx.weights.penalty(Severity::Medium),
                evidence: vec![
                    Evidence::path(masked.clone(), ctx.privacy_mask_home),
                    Evidence::stat(err.to_string()),
                ],
            });
            return Ok(());
        }
    }

    if let Some(test_path) = related_test(&path) {
        out.notes
            .push(format!("関連テスト: {}", ctx.mask_path(&test_path)));
    }

    scan_dependents(ctx, &path, out)?;
    Ok(())
}

/// 対象のファイル名を参照しているファイルを作業ディレクトリから探す。
/// 各参照は間接的な影響（operational-risk）として記録する。
fn scan_dependents(ctx: &DetectorContext, target: &Path, out: &mut ImpactOutput) -> Result<()> {
    let Some(basename) = target.file_name().and_then(|n| n.to_str()) else {
        return Ok(());
    };

    let exclude_set = build_exclude_set(&ctx.exclude)?;
    let mut dependents = 0usize;
    let mut errors = 0usize;

    let walker = WalkDir::new(&ctx.workdir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !exclude_set.is_match(e.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => {
                errors += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path == target || !is_source_file(path) {
            continue;
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => {
                errors += 1;
                continue;
            }
        };
        let Some(line) = text
            .lines()
            .position(|l| l.contains(basename))
            .map(|idx| idx + 1)
        else {
            continue;
        };

        dependents += 1;
        if dependents > MAX_DEPENDENT_FINDINGS {
            continue;
        }

        let masked = ctx.mask_path(path);
        out.findings.push(Finding {
            id: format!("dependent:{masked}"),
            finding_type: "DEPENDENT_REFERENCE".to_string(),
            title: format!("間接的な影響: {masked} が {basename} を参照しています"),
            category: Category::OperationalRisk,
            severity: Severity::Low,
            penalty: ctx.weights.penalty(Severity::Low),
            evidence: vec![
                Evidence::path(masked.clone(), ctx.privacy_mask_home),
                Evidence::stat(format!("line={line} needle={basename}")),
            ],
        });
    }

    out.notes
        .push(format!("依存スキャン: {basename} dependents={dependents} errors={errors}"));
    if dependents > MAX_DEPENDENT_FINDINGS {
        out.notes.push(format!(
            "依存スキャン: 所見は{MAX_DEPENDENT_FINDINGS}件までに省略しました（全{dependents}件）"
        ));
    }
    Ok(())
}

/// 変更前後のテキストを比較して互換性を壊す差分を探す。
pub fn breaking_diff(ctx: &DetectorContext, before: &str, after: &str) -> Vec<Finding> {
    let mut out = Vec::new();

    let before_exports = export_line_count(before);
    let after_exports = export_line_count(after);
    if before_exports > 0 && after_exports == 0 {
        out.push(Finding {
            id: "export-removed".to_string(),
            finding_type: "EXPORT_REMOVED".to_string(),
            title: "エクスポートが削除されています（互換性を壊す変更）".to_string(),
            category: Category::BreakingChange,
            severity: Severity::High,
            penalty: ctx.weights.penalty(Severity::High),
            evidence: vec![Evidence::stat(format!(
                "before_exports={before_exports} after_exports={after_exports}"
            ))],
        });
    }

    let before_sigs = function_signatures(before);
    let after_sigs = function_signatures(after);
    for (name, before_sig) in &before_sigs {
        let Some(after_sig) = after_sigs.get(name) else {
            continue;
        };
        if after_sig == before_sig {
            continue;
        }
        out.push(Finding {
            id: format!("signature-changed:{name}"),
            finding_type: "FN_SIGNATURE_CHANGED".to_string(),
            title: format!("関数シグネチャが変更されています: {name}"),
            category: Category::BreakingChange,
            severity: Severity::High,
            penalty: ctx.weights.penalty(Severity::High),
            evidence: vec![
                Evidence::pattern(before_sig.clone()),
                Evidence::pattern(after_sig.clone()),
            ],
        });
    }

    out
}

fn related_test(path: &Path) -> Option<PathBuf> {
    let stem = path.file_stem()?.to_str()?;
    let ext = path.extension()?.to_str()?;
    let parent = path.parent()?;

    let sibling = parent.join(format!("{stem}.test.{ext}"));
    if sibling.is_file() {
        return Some(sibling);
    }

    let in_tests_dir = parent.join("tests").join(path.file_name()?);
    if in_tests_dir.is_file() {
        return Some(in_tests_dir);
    }

    None
}

fn export_line_count(text: &str) -> usize {
    text.lines()
        .filter(|l| {
            let t = l.trim_start();
            t.starts_with("export ") || t.starts_with("module.exports") || t.starts_with("pub ")
        })
        .count()
}

fn function_signatures(text: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for line in text.lines() {
        if let Some((name, sig)) = signature_on_line(line) {
            out.entry(name).or_insert(sig);
        }
    }
    out
}

fn signature_on_line(line: &str) -> Option<(String, String)> {
    let t = line.trim();
    let after = if let Some(idx) = find_keyword(t, "function") {
        &t[idx + "function".len()..]
    } else if let Some(idx) = find_keyword(t, "fn") {
        &t[idx + "fn".len()..]
    } else {
        return None;
    };

    let after = after.trim_start();
    let open = after.find('(')?;
    let name = after[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }

    let end = after[open..]
        .find(')')
        .map(|idx| open + idx + 1)
        .unwrap_or(after.len());
    Some((name.to_string(), after[..end].to_string()))
}

fn find_keyword(line: &str, keyword: &str) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut start = 0;
    while let Some(pos) = line[start..].find(keyword) {
        let abs = start + pos;
        let before_ok = abs == 0 || !is_ident_byte(bytes[abs - 1]);
        let after_idx = abs + keyword.len();
        let after_ok = after_idx < bytes.len() && bytes[after_idx].is_ascii_whitespace();
        if before_ok && after_ok {
            return Some(abs);
        }
        start = abs + keyword.len();
    }
    None
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_source_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("js" | "jsx" | "ts" | "tsx" | "rs" | "py" | "json" | "toml")
    )
}

fn build_exclude_set(excludes: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in [
        "**/node_modules",
        "**/node_modules/**",
        "**/.git",
        "**/.git/**",
        "**/target",
        "**/target/**",
    ] {
        builder.add(Glob::new(pat).with_context(|| format!("exclude glob が不正です: {pat}"))?);
    }
    for pat in excludes {
        builder.add(Glob::new(pat).with_context(|| format!("exclude glob が不正です: {pat}"))?);
    }
    Ok(builder.build()?)
}
