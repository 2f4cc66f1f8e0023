use anyhow::Error;
use std::io::{self, Write};
use unicode_width::UnicodeWidthChar;

use crate::core::{Finding, Report, Severity};

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub stdin_is_tty: bool,
    pub stdout_is_tty: bool,
    pub stderr_is_tty: bool,
    pub max_table_rows: usize,
    pub quiet: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "エラー:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "原因:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "次に:");
    let _ = writeln!(
        stderr,
        "  - 詳細を見るには `--verbose` を付けて再実行してください"
    );
    let _ = writeln!(
        stderr,
        "  - 利用可能なコマンド/オプションは `riskgate --help` を参照してください"
    );
}

pub fn print_report(report: &Report, cfg: &UiConfig, top_n: usize) {
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();

    let banner = format_banner(&report.verdict.banner, report.verdict.blocking, cfg.color);
    let _ = writeln!(
        out,
        "判定: {banner}（確度 {}% / リスク {}）",
        report.confidence, report.risk_level
    );
    let _ = writeln!(out, "対象: {}", report.workdir);

    if report.summary.checks_passed > 0 || report.summary.checks_failed > 0 {
        let _ = writeln!(
            out,
            "チェック: 合格 {} / 不合格 {}",
            report.summary.checks_passed, report.summary.checks_failed
        );
    }
    if report.summary.operations_total > 0 {
        let _ = writeln!(
            out,
            "操作: {} 件（失敗見込み {} 件 / 推定 {}s）",
            report.summary.operations_total,
            report.summary.operations_would_fail,
            report.summary.estimated_duration_secs
        );
    }

    for note in &report.summary.notes {
        let _ = writeln!(out, "- {note}");
    }

    let total_findings = report.findings.len();
    let rows = cfg.max_table_rows.min(top_n).min(total_findings);

    let _ = writeln!(out);
    if total_findings == 0 {
        let _ = writeln!(out, "所見はありません。");
        return;
    }
    if total_findings > rows {
        let _ = writeln!(out, "所見（{rows}件表示 / 全{total_findings}件）:");
    } else {
        let _ = writeln!(out, "所見（{rows}件表示）:");
    }
    print_findings_table(&mut out, &report.findings, rows, cfg.color);

    if cfg.verbose {
        let _ = writeln!(out);
        for finding in report.findings.iter().take(rows) {
            let _ = writeln!(out, "{}:", finding.id);
            for ev in &finding.evidence {
                let _ = writeln!(out, "  - 根拠({:?}): {}", ev.kind, truncate_middle(&ev.value, 180));
            }
        }
    }
}

fn print_findings_table(out: &mut dyn Write, findings: &[Finding], rows: usize, color: bool) {
    let label_penalty = "減点";
    let label_severity = "重大度";
    let label_category = "カテゴリ";
    let label_title = "タイトル";

    let penalty_w = findings
        .iter()
        .take(rows)
        .map(|f| visible_width_ansi(&format!("-{}", f.penalty)))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_penalty));
    let severity_w = findings
        .iter()
        .take(rows)
        .map(|f| visible_width_ansi(f.severity.as_str()))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_severity));
    let category_w = findings
        .iter()
        .take(rows)
        .map(|f| visible_width_ansi(f.category.as_str()))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_category));
    let title_w = visible_width_ansi(label_title).max(5);

    let _ = writeln!(
        out,
        "{}  {}  {}  {}",
        pad_start_display(label_penalty, penalty_w),
        pad_end_display(label_severity, severity_w),
        pad_end_display(label_category, category_w),
        label_title
    );
    let _ = writeln!(
        out,
        "{}  {}  {}  {}",
        "-".repeat(penalty_w),
        "-".repeat(severity_w),
        "-".repeat(category_w),
        "-".repeat(title_w)
    );

    for finding in findings.iter().take(rows) {
        let penalty = pad_start_display(&format!("-{}", finding.penalty), penalty_w);
        let severity = pad_end_ansi(&format_severity(finding.severity, color), severity_w);
        let category = pad_end_display(finding.category.as_str(), category_w);
        let _ = writeln!(out, "{penalty}  {severity}  {category}  {}", finding.title);
    }
}

fn format_banner(banner: &str, blocking: bool, color: bool) -> String {
    if !color {
        return banner.to_string();
    }
    let code = if blocking { "31" } else { "32" };
    format!("\x1b[{code}m{banner}\x1b[0m")
}

fn format_severity(severity: Severity, color: bool) -> String {
    let s = severity.as_str();
    if !color {
        return s.to_string();
    }

    let code = match severity {
        Severity::Critical => "31",
        Severity::High => "33",
        Severity::Medium => "36",
        Severity::Low => "90",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn pad_end_ansi(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_end_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_start_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{}{}", " ".repeat(width - w), s)
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' {
            if chars.peek() == Some(&'[') {
                let _ = chars.next();
                for ch2 in chars.by_ref() {
                    if ch2 == 'm' {
                        break;
                    }
                }
                continue;
            }
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}

fn truncate_middle(s: &str, max_chars: usize) -> String {
    let len = s.chars().count();
    if len <= max_chars {
        return s.to_string();
    }

    let keep = max_chars.saturating_sub(3);
    let left = keep / 2;
    let right = keep.saturating_sub(left);

    let prefix: String = s.chars().take(left).collect();
    let suffix: String = s
        .chars()
        .rev()
        .take(right)
        .collect::<String>()
        .chars()
        .rev()
        .collect();

    format!("{prefix}...{suffix}")
}
