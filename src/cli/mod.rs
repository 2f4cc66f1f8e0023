use std::io;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};

use crate::engine::{Engine, EngineOptions};
use crate::impact::ImpactRequest;
use crate::ui::UiConfig;

#[derive(Debug, Parser)]
#[command(
    name = "riskgate",
    version,
    about = "変更の安全度を確度スコアに畳み込み、go/no-go を判定する（開発者向け事前チェック）"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[arg(long, global = true)]
    pub workdir: Option<PathBuf>,
    #[arg(long, default_value_t = 30, global = true)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Preflight(PreflightArgs),
    Impact(ImpactArgs),
    Simulate(SimulateArgs),
    Report(ReportArgs),
    Config(ConfigArgs),
    Completion(CompletionArgs),
}

#[derive(Debug, Args)]
pub struct PreflightArgs {
    #[arg(long, default_value_t = 10)]
    pub top: usize,
}

#[derive(Debug, Args)]
pub struct ImpactArgs {
    #[arg(long = "file", required = true)]
    pub files: Vec<PathBuf>,
    #[arg(long)]
    pub before: Option<PathBuf>,
    #[arg(long)]
    pub after: Option<PathBuf>,
    #[arg(long, default_value_t = 10)]
    pub top: usize,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    #[arg(long)]
    pub plan: PathBuf,
    #[arg(long, default_value_t = 10)]
    pub top: usize,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[arg(long)]
    pub markdown: bool,
    #[arg(long)]
    pub include_evidence: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let stdin_is_tty = io::stdin().is_terminal();
    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    let home_dir = crate::platform::effective_home_dir()?;

    let env_config_path = std::env::var_os("RISKGATE_CONFIG").map(PathBuf::from);
    let cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(crate::exit::invalid_args_err)?;

    let color = stdout_is_tty && cfg.ui.color && !cli.no_color;

    let ui_cfg = UiConfig {
        color,
        stdin_is_tty,
        stdout_is_tty,
        stderr_is_tty,
        max_table_rows: cfg.ui.max_table_rows,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    let engine = Engine::new(
        EngineOptions {
            timeout: Duration::from_secs(cli.timeout),
            privacy_mask_home: cfg.privacy.mask_home,
            show_progress: ui_cfg.stderr_is_tty && !cli.quiet && !cli.json,
        },
        &cfg,
        cli.workdir.clone(),
    )?;

    match cli.command {
        Commands::Preflight(args) => {
            let started_at = time::OffsetDateTime::now_utc();
            let report = engine.preflight()?;
            if cli.json {
                write_json(&report)?;
            } else {
                crate::ui::print_report(&report, &ui_cfg, args.top);
            }
            enforce_gate(&report, &home_dir, "preflight", started_at)?;
        }
        Commands::Impact(args) => {
            if args.before.is_some() != args.after.is_some() {
                return Err(crate::exit::invalid_args(
                    "impact: `--before` と `--after` は両方指定してください",
                ));
            }
            let req = ImpactRequest {
                files: args.files,
                before: args.before,
                after: args.after,
            };
            let started_at = time::OffsetDateTime::now_utc();
            let report = engine.impact(&req)?;
            if cli.json {
                write_json(&report)?;
            } else {
                crate::ui::print_report(&report, &ui_cfg, args.top);
            }
            enforce_gate(&report, &home_dir, "impact", started_at)?;
        }
        Commands::Simulate(args) => {
            let plan =
                crate::simulate::load_plan(&args.plan).map_err(crate::exit::invalid_args_err)?;
            let started_at = time::OffsetDateTime::now_utc();
            let report = engine.simulate(&plan)?;
            if cli.json {
                write_json(&report)?;
            } else {
                crate::ui::print_report(&report, &ui_cfg, args.top);
            }
            enforce_gate(&report, &home_dir, "simulate", started_at)?;
        }
        Commands::Report(args) => {
            let include_evidence = args.include_evidence || cfg.report.include_evidence;
            let started_at = time::OffsetDateTime::now_utc();
            let mut report = engine.report()?;
            if !include_evidence {
                strip_evidence(&mut report);
            }
            if cli.json {
                write_json(&report)?;
            } else if args.markdown {
                write_markdown_summary(&report)?;
            } else {
                crate::ui::print_report(&report, &ui_cfg, 10);
            }
            enforce_gate(&report, &home_dir, "report", started_at)?;
        }
        Commands::Config(_args) => {
            if _args.show {
                if cli.json {
                    let stdout = std::io::stdout();
                    serde_json::to_writer_pretty(stdout.lock(), &cfg)?;
                } else {
                    println!("{}", toml::to_string_pretty(&cfg)?);
                }
            } else if !ui_cfg.quiet {
                eprintln!("config: `riskgate config --show` を使用してください");
            }
        }
        Commands::Completion(_args) => {
            let shell = parse_shell(&_args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "riskgate", &mut out);
        }
    }

    Ok(())
}

/// 確度ゲート。ブロック判定なら監査ログを書き、非0終了にする。
fn enforce_gate(
    report: &crate::core::Report,
    home_dir: &std::path::Path,
    command: &'static str,
    started_at: time::OffsetDateTime,
) -> Result<()> {
    if !report.verdict.blocking {
        return Ok(());
    }

    let finished_at = time::OffsetDateTime::now_utc();
    let log_hint =
        match crate::logs::write_gate_log(home_dir, command, started_at, finished_at, report) {
            Ok(path) => path
                .strip_prefix(home_dir)
                .map(|p| format!("~/{p}", p = p.display()))
                .unwrap_or_else(|_| path.display().to_string()),
            Err(err) => format!("書き込み失敗（{err}）"),
        };

    Err(crate::exit::blocked(format!(
        "判定: {}（確度 {}% / リスク {}）\n所見: {} 件\nログ: {log_hint}",
        report.verdict.banner,
        report.confidence,
        report.risk_level,
        report.findings.len()
    )))
}

fn write_json(report: &crate::core::Report) -> Result<()> {
    use std::io::Write;

    let buf = serde_json::to_vec_pretty(report)?;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(&buf) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    match stdout.write_all(b"\n") {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn strip_evidence(report: &mut crate::core::Report) {
    for finding in &mut report.findings {
        finding.evidence.clear();
    }
}

fn write_markdown_summary(report: &crate::core::Report) -> Result<()> {
    use std::io::Write;

    let markdown = format_markdown_summary(report);
    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(markdown.as_bytes()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn format_markdown_summary(report: &crate::core::Report) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();

    let _ = writeln!(out, "# riskgate レポート");
    let _ = writeln!(out);
    let _ = writeln!(out, "- ツールバージョン: {}", report.tool_version);
    let _ = writeln!(out, "- 生成日時: {}", report.generated_at);
    let _ = writeln!(out, "- 対象: {}", report.workdir);
    let _ = writeln!(out, "- 確度: {}%", report.confidence);
    let _ = writeln!(out, "- リスク: {}", report.risk_level);
    let _ = writeln!(out, "- 判定: {}", report.verdict.banner);
    for note in &report.summary.notes {
        let _ = writeln!(out, "- 注記: {note}");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## 所見 ({})", report.findings.len());
    if report.findings.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "_所見はありません。_");
    }

    let mut findings: Vec<&crate::core::Finding> = report.findings.iter().collect();
    findings.sort_by_key(|f| (f.severity, std::cmp::Reverse(f.penalty), f.id.as_str()));
    for f in findings {
        let _ = writeln!(out);
        let _ = writeln!(out, "### {}（-{}）", f.title, f.penalty);
        let _ = writeln!(out, "- id: `{}`", f.id);
        let _ = writeln!(out, "- カテゴリ: {}", f.category);
        let _ = writeln!(out, "- 重大度: {}", f.severity);
        if !f.evidence.is_empty() {
            let _ = writeln!(out, "- 根拠:");
            for ev in &f.evidence {
                let kind = evidence_kind_name(&ev.kind);
                let value = ev.value.trim_end();
                if value.contains('\n') {
                    let _ = writeln!(out, "  - {kind}:");
                    write_fenced_code_block(&mut out, "    ", "text", value);
                } else {
                    let _ = writeln!(out, "  - {kind}: `{value}`");
                }
            }
        }
    }

    let _ = writeln!(out);
    out
}

fn evidence_kind_name(kind: &crate::core::EvidenceKind) -> &'static str {
    match kind {
        crate::core::EvidenceKind::Path => "パス",
        crate::core::EvidenceKind::Command => "コマンド",
        crate::core::EvidenceKind::Pattern => "パターン",
        crate::core::EvidenceKind::Stat => "統計",
    }
}

fn write_fenced_code_block(out: &mut String, indent: &str, lang: &str, content: &str) {
    use std::fmt::Write as _;

    let _ = writeln!(out, "{indent}```{lang}");
    for line in content.lines() {
        let _ = writeln!(out, "{indent}{line}");
    }
    let _ = writeln!(out, "{indent}```");
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "未対応のシェルです: {other}（bash|zsh|fish を指定してください）"
        ))),
    }
}
