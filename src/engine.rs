use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::config::EffectiveConfig;
use crate::core::{
    Finding, PenaltyWeights, Report, ReportSummary, ScoreState, ThresholdPolicy,
};
use crate::detect::DetectorContext;
use crate::impact::ImpactRequest;
use crate::simulate::Plan;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub timeout: Duration,
    pub privacy_mask_home: bool,
    pub show_progress: bool,
}

#[derive(Clone)]
pub struct Engine {
    opts: EngineOptions,
    workdir: PathBuf,
    home_dir: PathBuf,
    weights: PenaltyWeights,
    policy: ThresholdPolicy,
    exclude: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct SummaryCounts {
    checks_passed: u32,
    checks_failed: u32,
    operations_total: u32,
    operations_would_fail: u32,
    estimated_duration_secs: u64,
}

impl Engine {
    pub fn new(
        opts: EngineOptions,
        cfg: &EffectiveConfig,
        workdir: Option<PathBuf>,
    ) -> Result<Self> {
        let home_dir = crate::platform::effective_home_dir()?;
        let workdir = match workdir {
            Some(dir) => dir,
            None => std::env::current_dir().context("作業ディレクトリを取得できませんでした")?,
        };
        Ok(Self {
            opts,
            workdir,
            home_dir,
            weights: cfg.weights(),
            policy: cfg.threshold_policy(),
            exclude: cfg.scan.exclude.clone(),
        })
    }

    fn detector_context(&self, deadline: Option<Instant>) -> DetectorContext {
        DetectorContext {
            workdir: self.workdir.clone(),
            home_dir: self.home_dir.clone(),
            timeout: std::cmp::min(self.opts.timeout, Duration::from_secs(8)),
            deadline,
            privacy_mask_home: self.opts.privacy_mask_home,
            weights: self.weights,
            exclude: self.exclude.clone(),
        }
    }

    pub fn preflight(&self) -> Result<Report> {
        let deadline = Instant::now() + self.opts.timeout;
        let ctx = self.detector_context(Some(deadline));
        let pb = self.spinner("事前チェックを実行中...");

        let outcomes = crate::checks::preflight_checks(&ctx);

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        let mut counts = SummaryCounts::default();
        let mut findings = Vec::new();
        let mut notes = Vec::new();
        for outcome in outcomes {
            if outcome.passed {
                counts.checks_passed += 1;
                notes.push(format!("チェック: {} -> OK（{}）", outcome.name, outcome.detail));
            } else {
                counts.checks_failed += 1;
                notes.push(format!(
                    "チェック: {} -> NG（{}）",
                    outcome.name, outcome.detail
                ));
            }
            findings.extend(outcome.findings);
        }

        Ok(self.report_from(findings, notes, counts))
    }

    pub fn impact(&self, req: &ImpactRequest) -> Result<Report> {
        let deadline = Instant::now() + self.opts.timeout;
        let ctx = self.detector_context(Some(deadline));
        let pb = self.spinner("影響範囲を分析中...");

        let result = crate::impact::analyze(&ctx, req);

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        let output = result?;
        Ok(self.report_from(output.findings, output.notes, SummaryCounts::default()))
    }

    pub fn simulate(&self, plan: &Plan) -> Result<Report> {
        let deadline = Instant::now() + self.opts.timeout;
        let ctx = self.detector_context(Some(deadline));
        let pb = self.spinner("プランを評価中...");

        let outcome = crate::simulate::evaluate(&ctx, plan);

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        let counts = SummaryCounts {
            operations_total: outcome.operations_total,
            operations_would_fail: outcome.operations_would_fail,
            estimated_duration_secs: outcome.estimated_duration_secs,
            ..SummaryCounts::default()
        };
        let mut notes = outcome.notes;
        notes.push("シミュレーション: ファイルシステムへの変更は行っていません".to_string());
        Ok(self.report_from(outcome.findings, notes, counts))
    }

    pub fn report(&self) -> Result<Report> {
        self.preflight()
    }

    fn spinner(&self, message: &'static str) -> Option<indicatif::ProgressBar> {
        use std::io::IsTerminal;
        let enabled = self.opts.show_progress && std::io::stderr().is_terminal();
        if !enabled {
            return None;
        }
        let pb = indicatif::ProgressBar::new_spinner();
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    }

    fn report_from(
        &self,
        findings: Vec<Finding>,
        mut notes: Vec<String>,
        counts: SummaryCounts,
    ) -> Report {
        let mut state = ScoreState::new();
        state.record_all(findings);

        let score = state.report(&self.policy);

        let mut findings = score.findings;
        findings.sort_by(|a, b| {
            (a.severity, std::cmp::Reverse(a.penalty), a.id.as_str()).cmp(&(
                b.severity,
                std::cmp::Reverse(b.penalty),
                b.id.as_str(),
            ))
        });

        let generated_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());

        notes.sort();
        notes.dedup();

        Report {
            schema_version: "1.0".to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            workdir: mask_home(&self.workdir, &self.home_dir, self.opts.privacy_mask_home),
            generated_at,
            confidence: score.confidence,
            risk_level: score.risk_level,
            verdict: score.verdict,
            summary: ReportSummary {
                checks_passed: counts.checks_passed,
                checks_failed: counts.checks_failed,
                operations_total: counts.operations_total,
                operations_would_fail: counts.operations_would_fail,
                estimated_duration_secs: counts.estimated_duration_secs,
                notes,
            },
            findings,
        }
    }
}

fn mask_home(path: &Path, home_dir: &Path, mask_home: bool) -> String {
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
