use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::{PenaltyWeights, ThresholdBand, ThresholdPolicy};

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub ui: UiConfig,
    pub scan: ScanConfig,
    pub scoring: ScoringConfig,
    pub policy: PolicyConfig,
    pub privacy: PrivacyConfig,
    pub report: ReportConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
    pub max_table_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanConfig {
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoringConfig {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyConfig {
    pub gate_below: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bands: Option<Vec<ThresholdBand>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrivacyConfig {
    pub mask_home: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportConfig {
    pub include_evidence: bool,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        let weights = PenaltyWeights::default();
        let policy = ThresholdPolicy::default();
        Self {
            ui: UiConfig {
                color: true,
                max_table_rows: 20,
            },
            scan: ScanConfig {
                exclude: vec!["**/node_modules/**".to_string()],
            },
            scoring: ScoringConfig {
                critical: weights.critical,
                high: weights.high,
                medium: weights.medium,
                low: weights.low,
            },
            policy: PolicyConfig {
                gate_below: policy.gate_below,
                bands: None,
            },
            privacy: PrivacyConfig { mask_home: true },
            report: ReportConfig {
                include_evidence: false,
            },
            config_path: None,
        }
    }
}

impl EffectiveConfig {
    pub fn weights(&self) -> PenaltyWeights {
        PenaltyWeights {
            critical: self.scoring.critical,
            high: self.scoring.high,
            medium: self.scoring.medium,
            low: self.scoring.low,
        }
    }

    pub fn threshold_policy(&self) -> ThresholdPolicy {
        let mut policy = ThresholdPolicy {
            gate_below: self.policy.gate_below,
            ..ThresholdPolicy::default()
        };
        if let Some(bands) = &self.policy.bands {
            if !bands.is_empty() {
                let mut bands = bands.clone();
                bands.sort_by_key(|b| std::cmp::Reverse(b.min_confidence));
                policy.bands = bands;
            }
        }
        policy
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    ui: Option<RawUiConfig>,
    scan: Option<RawScanConfig>,
    scoring: Option<RawScoringConfig>,
    policy: Option<RawPolicyConfig>,
    privacy: Option<RawPrivacyConfig>,
    report: Option<RawReportConfig>,
}

#[derive(Debug, Deserialize)]
struct RawUiConfig {
    color: Option<bool>,
    max_table_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawScanConfig {
    exclude: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawScoringConfig {
    critical: Option<u32>,
    high: Option<u32>,
    medium: Option<u32>,
    low: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawPolicyConfig {
    gate_below: Option<u32>,
    bands: Option<Vec<ThresholdBand>>,
}

#[derive(Debug, Deserialize)]
struct RawPrivacyConfig {
    mask_home: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawReportConfig {
    include_evidence: Option<bool>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/riskgate/config.toml")
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();

    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("設定ファイルの読み取りに失敗しました: {}", path.display()))?;
        let raw: RawConfig =
            toml::from_str(&s).context("設定ファイル(TOML)の解析に失敗しました")?;
        apply_raw_config(&mut cfg, raw);
        cfg.config_path = Some(path.display().to_string());
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) {
    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
        if let Some(max_table_rows) = ui.max_table_rows {
            cfg.ui.max_table_rows = max_table_rows;
        }
    }

    if let Some(scan) = raw.scan {
        if let Some(exclude) = scan.exclude {
            cfg.scan.exclude = exclude;
        }
    }

    if let Some(scoring) = raw.scoring {
        if let Some(critical) = scoring.critical {
            cfg.scoring.critical = critical;
        }
        if let Some(high) = scoring.high {
            cfg.scoring.high = high;
        }
        if let Some(medium) = scoring.medium {
            cfg.scoring.medium = medium;
        }
        if let Some(low) = scoring.low {
            cfg.scoring.low = low;
        }
    }

    if let Some(policy) = raw.policy {
        if let Some(gate_below) = policy.gate_below {
            cfg.policy.gate_below = gate_below;
        }
        if let Some(bands) = policy.bands {
            if !bands.is_empty() {
                cfg.policy.bands = Some(bands);
            }
        }
    }

    if let Some(privacy) = raw.privacy {
        if let Some(mask_home) = privacy.mask_home {
            cfg.privacy.mask_home = mask_home;
        }
    }

    if let Some(report) = raw.report {
        if let Some(include_evidence) = report.include_evidence {
            cfg.report.include_evidence = include_evidence;
        }
    }
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("RISKGATE_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "RISKGATE_UI_COLOR")?;
    }
    if let Ok(v) = std::env::var("RISKGATE_UI_MAX_TABLE_ROWS") {
        cfg.ui.max_table_rows = v
            .trim()
            .parse::<usize>()
            .with_context(|| "RISKGATE_UI_MAX_TABLE_ROWS")?;
    }
    if let Ok(v) = std::env::var("RISKGATE_SCAN_EXCLUDE") {
        let parts: Vec<String> = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        if !parts.is_empty() {
            cfg.scan.exclude = parts;
        }
    }
    if let Ok(v) = std::env::var("RISKGATE_SCORING_CRITICAL") {
        cfg.scoring.critical = v
            .trim()
            .parse::<u32>()
            .with_context(|| "RISKGATE_SCORING_CRITICAL")?;
    }
    if let Ok(v) = std::env::var("RISKGATE_SCORING_HIGH") {
        cfg.scoring.high = v
            .trim()
            .parse::<u32>()
            .with_context(|| "RISKGATE_SCORING_HIGH")?;
    }
    if let Ok(v) = std::env::var("RISKGATE_SCORING_MEDIUM") {
        cfg.scoring.medium = v
            .trim()
            .parse::<u32>()
            .with_context(|| "RISKGATE_SCORING_MEDIUM")?;
    }
    if let Ok(v) = std::env::var("RISKGATE_SCORING_LOW") {
        cfg.scoring.low = v
            .trim()
            .parse::<u32>()
            .with_context(|| "RISKGATE_SCORING_LOW")?;
    }
    if let Ok(v) = std::env::var("RISKGATE_POLICY_GATE_BELOW") {
        cfg.policy.gate_below = v
            .trim()
            .parse::<u32>()
            .with_context(|| "RISKGATE_POLICY_GATE_BELOW")?;
    }
    if let Ok(v) = std::env::var("RISKGATE_PRIVACY_MASK_HOME") {
        cfg.privacy.mask_home = parse_bool(&v).with_context(|| "RISKGATE_PRIVACY_MASK_HOME")?;
    }
    if let Ok(v) = std::env::var("RISKGATE_REPORT_INCLUDE_EVIDENCE") {
        cfg.report.include_evidence =
            parse_bool(&v).with_context(|| "RISKGATE_REPORT_INCLUDE_EVIDENCE")?;
    }

    Ok(())
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "真偽値が不正です: {s}（true|false|1|0|yes|no|on|off を指定してください）"
        )),
    }
}
