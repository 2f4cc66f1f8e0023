use serde::{Deserialize, Serialize};

use crate::core::{Category, Finding, RiskLevel, Severity};

/// 重大度ごとの減点テーブル。検出側は重大度だけを決め、減点はこの表から引く。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PenaltyWeights {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl Default for PenaltyWeights {
    fn default() -> Self {
        Self {
            critical: 40,
            high: 25,
            medium: 15,
            low: 5,
        }
    }
}

impl PenaltyWeights {
    pub const fn penalty(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdBand {
    pub min_confidence: u32,
    pub banner: String,
    pub blocking: bool,
}

impl ThresholdBand {
    fn new(min_confidence: u32, banner: &str, blocking: bool) -> Self {
        Self {
            min_confidence,
            banner: banner.to_string(),
            blocking,
        }
    }
}

/// 確度から判定バナーと blocking を導く方針。バンドは min_confidence の降順。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThresholdPolicy {
    pub gate_below: u32,
    pub bands: Vec<ThresholdBand>,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            gate_below: 70,
            bands: vec![
                ThresholdBand::new(90, "SAFE TO PROCEED", false),
                ThresholdBand::new(70, "PROCEED WITH CAUTION", false),
                ThresholdBand::new(50, "DETAILED REVIEW REQUIRED", false),
                ThresholdBand::new(0, "DO NOT PROCEED", true),
            ],
        }
    }
}

impl ThresholdPolicy {
    pub fn verdict(&self, confidence: u32) -> Verdict {
        let band = self
            .bands
            .iter()
            .find(|b| confidence >= b.min_confidence)
            .or_else(|| self.bands.last());

        let Some(band) = band else {
            return Verdict {
                banner: "DO NOT PROCEED".to_string(),
                blocking: true,
            };
        };

        Verdict {
            banner: band.banner.clone(),
            blocking: band.blocking || confidence < self.gate_below,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub banner: String,
    pub blocking: bool,
}

/// 1回の分析につき1つ。確度は100から始まり、所見の記録で単調に減る。
#[derive(Debug, Clone)]
pub struct ScoreState {
    raw_confidence: i64,
    findings: Vec<Finding>,
}

impl Default for ScoreState {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreState {
    pub fn new() -> Self {
        Self {
            raw_confidence: 100,
            findings: Vec::new(),
        }
    }

    pub fn record(&mut self, finding: Finding) {
        self.raw_confidence -= i64::from(finding.penalty);
        self.findings.push(finding);
    }

    pub fn record_all(&mut self, findings: impl IntoIterator<Item = Finding>) {
        for finding in findings {
            self.record(finding);
        }
    }

    /// 生の合計はクランプしない。外に見せる確度は 0..=100 に丸める。
    pub fn raw_confidence(&self) -> i64 {
        self.raw_confidence
    }

    pub fn confidence(&self) -> u32 {
        self.raw_confidence.clamp(0, 100) as u32
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn risk_level(&self) -> RiskLevel {
        if self.findings.iter().any(|f| {
            matches!(f.category, Category::Security | Category::BreakingChange)
        }) {
            return RiskLevel::High;
        }

        let indirect = self
            .findings
            .iter()
            .filter(|f| f.category == Category::OperationalRisk)
            .count();
        if indirect > 5 {
            return RiskLevel::Medium;
        }

        RiskLevel::Low
    }

    pub fn report(&self, policy: &ThresholdPolicy) -> ScoreReport {
        ScoreReport {
            confidence: self.confidence(),
            risk_level: self.risk_level(),
            verdict: policy.verdict(self.confidence()),
            findings: self.findings.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreReport {
    pub confidence: u32,
    pub risk_level: RiskLevel,
    pub verdict: Verdict,
    pub findings: Vec<Finding>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(category: Category, severity: Severity, penalty: u32) -> Finding {
        Finding {
            id: format!("test-{}-{penalty}", category.as_str()),
            finding_type: "TEST".to_string(),
            title: "test".to_string(),
            category,
            severity,
            penalty,
            evidence: vec![],
        }
    }

    #[test]
    fn empty_state_is_safe() {
        let state = ScoreState::new();
        let report = state.report(&ThresholdPolicy::default());
        assert_eq!(report.confidence, 100);
        assert_eq!(report.risk_level, RiskLevel::Low);
        assert_eq!(report.verdict.banner, "SAFE TO PROCEED");
        assert!(!report.verdict.blocking);
    }

    #[test]
    fn confidence_is_one_hundred_minus_penalty_sum() {
        let mut state = ScoreState::new();
        state.record(finding(Category::Environment, Severity::Medium, 15));
        state.record(finding(Category::Dependency, Severity::Low, 5));
        state.record(finding(Category::CodeQuality, Severity::High, 25));
        assert_eq!(state.confidence(), 100 - 15 - 5 - 25);
        assert_eq!(state.raw_confidence(), 55);
    }

    #[test]
    fn confidence_clamps_at_zero_but_raw_goes_negative() {
        let mut state = ScoreState::new();
        for _ in 0..4 {
            state.record(finding(Category::Security, Severity::Critical, 40));
        }
        assert_eq!(state.raw_confidence(), 100 - 160);
        assert_eq!(state.confidence(), 0);
    }

    #[test]
    fn findings_keep_insertion_order() {
        let mut state = ScoreState::new();
        state.record(finding(Category::Environment, Severity::Low, 5));
        state.record(finding(Category::Dependency, Severity::Low, 5));
        let ids: Vec<&str> = state.findings().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, ["test-environment-5", "test-dependency-5"]);
    }

    #[test]
    fn security_finding_forces_high_risk_regardless_of_penalty() {
        let mut state = ScoreState::new();
        state.record(finding(Category::Security, Severity::Low, 1));
        assert_eq!(state.risk_level(), RiskLevel::High);
        assert_eq!(state.confidence(), 99);
    }

    #[test]
    fn breaking_change_forces_high_risk() {
        let mut state = ScoreState::new();
        state.record(finding(Category::BreakingChange, Severity::Low, 5));
        assert_eq!(state.risk_level(), RiskLevel::High);
    }

    #[test]
    fn more_than_five_indirect_findings_is_medium_risk() {
        let mut state = ScoreState::new();
        for _ in 0..5 {
            state.record(finding(Category::OperationalRisk, Severity::Low, 1));
        }
        assert_eq!(state.risk_level(), RiskLevel::Low);
        state.record(finding(Category::OperationalRisk, Severity::Low, 1));
        assert_eq!(state.risk_level(), RiskLevel::Medium);
    }

    #[test]
    fn verdict_is_a_step_function_of_confidence() {
        let policy = ThresholdPolicy::default();
        for (confidence, banner, blocking) in [
            (100, "SAFE TO PROCEED", false),
            (90, "SAFE TO PROCEED", false),
            (89, "PROCEED WITH CAUTION", false),
            (70, "PROCEED WITH CAUTION", false),
            (69, "DETAILED REVIEW REQUIRED", true),
            (50, "DETAILED REVIEW REQUIRED", true),
            (49, "DO NOT PROCEED", true),
            (0, "DO NOT PROCEED", true),
        ] {
            let verdict = policy.verdict(confidence);
            assert_eq!(verdict.banner, banner, "confidence={confidence}");
            assert_eq!(verdict.blocking, blocking, "confidence={confidence}");
        }
    }

    #[test]
    fn breaking_change_with_penalty_forty_lands_in_review_tier() {
        let mut state = ScoreState::new();
        state.record(finding(Category::BreakingChange, Severity::Critical, 40));
        let report = state.report(&ThresholdPolicy::default());
        assert_eq!(report.confidence, 60);
        assert_eq!(report.risk_level, RiskLevel::High);
        assert_eq!(report.verdict.banner, "DETAILED REVIEW REQUIRED");
        assert!(report.verdict.blocking);
    }

    #[test]
    fn report_is_idempotent_without_record() {
        let mut state = ScoreState::new();
        state.record(finding(Category::Environment, Severity::Medium, 15));
        let policy = ThresholdPolicy::default();
        assert_eq!(state.report(&policy), state.report(&policy));
    }

    #[test]
    fn custom_policy_bands_override_defaults() {
        let policy = ThresholdPolicy {
            gate_below: 80,
            bands: vec![
                ThresholdBand::new(80, "GO", false),
                ThresholdBand::new(0, "NO GO", true),
            ],
        };
        assert_eq!(policy.verdict(80).banner, "GO");
        assert!(!policy.verdict(80).blocking);
        assert_eq!(policy.verdict(79).banner, "NO GO");
        assert!(policy.verdict(79).blocking);
    }

    #[test]
    fn default_weights_match_severity_table() {
        let weights = PenaltyWeights::default();
        assert_eq!(weights.penalty(Severity::Critical), 40);
        assert_eq!(weights.penalty(Severity::High), 25);
        assert_eq!(weights.penalty(Severity::Medium), 15);
        assert_eq!(weights.penalty(Severity::Low), 5);
    }
}
