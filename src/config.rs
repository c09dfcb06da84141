//! Analysis policy, loaded from TOML and validated once per run.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::{MetricKind, PeerDimension, Tier};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub classification: ClassificationConfig,

    #[serde(default)]
    pub movement: MovementConfig,

    #[serde(default)]
    pub trajectory: TrajectoryConfig,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub peer: PeerConfig,

    #[serde(default)]
    pub terms: TermConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierThreshold {
    pub tier: Tier,
    pub min_average: f64,
}

/// Bounds of an indicator score and per-tier strength thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub min_score: f64,

    #[serde(default = "default_max_score")]
    pub max_score: f64,

    #[serde(default = "default_tier_strength")]
    pub tier_strength: Vec<TierThreshold>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            max_score: default_max_score(),
            tier_strength: default_tier_strength(),
        }
    }
}

impl ScoringConfig {
    pub fn strength_threshold(&self, tier: Tier) -> Option<f64> {
        self.tier_strength
            .iter()
            .find(|t| t.tier == tier)
            .map(|t| t.min_average)
    }
}

fn default_max_score() -> f64 {
    5.0
}

fn default_tier_strength() -> Vec<TierThreshold> {
    vec![
        TierThreshold {
            tier: Tier::Tier1,
            min_average: 3.0,
        },
        TierThreshold {
            tier: Tier::Tier2,
            min_average: 4.0,
        },
        TierThreshold {
            tier: Tier::Tier3,
            min_average: 4.0,
        },
    ]
}

/// One row of the classification table. A domain qualifies when its average
/// meets `min_domain_average` and every tier it has scores for meets the
/// matching entry in `tier_minimums`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationBand {
    pub label: String,
    pub min_domain_average: f64,
    #[serde(default)]
    pub tier_minimums: Vec<TierThreshold>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Highest band first.
    #[serde(default = "default_bands")]
    pub bands: Vec<ClassificationBand>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            bands: default_bands(),
        }
    }
}

impl ClassificationConfig {
    /// Ordinal of a band label: 1 for the lowest band up to N for the highest.
    pub fn ordinal_of(&self, label: &str) -> Option<usize> {
        self.bands
            .iter()
            .position(|b| b.label == label)
            .map(|idx| self.bands.len() - idx)
    }

    pub fn top_label(&self) -> Option<&str> {
        self.bands.first().map(|b| b.label.as_str())
    }
}

fn default_bands() -> Vec<ClassificationBand> {
    vec![
        ClassificationBand {
            label: "Exemplary".to_string(),
            min_domain_average: 4.0,
            tier_minimums: vec![TierThreshold {
                tier: Tier::Tier3,
                min_average: 3.5,
            }],
        },
        ClassificationBand {
            label: "Proficient".to_string(),
            min_domain_average: 3.0,
            tier_minimums: Vec::new(),
        },
        ClassificationBand {
            label: "Developing".to_string(),
            min_domain_average: 2.0,
            tier_minimums: Vec::new(),
        },
        ClassificationBand {
            label: "Emerging".to_string(),
            min_domain_average: 0.0,
            tier_minimums: Vec::new(),
        },
    ]
}

/// A magnitude cut point on the absolute term-over-term delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementBand {
    pub label: String,
    pub min_delta: f64,
}

impl MovementBand {
    fn new(label: &str, min_delta: f64) -> Self {
        Self {
            label: label.to_string(),
            min_delta,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementPolicy {
    /// Proficiency cutoff; crossing it from below is `reached_target`.
    #[serde(default)]
    pub target: Option<f64>,

    /// Values below this are at risk.
    #[serde(default)]
    pub risk_cutoff: Option<f64>,

    /// Largest band first.
    #[serde(default)]
    pub improvement_bands: Vec<MovementBand>,

    /// Largest band first; `min_delta` is the size of the drop.
    #[serde(default)]
    pub decline_bands: Vec<MovementBand>,

    /// Rank `stagnant` above the risk categories: a delta smaller than every
    /// band in its direction is stagnant even when it ends under the cutoff.
    #[serde(default)]
    pub stagnant_before_risk: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementConfig {
    #[serde(default = "default_domain_average_policy")]
    pub domain_average: MovementPolicy,

    #[serde(default = "default_top_tier_share_policy")]
    pub top_tier_share: MovementPolicy,

    #[serde(default = "default_academic_policy")]
    pub academic_average: MovementPolicy,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            domain_average: default_domain_average_policy(),
            top_tier_share: default_top_tier_share_policy(),
            academic_average: default_academic_policy(),
        }
    }
}

impl MovementConfig {
    pub fn policy(&self, metric: MetricKind) -> &MovementPolicy {
        match metric {
            MetricKind::DomainAverage => &self.domain_average,
            MetricKind::TopTierShare => &self.top_tier_share,
            MetricKind::AcademicAverage => &self.academic_average,
        }
    }
}

fn default_domain_average_policy() -> MovementPolicy {
    MovementPolicy {
        target: Some(3.5),
        risk_cutoff: Some(2.0),
        improvement_bands: vec![
            MovementBand::new("high-growth", 0.5),
            MovementBand::new("slight-growth", 0.1),
        ],
        decline_bands: vec![
            MovementBand::new("steep-decline", 0.5),
            MovementBand::new("slight-decline", 0.1),
        ],
        stagnant_before_risk: false,
    }
}

fn default_top_tier_share_policy() -> MovementPolicy {
    MovementPolicy {
        target: Some(50.0),
        risk_cutoff: Some(20.0),
        improvement_bands: vec![
            MovementBand::new("high-growth", 10.0),
            MovementBand::new("slight-growth", 2.0),
        ],
        decline_bands: vec![
            MovementBand::new("steep-decline", 10.0),
            MovementBand::new("slight-decline", 2.0),
        ],
        stagnant_before_risk: false,
    }
}

fn default_academic_policy() -> MovementPolicy {
    MovementPolicy {
        target: Some(50.0),
        risk_cutoff: Some(40.0),
        improvement_bands: vec![
            MovementBand::new("high-growth", 10.0),
            MovementBand::new("slight-growth", 2.0),
        ],
        decline_bands: vec![
            MovementBand::new("steep-decline", 10.0),
            MovementBand::new("slight-decline", 2.0),
        ],
        stagnant_before_risk: false,
    }
}

/// Tolerances for trajectory shapes, in percent of the metric's scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryConfig {
    #[serde(default = "default_stable_tolerance")]
    pub stable_tolerance: f64,

    #[serde(default = "default_strong_slope")]
    pub strong_slope: f64,

    #[serde(default = "default_moderate_slope")]
    pub moderate_slope: f64,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            stable_tolerance: default_stable_tolerance(),
            strong_slope: default_strong_slope(),
            moderate_slope: default_moderate_slope(),
        }
    }
}

fn default_stable_tolerance() -> f64 {
    5.0
}

fn default_strong_slope() -> f64 {
    5.0
}

fn default_moderate_slope() -> f64 {
    2.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    #[serde(default = "default_current_weight")]
    pub current: f64,

    #[serde(default = "default_trend_weight")]
    pub trend: f64,

    #[serde(default = "default_volatility_weight")]
    pub volatility: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            current: default_current_weight(),
            trend: default_trend_weight(),
            volatility: default_volatility_weight(),
        }
    }
}

fn default_current_weight() -> f64 {
    0.6
}

fn default_trend_weight() -> f64 {
    1.5
}

fn default_volatility_weight() -> f64 {
    0.8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLevel {
    pub label: String,
    pub min_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default)]
    pub weights: RiskWeights,

    #[serde(default)]
    pub floor: f64,

    #[serde(default = "default_risk_ceiling")]
    pub ceiling: f64,

    /// Highest level first.
    #[serde(default = "default_risk_levels")]
    pub levels: Vec<RiskLevel>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            weights: RiskWeights::default(),
            floor: 0.0,
            ceiling: default_risk_ceiling(),
            levels: default_risk_levels(),
        }
    }
}

fn default_risk_ceiling() -> f64 {
    100.0
}

fn default_risk_levels() -> Vec<RiskLevel> {
    [
        ("high-risk", 70.0),
        ("at-risk", 50.0),
        ("moderate", 30.0),
        ("thriving", 0.0),
    ]
    .into_iter()
    .map(|(label, min_score)| RiskLevel {
        label: label.to_string(),
        min_score,
    })
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerConfig {
    #[serde(default = "default_dimensions")]
    pub dimensions: Vec<PeerDimension>,

    #[serde(default = "default_min_population")]
    pub min_population: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            dimensions: default_dimensions(),
            min_population: default_min_population(),
        }
    }
}

fn default_dimensions() -> Vec<PeerDimension> {
    PeerDimension::ALL.to_vec()
}

fn default_min_population() -> usize {
    2
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TermConfig {
    /// Explicit term order. Labels not listed sort after these.
    #[serde(default)]
    pub order: Vec<String>,
}

impl TermConfig {
    /// Deduplicates and orders term labels: configured order first, then by
    /// the first embedded integer ("Term 2" before "Term 10"), then lexically.
    pub fn ordered<'a>(&self, labels: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut unique: Vec<&str> = labels.into_iter().collect();
        unique.sort_unstable();
        unique.dedup();
        unique.sort_by_key(|label| self.sort_key(label));
        unique.into_iter().map(str::to_string).collect()
    }

    fn sort_key(&self, label: &str) -> (usize, u64, String) {
        let configured = self
            .order
            .iter()
            .position(|t| t == label)
            .unwrap_or(self.order.len());
        (configured, embedded_number(label), label.to_string())
    }
}

fn embedded_number(label: &str) -> u64 {
    label
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

impl AnalysisConfig {
    /// Load a TOML config file. Missing sections fall back to defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid TOML in config: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn default_toml() -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }

    /// Value range of a metric, used to normalise risk and trajectory inputs.
    pub fn metric_scale(&self, metric: MetricKind) -> (f64, f64) {
        match metric {
            MetricKind::DomainAverage => (self.scoring.min_score, self.scoring.max_score),
            MetricKind::TopTierShare | MetricKind::AcademicAverage => (0.0, 100.0),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_scoring()?;
        self.validate_classification()?;
        for metric in [
            MetricKind::DomainAverage,
            MetricKind::TopTierShare,
            MetricKind::AcademicAverage,
        ] {
            validate_policy(metric, self.movement.policy(metric))?;
        }
        self.validate_trajectory()?;
        self.validate_risk()?;

        if self.peer.min_population == 0 {
            return Err(ConfigError::ZeroPeerPopulation);
        }

        let mut seen = HashSet::new();
        for term in &self.terms.order {
            if !seen.insert(term.as_str()) {
                return Err(ConfigError::DuplicateTerm { term: term.clone() });
            }
        }

        Ok(())
    }

    fn validate_scoring(&self) -> Result<(), ConfigError> {
        let scoring = &self.scoring;
        if !scoring.min_score.is_finite()
            || !scoring.max_score.is_finite()
            || scoring.max_score <= scoring.min_score
        {
            return Err(ConfigError::InvalidScoreRange {
                min: scoring.min_score,
                max: scoring.max_score,
            });
        }
        for threshold in &scoring.tier_strength {
            ensure_finite(threshold.min_average, || {
                format!("scoring.tier_strength.{}", threshold.tier)
            })?;
        }
        Ok(())
    }

    fn validate_classification(&self) -> Result<(), ConfigError> {
        let bands = &self.classification.bands;
        if bands.is_empty() {
            return Err(ConfigError::EmptyClassification);
        }

        let mut labels = HashSet::new();
        let mut previous: Option<f64> = None;
        for band in bands {
            if band.label.trim().is_empty() || !labels.insert(band.label.as_str()) {
                return Err(ConfigError::InvalidClassificationLabel {
                    label: band.label.clone(),
                });
            }
            ensure_finite(band.min_domain_average, || {
                format!("classification.{}.min_domain_average", band.label)
            })?;
            for tier_min in &band.tier_minimums {
                ensure_finite(tier_min.min_average, || {
                    format!("classification.{}.{}", band.label, tier_min.tier)
                })?;
            }
            if let Some(prev) = previous {
                if band.min_domain_average >= prev {
                    return Err(ConfigError::NonMonotonicClassification {
                        label: band.label.clone(),
                    });
                }
            }
            previous = Some(band.min_domain_average);
        }
        Ok(())
    }

    fn validate_trajectory(&self) -> Result<(), ConfigError> {
        let t = &self.trajectory;
        ensure_finite(t.stable_tolerance, || "trajectory.stable_tolerance".to_string())?;
        if !(t.strong_slope.is_finite()
            && t.moderate_slope.is_finite()
            && t.strong_slope > t.moderate_slope
            && t.moderate_slope > 0.0)
        {
            return Err(ConfigError::InvalidSlopeBands);
        }
        Ok(())
    }

    fn validate_risk(&self) -> Result<(), ConfigError> {
        let risk = &self.risk;
        for (name, weight) in [
            ("current", risk.weights.current),
            ("trend", risk.weights.trend),
            ("volatility", risk.weights.volatility),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidRiskWeight { name });
            }
        }
        if !risk.floor.is_finite() || !risk.ceiling.is_finite() || risk.ceiling <= risk.floor {
            return Err(ConfigError::InvalidRiskRange {
                floor: risk.floor,
                ceiling: risk.ceiling,
            });
        }
        let mut previous: Option<f64> = None;
        for level in &risk.levels {
            ensure_finite(level.min_score, || format!("risk.levels.{}", level.label))?;
            if previous.is_some_and(|prev| level.min_score >= prev) {
                return Err(ConfigError::NonMonotonicRiskLevels {
                    label: level.label.clone(),
                });
            }
            previous = Some(level.min_score);
        }
        Ok(())
    }
}

fn validate_policy(metric: MetricKind, policy: &MovementPolicy) -> Result<(), ConfigError> {
    if let Some(target) = policy.target {
        ensure_finite(target, || format!("movement.{metric}.target"))?;
    }
    if let Some(cutoff) = policy.risk_cutoff {
        ensure_finite(cutoff, || format!("movement.{metric}.risk_cutoff"))?;
    }
    if let (Some(target), Some(risk_cutoff)) = (policy.target, policy.risk_cutoff) {
        if risk_cutoff >= target {
            return Err(ConfigError::RiskAboveTarget {
                metric,
                risk_cutoff,
                target,
            });
        }
    }

    for (direction, bands) in [
        ("improvement", &policy.improvement_bands),
        ("decline", &policy.decline_bands),
    ] {
        let mut previous: Option<f64> = None;
        for band in bands {
            let decreasing = previous.map_or(true, |prev| band.min_delta < prev);
            if !band.min_delta.is_finite() || band.min_delta <= 0.0 || !decreasing {
                return Err(ConfigError::NonMonotonicBands {
                    metric,
                    direction,
                    label: band.label.clone(),
                });
            }
            previous = Some(band.min_delta);
        }
    }
    Ok(())
}

fn ensure_finite(value: f64, name: impl FnOnce() -> String) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonFiniteThreshold { name: name() })
    }
}
