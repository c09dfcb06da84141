use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Proficiency level of a rubric indicator. Ordered: `Tier1 < Tier2 < Tier3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Tier1,
    Tier2,
    Tier3,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Tier1, Tier::Tier2, Tier::Tier3];

    pub fn level(self) -> u8 {
        match self {
            Tier::Tier1 => 1,
            Tier::Tier2 => 2,
            Tier::Tier3 => 3,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tier {}", self.level())
    }
}

impl FromStr for Tier {
    type Err = String;

    /// Accepts `Tier 1`, `tier_1`, `tier1`, `T1` and bare `1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
        let prefix = s
            .trim()
            .trim_end_matches(|c: char| c.is_ascii_digit())
            .trim_end_matches(&[' ', '_', '-'][..])
            .to_ascii_lowercase();
        if !(prefix.is_empty() || prefix == "t" || prefix == "tier") {
            return Err(format!("unrecognised tier label: {s}"));
        }
        match digits.as_str() {
            "1" => Ok(Tier::Tier1),
            "2" => Ok(Tier::Tier2),
            "3" => Ok(Tier::Tier3),
            _ => Err(format!("unrecognised tier label: {s}")),
        }
    }
}

/// One rubric question. Immutable reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    pub id: String,
    pub domain: String,
    pub tier: Tier,
    pub question: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorScore {
    pub indicator_id: String,
    pub score: Option<f64>,
}

/// One scored lesson visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub fellow_id: String,
    pub coach_id: Option<String>,
    pub school_id: Option<String>,
    pub class_id: Option<String>,
    pub cohort: Option<String>,
    pub grade: Option<String>,
    pub subject: Option<String>,
    pub term: String,
    pub observed_on: Option<NaiveDate>,
    pub scores: Vec<IndicatorScore>,
}

impl Observation {
    pub fn entity_id(&self, kind: EntityKind) -> Option<&str> {
        match kind {
            EntityKind::Fellow => Some(self.fellow_id.as_str()),
            EntityKind::Coach => self.coach_id.as_deref(),
            EntityKind::School => self.school_id.as_deref(),
            EntityKind::Class => self.class_id.as_deref(),
            EntityKind::Cohort => self.cohort.as_deref(),
        }
    }
}

/// Term average for one class, as reported by the academic results feed.
/// `average` is a percentage in 0-100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcademicResult {
    pub class_id: String,
    pub fellow_id: Option<String>,
    pub coach_id: Option<String>,
    pub cohort: Option<String>,
    pub grade: Option<String>,
    pub subject: Option<String>,
    pub term: String,
    pub average: Option<f64>,
    pub class_size: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Fellow,
    Coach,
    School,
    Class,
    Cohort,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Fellow => "fellow",
            EntityKind::Coach => "coach",
            EntityKind::School => "school",
            EntityKind::Class => "class",
            EntityKind::Cohort => "cohort",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_kind: EntityKind,
    pub entity_id: String,
}

impl EntityKey {
    pub fn new(entity_kind: EntityKind, entity_id: impl Into<String>) -> Self {
        Self {
            entity_kind,
            entity_id: entity_id.into(),
        }
    }

    pub fn fellow(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Fellow, id)
    }

    pub fn cohort(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Cohort, id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_kind, self.entity_id)
    }
}

/// Scalar series the peer and movement analyzers operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Mean of domain averages, on the observation score scale.
    DomainAverage,
    /// Percentage of domain scores in the highest classification band.
    TopTierShare,
    /// Class term average from the academic results feed (0-100).
    AcademicAverage,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricKind::DomainAverage => "domain_average",
            MetricKind::TopTierShare => "top_tier_share",
            MetricKind::AcademicAverage => "academic_average",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierAverage {
    pub tier: Tier,
    pub average: f64,
    pub indicator_count: usize,
}

/// Rolled-up result for one (observation, domain) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainScore {
    pub observation_id: String,
    pub fellow_id: String,
    pub coach_id: Option<String>,
    pub school_id: Option<String>,
    pub class_id: Option<String>,
    pub cohort: Option<String>,
    pub term: String,
    pub domain: String,
    pub tier_averages: Vec<TierAverage>,
    pub domain_average: f64,
    pub indicator_count: usize,
    pub classification: String,
    /// 1 for the lowest band up to N for the highest.
    pub classification_ordinal: usize,
    pub strongest_tier: Tier,
    pub weakest_tier: Tier,
    /// Tiers whose average meets the configured strength threshold.
    pub strong_tiers: Vec<Tier>,
}

impl DomainScore {
    pub fn entity_id(&self, kind: EntityKind) -> Option<&str> {
        match kind {
            EntityKind::Fellow => Some(self.fellow_id.as_str()),
            EntityKind::Coach => self.coach_id.as_deref(),
            EntityKind::School => self.school_id.as_deref(),
            EntityKind::Class => self.class_id.as_deref(),
            EntityKind::Cohort => self.cohort.as_deref(),
        }
    }

    pub fn tier_average(&self, tier: Tier) -> Option<f64> {
        self.tier_averages
            .iter()
            .find(|t| t.tier == tier)
            .map(|t| t.average)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MixKey {
    #[serde(flatten)]
    pub entity: EntityKey,
    pub term: String,
    pub domain: Option<String>,
}

impl MixKey {
    pub fn new(entity: EntityKey, term: impl Into<String>, domain: Option<String>) -> Self {
        Self {
            entity,
            term: term.into(),
            domain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixBucket {
    pub label: String,
    pub ordinal: usize,
    pub count: usize,
    /// `None` when the group has no data.
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierMixSummary {
    #[serde(flatten)]
    pub key: MixKey,
    pub total: usize,
    /// Buckets in configured band order, highest first.
    pub buckets: Vec<MixBucket>,
    pub mix_index: Option<f64>,
    pub top_share: Option<f64>,
    pub no_data: bool,
}

impl TierMixSummary {
    pub fn percentage_of(&self, label: &str) -> Option<f64> {
        self.buckets
            .iter()
            .find(|b| b.label == label)
            .and_then(|b| b.percentage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerDimension {
    Class,
    Grade,
    Subject,
    Coach,
}

impl PeerDimension {
    pub const ALL: [PeerDimension; 4] = [
        PeerDimension::Class,
        PeerDimension::Grade,
        PeerDimension::Subject,
        PeerDimension::Coach,
    ];
}

impl fmt::Display for PeerDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerDimension::Class => "class",
            PeerDimension::Grade => "grade",
            PeerDimension::Subject => "subject",
            PeerDimension::Coach => "coach",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerStatistic {
    #[serde(flatten)]
    pub entity: EntityKey,
    pub term: String,
    pub metric: MetricKind,
    pub dimension: PeerDimension,
    pub peer_group: String,
    pub value: f64,
    pub population: usize,
    pub peer_mean: f64,
    pub peer_std_dev: f64,
    pub z_score: f64,
    pub percentile_rank: f64,
    pub deviation: f64,
    pub insufficient_population: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementCategory {
    ReachedTarget,
    Improved,
    Declined,
    Stagnant,
    NewlyAtRisk,
    SustainedRisk,
}

impl MovementCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementCategory::ReachedTarget => "reached_target",
            MovementCategory::Improved => "improved",
            MovementCategory::Declined => "declined",
            MovementCategory::Stagnant => "stagnant",
            MovementCategory::NewlyAtRisk => "newly_at_risk",
            MovementCategory::SustainedRisk => "sustained_risk",
        }
    }
}

impl fmt::Display for MovementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementRecord {
    #[serde(flatten)]
    pub entity: EntityKey,
    pub metric: MetricKind,
    pub domain: Option<String>,
    pub from_term: String,
    pub to_term: String,
    pub from_value: f64,
    pub to_value: f64,
    pub delta: f64,
    pub magnitude: f64,
    pub category: MovementCategory,
    /// Band label for improved/declined, otherwise the category name.
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrajectoryPattern {
    URecovery,
    ConsistentGrowth,
    SteadyDecline,
    Stable,
    Volatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlopeBand {
    StrongUpward,
    ModerateUpward,
    Stable,
    ModerateDownward,
    StrongDownward,
}

/// Shape of an entity-metric series across three or more terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    #[serde(flatten)]
    pub entity: EntityKey,
    pub metric: MetricKind,
    pub domain: Option<String>,
    pub terms: Vec<String>,
    pub values: Vec<f64>,
    pub slope: f64,
    pub volatility: f64,
    pub slope_band: SlopeBand,
    pub pattern: TrajectoryPattern,
    pub latest: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    #[serde(flatten)]
    pub entity: EntityKey,
    pub metric: MetricKind,
    pub term: String,
    pub current: f64,
    pub trend: f64,
    pub volatility: f64,
    pub score: f64,
    pub level: String,
    pub terms_observed: usize,
}
