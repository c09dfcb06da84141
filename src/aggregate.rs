use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::config::{AnalysisConfig, ClassificationConfig};
use crate::error::Diagnostic;
use crate::models::{DomainScore, Indicator, Observation, Tier, TierAverage};

/// Indicator id -> indicator lookup.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    by_id: HashMap<String, Indicator>,
}

impl ReferenceTable {
    pub fn new(indicators: &[Indicator]) -> Self {
        let by_id = indicators
            .iter()
            .map(|indicator| (indicator.id.clone(), indicator.clone()))
            .collect();
        Self { by_id }
    }

    pub fn get(&self, indicator_id: &str) -> Option<&Indicator> {
        self.by_id.get(indicator_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregateOutcome {
    pub domain_scores: Vec<DomainScore>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Produce one `DomainScore` per domain the observation has scored
/// indicators in, ordered by domain name.
///
/// A score outside the configured range excludes the whole observation.
/// Scores for unknown indicators are skipped and reported.
pub fn aggregate_observation(
    observation: &Observation,
    references: &ReferenceTable,
    config: &AnalysisConfig,
) -> AggregateOutcome {
    let mut outcome = AggregateOutcome::default();
    let (min, max) = (config.scoring.min_score, config.scoring.max_score);

    for entry in &observation.scores {
        if let Some(value) = entry.score {
            if !value.is_finite() || value < min || value > max {
                outcome.diagnostics.push(Diagnostic::MalformedScore {
                    record_id: observation.id.clone(),
                    field: entry.indicator_id.clone(),
                    value,
                });
            }
        }
    }
    if !outcome.diagnostics.is_empty() {
        debug!(
            observation = %observation.id,
            "excluding observation with out-of-range scores"
        );
        return outcome;
    }

    let mut by_domain: BTreeMap<&str, BTreeMap<Tier, Vec<f64>>> = BTreeMap::new();
    for entry in &observation.scores {
        let Some(indicator) = references.get(&entry.indicator_id) else {
            outcome.diagnostics.push(Diagnostic::MissingReferenceData {
                observation_id: observation.id.clone(),
                indicator_id: entry.indicator_id.clone(),
            });
            continue;
        };
        let Some(value) = entry.score else {
            continue;
        };
        by_domain
            .entry(indicator.domain.as_str())
            .or_default()
            .entry(indicator.tier)
            .or_default()
            .push(value);
    }

    for (domain, tiers) in by_domain {
        if let Some(score) = score_domain(observation, domain, &tiers, config) {
            outcome.domain_scores.push(score);
        }
    }

    outcome
}

fn score_domain(
    observation: &Observation,
    domain: &str,
    tiers: &BTreeMap<Tier, Vec<f64>>,
    config: &AnalysisConfig,
) -> Option<DomainScore> {
    let tier_averages: Vec<TierAverage> = tiers
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(tier, values)| TierAverage {
            tier: *tier,
            average: values.iter().sum::<f64>() / values.len() as f64,
            indicator_count: values.len(),
        })
        .collect();

    let indicator_count: usize = tier_averages.iter().map(|t| t.indicator_count).sum();
    if indicator_count == 0 {
        return None;
    }
    // Mean over indicators, not over tier averages.
    let total: f64 = tiers.values().flatten().sum();
    let domain_average = total / indicator_count as f64;

    let (classification, classification_ordinal) =
        classify(domain_average, &tier_averages, &config.classification)?;
    let strongest_tier = strongest_tier(&tier_averages)?;
    let weakest_tier = weakest_tier(&tier_averages)?;
    let strong_tiers = tier_averages
        .iter()
        .filter(|t| {
            config
                .scoring
                .strength_threshold(t.tier)
                .is_some_and(|threshold| t.average >= threshold)
        })
        .map(|t| t.tier)
        .collect();

    Some(DomainScore {
        observation_id: observation.id.clone(),
        fellow_id: observation.fellow_id.clone(),
        coach_id: observation.coach_id.clone(),
        school_id: observation.school_id.clone(),
        class_id: observation.class_id.clone(),
        cohort: observation.cohort.clone(),
        term: observation.term.clone(),
        domain: domain.to_string(),
        tier_averages,
        domain_average,
        indicator_count,
        classification,
        classification_ordinal,
        strongest_tier,
        weakest_tier,
        strong_tiers,
    })
}

/// Walk the bands from the top and return the first one the domain meets,
/// with its ordinal. A domain average equal to a band's minimum meets it.
/// Tier minimums only constrain tiers that have scores. A domain below every
/// band falls into the lowest band. Returns `None` only for an empty table.
pub fn classify(
    domain_average: f64,
    tier_averages: &[TierAverage],
    config: &ClassificationConfig,
) -> Option<(String, usize)> {
    let count = config.bands.len();
    let qualifying = config.bands.iter().position(|band| {
        domain_average >= band.min_domain_average
            && band.tier_minimums.iter().all(|minimum| {
                tier_averages
                    .iter()
                    .find(|t| t.tier == minimum.tier)
                    .map_or(true, |t| t.average >= minimum.min_average)
            })
    });
    let idx = qualifying.unwrap_or(count.checked_sub(1)?);
    let band = config.bands.get(idx)?;
    Some((band.label.clone(), count - idx))
}

/// Tier with the highest average. Ties go to the lower-numbered tier.
pub fn strongest_tier(tier_averages: &[TierAverage]) -> Option<Tier> {
    let mut best: Option<&TierAverage> = None;
    for candidate in tier_averages {
        if best.map_or(true, |b| candidate.average > b.average) {
            best = Some(candidate);
        }
    }
    best.map(|t| t.tier)
}

/// Tier with the lowest average. Ties go to the higher-numbered tier.
pub fn weakest_tier(tier_averages: &[TierAverage]) -> Option<Tier> {
    let mut worst: Option<&TierAverage> = None;
    for candidate in tier_averages {
        if worst.map_or(true, |w| candidate.average <= w.average) {
            worst = Some(candidate);
        }
    }
    worst.map(|t| t.tier)
}
