//! Term-over-term movement and multi-term trajectory shapes.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::config::{AnalysisConfig, MovementConfig, MovementPolicy, TrajectoryConfig};
use crate::error::Diagnostic;
use crate::models::{
    EntityKey, MetricKind, MovementCategory, MovementRecord, SlopeBand, TrajectoryPattern,
    TrajectoryRecord,
};
use crate::peer::{mean, population_std_dev};

/// One value of an entity's metric in one term. `domain` scopes the series
/// when the metric is tracked per domain.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub entity: EntityKey,
    pub metric: MetricKind,
    pub domain: Option<String>,
    pub term: String,
    pub value: f64,
}

/// State of a series at one term.
#[derive(Debug, Clone, PartialEq)]
pub enum MovementState {
    NoPriorTerm,
    Moved {
        from_value: f64,
        category: MovementCategory,
        band: Option<String>,
    },
}

pub fn transition(previous: Option<f64>, current: f64, policy: &MovementPolicy) -> MovementState {
    match previous {
        None => MovementState::NoPriorTerm,
        Some(previous) => {
            let (category, band) = classify_movement(previous, current, policy);
            MovementState::Moved {
                from_value: previous,
                category,
                band,
            }
        }
    }
}

/// Classify one pair of consecutive values. Returns the category and, for
/// improved/declined, the label of the band that matched.
///
/// Order: target crossing, magnitude band, risk cutoff, then `stagnant`.
/// With `stagnant_before_risk` set, a sub-band delta is `stagnant` ahead of
/// the risk cutoff.
pub fn classify_movement(
    previous: f64,
    current: f64,
    policy: &MovementPolicy,
) -> (MovementCategory, Option<String>) {
    if let Some(target) = policy.target {
        if previous < target && current >= target {
            return (MovementCategory::ReachedTarget, None);
        }
    }

    let delta = current - previous;
    if delta > 0.0 {
        if let Some(band) = policy.improvement_bands.iter().find(|b| delta >= b.min_delta) {
            return (MovementCategory::Improved, Some(band.label.clone()));
        }
    } else if delta < 0.0 {
        if let Some(band) = policy.decline_bands.iter().find(|b| -delta >= b.min_delta) {
            return (MovementCategory::Declined, Some(band.label.clone()));
        }
    }

    if policy.stagnant_before_risk && has_bands_toward(delta, policy) {
        return (MovementCategory::Stagnant, None);
    }

    if let Some(cutoff) = policy.risk_cutoff {
        if current < cutoff {
            let category = if previous < cutoff {
                MovementCategory::SustainedRisk
            } else {
                MovementCategory::NewlyAtRisk
            };
            return (category, None);
        }
    }

    (MovementCategory::Stagnant, None)
}

fn has_bands_toward(delta: f64, policy: &MovementPolicy) -> bool {
    let (up, down) = (
        !policy.improvement_bands.is_empty(),
        !policy.decline_bands.is_empty(),
    );
    if delta > 0.0 {
        up
    } else if delta < 0.0 {
        down
    } else {
        up || down
    }
}

#[derive(Debug, Clone, Default)]
pub struct MovementOutcome {
    pub records: Vec<MovementRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

pub(crate) type SeriesKey = (EntityKey, MetricKind, Option<String>);

/// Group points into per-series term maps. Duplicate points for the same
/// series and term are averaged.
pub(crate) fn collect_series(points: &[MetricPoint]) -> BTreeMap<SeriesKey, BTreeMap<&str, f64>> {
    let mut raw: BTreeMap<SeriesKey, BTreeMap<&str, Vec<f64>>> = BTreeMap::new();
    for point in points.iter().filter(|p| p.value.is_finite()) {
        raw.entry((point.entity.clone(), point.metric, point.domain.clone()))
            .or_default()
            .entry(point.term.as_str())
            .or_default()
            .push(point.value);
    }
    raw.into_iter()
        .map(|(key, terms)| {
            let averaged = terms
                .into_iter()
                .filter_map(|(term, values)| mean(&values).map(|m| (term, m)))
                .collect();
            (key, averaged)
        })
        .collect()
}

/// Classify every consecutive pair in `terms` for every series.
///
/// A pair is only classified when both values exist. When exactly one is
/// present the pair is reported as an incomplete term pair; when neither is,
/// the pair is silently outside the entity's history.
pub fn analyze_movements(
    points: &[MetricPoint],
    terms: &[String],
    config: &MovementConfig,
) -> MovementOutcome {
    let series = collect_series(points);

    let results: Vec<MovementOutcome> = series
        .into_par_iter()
        .map(|((entity, metric, domain), values)| {
            let policy = config.policy(metric);
            let mut outcome = MovementOutcome::default();
            for pair in terms.windows(2) {
                let (from_term, to_term) = (&pair[0], &pair[1]);
                let previous = values.get(from_term.as_str()).copied();
                let current = values.get(to_term.as_str()).copied();
                let incomplete = |missing_term: &String| Diagnostic::IncompleteTermPair {
                    entity: entity.clone(),
                    metric,
                    domain: domain.clone(),
                    from_term: from_term.clone(),
                    to_term: to_term.clone(),
                    missing_term: missing_term.clone(),
                };

                match (previous, current) {
                    (None, None) => {}
                    (Some(_), None) => outcome.diagnostics.push(incomplete(to_term)),
                    (previous, Some(to_value)) => match transition(previous, to_value, policy) {
                        MovementState::NoPriorTerm => {
                            outcome.diagnostics.push(incomplete(from_term))
                        }
                        MovementState::Moved {
                            from_value,
                            category,
                            band,
                        } => {
                            let delta = to_value - from_value;
                            outcome.records.push(MovementRecord {
                                entity: entity.clone(),
                                metric,
                                domain: domain.clone(),
                                from_term: from_term.clone(),
                                to_term: to_term.clone(),
                                from_value,
                                to_value,
                                delta,
                                magnitude: delta.abs(),
                                category,
                                label: band.unwrap_or_else(|| category.to_string()),
                            });
                        }
                    },
                }
            }
            outcome
        })
        .collect();

    let mut outcome = MovementOutcome::default();
    for result in results {
        outcome.records.extend(result.records);
        outcome.diagnostics.extend(result.diagnostics);
    }
    outcome
}

/// Least-squares slope of `values` against their position (0, 1, 2, ...).
pub fn linear_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values)?;
    let (mut numerator, mut denominator) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        numerator += dx * (y - y_mean);
        denominator += dx * dx;
    }
    Some(numerator / denominator)
}

pub fn slope_band(slope: f64, config: &TrajectoryConfig) -> SlopeBand {
    if slope > config.strong_slope {
        SlopeBand::StrongUpward
    } else if slope > config.moderate_slope {
        SlopeBand::ModerateUpward
    } else if slope > -config.moderate_slope {
        SlopeBand::Stable
    } else if slope > -config.strong_slope {
        SlopeBand::ModerateDownward
    } else {
        SlopeBand::StrongDownward
    }
}

/// Shape of the first three values, compared on a 0-100 scale.
pub fn trajectory_pattern(values: [f64; 3], stable_tolerance: f64) -> TrajectoryPattern {
    let [first, second, third] = values;
    if second < first && third > second {
        TrajectoryPattern::URecovery
    } else if third > second && second > first {
        TrajectoryPattern::ConsistentGrowth
    } else if first > second && second > third {
        TrajectoryPattern::SteadyDecline
    } else if (first - third).abs() < stable_tolerance {
        TrajectoryPattern::Stable
    } else {
        TrajectoryPattern::Volatile
    }
}

/// Trajectory records for every series with values in three or more terms.
/// Slope and volatility are reported in percent of the metric's scale.
pub fn analyze_trajectories(
    points: &[MetricPoint],
    terms: &[String],
    config: &AnalysisConfig,
) -> Vec<TrajectoryRecord> {
    let series = collect_series(points);

    series
        .into_par_iter()
        .filter_map(|((entity, metric, domain), values)| {
            let (present_terms, present_values): (Vec<String>, Vec<f64>) = terms
                .iter()
                .filter_map(|term| values.get(term.as_str()).map(|v| (term.clone(), *v)))
                .unzip();
            if present_values.len() < 3 {
                return None;
            }

            let scaled: Vec<f64> = present_values
                .iter()
                .map(|v| to_percent_of_scale(*v, config.metric_scale(metric)))
                .collect();
            let slope = linear_slope(&scaled)?;
            let volatility = population_std_dev(&scaled)?;
            let pattern = trajectory_pattern(
                [scaled[0], scaled[1], scaled[2]],
                config.trajectory.stable_tolerance,
            );
            let latest = *present_values.last()?;

            Some(TrajectoryRecord {
                entity,
                metric,
                domain,
                terms: present_terms,
                values: present_values,
                slope,
                volatility,
                slope_band: slope_band(slope, &config.trajectory),
                pattern,
                latest,
            })
        })
        .collect()
}

pub(crate) fn to_percent_of_scale(value: f64, (min, max): (f64, f64)) -> f64 {
    (value - min) * 100.0 / (max - min)
}
