use rayon::prelude::*;

use crate::config::{AnalysisConfig, RiskLevel};
use crate::models::RiskAssessment;
use crate::movement::{collect_series, linear_slope, to_percent_of_scale, MetricPoint};
use crate::peer::population_std_dev;

/// Score every series at its latest term, highest risk first.
///
/// The score is a linear combination of how far the current value sits
/// below the top of its scale, the downward trend, and the volatility of the
/// entity's own history, each on a 0-1 scale, multiplied by 100 and clipped
/// to the configured range.
pub fn score_series(
    points: &[MetricPoint],
    terms: &[String],
    config: &AnalysisConfig,
) -> Vec<RiskAssessment> {
    let series = collect_series(points);

    let mut assessments: Vec<RiskAssessment> = series
        .into_par_iter()
        .filter(|((_, _, domain), _)| domain.is_none())
        .filter_map(|((entity, metric, _), values)| {
            let history: Vec<(&String, f64)> = terms
                .iter()
                .filter_map(|term| values.get(term.as_str()).map(|v| (term, *v)))
                .collect();
            let (latest_term, current) = *history.last()?;

            let scale = config.metric_scale(metric);
            let normalized: Vec<f64> = history
                .iter()
                .map(|(_, v)| (to_percent_of_scale(*v, scale) / 100.0).clamp(0.0, 1.0))
                .collect();
            let trend = linear_slope(&normalized).unwrap_or(0.0);
            let volatility = population_std_dev(&normalized).unwrap_or(0.0);
            let deficit = 1.0 - normalized.last().copied().unwrap_or(0.0);

            let score = risk_score(deficit, trend, volatility, config);
            Some(RiskAssessment {
                entity,
                metric,
                term: latest_term.clone(),
                current,
                trend,
                volatility,
                score,
                level: risk_level(score, &config.risk.levels),
                terms_observed: history.len(),
            })
        })
        .collect();

    assessments.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entity.cmp(&b.entity))
            .then_with(|| a.metric.cmp(&b.metric))
    });
    assessments
}

/// Inputs are normalised: `deficit` and `volatility` in 0-1, `trend` the
/// per-term slope of the normalised series. A falling trend adds risk and a
/// rising one removes it.
pub fn risk_score(deficit: f64, trend: f64, volatility: f64, config: &AnalysisConfig) -> f64 {
    let weights = &config.risk.weights;
    let raw = weights.current * deficit
        + weights.trend * (-trend).clamp(-1.0, 1.0)
        + weights.volatility * volatility;
    (raw * 100.0).clamp(config.risk.floor, config.risk.ceiling)
}

/// First level whose minimum the score meets; the last level otherwise.
pub fn risk_level(score: f64, levels: &[RiskLevel]) -> String {
    levels
        .iter()
        .find(|level| score >= level.min_score)
        .or_else(|| levels.last())
        .map(|level| level.label.clone())
        .unwrap_or_default()
}
