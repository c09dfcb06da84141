use std::cmp::Ordering;
use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::PeerConfig;
use crate::error::Diagnostic;
use crate::models::{EntityKey, MetricKind, PeerDimension, PeerStatistic};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerKeys {
    pub class: Option<String>,
    pub grade: Option<String>,
    pub subject: Option<String>,
    pub coach: Option<String>,
}

impl PeerKeys {
    pub fn get(&self, dimension: PeerDimension) -> Option<&str> {
        match dimension {
            PeerDimension::Class => self.class.as_deref(),
            PeerDimension::Grade => self.grade.as_deref(),
            PeerDimension::Subject => self.subject.as_deref(),
            PeerDimension::Coach => self.coach.as_deref(),
        }
    }
}

/// One entity's metric value for one term.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInput {
    pub entity: EntityKey,
    pub term: String,
    pub metric: MetricKind,
    pub value: f64,
    pub peers: PeerKeys,
}

#[derive(Debug, Clone, Default)]
pub struct PeerOutcome {
    pub statistics: Vec<PeerStatistic>,
    pub diagnostics: Vec<Diagnostic>,
}

type GroupKey<'a> = (MetricKind, &'a str, PeerDimension, &'a str);

/// Compute statistics for every input against each configured dimension.
///
/// The population for an entity is every input sharing its metric, term and
/// peer key for that dimension. Inputs without a key for a dimension get no
/// statistic for it. Groups smaller than `min_population` still produce a
/// statistic, flagged and reported, with neutral z-score and percentile.
pub fn normalize(inputs: &[PeerInput], config: &PeerConfig) -> PeerOutcome {
    let mut groups: BTreeMap<GroupKey<'_>, Vec<&PeerInput>> = BTreeMap::new();
    for input in inputs.iter().filter(|i| i.value.is_finite()) {
        for &dimension in &config.dimensions {
            if let Some(peer_group) = input.peers.get(dimension) {
                groups
                    .entry((input.metric, input.term.as_str(), dimension, peer_group))
                    .or_default()
                    .push(input);
            }
        }
    }

    let results: Vec<PeerOutcome> = groups
        .into_par_iter()
        .map(|((_, _, dimension, peer_group), members)| {
            normalize_group(dimension, peer_group, &members, config.min_population)
        })
        .collect();

    let mut outcome = PeerOutcome::default();
    for result in results {
        outcome.statistics.extend(result.statistics);
        outcome.diagnostics.extend(result.diagnostics);
    }
    outcome.statistics.sort_by(|a, b| {
        (&a.entity, &a.term, a.metric, a.dimension).cmp(&(&b.entity, &b.term, b.metric, b.dimension))
    });
    outcome
}

fn normalize_group(
    dimension: PeerDimension,
    peer_group: &str,
    members: &[&PeerInput],
    min_population: usize,
) -> PeerOutcome {
    let values: Vec<f64> = members.iter().map(|m| m.value).collect();
    let population = values.len();
    let peer_mean = mean(&values).unwrap_or(0.0);
    let peer_std_dev = population_std_dev(&values).unwrap_or(0.0);
    let insufficient = population < min_population;

    let mut outcome = PeerOutcome::default();
    for member in members {
        let (z, percentile) = if insufficient {
            (0.0, 50.0)
        } else {
            (
                z_score(member.value, peer_mean, peer_std_dev),
                percentile_rank(member.value, &values),
            )
        };

        if insufficient {
            outcome.diagnostics.push(Diagnostic::InsufficientPeerPopulation {
                entity: member.entity.clone(),
                term: member.term.clone(),
                metric: member.metric,
                dimension,
                peer_group: peer_group.to_string(),
                population,
                required: min_population,
            });
        }

        outcome.statistics.push(PeerStatistic {
            entity: member.entity.clone(),
            term: member.term.clone(),
            metric: member.metric,
            dimension,
            peer_group: peer_group.to_string(),
            value: member.value,
            population,
            peer_mean,
            peer_std_dev,
            z_score: z,
            percentile_rank: percentile,
            deviation: member.value - peer_mean,
            insufficient_population: insufficient,
        });
    }
    outcome
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population (not sample) standard deviation.
pub fn population_std_dev(values: &[f64]) -> Option<f64> {
    let avg = mean(values)?;
    let variance =
        values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// `(value - mean) / std_dev`, or 0 when the spread is zero.
pub fn z_score(value: f64, mean: f64, std_dev: f64) -> f64 {
    if std_dev > 0.0 && std_dev.is_finite() {
        (value - mean) / std_dev
    } else {
        0.0
    }
}

/// Mid-rank percentile: share strictly below plus half the share equal,
/// scaled to 0-100. The population includes `value` itself.
pub fn percentile_rank(value: f64, population: &[f64]) -> f64 {
    if population.is_empty() {
        return 50.0;
    }
    let (mut below, mut equal) = (0usize, 0usize);
    for other in population {
        match other.partial_cmp(&value).unwrap_or(Ordering::Equal) {
            Ordering::Less => below += 1,
            Ordering::Equal => equal += 1,
            Ordering::Greater => {}
        }
    }
    (below as f64 + 0.5 * equal as f64) * 100.0 / population.len() as f64
}
