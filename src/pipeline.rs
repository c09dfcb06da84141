//! One analysis run, observations in and derived records out.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate_observation, ReferenceTable};
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, Diagnostic, Diagnostics};
use crate::mix::{group_key, mix_by};
use crate::models::{
    AcademicResult, DomainScore, EntityKey, EntityKind, Indicator, MetricKind, MixKey,
    MovementRecord, Observation, PeerStatistic, RiskAssessment, TierMixSummary,
    TrajectoryRecord,
};
use crate::movement::{analyze_movements, analyze_trajectories, collect_series, MetricPoint};
use crate::peer::{mean, normalize, PeerInput, PeerKeys};
use crate::risk::score_series;
use crate::summary::{
    build_cohort_summaries, build_entity_summaries, CohortTermSummary, EntityTermSummary,
};

/// Entity kinds that get an all-domain mix per term.
const MIX_KINDS: [EntityKind; 4] = [
    EntityKind::Fellow,
    EntityKind::Class,
    EntityKind::Coach,
    EntityKind::Cohort,
];

/// Entity kinds that also get a per-domain mix per term.
const DOMAIN_MIX_KINDS: [EntityKind; 2] = [EntityKind::Fellow, EntityKind::Cohort];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInput {
    pub indicators: Vec<Indicator>,
    pub observations: Vec<Observation>,
    #[serde(default)]
    pub academic_results: Vec<AcademicResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub terms: Vec<String>,
    pub domain_scores: Vec<DomainScore>,
    pub mixes: Vec<TierMixSummary>,
    pub peer_statistics: Vec<PeerStatistic>,
    pub movements: Vec<MovementRecord>,
    pub trajectories: Vec<TrajectoryRecord>,
    pub risks: Vec<RiskAssessment>,
    pub fellow_summaries: Vec<EntityTermSummary>,
    pub class_summaries: Vec<EntityTermSummary>,
    pub cohort_summaries: Vec<CohortTermSummary>,
    pub diagnostics: Diagnostics,
}

/// Run the whole analysis.
///
/// Fails only on an invalid configuration. Bad records are excluded from
/// their group and reported in `diagnostics`; other groups are unaffected.
pub fn run(input: &AnalysisInput, config: &AnalysisConfig) -> Result<AnalysisOutput, AnalysisError> {
    config.validate()?;

    let references = ReferenceTable::new(&input.indicators);
    let terms = config.terms.ordered(
        input
            .observations
            .iter()
            .map(|o| o.term.as_str())
            .chain(input.academic_results.iter().map(|r| r.term.as_str())),
    );
    info!(
        observations = input.observations.len(),
        indicators = references.len(),
        academic_results = input.academic_results.len(),
        terms = terms.len(),
        "starting analysis run"
    );

    let mut diagnostics = Diagnostics::new();

    let aggregated: Vec<_> = input
        .observations
        .par_iter()
        .map(|observation| aggregate_observation(observation, &references, config))
        .collect();
    let mut domain_scores = Vec::new();
    for outcome in aggregated {
        domain_scores.extend(outcome.domain_scores);
        diagnostics.extend(outcome.diagnostics);
    }
    debug!(domain_scores = domain_scores.len(), "aggregated observations");

    let mixes = build_mixes(&input.observations, &references, &domain_scores, config);
    debug!(mixes = mixes.len(), "summarised tier mixes");

    let (academic_points, academic_diagnostics) = academic_points(&input.academic_results);
    diagnostics.extend(academic_diagnostics);

    let mut points = observation_points(&domain_scores, EntityKind::Fellow);
    points.extend(observation_points(&domain_scores, EntityKind::Cohort));
    points.extend(top_share_points(&mixes));
    points.extend(academic_points.iter().cloned());
    points.extend(cohort_academic_points(&input.academic_results));

    let mut peer_inputs = fellow_peer_inputs(&input.observations, &points);
    peer_inputs.extend(class_peer_inputs(&input.academic_results, &academic_points));
    let peer_outcome = normalize(&peer_inputs, &config.peer);
    diagnostics.extend(peer_outcome.diagnostics);
    let peer_statistics = peer_outcome.statistics;

    let movement_outcome = analyze_movements(&points, &terms, &config.movement);
    diagnostics.extend(movement_outcome.diagnostics);
    let movements = movement_outcome.records;

    let trajectories = analyze_trajectories(&points, &terms, config);

    let risk_points: Vec<MetricPoint> = points
        .iter()
        .filter(|p| {
            matches!(
                (p.entity.entity_kind, p.metric),
                (EntityKind::Fellow, MetricKind::DomainAverage)
                    | (EntityKind::Class, MetricKind::AcademicAverage)
            )
        })
        .cloned()
        .collect();
    let risks = score_series(&risk_points, &terms, config);

    let fellow_summaries = build_entity_summaries(
        EntityKind::Fellow,
        MetricKind::DomainAverage,
        &mixes,
        &peer_statistics,
        &movements,
        &risks,
    );
    let class_summaries = build_entity_summaries(
        EntityKind::Class,
        MetricKind::AcademicAverage,
        &mixes,
        &peer_statistics,
        &movements,
        &risks,
    );
    let cohort_summaries = build_cohort_summaries(&mixes, &movements);

    for (kind, count) in diagnostics.counts() {
        warn!(kind, count, "recovered data problems");
    }
    info!(
        domain_scores = domain_scores.len(),
        movements = movements.len(),
        diagnostics = diagnostics.len(),
        "analysis run complete"
    );

    Ok(AnalysisOutput {
        terms,
        domain_scores,
        mixes,
        peer_statistics,
        movements,
        trajectories,
        risks,
        fellow_summaries,
        class_summaries,
        cohort_summaries,
        diagnostics,
    })
}

/// Mixes for every group an observation belongs to, including groups whose
/// observations were all excluded.
fn build_mixes(
    observations: &[Observation],
    references: &ReferenceTable,
    domain_scores: &[DomainScore],
    config: &AnalysisConfig,
) -> Vec<TierMixSummary> {
    let mut mixes = Vec::new();
    for kind in MIX_KINDS {
        let expected: Vec<MixKey> = observations
            .iter()
            .filter_map(|o| {
                let id = o.entity_id(kind)?;
                Some(MixKey::new(EntityKey::new(kind, id), o.term.clone(), None))
            })
            .collect();
        mixes.extend(mix_by(
            domain_scores,
            kind,
            false,
            &expected,
            &config.classification,
        ));
    }

    for kind in DOMAIN_MIX_KINDS {
        let mut expected = Vec::new();
        for observation in observations {
            let Some(id) = observation.entity_id(kind) else {
                continue;
            };
            let domains: BTreeSet<&str> = observation
                .scores
                .iter()
                .filter_map(|s| references.get(&s.indicator_id))
                .map(|indicator| indicator.domain.as_str())
                .collect();
            expected.extend(domains.into_iter().map(|domain| {
                MixKey::new(
                    EntityKey::new(kind, id),
                    observation.term.clone(),
                    Some(domain.to_string()),
                )
            }));
        }
        mixes.extend(mix_by(
            domain_scores,
            kind,
            true,
            &expected,
            &config.classification,
        ));
    }
    mixes
}

/// Domain-average points for `kind`: one overall point per entity-term and
/// one per entity-term-domain.
fn observation_points(domain_scores: &[DomainScore], kind: EntityKind) -> Vec<MetricPoint> {
    let mut overall: BTreeMap<(EntityKey, &str), Vec<f64>> = BTreeMap::new();
    let mut by_domain: BTreeMap<(EntityKey, &str, &str), Vec<f64>> = BTreeMap::new();
    for score in domain_scores {
        let Some(key) = group_key(score, kind, false) else {
            continue;
        };
        overall
            .entry((key.entity.clone(), score.term.as_str()))
            .or_default()
            .push(score.domain_average);
        by_domain
            .entry((key.entity, score.term.as_str(), score.domain.as_str()))
            .or_default()
            .push(score.domain_average);
    }

    let overall_points = overall.into_iter().filter_map(|((entity, term), values)| {
        Some(MetricPoint {
            entity,
            metric: MetricKind::DomainAverage,
            domain: None,
            term: term.to_string(),
            value: mean(&values)?,
        })
    });
    let domain_points = by_domain
        .into_iter()
        .filter_map(|((entity, term, domain), values)| {
            Some(MetricPoint {
                entity,
                metric: MetricKind::DomainAverage,
                domain: Some(domain.to_string()),
                term: term.to_string(),
                value: mean(&values)?,
            })
        });
    overall_points.chain(domain_points).collect()
}

fn top_share_points(mixes: &[TierMixSummary]) -> Vec<MetricPoint> {
    mixes
        .iter()
        .filter(|m| matches!(m.key.entity.entity_kind, EntityKind::Fellow | EntityKind::Cohort))
        .filter_map(|m| {
            Some(MetricPoint {
                entity: m.key.entity.clone(),
                metric: MetricKind::TopTierShare,
                domain: m.key.domain.clone(),
                term: m.key.term.clone(),
                value: m.top_share?,
            })
        })
        .collect()
}

fn academic_in_range(result: &AcademicResult) -> Option<f64> {
    result
        .average
        .filter(|v| v.is_finite() && (0.0..=100.0).contains(v))
}

fn academic_points(results: &[AcademicResult]) -> (Vec<MetricPoint>, Vec<Diagnostic>) {
    let mut points = Vec::new();
    let mut diagnostics = Vec::new();
    for result in results {
        let Some(value) = result.average else {
            continue;
        };
        if academic_in_range(result).is_none() {
            diagnostics.push(Diagnostic::MalformedScore {
                record_id: format!("{}/{}", result.class_id, result.term),
                field: "average".to_string(),
                value,
            });
            continue;
        }
        points.push(MetricPoint {
            entity: EntityKey::new(EntityKind::Class, result.class_id.clone()),
            metric: MetricKind::AcademicAverage,
            domain: None,
            term: result.term.clone(),
            value,
        });
    }
    (points, diagnostics)
}

/// Class-size-weighted cohort averages. Classes without a size carry no
/// weight; a cohort-term with no weight gets no point.
fn cohort_academic_points(results: &[AcademicResult]) -> Vec<MetricPoint> {
    let mut totals: BTreeMap<(&str, &str), (f64, f64)> = BTreeMap::new();
    for result in results {
        let (Some(cohort), Some(value)) = (result.cohort.as_deref(), academic_in_range(result))
        else {
            continue;
        };
        let weight = f64::from(result.class_size.unwrap_or(0));
        let entry = totals.entry((cohort, result.term.as_str())).or_insert((0.0, 0.0));
        entry.0 += value * weight;
        entry.1 += weight;
    }

    totals
        .into_iter()
        .filter(|(_, (_, weight))| *weight > 0.0)
        .map(|((cohort, term), (weighted, weight))| MetricPoint {
            entity: EntityKey::cohort(cohort),
            metric: MetricKind::AcademicAverage,
            domain: None,
            term: term.to_string(),
            value: weighted / weight,
        })
        .collect()
}

/// Peer inputs for fellows' overall domain average. Peer keys come from the
/// fellow's earliest observation in the term.
fn fellow_peer_inputs(observations: &[Observation], points: &[MetricPoint]) -> Vec<PeerInput> {
    let mut first_seen: BTreeMap<(&str, &str), &Observation> = BTreeMap::new();
    for observation in observations {
        let key = (observation.fellow_id.as_str(), observation.term.as_str());
        let replace = first_seen.get(&key).map_or(true, |current| {
            (observation.observed_on, &observation.id) < (current.observed_on, &current.id)
        });
        if replace {
            first_seen.insert(key, observation);
        }
    }

    points
        .iter()
        .filter(|p| {
            p.entity.entity_kind == EntityKind::Fellow
                && p.metric == MetricKind::DomainAverage
                && p.domain.is_none()
        })
        .filter_map(|p| {
            let observation = first_seen.get(&(p.entity.entity_id.as_str(), p.term.as_str()))?;
            Some(PeerInput {
                entity: p.entity.clone(),
                term: p.term.clone(),
                metric: p.metric,
                value: p.value,
                peers: PeerKeys {
                    class: observation.class_id.clone(),
                    grade: observation.grade.clone(),
                    subject: observation.subject.clone(),
                    coach: observation.coach_id.clone(),
                },
            })
        })
        .collect()
}

/// Peer inputs for classes' academic average, one per class-term. Several
/// result rows for a class-term (one per subject) collapse to their mean,
/// matching the movement and risk series. Peer keys come from the row that
/// sorts first by (subject, grade, coach).
///
/// Classes are compared within grade, subject and coach; the class
/// dimension would only ever hold the class itself.
fn class_peer_inputs(results: &[AcademicResult], points: &[MetricPoint]) -> Vec<PeerInput> {
    let mut first_row: BTreeMap<(&str, &str), &AcademicResult> = BTreeMap::new();
    for result in results.iter().filter(|r| academic_in_range(r).is_some()) {
        let key = (result.class_id.as_str(), result.term.as_str());
        let rank = |r: &AcademicResult| (r.subject.clone(), r.grade.clone(), r.coach_id.clone());
        let replace = first_row
            .get(&key)
            .map_or(true, |current| rank(result) < rank(current));
        if replace {
            first_row.insert(key, result);
        }
    }

    let class_points: Vec<MetricPoint> = points
        .iter()
        .filter(|p| {
            p.entity.entity_kind == EntityKind::Class
                && p.metric == MetricKind::AcademicAverage
                && p.domain.is_none()
        })
        .cloned()
        .collect();

    let mut inputs = Vec::new();
    for ((entity, metric, _), values) in collect_series(&class_points) {
        for (term, value) in values {
            let Some(row) = first_row.get(&(entity.entity_id.as_str(), term)) else {
                continue;
            };
            inputs.push(PeerInput {
                entity: entity.clone(),
                term: term.to_string(),
                metric,
                value,
                peers: PeerKeys {
                    class: None,
                    grade: row.grade.clone(),
                    subject: row.subject.clone(),
                    coach: row.coach_id.clone(),
                },
            });
        }
    }
    inputs
}
