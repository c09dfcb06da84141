//! Joins analyzer outputs per entity-term; missing components stay `None`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::{
    EntityKey, EntityKind, MetricKind, MovementRecord, PeerDimension, PeerStatistic,
    RiskAssessment, TierMixSummary,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerColumns {
    pub class: Option<PeerStatistic>,
    pub grade: Option<PeerStatistic>,
    pub subject: Option<PeerStatistic>,
    pub coach: Option<PeerStatistic>,
}

impl PeerColumns {
    fn slot(&mut self, dimension: PeerDimension) -> &mut Option<PeerStatistic> {
        match dimension {
            PeerDimension::Class => &mut self.class,
            PeerDimension::Grade => &mut self.grade,
            PeerDimension::Subject => &mut self.subject,
            PeerDimension::Coach => &mut self.coach,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerStatistic> {
        [&self.class, &self.grade, &self.subject, &self.coach]
            .into_iter()
            .flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTermSummary {
    #[serde(flatten)]
    pub entity: EntityKey,
    pub term: String,
    pub metric: MetricKind,
    /// Mix across all domains for this entity and term.
    pub mix: Option<TierMixSummary>,
    pub peers: PeerColumns,
    /// Movement of `metric` into this term.
    pub movement: Option<MovementRecord>,
    /// Movement of the top-band share into this term.
    pub mix_movement: Option<MovementRecord>,
    /// Present on the entity's latest term only.
    pub risk: Option<RiskAssessment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortTermSummary {
    pub cohort: String,
    pub term: String,
    pub mix: Option<TierMixSummary>,
    pub movement: Option<MovementRecord>,
    pub mix_movement: Option<MovementRecord>,
    pub academic_movement: Option<MovementRecord>,
}

type TermKey = (EntityKey, String);

/// Components a summary set was built from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryParts {
    pub mixes: Vec<TierMixSummary>,
    pub peers: Vec<PeerStatistic>,
    pub movements: Vec<MovementRecord>,
    pub risks: Vec<RiskAssessment>,
}

/// Build one summary per (entity, term) for entities of `kind`, joining
/// `metric` peer statistics, movements and risk with the entity's mix.
///
/// Only whole-entity records are joined: domain-scoped mixes and movements
/// are left out. Keys come from the union of all inputs, and the output is
/// sorted by entity then term (lexically).
pub fn build_entity_summaries(
    kind: EntityKind,
    metric: MetricKind,
    mixes: &[TierMixSummary],
    peers: &[PeerStatistic],
    movements: &[MovementRecord],
    risks: &[RiskAssessment],
) -> Vec<EntityTermSummary> {
    let of_kind = |entity: &EntityKey| entity.entity_kind == kind;

    let mix_by_key: BTreeMap<TermKey, &TierMixSummary> = mixes
        .iter()
        .filter(|m| m.key.domain.is_none() && of_kind(&m.key.entity))
        .map(|m| ((m.key.entity.clone(), m.key.term.clone()), m))
        .collect();
    let movement_by_key = movements_for(movements, kind, metric);
    let mix_movement_by_key = movements_for(movements, kind, MetricKind::TopTierShare);
    let risk_by_key: BTreeMap<TermKey, &RiskAssessment> = risks
        .iter()
        .filter(|r| r.metric == metric && of_kind(&r.entity))
        .map(|r| ((r.entity.clone(), r.term.clone()), r))
        .collect();

    let mut peers_by_key: BTreeMap<TermKey, PeerColumns> = BTreeMap::new();
    for stat in peers
        .iter()
        .filter(|p| p.metric == metric && of_kind(&p.entity))
    {
        *peers_by_key
            .entry((stat.entity.clone(), stat.term.clone()))
            .or_default()
            .slot(stat.dimension) = Some(stat.clone());
    }

    let keys: BTreeSet<TermKey> = mix_by_key
        .keys()
        .chain(peers_by_key.keys())
        .chain(movement_by_key.keys())
        .chain(mix_movement_by_key.keys())
        .chain(risk_by_key.keys())
        .cloned()
        .collect();

    keys.into_iter()
        .map(|key| EntityTermSummary {
            mix: mix_by_key.get(&key).map(|m| (*m).clone()),
            peers: peers_by_key.get(&key).cloned().unwrap_or_default(),
            movement: movement_by_key.get(&key).map(|m| (*m).clone()),
            mix_movement: mix_movement_by_key.get(&key).map(|m| (*m).clone()),
            risk: risk_by_key.get(&key).map(|r| (*r).clone()),
            metric,
            entity: key.0,
            term: key.1,
        })
        .collect()
}

/// Build one summary per (cohort, term) from cohort-keyed records.
pub fn build_cohort_summaries(
    mixes: &[TierMixSummary],
    movements: &[MovementRecord],
) -> Vec<CohortTermSummary> {
    let is_cohort = |entity: &EntityKey| entity.entity_kind == EntityKind::Cohort;

    let mix_by_key: BTreeMap<TermKey, &TierMixSummary> = mixes
        .iter()
        .filter(|m| m.key.domain.is_none() && is_cohort(&m.key.entity))
        .map(|m| ((m.key.entity.clone(), m.key.term.clone()), m))
        .collect();
    let cohort = EntityKind::Cohort;
    let movement_by_key = movements_for(movements, cohort, MetricKind::DomainAverage);
    let mix_movement_by_key = movements_for(movements, cohort, MetricKind::TopTierShare);
    let academic_by_key = movements_for(movements, cohort, MetricKind::AcademicAverage);

    let keys: BTreeSet<TermKey> = mix_by_key
        .keys()
        .chain(movement_by_key.keys())
        .chain(mix_movement_by_key.keys())
        .chain(academic_by_key.keys())
        .cloned()
        .collect();

    keys.into_iter()
        .map(|key| CohortTermSummary {
            mix: mix_by_key.get(&key).map(|m| (*m).clone()),
            movement: movement_by_key.get(&key).map(|m| (*m).clone()),
            mix_movement: mix_movement_by_key.get(&key).map(|m| (*m).clone()),
            academic_movement: academic_by_key.get(&key).map(|m| (*m).clone()),
            cohort: key.0.entity_id,
            term: key.1,
        })
        .collect()
}

/// Split entity summaries back into the records they were joined from.
pub fn split_entity_summaries(summaries: &[EntityTermSummary]) -> SummaryParts {
    let mut parts = SummaryParts::default();
    for summary in summaries {
        parts.mixes.extend(summary.mix.clone());
        parts.peers.extend(summary.peers.iter().cloned());
        parts.movements.extend(summary.movement.clone());
        parts.movements.extend(summary.mix_movement.clone());
        parts.risks.extend(summary.risk.clone());
    }
    parts
}

fn movements_for(
    movements: &[MovementRecord],
    kind: EntityKind,
    metric: MetricKind,
) -> BTreeMap<TermKey, &MovementRecord> {
    movements
        .iter()
        .filter(|m| m.metric == metric && m.domain.is_none() && m.entity.entity_kind == kind)
        .map(|m| ((m.entity.clone(), m.to_term.clone()), m))
        .collect()
}
