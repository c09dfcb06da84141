//! Classification distribution ("tier mix") per grouping key.

use std::collections::BTreeMap;

use crate::config::ClassificationConfig;
use crate::models::{DomainScore, EntityKey, EntityKind, MixBucket, MixKey, TierMixSummary};

/// Grouping key for a domain score: the entity of `kind` plus term, and the
/// domain when `by_domain` is set. `None` when the score has no such entity.
pub fn group_key(score: &DomainScore, kind: EntityKind, by_domain: bool) -> Option<MixKey> {
    let entity_id = score.entity_id(kind)?;
    let domain = by_domain.then(|| score.domain.clone());
    Some(MixKey::new(
        EntityKey::new(kind, entity_id),
        score.term.clone(),
        domain,
    ))
}

/// Partition `scores` with `key_fn` and summarise each partition. Every key
/// in `expected` gets a summary even when no score falls into it, so that a
/// group whose records were all excluded still shows up as "no data".
/// Output is sorted by key.
pub fn summarize_mix<F>(
    scores: &[DomainScore],
    key_fn: F,
    expected: &[MixKey],
    config: &ClassificationConfig,
) -> Vec<TierMixSummary>
where
    F: Fn(&DomainScore) -> Option<MixKey>,
{
    let mut partitions: BTreeMap<MixKey, Vec<&DomainScore>> = BTreeMap::new();
    for key in expected {
        partitions.entry(key.clone()).or_default();
    }
    for score in scores {
        if let Some(key) = key_fn(score) {
            partitions.entry(key).or_default().push(score);
        }
    }

    partitions
        .into_iter()
        .map(|(key, members)| summarize_partition(key, &members, config))
        .collect()
}

/// Convenience wrapper over [`summarize_mix`] with [`group_key`].
pub fn mix_by(
    scores: &[DomainScore],
    kind: EntityKind,
    by_domain: bool,
    expected: &[MixKey],
    config: &ClassificationConfig,
) -> Vec<TierMixSummary> {
    summarize_mix(
        scores,
        |score| group_key(score, kind, by_domain),
        expected,
        config,
    )
}

fn summarize_partition(
    key: MixKey,
    members: &[&DomainScore],
    config: &ClassificationConfig,
) -> TierMixSummary {
    let band_count = config.bands.len();
    let mut counts = vec![0usize; band_count];
    for member in members {
        if let Some(idx) = config
            .bands
            .iter()
            .position(|b| b.label == member.classification)
        {
            counts[idx] += 1;
        }
    }

    let total: usize = counts.iter().sum();
    let no_data = total == 0;
    let buckets: Vec<MixBucket> = config
        .bands
        .iter()
        .zip(&counts)
        .enumerate()
        .map(|(idx, (band, count))| MixBucket {
            label: band.label.clone(),
            ordinal: band_count - idx,
            count: *count,
            percentage: (!no_data).then(|| *count as f64 * 100.0 / total as f64),
        })
        .collect();

    let mix_index = (!no_data).then(|| {
        let weighted: usize = buckets.iter().map(|b| b.ordinal * b.count).sum();
        weighted as f64 / total as f64
    });
    let top_share = buckets.first().and_then(|b| b.percentage);

    TierMixSummary {
        key,
        total,
        buckets,
        mix_index,
        top_share,
        no_data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tier;

    fn score(fellow: &str, term: &str, domain: &str, classification: &str) -> DomainScore {
        DomainScore {
            observation_id: format!("{fellow}-{term}-{domain}"),
            fellow_id: fellow.to_string(),
            coach_id: None,
            school_id: None,
            class_id: None,
            cohort: Some("2025".to_string()),
            term: term.to_string(),
            domain: domain.to_string(),
            tier_averages: Vec::new(),
            domain_average: 3.0,
            indicator_count: 1,
            classification: classification.to_string(),
            classification_ordinal: 0,
            strongest_tier: Tier::Tier1,
            weakest_tier: Tier::Tier1,
            strong_tiers: Vec::new(),
        }
    }

    #[test]
    fn counts_and_percentages_follow_band_order() {
        let config = ClassificationConfig::default();
        let scores = vec![
            score("f1", "Term 1", "LE", "Developing"),
            score("f1", "Term 1", "KPC", "Exemplary"),
            score("f1", "Term 1", "SE", "Developing"),
            score("f1", "Term 1", "IA", "Emerging"),
        ];
        let mixes = mix_by(&scores, EntityKind::Fellow, false, &[], &config);

        assert_eq!(mixes.len(), 1);
        let mix = &mixes[0];
        assert_eq!(mix.total, 4);
        let labels: Vec<&str> = mix.buckets.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, ["Exemplary", "Proficient", "Developing", "Emerging"]);
        assert_eq!(mix.percentage_of("Developing"), Some(50.0));
        assert_eq!(mix.percentage_of("Proficient"), Some(0.0));
        assert_eq!(mix.top_share, Some(25.0));
        // (4 + 2 + 2 + 1) / 4
        assert_eq!(mix.mix_index, Some(2.25));
        assert!(!mix.no_data);
    }

    #[test]
    fn expected_but_empty_groups_report_no_data() {
        let config = ClassificationConfig::default();
        let missing = MixKey::new(EntityKey::fellow("f2"), "Term 1", None);
        let mixes = mix_by(
            &[score("f1", "Term 1", "LE", "Proficient")],
            EntityKind::Fellow,
            false,
            &[missing.clone()],
            &config,
        );

        assert_eq!(mixes.len(), 2);
        let empty = mixes.iter().find(|m| m.key == missing).unwrap();
        assert!(empty.no_data);
        assert_eq!(empty.total, 0);
        assert_eq!(empty.mix_index, None);
        assert_eq!(empty.top_share, None);
        assert!(empty.buckets.iter().all(|b| b.percentage.is_none()));
        assert_eq!(empty.buckets.len(), 4);
    }

    #[test]
    fn domain_grouping_splits_partitions() {
        let config = ClassificationConfig::default();
        let scores = vec![
            score("f1", "Term 1", "LE", "Proficient"),
            score("f1", "Term 1", "KPC", "Emerging"),
            score("f1", "Term 2", "LE", "Exemplary"),
        ];
        let mixes = mix_by(&scores, EntityKind::Fellow, true, &[], &config);
        assert_eq!(mixes.len(), 3);
        assert!(mixes.iter().all(|m| m.total == 1));
        assert_eq!(mixes[0].key.domain.as_deref(), Some("KPC"));
    }

    #[test]
    fn scores_without_the_entity_are_skipped() {
        let config = ClassificationConfig::default();
        let mixes = mix_by(
            &[score("f1", "Term 1", "LE", "Proficient")],
            EntityKind::Coach,
            false,
            &[],
            &config,
        );
        assert!(mixes.is_empty());
    }
}
