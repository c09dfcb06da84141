use std::collections::BTreeMap;
use std::fmt::Write;

use crate::models::{EntityKind, MetricKind, MovementCategory, MovementRecord};
use crate::pipeline::AnalysisOutput;

#[derive(Debug, Clone, PartialEq)]
pub struct MovementCount {
    pub metric: MetricKind,
    pub category: MovementCategory,
    pub count: usize,
}

/// Whole-entity fellow movements counted by metric and category, largest
/// count first.
pub fn summarize_movements(movements: &[MovementRecord]) -> Vec<MovementCount> {
    let mut counts: BTreeMap<(MetricKind, MovementCategory), usize> = BTreeMap::new();
    for record in movements
        .iter()
        .filter(|m| m.domain.is_none() && m.entity.entity_kind == EntityKind::Fellow)
    {
        *counts.entry((record.metric, record.category)).or_insert(0) += 1;
    }

    let mut summaries: Vec<MovementCount> = counts
        .into_iter()
        .map(|((metric, category), count)| MovementCount {
            metric,
            category,
            count,
        })
        .collect();
    summaries.sort_by(|a, b| b.count.cmp(&a.count));
    summaries
}

pub fn build_report(output: &AnalysisOutput, cohort: Option<&str>, limit: usize) -> String {
    let mut report = String::new();
    let cohort_label = cohort.unwrap_or("all cohorts");

    let _ = writeln!(report, "# Observation Tier Analytics Report");
    let _ = writeln!(
        report,
        "Generated for {} across terms: {}",
        cohort_label,
        if output.terms.is_empty() {
            "none".to_string()
        } else {
            output.terms.join(", ")
        }
    );
    let _ = writeln!(report);
    let _ = writeln!(report, "## Cohort Classification Mix");

    let cohort_mixes: Vec<_> = output
        .cohort_summaries
        .iter()
        .filter(|s| cohort.map_or(true, |c| s.cohort == c))
        .filter_map(|s| s.mix.as_ref().map(|mix| (s, mix)))
        .collect();
    if cohort_mixes.is_empty() {
        let _ = writeln!(report, "No observations recorded.");
    } else {
        for (summary, mix) in cohort_mixes {
            if mix.no_data {
                let _ = writeln!(report, "- {} {}: no data", summary.cohort, summary.term);
                continue;
            }
            let buckets: Vec<String> = mix
                .buckets
                .iter()
                .map(|b| format!("{} {:.1}%", b.label, b.percentage.unwrap_or(0.0)))
                .collect();
            let _ = writeln!(
                report,
                "- {} {} ({} domain scores): {}",
                summary.cohort,
                summary.term,
                mix.total,
                buckets.join(", ")
            );
        }
    }

    let _ = writeln!(report);
    let _ = writeln!(report, "## Highest Risk");

    if output.risks.is_empty() {
        let _ = writeln!(report, "No entities with enough data to score.");
    } else {
        for risk in output.risks.iter().take(limit) {
            let _ = writeln!(
                report,
                "- {} ({:?}) score {:.1} [{}] in {} across {} terms",
                risk.entity, risk.metric, risk.score, risk.level, risk.term, risk.terms_observed
            );
        }
    }

    let _ = writeln!(report);
    let _ = writeln!(report, "## Fellow Movement");

    let movement_counts = summarize_movements(&output.movements);
    if movement_counts.is_empty() {
        let _ = writeln!(report, "No consecutive terms to compare.");
    } else {
        for count in movement_counts {
            let _ = writeln!(
                report,
                "- {:?} {}: {}",
                count.metric,
                count.category.as_str(),
                count.count
            );
        }
    }

    let _ = writeln!(report);
    let _ = writeln!(report, "## Data Quality");

    if output.diagnostics.is_empty() {
        let _ = writeln!(report, "No data problems found.");
    } else {
        for (kind, count) in output.diagnostics.counts() {
            let _ = writeln!(report, "- {kind}: {count}");
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostic;
    use crate::models::EntityKey;

    fn movement(entity: EntityKey, category: MovementCategory) -> MovementRecord {
        MovementRecord {
            entity,
            metric: MetricKind::DomainAverage,
            domain: None,
            from_term: "Term 1".to_string(),
            to_term: "Term 2".to_string(),
            from_value: 2.0,
            to_value: 2.5,
            delta: 0.5,
            magnitude: 0.5,
            category,
            label: category.as_str().to_string(),
        }
    }

    #[test]
    fn counts_fellow_movements_only() {
        let movements = vec![
            movement(EntityKey::fellow("f1"), MovementCategory::Improved),
            movement(EntityKey::fellow("f2"), MovementCategory::Improved),
            movement(EntityKey::fellow("f3"), MovementCategory::Stagnant),
            movement(EntityKey::cohort("2025"), MovementCategory::Improved),
        ];
        let counts = summarize_movements(&movements);

        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].category, MovementCategory::Improved);
        assert_eq!(counts[0].count, 2);
        assert_eq!(counts[1].count, 1);
    }

    #[test]
    fn empty_output_renders_placeholders() {
        let report = build_report(&AnalysisOutput::default(), None, 10);
        assert!(report.starts_with("# Observation Tier Analytics Report"));
        assert!(report.contains("all cohorts across terms: none"));
        assert!(report.contains("No observations recorded."));
        assert!(report.contains("No data problems found."));
    }

    #[test]
    fn lists_diagnostic_counts() {
        let mut output = AnalysisOutput::default();
        output.diagnostics.push(Diagnostic::MissingReferenceData {
            observation_id: "o1".to_string(),
            indicator_id: "x".to_string(),
        });
        let report = build_report(&output, Some("2025"), 5);
        assert!(report.contains("Generated for 2025"));
        assert!(report.contains("- missing_reference_data: 1"));
    }
}
