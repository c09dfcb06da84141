use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::models::{AcademicResult, Indicator, IndicatorScore, Observation, Tier};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IndicatorRow {
    pub indicator_id: Option<String>,
    pub domain: Option<String>,
    pub tier: Option<String>,
    pub question: Option<String>,
}

/// One indicator score in long format, carrying its observation's columns.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ObservationRow {
    pub observation_id: Option<String>,
    pub fellow_id: Option<String>,
    pub coach_id: Option<String>,
    pub school_id: Option<String>,
    pub class_id: Option<String>,
    pub cohort: Option<String>,
    pub grade: Option<String>,
    pub subject: Option<String>,
    pub term: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub observed_on: Option<NaiveDate>,
    pub indicator_id: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AcademicRow {
    pub class_id: Option<String>,
    pub fellow_id: Option<String>,
    pub coach_id: Option<String>,
    pub cohort: Option<String>,
    pub grade: Option<String>,
    pub subject: Option<String>,
    pub term: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub average: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub class_size: Option<u32>,
}

/// Rows rejected at the boundary, with the reason.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub rejected: Vec<String>,
}

impl IngestReport {
    fn reject(&mut self, reason: String) {
        warn!("{reason}");
        self.rejected.push(reason);
    }
}

/// Trimmed, non-empty value of an optional column.
fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn build_indicators(rows: &[IndicatorRow], report: &mut IngestReport) -> Vec<Indicator> {
    let mut indicators = Vec::new();
    for (line, row) in rows.iter().enumerate() {
        let (Some(id), Some(domain), Some(tier_label)) =
            (present(&row.indicator_id), present(&row.domain), present(&row.tier))
        else {
            report.reject(format!("indicator row {line}: missing id, domain or tier"));
            continue;
        };
        let tier: Tier = match tier_label.parse() {
            Ok(tier) => tier,
            Err(reason) => {
                report.reject(format!("indicator {id}: {reason}"));
                continue;
            }
        };
        indicators.push(Indicator {
            id,
            domain,
            tier,
            question: present(&row.question),
        });
    }
    indicators
}

/// Fold long-format rows into observations. Rows without an observation id
/// are grouped by (fellow, term, date, class) and given a generated id.
pub fn build_observations(rows: &[ObservationRow], report: &mut IngestReport) -> Vec<Observation> {
    type SyntheticKey = (String, String, Option<NaiveDate>, Option<String>);

    let mut by_id: BTreeMap<String, Observation> = BTreeMap::new();
    let mut synthetic: BTreeMap<SyntheticKey, String> = BTreeMap::new();

    for (line, row) in rows.iter().enumerate() {
        let (Some(fellow_id), Some(term), Some(indicator_id)) =
            (present(&row.fellow_id), present(&row.term), present(&row.indicator_id))
        else {
            report.reject(format!(
                "observation row {line}: missing fellow, term or indicator"
            ));
            continue;
        };

        let id = match present(&row.observation_id) {
            Some(id) => id,
            None => synthetic
                .entry((
                    fellow_id.clone(),
                    term.clone(),
                    row.observed_on,
                    present(&row.class_id),
                ))
                .or_insert_with(|| format!("obs-{}", Uuid::new_v4()))
                .clone(),
        };

        let observation = by_id.entry(id.clone()).or_insert_with(|| Observation {
            id,
            fellow_id,
            coach_id: present(&row.coach_id),
            school_id: present(&row.school_id),
            class_id: present(&row.class_id),
            cohort: present(&row.cohort),
            grade: present(&row.grade),
            subject: present(&row.subject),
            term,
            observed_on: row.observed_on,
            scores: Vec::new(),
        });
        observation.scores.push(IndicatorScore {
            indicator_id,
            score: row.score,
        });
    }

    by_id.into_values().collect()
}

pub fn build_academic_results(
    rows: &[AcademicRow],
    report: &mut IngestReport,
) -> Vec<AcademicResult> {
    let mut results = Vec::new();
    for (line, row) in rows.iter().enumerate() {
        let (Some(class_id), Some(term)) = (present(&row.class_id), present(&row.term)) else {
            report.reject(format!("academic row {line}: missing class or term"));
            continue;
        };
        results.push(AcademicResult {
            class_id,
            fellow_id: present(&row.fellow_id),
            coach_id: present(&row.coach_id),
            cohort: present(&row.cohort),
            grade: present(&row.grade),
            subject: present(&row.subject),
            term,
            average: row.average,
            class_size: row.class_size,
        });
    }
    results
}

fn read_csv<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for result in reader.deserialize::<T>() {
        rows.push(result.with_context(|| format!("malformed row in {}", path.display()))?);
    }
    Ok(rows)
}

pub fn read_indicator_rows(path: &Path) -> anyhow::Result<Vec<IndicatorRow>> {
    read_csv(path)
}

pub fn read_observation_rows(path: &Path) -> anyhow::Result<Vec<ObservationRow>> {
    read_csv(path)
}

pub fn read_academic_rows(path: &Path) -> anyhow::Result<Vec<AcademicRow>> {
    read_csv(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_indicators_and_rejects_bad_tiers() {
        let file = write_csv(
            "indicator_id,domain,tier,question\n\
             le-1,LE,Tier 1,Is the room orderly?\n\
             le-2,LE,Tier 9,\n\
             ,LE,Tier 2,\n",
        );
        let rows = read_indicator_rows(file.path()).unwrap();
        let mut report = IngestReport::default();
        let indicators = build_indicators(&rows, &mut report);

        assert_eq!(indicators.len(), 1);
        assert_eq!(indicators[0].tier, Tier::Tier1);
        assert_eq!(indicators[0].question.as_deref(), Some("Is the room orderly?"));
        assert_eq!(report.rejected.len(), 2);
    }

    #[test]
    fn folds_long_rows_into_observations() {
        let file = write_csv(
            "observation_id,fellow_id,coach_id,school_id,class_id,cohort,grade,subject,term,observed_on,indicator_id,score\n\
             o1,f1,c1,s1,k1,2025,4,Maths,Term 1,2025-02-03,le-1,3\n\
             o1,f1,c1,s1,k1,2025,4,Maths,Term 1,2025-02-03,le-2,\n\
             o1,f1,c1,s1,k1,2025,4,Maths,Term 1,2025-02-03,le-3,n/a\n\
             o2,f2,,,,,,,Term 1,not-a-date,le-1,4.5\n",
        );
        let rows = read_observation_rows(file.path()).unwrap();
        let mut report = IngestReport::default();
        let observations = build_observations(&rows, &mut report);

        assert!(report.rejected.is_empty());
        assert_eq!(observations.len(), 2);
        let first = &observations[0];
        assert_eq!(first.id, "o1");
        assert_eq!(first.scores.len(), 3);
        assert_eq!(first.scores[0].score, Some(3.0));
        assert_eq!(first.scores[1].score, None);
        assert_eq!(first.scores[2].score, None);
        assert_eq!(first.observed_on, NaiveDate::from_ymd_opt(2025, 2, 3));

        let second = &observations[1];
        assert_eq!(second.coach_id, None);
        assert_eq!(second.observed_on, None);
        assert_eq!(second.scores[0].score, Some(4.5));
    }

    #[test]
    fn rows_without_ids_share_a_generated_id() {
        let rows = vec![
            ObservationRow {
                fellow_id: Some("f1".to_string()),
                term: Some("Term 2".to_string()),
                indicator_id: Some("le-1".to_string()),
                score: Some(2.0),
                ..ObservationRow::default()
            },
            ObservationRow {
                fellow_id: Some("f1".to_string()),
                term: Some("Term 2".to_string()),
                indicator_id: Some("le-2".to_string()),
                score: Some(3.0),
                ..ObservationRow::default()
            },
            ObservationRow {
                term: Some("Term 2".to_string()),
                indicator_id: Some("le-2".to_string()),
                ..ObservationRow::default()
            },
        ];
        let mut report = IngestReport::default();
        let observations = build_observations(&rows, &mut report);

        assert_eq!(observations.len(), 1);
        assert!(observations[0].id.starts_with("obs-"));
        assert_eq!(observations[0].scores.len(), 2);
        assert_eq!(report.rejected.len(), 1);
    }

    #[test]
    fn academic_rows_tolerate_nulls() {
        let file = write_csv(
            "class_id,fellow_id,coach_id,cohort,grade,subject,term,average,class_size\n\
             k1,f1,c1,2025,4,Maths,Term 1,61.5,32\n\
             k2,,,,,,Term 1,,\n\
             ,f1,,,,,Term 1,50,10\n",
        );
        let rows = read_academic_rows(file.path()).unwrap();
        let mut report = IngestReport::default();
        let results = build_academic_results(&rows, &mut report);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].average, Some(61.5));
        assert_eq!(results[0].class_size, Some(32));
        assert_eq!(results[1].average, None);
        assert_eq!(results[1].class_size, None);
        assert_eq!(report.rejected.len(), 1);
    }
}
