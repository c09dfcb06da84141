use sqlx::{PgPool, Row};

use crate::ingest::{AcademicRow, IndicatorRow, ObservationRow};

/// Optional filters shared by the observation and academic queries.
#[derive(Debug, Clone, Default)]
pub struct Scope<'a> {
    pub cohort: Option<&'a str>,
    pub term: Option<&'a str>,
}

impl Scope<'_> {
    fn filter_sql(&self, alias: &str) -> String {
        let mut clause = String::from(" WHERE 1 = 1");
        let mut index = 1;
        if self.cohort.is_some() {
            clause.push_str(&format!(" AND {alias}.cohort = ${index}"));
            index += 1;
        }
        if self.term.is_some() {
            clause.push_str(&format!(" AND {alias}.term = ${index}"));
        }
        clause
    }
}

pub async fn fetch_indicator_rows(pool: &PgPool) -> anyhow::Result<Vec<IndicatorRow>> {
    let records = sqlx::query(
        r#"
        SELECT indicator_id, domain, tier, question
        FROM observation_analytics.indicators
        ORDER BY indicator_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut rows = Vec::with_capacity(records.len());
    for row in records {
        rows.push(IndicatorRow {
            indicator_id: row.try_get("indicator_id")?,
            domain: row.try_get("domain")?,
            tier: row.try_get("tier")?,
            question: row.try_get("question")?,
        });
    }
    Ok(rows)
}

/// Scores in long format, one row per indicator score.
pub async fn fetch_observation_rows(
    pool: &PgPool,
    scope: &Scope<'_>,
) -> anyhow::Result<Vec<ObservationRow>> {
    let query = format!(
        "SELECT o.observation_id, o.fellow_id, o.coach_id, o.school_id, o.class_id, \
         o.cohort, o.grade, o.subject, o.term, o.observed_on, \
         s.indicator_id, s.score \
         FROM observation_analytics.observations o \
         JOIN observation_analytics.indicator_scores s ON s.observation_id = o.observation_id{} \
         ORDER BY o.observation_id, s.indicator_id",
        scope.filter_sql("o")
    );

    let mut statement = sqlx::query(&query);
    if let Some(cohort) = scope.cohort {
        statement = statement.bind(cohort);
    }
    if let Some(term) = scope.term {
        statement = statement.bind(term);
    }

    let records = statement.fetch_all(pool).await?;
    let mut rows = Vec::with_capacity(records.len());
    for row in records {
        rows.push(ObservationRow {
            observation_id: row.try_get("observation_id")?,
            fellow_id: row.try_get("fellow_id")?,
            coach_id: row.try_get("coach_id")?,
            school_id: row.try_get("school_id")?,
            class_id: row.try_get("class_id")?,
            cohort: row.try_get("cohort")?,
            grade: row.try_get("grade")?,
            subject: row.try_get("subject")?,
            term: row.try_get("term")?,
            observed_on: row.try_get("observed_on")?,
            indicator_id: row.try_get("indicator_id")?,
            score: row.try_get("score")?,
        });
    }
    Ok(rows)
}

pub async fn fetch_academic_rows(
    pool: &PgPool,
    scope: &Scope<'_>,
) -> anyhow::Result<Vec<AcademicRow>> {
    let query = format!(
        "SELECT a.class_id, a.fellow_id, a.coach_id, a.cohort, a.grade, a.subject, \
         a.term, a.average, a.class_size \
         FROM observation_analytics.academic_results a{} \
         ORDER BY a.class_id, a.term",
        scope.filter_sql("a")
    );

    let mut statement = sqlx::query(&query);
    if let Some(cohort) = scope.cohort {
        statement = statement.bind(cohort);
    }
    if let Some(term) = scope.term {
        statement = statement.bind(term);
    }

    let records = statement.fetch_all(pool).await?;
    let mut rows = Vec::with_capacity(records.len());
    for row in records {
        let class_size: Option<i32> = row.try_get("class_size")?;
        rows.push(AcademicRow {
            class_id: row.try_get("class_id")?,
            fellow_id: row.try_get("fellow_id")?,
            coach_id: row.try_get("coach_id")?,
            cohort: row.try_get("cohort")?,
            grade: row.try_get("grade")?,
            subject: row.try_get("subject")?,
            term: row.try_get("term")?,
            average: row.try_get("average")?,
            class_size: class_size.and_then(|size| u32::try_from(size).ok()),
        });
    }
    Ok(rows)
}
