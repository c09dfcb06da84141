use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{EntityKey, MetricKind, PeerDimension};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("classification table is empty")]
    EmptyClassification,

    #[error("classification band `{label}` must have a lower minimum than the band above it")]
    NonMonotonicClassification { label: String },

    #[error("classification band label is duplicated or empty: `{label}`")]
    InvalidClassificationLabel { label: String },

    #[error("score range is invalid: min {min}, max {max}")]
    InvalidScoreRange { min: f64, max: f64 },

    #[error("threshold `{name}` is not a finite number")]
    NonFiniteThreshold { name: String },

    #[error("{metric} {direction} bands must be positive and strictly decreasing (at `{label}`)")]
    NonMonotonicBands {
        metric: MetricKind,
        direction: &'static str,
        label: String,
    },

    #[error("{metric} risk cutoff {risk_cutoff} must sit below the target {target}")]
    RiskAboveTarget {
        metric: MetricKind,
        risk_cutoff: f64,
        target: f64,
    },

    #[error("trajectory slope bands must satisfy strong > moderate > 0")]
    InvalidSlopeBands,

    #[error("risk weight `{name}` must be finite and non-negative")]
    InvalidRiskWeight { name: &'static str },

    #[error("risk range is invalid: floor {floor}, ceiling {ceiling}")]
    InvalidRiskRange { floor: f64, ceiling: f64 },

    #[error("risk level `{label}` must have a lower minimum than the level above it")]
    NonMonotonicRiskLevels { label: String },

    #[error("minimum peer population must be at least 1")]
    ZeroPeerPopulation,

    #[error("term `{term}` appears more than once in the configured order")]
    DuplicateTerm { term: String },
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),
}

/// A recoverable data problem, reported rather than raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A score points at an indicator missing from the reference table.
    MissingReferenceData {
        observation_id: String,
        indicator_id: String,
    },
    /// A score outside the configured range; the whole record is excluded.
    MalformedScore {
        record_id: String,
        field: String,
        value: f64,
    },
    InsufficientPeerPopulation {
        #[serde(flatten)]
        entity: EntityKey,
        term: String,
        metric: MetricKind,
        dimension: PeerDimension,
        peer_group: String,
        population: usize,
        required: usize,
    },
    IncompleteTermPair {
        #[serde(flatten)]
        entity: EntityKey,
        metric: MetricKind,
        domain: Option<String>,
        from_term: String,
        to_term: String,
        missing_term: String,
    },
}

impl Diagnostic {
    pub fn kind(&self) -> &'static str {
        match self {
            Diagnostic::MissingReferenceData { .. } => "missing_reference_data",
            Diagnostic::MalformedScore { .. } => "malformed_score",
            Diagnostic::InsufficientPeerPopulation { .. } => "insufficient_peer_population",
            Diagnostic::IncompleteTermPair { .. } => "incomplete_term_pair",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn count_of(&self, kind: &str) -> usize {
        self.entries.iter().filter(|d| d.kind() == kind).count()
    }

    /// Counts per diagnostic kind, sorted by kind name.
    pub fn counts(&self) -> Vec<(&'static str, usize)> {
        let mut map: std::collections::BTreeMap<&'static str, usize> =
            std::collections::BTreeMap::new();
        for entry in &self.entries {
            *map.entry(entry.kind()).or_insert(0) += 1;
        }
        map.into_iter().collect()
    }
}

impl Extend<Diagnostic> for Diagnostics {
    fn extend<T: IntoIterator<Item = Diagnostic>>(&mut self, iter: T) {
        self.entries.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_group_by_kind() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(Diagnostic::MissingReferenceData {
            observation_id: "obs-1".to_string(),
            indicator_id: "x".to_string(),
        });
        diagnostics.push(Diagnostic::MissingReferenceData {
            observation_id: "obs-2".to_string(),
            indicator_id: "y".to_string(),
        });
        diagnostics.push(Diagnostic::MalformedScore {
            record_id: "obs-3".to_string(),
            field: "z".to_string(),
            value: 11.0,
        });

        assert_eq!(diagnostics.len(), 3);
        assert_eq!(diagnostics.count_of("missing_reference_data"), 2);
        assert_eq!(
            diagnostics.counts(),
            vec![("malformed_score", 1), ("missing_reference_data", 2)]
        );
    }

    #[test]
    fn diagnostics_serialize_with_kind_tag() {
        let diagnostic = Diagnostic::IncompleteTermPair {
            entity: EntityKey::fellow("f-9"),
            metric: MetricKind::DomainAverage,
            domain: None,
            from_term: "Term 1".to_string(),
            to_term: "Term 2".to_string(),
            missing_term: "Term 2".to_string(),
        };
        let json = serde_json::to_value(&diagnostic).unwrap();
        assert_eq!(json["kind"], "incomplete_term_pair");
        assert_eq!(json["entity_id"], "f-9");
        assert_eq!(json["missing_term"], "Term 2");
    }
}
