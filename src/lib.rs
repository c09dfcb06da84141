//! Tier-based classroom observation analytics.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod mix;
pub mod models;
pub mod movement;
pub mod peer;
pub mod pipeline;
pub mod report;
pub mod risk;
pub mod summary;

pub use config::AnalysisConfig;
pub use error::{AnalysisError, ConfigError, Diagnostic, Diagnostics};
pub use pipeline::{run, AnalysisInput, AnalysisOutput};
