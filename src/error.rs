use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("data unavailable in {collection}: {reason}")]
    DataUnavailable { collection: String, reason: String },

    #[error("insufficient history for player {player_id} at {at}")]
    InsufficientHistory { player_id: String, at: DateTime<Utc> },

    #[error("schema mismatch: expected [{}], found [{}]", .expected.join(", "), .found.join(", "))]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("{model} fit did not converge: {detail}")]
    NumericInstability { model: String, detail: String },

    #[error("artifact missing: {}", .path.display())]
    ArtifactMissing { path: PathBuf },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn data_unavailable(collection: &str, reason: impl Into<String>) -> Self {
        Self::DataUnavailable {
            collection: collection.to_string(),
            reason: reason.into(),
        }
    }

    pub fn numeric(model: &str, detail: impl Into<String>) -> Self {
        Self::NumericInstability {
            model: model.to_string(),
            detail: detail.into(),
        }
    }

    pub fn schema(expected: &[String], found: &[String]) -> Self {
        Self::SchemaMismatch {
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }

    /// Row-level problems are skipped by callers; everything else stops the run.
    pub fn is_row_level(&self) -> bool {
        matches!(self, Self::InsufficientHistory { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
