use std::path::PathBuf;

use thiserror::Error;

use crate::features::FeatureSchema;

#[derive(Debug, Error)]
pub enum ModelError {
    /// Too few draws for the requested operation.
    #[error("insufficient data for {context}: {available} draws available, {needed} required (need {} more draws)", shortfall(.needed, .available))]
    InsufficientData {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    /// The loaded model was trained on a different feature layout.
    #[error("feature schema mismatch: model expects {}, builder produces {}; retrain or restore the matching feature configuration", .expected.fingerprint(), .found.fingerprint())]
    SchemaMismatch {
        expected: Box<FeatureSchema>,
        found: Box<FeatureSchema>,
    },

    /// A draw handed to the feature builder breaks the pool ranges.
    #[error("invalid draw {draw_id}: {reason}")]
    InvalidDraw { draw_id: String, reason: String },

    #[error("invalid combination: {0}")]
    InvalidCombination(String),

    #[error("unknown generation method '{0}' (expected topk, random or hybrid)")]
    UnknownMethod(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no trained model at {0:?}; run `euroml train` first")]
    ArtifactMissing(PathBuf),

    #[error("model artifacts are inconsistent: {0}")]
    ArtifactInconsistent(String),

    #[error("sampling failed: {0}")]
    Sampling(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn shortfall(needed: &usize, available: &usize) -> usize {
    needed.saturating_sub(*available)
}

pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_reports_remediation() {
        let err = ModelError::InsufficientData {
            context: "training",
            needed: 300,
            available: 50,
        };
        let msg = err.to_string();
        assert!(msg.contains("50 draws available"), "{msg}");
        assert!(msg.contains("need 250 more draws"), "{msg}");
    }

    #[test]
    fn test_invalid_combination_names_invariant() {
        let err = ModelError::InvalidCombination("duplicate ball 7".to_string());
        assert!(err.to_string().contains("duplicate ball 7"));
    }
}
