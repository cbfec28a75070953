//! Error types.
//!
//! Only construction-time failures (loading a rule table or the clustering
//! configuration) surface to the caller as `Err`. Everything that goes wrong
//! while processing a single category is folded into a [`SkipReason`] and
//! reported alongside the results of the other categories.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Configuration problems, either fatal (at load time) or scoped to one category.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unknown clustering method '{0}'")]
    UnknownMethod(String),

    #[error("unknown parameter '{param}' for method '{method}'")]
    UnknownParameter { method: String, param: String },

    #[error("invalid value for parameter '{param}': {reason}")]
    InvalidParameter { param: String, reason: String },

    #[error("unknown category '{0}'")]
    UnknownCategory(String),

    #[error("rule for '{key}={value}' has no categories")]
    EmptyRule { key: String, value: String },
}

impl ConfigError {
    pub(crate) fn invalid(param: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidParameter {
            param: param.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failures raised by a clustering algorithm while fitting.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClusterError {
    #[error("n_samples={samples} should be >= n_clusters={clusters}")]
    TooFewSamples { samples: usize, clusters: usize },

    #[error("input contains non-finite coordinates")]
    NonFinite,

    #[error("{0}")]
    Degenerate(String),
}

/// Why a category produced no clusters in a run.
#[derive(Debug)]
pub enum SkipReason {
    /// The category has points but no entry in the clustering configuration.
    NotConfigured,
    /// Fewer points than the clustering threshold inside the area of interest.
    InsufficientData { found: usize, required: usize },
    /// The category's configuration could not be turned into an algorithm.
    Configuration(ConfigError),
    /// The algorithm itself rejected the input.
    Clustering(ClusterError),
    /// The run was cancelled before this category was reached.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotConfigured => write!(f, "no clustering technique configured"),
            SkipReason::InsufficientData { found, required } => {
                write!(f, "insufficient data ({} points, need {})", found, required)
            }
            SkipReason::Configuration(e) => write!(f, "configuration error: {}", e),
            SkipReason::Clustering(e) => write!(f, "clustering failed: {}", e),
            SkipReason::Cancelled => write!(f, "cancelled"),
        }
    }
}
