//! Error types for the exporter.

use thiserror::Error;

use crate::encode::EncodeError;

/// Result type alias using [`ExporterError`].
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Errors surfaced by the exporter core.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// A configured exclusion or mapping pattern is not a valid regex.
    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A name or label template cannot be applied to its pattern.
    #[error("Invalid template '{template}' for pattern '{pattern}': {reason}")]
    InvalidTemplate {
        pattern: String,
        template: String,
        reason: String,
    },

    /// A metric family name does not match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
    #[error("Invalid Prometheus metric name '{0}'")]
    InvalidMetricName(String),

    /// The trailer of a response could not be encoded.
    #[error("Encoding failed: {0}")]
    Encode(#[from] EncodeError),

    /// Writing to the response sink failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
