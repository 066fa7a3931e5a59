//! Error types for the context engine.
//!
//! Only configuration problems are fatal. Estimator, summarizer and archive
//! failures are recoverable: callers degrade and record a warning instead of
//! propagating them out of a compression pass.

use thiserror::Error;

/// The token estimator could not produce a count.
#[derive(Debug, Error)]
#[error("token estimation failed: {0}")]
pub struct EstimateError(pub String);

/// The external summarizer failed or returned nothing usable.
#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("summarizer request failed: {0}")]
    Request(String),

    #[error("summarizer returned empty content")]
    Empty,
}

/// Archive store failures.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("archive file is corrupt: {0}")]
    Corrupt(String),

    #[error("archive store unavailable: {0}")]
    Unavailable(String),
}

/// Invalid engine configuration. Never silently clamped.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("target token budget must be positive")]
    NonPositiveTarget,

    #[error("chunk turn cap must be at least 2, got {0}")]
    ChunkCapTooSmall(usize),

    #[error("chunk turn cap must be at most {max}, got {got}")]
    ChunkCapTooLarge { got: usize, max: usize },

    #[error("strategy trigger ratio must be at least 1.0, got {0}")]
    InvalidThreshold(f64),

    #[error("compression threshold must be within (0, 100] percent, got {0}")]
    ThresholdOutOfRange(f64),

    #[error("budget proportions sum to {0}, which exceeds the total")]
    ProportionsExceedTotal(f64),

    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The only error a compression pass can return.
#[derive(Debug, Error)]
pub enum CompressError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}
