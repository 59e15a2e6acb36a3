//! Error handling for the segment insight engine.
use thiserror::Error;

/// Error types produced by the engine.
///
/// Recovery happens nowhere inside the engine: every fallible step surfaces
/// its error to the caller, which is expected to map it onto a request
/// boundary (HTTP status, CLI exit code, ...).
#[derive(Error, Debug)]
pub enum EngineError {
    /// The frame, after applying request filters and date-range selection,
    /// has zero rows in at least one of the baseline/comparison windows.
    #[error("the filtered dataset is empty")]
    EmptyDataset,

    /// The request document was unparseable: a bad date, a missing
    /// required field, or an unknown aggregation method.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A warehouse-backed source rejected the request (bad credentials,
    /// missing table). No code in this crate constructs this variant yet —
    /// warehouse connectors are external collaborators (see `spec.md` §1) —
    /// but it is kept in the enum for interface completeness with the
    /// documented error kinds.
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// Any other unexpected failure during cube analysis.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<polars::error::PolarsError> for EngineError {
    fn from(err: polars::error::PolarsError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Specialized result type for the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
