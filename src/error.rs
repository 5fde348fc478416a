//! Error taxonomy for coreset construction and clustering.

use thiserror::Error;

/// Errors surfaced by public entry points in this crate.
///
/// Every public function returns `Result<T, SumError>`; none of these are caught
/// internally. A failed call leaves the caller's state untouched beyond whatever
/// working buffers it allocated for the attempt.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SumError {
    /// k=0, N=0, dimension mismatches, unknown measure/prior key, negative weights.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Sampling was attempted before `make_sampler` built the alias table.
    #[error("sampler not ready: make_sampler has not been called")]
    NotReady,

    /// The probability vector handed to the alias sampler is degenerate.
    #[error("invalid distribution: {0}")]
    InvalidDistribution(String),

    /// An assignment vector referenced a center index at or past k.
    #[error("invalid assignment: point {point} assigned to cluster {cluster} but k={k}")]
    InvalidAssignment {
        point: usize,
        cluster: usize,
        k: usize,
    },

    /// Empty cluster encountered where the scheme in use treats it as fatal (BFL),
    /// or every point collapsed to one location during D² seeding.
    #[error("degenerate input: {0}")]
    Degenerate(String),

    /// Serialization read/write failure.
    #[error("io error: {0}")]
    IoError(String),

    /// k exceeds the 32-bit index range this crate uses for coreset indices.
    #[error("overflow: {what} ({value}) exceeds the supported range")]
    Overflow { what: String, value: u64 },
}

impl From<std::io::Error> for SumError {
    fn from(e: std::io::Error) -> Self {
        SumError::IoError(e.to_string())
    }
}

pub type SumResult<T> = Result<T, SumError>;
