//! Sampling errors.

use thiserror::Error;

pub type SampleResult<T> = Result<T, SampleError>;

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("failed to read {source_name}: {error}")]
    Read {
        source_name: String,
        #[source]
        error: std::io::Error,
    },

    #[error("malformed cpu statistics: {0}")]
    Parse(String),

    #[error("probe unavailable: {0}")]
    Unavailable(String),
}
