use adaptpool_core::PoolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("pool not found: {0}")]
    UnknownPool(String),

    #[error("pool already registered: {0}")]
    DuplicatePool(String),

    #[error("config codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
