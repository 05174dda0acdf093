use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("wrong value type for key {0}")]
    WrongType(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for ratekeeper_common::RateKeeperError {
    fn from(err: StoreError) -> Self {
        ratekeeper_common::RateKeeperError::Store(err.to_string())
    }
}
