use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Redis connection error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Invalid lease duration: {0:?}")]
    InvalidLease(std::time::Duration),
}
