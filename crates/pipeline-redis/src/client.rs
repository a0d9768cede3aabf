//! Shared Redis connection and the layer's error type.

use pipeline_core::ServiceError;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tracing::debug;

/// Failures from the storage layer.
#[derive(Error, Debug)]
pub enum RedisError {
    /// The server was unreachable or rejected a command or script.
    #[error("Redis command failed: {0}")]
    Connection(#[from] redis::RedisError),

    /// A stored record did not match the expected JSON shape.
    #[error("Stored record is malformed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type RedisResult<T> = Result<T, RedisError>;

impl From<RedisError> for ServiceError {
    fn from(err: RedisError) -> Self {
        match err {
            RedisError::NotFound(what) => ServiceError::NotFound(what),
            RedisError::Connection(e) => ServiceError::Unavailable(e.to_string()),
            RedisError::Serialization(e) => ServiceError::Rejected(e.to_string()),
        }
    }
}

/// One multiplexed, self-reconnecting connection. Each query clones it.
pub type RedisPool = ConnectionManager;

/// Connect to `redis_url`, e.g. `redis://127.0.0.1:6379`.
pub async fn init_pool(redis_url: &str) -> RedisResult<RedisPool> {
    let client = redis::Client::open(redis_url)?;
    debug!(url = %redis_url, "Connecting to Redis");
    Ok(ConnectionManager::new(client).await?)
}
