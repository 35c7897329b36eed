use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis unreachable or the pool gave up waiting for a connection
    #[error("cache connection error: {0}")]
    ConnectionError(String),

    #[error("cache value could not be encoded or decoded: {0}")]
    SerializationError(String),

    #[error("cache command failed: {0}")]
    OperationError(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::SerializationError(err.to_string())
    }
}

#[cfg(feature = "cache")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_timeout() {
            CacheError::ConnectionError(err.to_string())
        } else {
            CacheError::OperationError(err.to_string())
        }
    }
}

#[cfg(feature = "cache")]
impl From<bb8::RunError<redis::RedisError>> for CacheError {
    fn from(err: bb8::RunError<redis::RedisError>) -> Self {
        match err {
            bb8::RunError::User(e) => e.into(),
            bb8::RunError::TimedOut => {
                CacheError::ConnectionError("timed out waiting for a pooled connection".to_string())
            }
        }
    }
}
