use thiserror::Error;

/// Errors produced by the bridge core.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("invalid banner: {0}")]
    Banner(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for BridgeError {
    fn from(e: redis::RedisError) -> Self {
        BridgeError::Store(e.to_string())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
