use std::any::Any;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Lease store unreachable for key {key:?}: {source}")]
    Store {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Malformed reply from lease store for key {key:?}: {reason}")]
    MalformedReply { key: String, reason: String },

    #[error("Invalid lease expiry {0:?}")]
    InvalidExpiry(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Workload failed: {0:#}")]
    Workload(anyhow::Error),

    #[error("Panicked: {0}")]
    Panicked(String),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn store(key: &str, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Store {
            key: key.to_string(),
            source: source.into(),
        }
    }

    /// Turns a payload caught by `catch_unwind` into an error value.
    pub fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }

    pub fn is_store_failure(&self) -> bool {
        match self {
            Self::Store { .. } | Self::MalformedReply { .. } => true,
            #[cfg(feature = "redis")]
            Self::Redis(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
