//! Error types for regbot-controller.

use thiserror::Error;

use crate::engine::ControllerState;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: ControllerState,
        to: ControllerState,
    },

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Correctness failures that halt the operation that raised them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InvalidTransition { .. } | Error::Invariant(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
