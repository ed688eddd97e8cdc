//! Gateway error types.

use std::time::Duration;
use thiserror::Error;

/// Startup and broker failures of the gateway process.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing environment variable.
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    /// Environment variable present but unusable.
    #[error("Invalid value for {name}: {reason}")]
    InvalidConfig { name: &'static str, reason: String },

    /// Broker error (nats_client reports through anyhow).
    #[error("Broker error: {0}")]
    Broker(#[from] anyhow::Error),
}

/// Outcome of an outbound call that did not produce a reply.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("undecodable reply: {0}")]
    Decode(String),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
