//! Error types for wire encoding.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),
}

pub type Result<T> = std::result::Result<T, Error>;
