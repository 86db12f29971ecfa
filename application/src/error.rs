use std::io;
use thiserror::Error;

use domain::error::DomainError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Unrecognized frame type, short frame, malformed UTF-8. The frame is
    /// dropped and the session continues.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// A snapshot PNG failed to decode; the layer keeps its current pixels.
    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Codec error: {message}")]
    Codec { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Stroke buffer fault: {message}")]
    StrokeBuffer { message: String },

    #[error("Reconciler fault: {message}")]
    Reconciler { message: String },

    #[error("Coordinates out of bounds: {message}")]
    Bounds { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
