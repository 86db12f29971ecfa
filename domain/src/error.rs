use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("Invalid brush size: {0}")]
    InvalidBrushSize(usize),

    #[error("Layer size mismatch: {0}")]
    LayerSizeMismatch(String),

    #[error("Invalid color format: {0}")]
    InvalidColorFormat(String),

    #[error("Codec error: {0}")]
    CodecError(String),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

pub type DomainResult<T> = Result<T, DomainError>;
