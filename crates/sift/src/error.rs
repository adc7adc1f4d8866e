use thiserror::Error;

#[derive(Error, Debug)]
pub enum SiftError {
    /// A call was made through an [`crate::engine::EngineRef`] that holds no engine.
    #[error("Filter engine is not initialized")]
    NotInitialized,

    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    #[error("Unknown filter kind: {0}")]
    UnknownKind(String),

    #[error("Invalid parameter {key}={value}: {reason}")]
    InvalidParam {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Config error: {0}")]
    Config(#[from] confique::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SiftError>;
