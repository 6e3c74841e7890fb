use thiserror::Error;

pub type Result<T> = std::result::Result<T, PolicyError>;

#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum PolicyError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Parsing error: {0}")]
    ParsingError(String),

    #[error("Access error: {0}")]
    AccessError(String),

    #[error("Resource not found: {0}")]
    NotFoundError(String),

    #[error("Detection error: {0}")]
    DetectionError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("XML error: {0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

// Helper functions for creating specific errors
impl PolicyError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        PolicyError::ConfigError(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        PolicyError::ParsingError(msg.into())
    }

    pub fn access<S: Into<String>>(msg: S) -> Self {
        PolicyError::AccessError(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        PolicyError::NotFoundError(msg.into())
    }

    pub fn detection<S: Into<String>>(msg: S) -> Self {
        PolicyError::DetectionError(msg.into())
    }

    pub fn storage<S: Into<String>>(msg: S) -> Self {
        PolicyError::StorageError(msg.into())
    }
}
