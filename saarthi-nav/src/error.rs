//! Error types for SaarthiNav

use thiserror::Error;

use crate::tf::TfError;

/// SaarthiNav error type
#[derive(Error, Debug)]
pub enum NavError {
    #[error("Connection failed: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Action server {service} not available after {attempts} attempts")]
    ServerUnavailable { service: String, attempts: usize },

    #[error("Transform error: {0}")]
    Transform(#[from] TfError),

    #[error("Shutdown requested")]
    Shutdown,
}

impl From<prost::DecodeError> for NavError {
    fn from(e: prost::DecodeError) -> Self {
        NavError::Protocol(e.to_string())
    }
}

impl From<toml::de::Error> for NavError {
    fn from(e: toml::de::Error) -> Self {
        NavError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NavError>;
