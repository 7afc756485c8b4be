//! Error types for ecnet-proxy

use thiserror::Error;

/// Main error type for ecnet-proxy
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to bind {addr} for module {module}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        module: &'static str,
        source: std::io::Error,
    },

    #[error("No module registered for {0}")]
    UnknownModule(&'static str),

    #[error("Unsupported feature: {0}")]
    Unsupported(String),
}

/// Result type alias for ecnet-proxy
pub type Result<T> = std::result::Result<T, Error>;
