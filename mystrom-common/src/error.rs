use thiserror::Error;

/// Common error type for the exporter components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid hardware address: {0}")]
    HardwareAddress(String),
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
