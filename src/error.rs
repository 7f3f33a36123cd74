//! # Error Types
//!
//! Custom error types for the pad emulator using `thiserror`.

use thiserror::Error;

use crate::host::HostError;

/// Main error type for the pad emulator
#[derive(Debug, Error)]
pub enum PadEmulatorError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Host call errors
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// Logging setup errors
    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type alias for the pad emulator
pub type Result<T> = std::result::Result<T, PadEmulatorError>;
