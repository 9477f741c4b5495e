//! Alsavo protocol error types.

use thiserror::Error;

/// Errors that can occur while talking to an Alsavo Pro unit.
#[derive(Error, Debug)]
pub enum AlsavoError {
    /// Socket-level failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No datagram arrived within the receive timeout.
    #[error("timeout waiting for device response")]
    Timeout,

    /// Reply bytes do not fit the expected layout.
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// The device rejected the authentication handshake.
    #[error("device denied authentication")]
    AuthDenied,

    /// Retry budget exhausted; the pump is treated as offline.
    #[error("device offline after {attempts} attempts")]
    Offline { attempts: u32 },
}

impl AlsavoError {
    /// Whether a fresh connect attempt can recover from this error.
    ///
    /// Malformed replies are not retryable: the device would produce the
    /// same bytes again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Malformed(_) | Self::Offline { .. })
    }
}

/// Result type for Alsavo protocol operations.
pub type Result<T> = std::result::Result<T, AlsavoError>;
