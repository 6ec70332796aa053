//! Error types for certgate
//!
//! These are process-level errors (configuration, I/O, TLS setup, revocation
//! authority transport). Per-request authentication failures are not errors;
//! they are reasons carried by [`crate::outcome::AuthenticationResult`].

use std::io;

use thiserror::Error;

/// Result type alias for certgate
pub type Result<T> = std::result::Result<T, Error>;

/// certgate errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS setup error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Revocation authority could not produce a status
    #[error("Revocation authority error: {0}")]
    Revocation(String),

    /// Negotiate acceptor could not be created
    #[error("Negotiate error: {0}")]
    Negotiate(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Self::Tls(e.to_string())
    }
}
