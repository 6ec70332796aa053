//! certgate library
//!
//! Authentication gateway: decides per request whether the caller proved
//! its identity with an X.509 client certificate or a Negotiate
//! (SPNEGO/Kerberos) exchange, and whether that identity satisfies the
//! named policy bound to the route.
//!
//! # Features
//!
//! - **Certificate validation**: chain building, validity window, Extended
//!   Key Usage, certificate-type gate
//! - **Revocation**: CRL lookups (online or offline) behind a TTL cache with
//!   per-key single flight and a hard timeout; Unknown fails closed
//! - **Negotiate**: explicit per-connection state machine over a pluggable
//!   GSS-API acceptor (`gssapi` feature)
//! - **Policies**: `CertificateRequired` / `NegotiateRequired`; schemes are
//!   never interchangeable and never merged

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod certificate;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod negotiate;
pub mod outcome;
pub mod policy;
pub mod principal;
pub mod revocation;
pub mod tls;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?,
    }

    Ok(())
}
