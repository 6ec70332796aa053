//! Certificate revocation checking.
//!
//! # Architecture
//!
//! ```text
//! CertificateValidator
//!   → RevocationChecker::check(request)
//!       → per-key slot (DashMap entry + async mutex)
//!       → cached verdict still fresh?  → return it
//!       → RevocationAuthority::query under a hard timeout
//!       → Good / Revoked cached for verdict_ttl
//!       → Unknown (timeout, network, no CRL) cached for unknown_ttl
//! ```
//!
//! # Modules
//!
//! - [`cache`] - [`RevocationChecker`], the TTL-governed verdict store
//! - [`crl`] - CRL parsing and the online / offline authorities

pub mod cache;
pub mod crl;

use std::time::SystemTime;

use async_trait::async_trait;

use crate::Result;

pub use cache::{RevocationChecker, RevocationCheckerOptions, RevocationStatsSnapshot};
pub use crl::{CrlSnapshot, OfflineCrlAuthority, OnlineCrlAuthority};

/// Revocation status of one certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationStatus {
    /// Not revoked according to a current CRL.
    Good,
    /// Listed as revoked.
    Revoked,
    /// The authority could not be consulted.
    Unknown,
}

/// A status and the moment it was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevocationVerdict {
    /// Status.
    pub status: RevocationStatus,
    /// When the authority answered (or failed to).
    pub determined_at: SystemTime,
}

impl RevocationVerdict {
    /// A verdict determined now.
    #[must_use]
    pub fn now(status: RevocationStatus) -> Self {
        Self {
            status,
            determined_at: SystemTime::now(),
        }
    }
}

/// Everything an authority needs to decide one certificate's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationRequest {
    /// DER content octets of the certificate serial number.
    pub serial: Vec<u8>,
    /// Raw DER encoding of the issuer distinguished name.
    pub issuer_name: Vec<u8>,
    /// Issuer DN for logs.
    pub issuer_display: String,
    /// DER `SubjectPublicKeyInfo` of the issuer; CRLs must verify with it.
    pub issuer_public_key: Vec<u8>,
    /// Subject DN for logs.
    pub subject_display: String,
    /// CRL distribution point URIs carried by the certificate.
    pub distribution_points: Vec<String>,
}

impl RevocationRequest {
    /// Cache key: issuer name and serial, hex encoded.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("{}:{}", hex::encode(&self.issuer_name), hex::encode(&self.serial))
    }

    /// Serial as lowercase hex, for logs.
    #[must_use]
    pub fn serial_hex(&self) -> String {
        hex::encode(&self.serial)
    }
}

/// A source of revocation status.
///
/// Errors are never fatal: the checker maps every error to
/// [`RevocationStatus::Unknown`].
#[async_trait]
pub trait RevocationAuthority: Send + Sync {
    /// Query the status of one certificate.
    async fn query(&self, request: &RevocationRequest) -> Result<RevocationStatus>;
}
