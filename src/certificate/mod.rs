//! X.509 client certificate authentication.
//!
//! # Validation order
//!
//! ```text
//! presented chain (leaf + intermediates from the TLS handshake)
//!   → parse                      (Malformed)
//!   → certificate-type gate      (CertificateTypeNotAllowed)
//!   → chain to a trust anchor    (ChainInvalid)
//!   → validity window            (Expired / NotYetValid)
//!   → Extended Key Usage         (InvalidCertificateUse)
//!   → revocation per link        (Revoked / RevocationIndeterminate)
//!   → Principal { subject-identifier }
//! ```
//!
//! # Modules
//!
//! - [`chain`] - path building and signature checks over `x509-parser` types
//! - [`validator`] - [`CertificateValidator`]

pub mod chain;
pub mod validator;

use std::fmt;

use rustls::pki_types::CertificateDer;
use thiserror::Error;

use crate::outcome::FailureKind;
use crate::tls::load_certs;
use crate::{Error, Result};

pub use validator::{CertificateOptions, CertificateValidator};

/// A client certificate chain as handed over by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedCertificate {
    /// The client's own certificate.
    pub end_entity: CertificateDer<'static>,
    /// Any further certificates the client sent, nearest issuer first.
    pub intermediates: Vec<CertificateDer<'static>>,
}

impl PresentedCertificate {
    /// Build from a TLS peer chain. Returns `None` for an empty chain.
    #[must_use]
    pub fn from_chain(mut chain: Vec<CertificateDer<'static>>) -> Option<Self> {
        if chain.is_empty() {
            return None;
        }
        let end_entity = chain.remove(0);
        Some(Self {
            end_entity,
            intermediates: chain,
        })
    }

    /// Parse a PEM bundle, leaf first.
    pub fn from_pem(data: &[u8]) -> Result<Option<Self>> {
        let certs = rustls_pemfile::certs(&mut &data[..])
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Config(format!("Failed to parse PEM certificates: {e}")))?;
        Ok(Self::from_chain(certs))
    }
}

/// Whether a certificate vouches for itself or was issued by a CA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateKind {
    /// Issued by another certificate.
    ChainIssued,
    /// Subject equals issuer and the signature verifies with its own key.
    SelfSigned,
}

impl fmt::Display for CertificateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChainIssued => f.write_str("chain-issued"),
            Self::SelfSigned => f.write_str("self-signed"),
        }
    }
}

/// Why a presented certificate did not authenticate the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateRejection {
    /// The transport handed over no certificate.
    #[error("no client certificate presented")]
    NoCertificatePresented,

    /// DER could not be parsed.
    #[error("malformed certificate: {0}")]
    Malformed(String),

    /// Rejected by the `allowed_certificate_types` gate.
    #[error("{0} certificates are not allowed")]
    CertificateTypeNotAllowed(CertificateKind),

    /// No valid path to a trust anchor.
    #[error("certificate chain invalid: {0}")]
    ChainInvalid(String),

    /// `notAfter` has passed.
    #[error("certificate expired")]
    Expired,

    /// `notBefore` is in the future.
    #[error("certificate not yet valid")]
    NotYetValid,

    /// Extended Key Usage present without clientAuth.
    #[error("certificate not valid for client authentication")]
    InvalidCertificateUse,

    /// A certificate in the chain is revoked.
    #[error("certificate revoked")]
    Revoked,

    /// The revocation authority could not be consulted.
    #[error("revocation status could not be determined")]
    RevocationIndeterminate,
}

impl CertificateRejection {
    /// Map onto the shared failure taxonomy.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NoCertificatePresented => FailureKind::CredentialAbsent,
            Self::RevocationIndeterminate => FailureKind::CredentialIndeterminate,
            Self::Malformed(_)
            | Self::CertificateTypeNotAllowed(_)
            | Self::ChainInvalid(_)
            | Self::Expired
            | Self::NotYetValid
            | Self::InvalidCertificateUse
            | Self::Revoked => FailureKind::CredentialInvalid,
        }
    }
}

/// Trusted root certificates.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    anchors: Vec<CertificateDer<'static>>,
}

impl TrustStore {
    /// Wrap DER anchors, rejecting any that fail to parse.
    pub fn new(anchors: Vec<CertificateDer<'static>>) -> Result<Self> {
        for anchor in &anchors {
            chain::parse(anchor.as_ref())
                .map_err(|e| Error::Config(format!("Invalid trust anchor: {e}")))?;
        }
        Ok(Self { anchors })
    }

    /// Load every certificate from the given PEM files.
    pub fn from_pem_files(paths: &[String]) -> Result<Self> {
        let mut anchors = Vec::new();
        for path in paths {
            anchors.extend(load_certs(path)?);
        }
        Self::new(anchors)
    }

    /// Number of anchors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    /// Whether no anchor is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub(crate) fn anchors(&self) -> &[CertificateDer<'static>] {
        &self.anchors
    }
}
