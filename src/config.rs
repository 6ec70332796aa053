//! Configuration management
//!
//! Loaded from an optional YAML file merged with `CERTGATE_`-prefixed
//! environment variables (`__` separates nesting levels, e.g.
//! `CERTGATE_REVOCATION__MODE=offline`).
//!
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   port: 8443
//! tls:
//!   server_cert: /etc/certgate/server.crt
//!   server_key: /etc/certgate/server.key
//! certificate:
//!   allowed_certificate_types: all
//!   validate_validity_period: true
//!   trust_anchors: [/etc/certgate/ca.crt]
//! revocation:
//!   mode: online
//!   timeout: 5s
//! negotiate:
//!   enabled: true
//! ```

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::principal::DEFAULT_CLAIMS_ISSUER;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// TLS listener configuration
    pub tls: TlsConfig,
    /// Client certificate authentication
    pub certificate: CertificateConfig,
    /// Revocation checking
    pub revocation: RevocationConfig,
    /// Negotiate authentication
    pub negotiate: NegotiateConfig,
}

impl Config {
    /// Load configuration from file and environment, then validate it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("CERTGATE_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.certificate.enabled
            && self.certificate.trust_anchors.is_empty()
            && self.certificate.allowed_certificate_types != AllowedCertificateTypes::SelfSignedOnly
        {
            return Err(Error::Config(
                "certificate.trust_anchors must list at least one CA unless \
                 allowed_certificate_types is self_signed_only"
                    .to_string(),
            ));
        }

        if self.revocation.mode == RevocationMode::Offline && self.revocation.crl_files.is_empty() {
            return Err(Error::Config(
                "revocation.mode offline requires at least one entry in revocation.crl_files"
                    .to_string(),
            ));
        }

        if self.revocation.timeout.is_zero() {
            return Err(Error::Config("revocation.timeout must be non-zero".to_string()));
        }
        if self.revocation.verdict_ttl.is_zero() || self.revocation.unknown_ttl.is_zero() {
            return Err(Error::Config(
                "revocation.verdict_ttl and revocation.unknown_ttl must be non-zero".to_string(),
            ));
        }
        if self.revocation.max_entries == 0 {
            return Err(Error::Config("revocation.max_entries must be non-zero".to_string()));
        }

        if self.negotiate.max_rounds == Some(0) {
            return Err(Error::Config("negotiate.max_rounds must be non-zero".to_string()));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8443,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// TLS listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to the PEM-encoded server certificate chain.
    pub server_cert: String,
    /// Path to the PEM-encoded server private key.
    pub server_key: String,
    /// Ask clients for a certificate during the handshake.
    ///
    /// A certificate is never mandatory at the TLS layer; the certificate
    /// validator decides what a presented certificate is worth.
    pub request_client_cert: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            server_cert: String::new(),
            server_key: String::new(),
            request_client_cert: true,
        }
    }
}

/// Which certificate types the validator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AllowedCertificateTypes {
    /// Only certificates issued by a trusted CA.
    ChainOnly,
    /// Only self-signed certificates.
    SelfSignedOnly,
    /// Either.
    #[default]
    All,
}

/// Which links of a validated chain are checked for revocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RevocationScope {
    /// Only the presented leaf certificate.
    EndCertificate,
    /// Every certificate in the chain except the trust anchor.
    #[default]
    ExcludeRoot,
}

/// Client certificate validation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateConfig {
    /// Enable certificate authentication.
    pub enabled: bool,
    /// Certificate type gate, evaluated before chain validation.
    pub allowed_certificate_types: AllowedCertificateTypes,
    /// Reject certificates outside their notBefore/notAfter window.
    pub validate_validity_period: bool,
    /// Reject certificates whose Extended Key Usage excludes clientAuth.
    pub validate_certificate_use: bool,
    /// PEM files holding trusted root certificates.
    pub trust_anchors: Vec<String>,
    /// Issuer recorded on derived claims.
    pub claims_issuer: String,
    /// Chain links subject to revocation checks.
    pub revocation_scope: RevocationScope,
    /// Accept certificates whose revocation status cannot be determined.
    ///
    /// Off by default: indeterminate revocation fails closed.
    pub revocation_fail_open: bool,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_certificate_types: AllowedCertificateTypes::All,
            validate_validity_period: true,
            validate_certificate_use: true,
            trust_anchors: Vec::new(),
            claims_issuer: DEFAULT_CLAIMS_ISSUER.to_string(),
            revocation_scope: RevocationScope::ExcludeRoot,
            revocation_fail_open: false,
        }
    }
}

/// How revocation status is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RevocationMode {
    /// Fetch CRLs from the network.
    #[default]
    Online,
    /// Use CRL files loaded at startup.
    Offline,
    /// Skip revocation checks.
    NoCheck,
}

/// Revocation checking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RevocationConfig {
    /// Where revocation status comes from.
    pub mode: RevocationMode,
    /// Hard timeout for one authority query.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Cache lifetime for Good / Revoked verdicts.
    #[serde(with = "humantime_serde")]
    pub verdict_ttl: Duration,
    /// Cache lifetime for Unknown verdicts.
    #[serde(with = "humantime_serde")]
    pub unknown_ttl: Duration,
    /// Maximum cached verdicts.
    pub max_entries: usize,
    /// CRL files (PEM or DER) for offline mode.
    pub crl_files: Vec<String>,
    /// CRL URLs tried when a certificate carries no distribution point.
    pub crl_urls: Vec<String>,
    /// Largest CRL body accepted from the network, in bytes.
    pub max_crl_size: usize,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            mode: RevocationMode::Online,
            timeout: Duration::from_secs(5),
            verdict_ttl: Duration::from_secs(300),
            unknown_ttl: Duration::from_secs(10),
            max_entries: 10_000,
            crl_files: Vec::new(),
            crl_urls: Vec::new(),
            max_crl_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Negotiate (SPNEGO/Kerberos) configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NegotiateConfig {
    /// Enable Negotiate authentication.
    pub enabled: bool,
    /// Service principal to accept for (e.g. `HTTP@gateway.example.com`).
    /// The default keytab entry is used when unset.
    pub service_principal: Option<String>,
    /// Issuer recorded on derived claims; defaults to the certificate one.
    pub claims_issuer: Option<String>,
    /// Maximum round trips before an exchange is abandoned.
    pub max_rounds: Option<u32>,
}
