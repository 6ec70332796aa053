//! CRL-backed revocation authorities.
//!
//! - [`OnlineCrlAuthority`] fetches the CRL published at the certificate's
//!   distribution point (or a configured fallback URL) and keeps it until
//!   it needs refreshing.
//! - [`OfflineCrlAuthority`] answers from CRL files loaded at startup.
//!
//! A CRL answers for a certificate only when its issuer name matches and its
//! signature verifies with the issuing certificate's key. A CRL outside its
//! `[thisUpdate, nextUpdate]` window is unusable, which the checker turns
//! into an Unknown verdict.

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};
use x509_parser::prelude::{CertificateRevocationList, FromDer, SubjectPublicKeyInfo};

use super::{RevocationAuthority, RevocationRequest, RevocationStatus};
use crate::config::RevocationConfig;
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Parsed CRL
// ─────────────────────────────────────────────────────────────────────────────

/// The parts of a CRL needed to answer revocation queries.
#[derive(Debug, Clone)]
pub struct CrlSnapshot {
    der: Vec<u8>,
    issuer_name: Vec<u8>,
    issuer_display: String,
    revoked: HashSet<Vec<u8>>,
    this_update: i64,
    next_update: Option<i64>,
}

impl CrlSnapshot {
    /// Parse a single DER-encoded CRL.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, crl) = CertificateRevocationList::from_der(der)
            .map_err(|e| Error::Revocation(format!("Failed to parse CRL: {e}")))?;

        let revoked = crl
            .iter_revoked_certificates()
            .map(|entry| entry.raw_serial().to_vec())
            .collect();

        Ok(Self {
            der: der.to_vec(),
            issuer_name: crl.issuer().as_raw().to_vec(),
            issuer_display: crl.issuer().to_string(),
            revoked,
            this_update: crl.last_update().timestamp(),
            next_update: crl.next_update().map(|t| t.timestamp()),
        })
    }

    /// Parse PEM (one or more `X509 CRL` blocks) or a single DER CRL.
    pub fn parse(data: &[u8]) -> Result<Vec<Self>> {
        if !data.trim_ascii_start().starts_with(b"-----BEGIN") {
            return Ok(vec![Self::from_der(data)?]);
        }

        let crls = rustls_pemfile::crls(&mut &data[..])
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Revocation(format!("Failed to parse PEM CRL: {e}")))?;

        if crls.is_empty() {
            return Err(Error::Revocation("No CRL found in PEM data".to_string()));
        }

        crls.iter().map(|der| Self::from_der(der.as_ref())).collect()
    }

    /// Whether this CRL was issued, and signed, by the request's issuer.
    #[must_use]
    pub fn covers(&self, request: &RevocationRequest) -> bool {
        if self.issuer_name != request.issuer_name {
            return false;
        }
        if !self.signed_by(&request.issuer_public_key) {
            warn!(
                issuer = %self.issuer_display,
                "CRL signature does not verify with the issuer key, ignoring it"
            );
            return false;
        }
        true
    }

    /// Whether the CRL signature verifies with a DER `SubjectPublicKeyInfo`.
    #[must_use]
    pub fn signed_by(&self, public_key: &[u8]) -> bool {
        let Ok((_, key)) = SubjectPublicKeyInfo::from_der(public_key) else {
            return false;
        };
        let Ok((_, crl)) = CertificateRevocationList::from_der(&self.der) else {
            return false;
        };
        crl.verify_signature(&key).is_ok()
    }

    /// Issuer DN for logs.
    #[must_use]
    pub fn issuer_display(&self) -> &str {
        &self.issuer_display
    }

    /// `nextUpdate` in unix seconds, if the CRL carries one.
    #[must_use]
    pub fn next_update(&self) -> Option<i64> {
        self.next_update
    }

    /// Status of `serial` as of `now` (unix seconds).
    pub fn status_at(&self, serial: &[u8], now: i64) -> Result<RevocationStatus> {
        if self.this_update > now {
            return Err(Error::Revocation(format!(
                "CRL for '{}' is not yet valid (thisUpdate in the future)",
                self.issuer_display
            )));
        }
        if let Some(next) = self.next_update
            && next < now
        {
            return Err(Error::Revocation(format!(
                "CRL for '{}' is stale (nextUpdate passed)",
                self.issuer_display
            )));
        }

        if self.revoked.contains(serial) {
            Ok(RevocationStatus::Revoked)
        } else {
            Ok(RevocationStatus::Good)
        }
    }
}

fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

fn answer_from(snapshots: &[CrlSnapshot], request: &RevocationRequest) -> Option<Result<RevocationStatus>> {
    snapshots
        .iter()
        .find(|s| s.covers(request))
        .map(|s| s.status_at(&request.serial, unix_now()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Online
// ─────────────────────────────────────────────────────────────────────────────

/// CRLs downloaded from one URL.
struct FetchedCrls {
    snapshots: Arc<[CrlSnapshot]>,
    /// Unix seconds after which the URL is fetched again.
    refresh_at: i64,
}

/// Fetches CRLs over HTTP.
///
/// A download is reused for every serial it covers until the earliest
/// `nextUpdate` among its CRLs, and never longer than `refresh_interval`.
pub struct OnlineCrlAuthority {
    client: reqwest::Client,
    fallback_urls: Vec<String>,
    max_crl_size: usize,
    refresh_interval: Duration,
    fetched: DashMap<String, FetchedCrls>,
}

impl OnlineCrlAuthority {
    /// Build from configuration. The HTTP client timeout matches the
    /// checker's hard timeout; downloads are refreshed at least every
    /// `verdict_ttl`.
    pub fn new(config: &RevocationConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            fallback_urls: config.crl_urls.clone(),
            max_crl_size: config.max_crl_size,
            refresh_interval: config.verdict_ttl,
            fetched: DashMap::new(),
        })
    }

    /// Number of URLs with a download held.
    #[must_use]
    pub fn cached_urls(&self) -> usize {
        self.fetched.len()
    }

    async fn snapshots(&self, url: &str) -> Result<Arc<[CrlSnapshot]>> {
        let now = unix_now();
        if let Some(entry) = self.fetched.get(url)
            && entry.refresh_at > now
        {
            debug!(url = %url, "Using downloaded CRL");
            return Ok(Arc::clone(&entry.snapshots));
        }

        let snapshots: Arc<[CrlSnapshot]> = self.fetch(url).await?.into();
        let interval = i64::try_from(self.refresh_interval.as_secs()).unwrap_or(i64::MAX);
        let refresh_at = snapshots
            .iter()
            .filter_map(CrlSnapshot::next_update)
            .fold(now.saturating_add(interval), i64::min);
        self.fetched.insert(
            url.to_string(),
            FetchedCrls {
                snapshots: Arc::clone(&snapshots),
                refresh_at,
            },
        );
        Ok(snapshots)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<CrlSnapshot>> {
        debug!(url = %url, "Downloading CRL");
        let response = self.client.get(url).send().await?.error_for_status()?;

        if response
            .content_length()
            .is_some_and(|len| len > self.max_crl_size as u64)
        {
            return Err(Error::Revocation(format!(
                "CRL at '{url}' exceeds {} bytes",
                self.max_crl_size
            )));
        }

        let body = response.bytes().await?;
        if body.len() > self.max_crl_size {
            return Err(Error::Revocation(format!(
                "CRL at '{url}' exceeds {} bytes",
                self.max_crl_size
            )));
        }

        CrlSnapshot::parse(&body)
    }
}

#[async_trait]
impl RevocationAuthority for OnlineCrlAuthority {
    async fn query(&self, request: &RevocationRequest) -> Result<RevocationStatus> {
        let urls: Vec<&String> = request
            .distribution_points
            .iter()
            .chain(&self.fallback_urls)
            .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
            .collect();

        if urls.is_empty() {
            return Err(Error::Revocation(format!(
                "No HTTP CRL distribution point for '{}'",
                request.subject_display
            )));
        }

        let mut last_error = None;
        for url in urls {
            match self.snapshots(url).await {
                Ok(snapshots) => {
                    if let Some(answer) = answer_from(&snapshots, request) {
                        return answer;
                    }
                    debug!(url = %url, issuer = %request.issuer_display, "CRL does not cover issuer");
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "CRL fetch failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::Revocation(format!(
                "No fetched CRL covers issuer '{}'",
                request.issuer_display
            ))
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Offline
// ─────────────────────────────────────────────────────────────────────────────


/// Answers from CRLs loaded once at startup.
#[derive(Debug, Clone)]
pub struct OfflineCrlAuthority {
    snapshots: Vec<CrlSnapshot>,
}

impl OfflineCrlAuthority {
    /// Wrap already-parsed CRLs.
    #[must_use]
    pub fn new(snapshots: Vec<CrlSnapshot>) -> Self {
        Self { snapshots }
    }

    /// Load every CRL in `paths` (PEM or DER).
    pub fn from_files(paths: &[String]) -> Result<Self> {
        let mut snapshots = Vec::new();
        for path in paths {
            let data = fs::read(path)
                .map_err(|e| Error::Config(format!("Cannot read CRL '{path}': {e}")))?;
            let parsed = CrlSnapshot::parse(&data)
                .map_err(|e| Error::Config(format!("Invalid CRL '{path}': {e}")))?;
            for crl in &parsed {
                debug!(path = %path, issuer = %crl.issuer_display(), "Loaded CRL");
            }
            snapshots.extend(parsed);
        }
        Ok(Self { snapshots })
    }

    /// Number of loaded CRLs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether no CRL is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[async_trait]
impl RevocationAuthority for OfflineCrlAuthority {
    async fn query(&self, request: &RevocationRequest) -> Result<RevocationStatus> {
        answer_from(&self.snapshots, request).unwrap_or_else(|| {
            Err(Error::Revocation(format!(
                "No CRL loaded for issuer '{}'",
                request.issuer_display
            )))
        })
    }
}
