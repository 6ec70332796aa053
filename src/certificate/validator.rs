//! Certificate validator: from a presented chain to a [`Principal`].

use std::sync::Arc;

use tracing::{debug, warn};
use x509_parser::prelude::X509Certificate;

use super::chain::{self, ChainLink, ValidityWindow};
use super::{CertificateKind, CertificateRejection, PresentedCertificate, TrustStore};
use crate::Result;
use crate::config::{
    AllowedCertificateTypes, CertificateConfig, RevocationConfig, RevocationMode, RevocationScope,
};
use crate::principal::{AuthenticationScheme, Principal, PrincipalBuilder, SUBJECT_IDENTIFIER};
use crate::revocation::{
    OfflineCrlAuthority, OnlineCrlAuthority, RevocationAuthority, RevocationChecker,
    RevocationStatus,
};

/// Validation switches, resolved from [`CertificateConfig`].
#[derive(Debug, Clone)]
pub struct CertificateOptions {
    /// Certificate-type gate.
    pub allowed_types: AllowedCertificateTypes,
    /// Enforce notBefore / notAfter.
    pub validate_validity_period: bool,
    /// Enforce clientAuth when an EKU extension is present.
    pub validate_certificate_use: bool,
    /// Which links are checked for revocation.
    pub revocation_scope: RevocationScope,
    /// Accept Unknown revocation status.
    pub revocation_fail_open: bool,
    /// Issuer recorded on the subject claim.
    pub claims_issuer: String,
}

impl From<&CertificateConfig> for CertificateOptions {
    fn from(cfg: &CertificateConfig) -> Self {
        Self {
            allowed_types: cfg.allowed_certificate_types,
            validate_validity_period: cfg.validate_validity_period,
            validate_certificate_use: cfg.validate_certificate_use,
            revocation_scope: cfg.revocation_scope,
            revocation_fail_open: cfg.revocation_fail_open,
            claims_issuer: cfg.claims_issuer.clone(),
        }
    }
}

impl Default for CertificateOptions {
    fn default() -> Self {
        Self::from(&CertificateConfig::default())
    }
}

/// Output of the synchronous checks, before revocation.
struct Inspected {
    subject: String,
    links: Vec<ChainLink>,
}

/// Validates client certificates.
pub struct CertificateValidator {
    options: CertificateOptions,
    trust: TrustStore,
    revocation: Option<Arc<RevocationChecker>>,
}

impl CertificateValidator {
    /// Create a validator. `revocation: None` skips revocation checks.
    pub fn new(
        options: CertificateOptions,
        trust: TrustStore,
        revocation: Option<Arc<RevocationChecker>>,
    ) -> Self {
        Self {
            options,
            trust,
            revocation,
        }
    }

    /// Build from configuration: load anchors and the revocation authority.
    pub fn from_config(cert: &CertificateConfig, revocation: &RevocationConfig) -> Result<Self> {
        let trust = TrustStore::from_pem_files(&cert.trust_anchors)?;

        let authority: Option<Arc<dyn RevocationAuthority>> = match revocation.mode {
            RevocationMode::NoCheck => None,
            RevocationMode::Online => Some(Arc::new(OnlineCrlAuthority::new(revocation)?)),
            RevocationMode::Offline => {
                Some(Arc::new(OfflineCrlAuthority::from_files(&revocation.crl_files)?))
            }
        };

        let checker =
            authority.map(|a| Arc::new(RevocationChecker::new(a, revocation.into())));

        debug!(
            anchors = trust.len(),
            allowed_types = ?cert.allowed_certificate_types,
            revocation_mode = ?revocation.mode,
            "Certificate validator configured"
        );

        Ok(Self::new(CertificateOptions::from(cert), trust, checker))
    }

    /// The revocation checker, when revocation is enabled.
    #[must_use]
    pub fn revocation_checker(&self) -> Option<&Arc<RevocationChecker>> {
        self.revocation.as_ref()
    }

    /// Validate against the current time.
    pub async fn validate(
        &self,
        presented: Option<&PresentedCertificate>,
    ) -> std::result::Result<Principal, CertificateRejection> {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        self.validate_at(presented, now).await
    }

    /// Validate as of `now` (unix seconds).
    pub async fn validate_at(
        &self,
        presented: Option<&PresentedCertificate>,
        now: i64,
    ) -> std::result::Result<Principal, CertificateRejection> {
        let presented = presented.ok_or(CertificateRejection::NoCertificatePresented)?;

        let inspected = self.inspect(presented, now).inspect_err(|rejection| {
            debug!(reason = %rejection, "Client certificate rejected");
        })?;

        self.check_revocation(&inspected).await?;

        debug!(subject = %inspected.subject, "Client certificate validated");
        Ok(PrincipalBuilder::build(
            AuthenticationScheme::Certificate,
            [(SUBJECT_IDENTIFIER, inspected.subject)],
            &self.options.claims_issuer,
        ))
    }

    fn inspect(
        &self,
        presented: &PresentedCertificate,
        now: i64,
    ) -> std::result::Result<Inspected, CertificateRejection> {
        let leaf = chain::parse(presented.end_entity.as_ref())
            .map_err(CertificateRejection::Malformed)?;

        let kind = if chain::is_self_signed(&leaf) {
            CertificateKind::SelfSigned
        } else {
            CertificateKind::ChainIssued
        };
        if !self.type_allowed(kind) {
            return Err(CertificateRejection::CertificateTypeNotAllowed(kind));
        }

        let links = match kind {
            CertificateKind::SelfSigned => chain::self_signed_path(&leaf),
            CertificateKind::ChainIssued => self.chain_issued_path(&leaf, presented)?,
        };

        if self.options.validate_validity_period {
            check_validity(ValidityWindow::of(&leaf), now)?;
            for link in &links {
                check_validity(link.issuer_validity, now).inspect_err(|rejection| {
                    debug!(
                        issuer = %link.request.issuer_display,
                        reason = %rejection,
                        "Issuing certificate outside its validity period"
                    );
                })?;
            }
        }

        if self.options.validate_certificate_use && !allows_client_auth(&leaf) {
            return Err(CertificateRejection::InvalidCertificateUse);
        }

        Ok(Inspected {
            subject: chain::display_name(leaf.subject()),
            links,
        })
    }

    fn type_allowed(&self, kind: CertificateKind) -> bool {
        match (self.options.allowed_types, kind) {
            (AllowedCertificateTypes::All, _)
            | (AllowedCertificateTypes::ChainOnly, CertificateKind::ChainIssued)
            | (AllowedCertificateTypes::SelfSignedOnly, CertificateKind::SelfSigned) => true,
            (AllowedCertificateTypes::ChainOnly, CertificateKind::SelfSigned)
            | (AllowedCertificateTypes::SelfSignedOnly, CertificateKind::ChainIssued) => false,
        }
    }

    fn chain_issued_path(
        &self,
        leaf: &X509Certificate<'_>,
        presented: &PresentedCertificate,
    ) -> std::result::Result<Vec<ChainLink>, CertificateRejection> {
        let intermediates = presented
            .intermediates
            .iter()
            .map(|der| chain::parse(der.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(CertificateRejection::Malformed)?;

        // Anchors were validated when the trust store was built.
        let anchors: Vec<X509Certificate<'_>> = self
            .trust
            .anchors()
            .iter()
            .filter_map(|der| chain::parse(der.as_ref()).ok())
            .collect();

        chain::build_path(leaf, &intermediates, &anchors).map_err(CertificateRejection::ChainInvalid)
    }

    async fn check_revocation(
        &self,
        inspected: &Inspected,
    ) -> std::result::Result<(), CertificateRejection> {
        let Some(checker) = &self.revocation else {
            return Ok(());
        };

        let links: Vec<&ChainLink> = match self.options.revocation_scope {
            RevocationScope::EndCertificate => inspected.links.iter().take(1).collect(),
            RevocationScope::ExcludeRoot => {
                inspected.links.iter().filter(|l| !l.child_is_root).collect()
            }
        };

        for link in links {
            let verdict = checker.check(&link.request).await;
            match verdict.status {
                RevocationStatus::Good => {}
                RevocationStatus::Revoked => {
                    warn!(
                        subject = %link.request.subject_display,
                        serial = %link.request.serial_hex(),
                        "Certificate in presented chain is revoked"
                    );
                    return Err(CertificateRejection::Revoked);
                }
                RevocationStatus::Unknown if self.options.revocation_fail_open => {
                    warn!(
                        subject = %link.request.subject_display,
                        "Revocation status unknown; accepting (fail-open configured)"
                    );
                }
                RevocationStatus::Unknown => {
                    warn!(
                        subject = %link.request.subject_display,
                        "Revocation status unknown; rejecting"
                    );
                    return Err(CertificateRejection::RevocationIndeterminate);
                }
            }
        }

        Ok(())
    }
}

fn check_validity(
    window: ValidityWindow,
    now: i64,
) -> std::result::Result<(), CertificateRejection> {
    if now < window.not_before {
        return Err(CertificateRejection::NotYetValid);
    }
    if now > window.not_after {
        return Err(CertificateRejection::Expired);
    }
    Ok(())
}

/// No EKU extension means unrestricted use.
fn allows_client_auth(cert: &X509Certificate<'_>) -> bool {
    match cert.extended_key_usage() {
        Ok(Some(eku)) => eku.value.any || eku.value.client_auth,
        Ok(None) => true,
        Err(_) => false,
    }
}
