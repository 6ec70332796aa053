//! Authenticated principals and the claims they carry.
//!
//! A [`Principal`] only ever exists after a scheme has fully validated its
//! credential; [`PrincipalBuilder`] is the single place one is assembled.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Claim type holding a certificate's subject distinguished name.
pub const SUBJECT_IDENTIFIER: &str = "subject-identifier";

/// Claim type holding the account name produced by a Negotiate exchange.
pub const ACCOUNT_NAME: &str = "account-name";

/// Issuer recorded on claims when none is configured.
pub const DEFAULT_CLAIMS_ISSUER: &str = "LOCAL AUTHORITY";

/// The credential mechanism that authenticated a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationScheme {
    /// X.509 client certificate presented during the TLS handshake.
    Certificate,
    /// SPNEGO / Kerberos token exchange.
    Negotiate,
}

impl fmt::Display for AuthenticationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Certificate => f.write_str("Certificate"),
            Self::Negotiate => f.write_str("Negotiate"),
        }
    }
}

/// A normalized, claims-bearing identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    scheme: AuthenticationScheme,
    claims: HashMap<String, String>,
    issuer: String,
}

impl Principal {
    /// Scheme that authenticated this principal.
    #[must_use]
    pub fn scheme(&self) -> AuthenticationScheme {
        self.scheme
    }

    /// Look up a claim value by type.
    #[must_use]
    pub fn claim(&self, claim_type: &str) -> Option<&str> {
        self.claims.get(claim_type).map(String::as_str)
    }

    /// All claims.
    #[must_use]
    pub fn claims(&self) -> &HashMap<String, String> {
        &self.claims
    }

    /// Authority recorded as the issuer of every claim.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Name used in logs: the scheme's identifying claim, if present.
    #[must_use]
    pub fn display_name(&self) -> &str {
        let key = match self.scheme {
            AuthenticationScheme::Certificate => SUBJECT_IDENTIFIER,
            AuthenticationScheme::Negotiate => ACCOUNT_NAME,
        };
        self.claim(key).unwrap_or("<unknown>")
    }
}

/// Assembles a [`Principal`] from validated credential material.
pub struct PrincipalBuilder;

impl PrincipalBuilder {
    /// Build a principal. Duplicate claim types keep the last value.
    pub fn build<I, K, V>(scheme: AuthenticationScheme, claims: I, issuer: &str) -> Principal
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let claims = claims
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        Principal {
            scheme,
            claims,
            issuer: issuer.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_certificate_principal() {
        let p = PrincipalBuilder::build(
            AuthenticationScheme::Certificate,
            [(SUBJECT_IDENTIFIER, "CN=alice")],
            DEFAULT_CLAIMS_ISSUER,
        );
        assert_eq!(p.scheme(), AuthenticationScheme::Certificate);
        assert_eq!(p.claim(SUBJECT_IDENTIFIER), Some("CN=alice"));
        assert_eq!(p.claims().len(), 1);
        assert_eq!(p.issuer(), "LOCAL AUTHORITY");
    }

    #[test]
    fn duplicate_claim_types_last_write_wins() {
        let p = PrincipalBuilder::build(
            AuthenticationScheme::Negotiate,
            [(ACCOUNT_NAME, "DOMAIN\\first"), (ACCOUNT_NAME, "DOMAIN\\second")],
            "KDC",
        );
        assert_eq!(p.claims().len(), 1);
        assert_eq!(p.claim(ACCOUNT_NAME), Some("DOMAIN\\second"));
    }

    #[test]
    fn missing_claim_is_none() {
        let p = PrincipalBuilder::build(
            AuthenticationScheme::Negotiate,
            [(ACCOUNT_NAME, "bob")],
            DEFAULT_CLAIMS_ISSUER,
        );
        assert!(p.claim(SUBJECT_IDENTIFIER).is_none());
    }

    #[test]
    fn display_name_uses_scheme_claim() {
        let p = PrincipalBuilder::build(
            AuthenticationScheme::Negotiate,
            [(ACCOUNT_NAME, "DOMAIN\\bob")],
            DEFAULT_CLAIMS_ISSUER,
        );
        assert_eq!(p.display_name(), "DOMAIN\\bob");

        let empty = PrincipalBuilder::build(
            AuthenticationScheme::Certificate,
            Vec::<(String, String)>::new(),
            DEFAULT_CLAIMS_ISSUER,
        );
        assert_eq!(empty.display_name(), "<unknown>");
    }

    #[test]
    fn scheme_display() {
        assert_eq!(AuthenticationScheme::Certificate.to_string(), "Certificate");
        assert_eq!(AuthenticationScheme::Negotiate.to_string(), "Negotiate");
    }
}
