//! Per-request authentication outcome and the failure taxonomy.

use std::fmt;

use crate::certificate::CertificateRejection;
use crate::negotiate::NegotiateFailure;
use crate::principal::{AuthenticationScheme, Principal};

/// Coarse failure category shared by every scheme.
///
/// Only the HTTP status derived from this ever reaches the caller; the
/// detailed reason stays in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No credential of this scheme was presented.
    CredentialAbsent,
    /// Chain or temporal failure, revoked certificate, malformed token.
    CredentialInvalid,
    /// The revocation authority could not be reached. Fails closed.
    CredentialIndeterminate,
    /// A Negotiate exchange needs another round trip.
    NegotiationIncomplete,
    /// Authenticated, but not with the scheme the route requires.
    PolicyDenied,
}

/// Why one scheme did not produce a principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    /// Certificate validation rejected the presented chain.
    Certificate(CertificateRejection),
    /// The Negotiate exchange failed.
    Negotiate(NegotiateFailure),
    /// The Negotiate exchange issued a challenge and awaits the next token.
    NegotiationIncomplete,
}

impl AuthFailure {
    /// Map the detailed reason onto the shared taxonomy.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Certificate(r) => r.kind(),
            Self::Negotiate(_) => FailureKind::CredentialInvalid,
            Self::NegotiationIncomplete => FailureKind::NegotiationIncomplete,
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Certificate(r) => write!(f, "{r}"),
            Self::Negotiate(r) => write!(f, "negotiation failed: {r}"),
            Self::NegotiationIncomplete => f.write_str("negotiation incomplete"),
        }
    }
}

/// One scheme's attempt on a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeAttempt {
    /// Scheme attempted.
    pub scheme: AuthenticationScheme,
    /// `None` when the attempt produced a principal.
    pub failure: Option<AuthFailure>,
}

impl SchemeAttempt {
    /// A successful attempt.
    #[must_use]
    pub fn succeeded(scheme: AuthenticationScheme) -> Self {
        Self {
            scheme,
            failure: None,
        }
    }

    /// A failed attempt.
    #[must_use]
    pub fn failed(scheme: AuthenticationScheme, failure: AuthFailure) -> Self {
        Self {
            scheme,
            failure: Some(failure),
        }
    }
}

/// Whether a principal was established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationOutcome {
    /// Exactly one scheme succeeded (or won by precedence).
    Authenticated(Principal),
    /// No credential presented, or every presented credential failed.
    Unauthenticated,
}

/// Outcome of authenticating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResult {
    /// Principal, if any.
    pub outcome: AuthenticationOutcome,
    /// Schemes attempted on this request, in precedence order.
    pub attempts: Vec<SchemeAttempt>,
    /// Negotiate token to send back in `WWW-Authenticate`: a challenge while
    /// the exchange is in progress, or the final mutual-auth token.
    pub negotiate_token: Option<Vec<u8>>,
}

impl AuthenticationResult {
    /// Result for a request that presented no usable credential input.
    #[must_use]
    pub fn unauthenticated(attempts: Vec<SchemeAttempt>) -> Self {
        Self {
            outcome: AuthenticationOutcome::Unauthenticated,
            attempts,
            negotiate_token: None,
        }
    }

    /// The authenticated principal, if any.
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        match &self.outcome {
            AuthenticationOutcome::Authenticated(p) => Some(p),
            AuthenticationOutcome::Unauthenticated => None,
        }
    }

    /// Whether a principal was established.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.principal().is_some()
    }

    /// Failure reason recorded for `scheme`, if it was attempted and failed.
    #[must_use]
    pub fn failure_for(&self, scheme: AuthenticationScheme) -> Option<&AuthFailure> {
        self.attempts
            .iter()
            .find(|a| a.scheme == scheme)
            .and_then(|a| a.failure.as_ref())
    }

    /// Whether a Negotiate exchange is waiting for the peer's next token.
    #[must_use]
    pub fn negotiation_pending(&self) -> bool {
        matches!(
            self.failure_for(AuthenticationScheme::Negotiate),
            Some(AuthFailure::NegotiationIncomplete)
        )
    }
}
