//! Named access policies and their evaluation.
//!
//! A route declares exactly one [`PolicyRequirement`]. Evaluation is a pure
//! function of the requirement and the request's [`AuthenticationResult`]:
//! a principal authenticated by the *other* scheme is denied, never
//! substituted.

use std::collections::HashMap;
use std::fmt;

use crate::outcome::{AuthenticationResult, FailureKind};
use crate::principal::AuthenticationScheme;
use crate::{Error, Result};

/// Policy name requiring a certificate-authenticated principal.
pub const CERTIFICATE_REQUIRED: &str = "CertificateRequired";
/// Policy name requiring a Negotiate-authenticated principal.
pub const NEGOTIATE_REQUIRED: &str = "NegotiateRequired";

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No scheme produced a principal.
    NoPrincipal,
    /// A principal exists but from a different scheme.
    WrongScheme {
        /// Scheme the route requires.
        expected: AuthenticationScheme,
        /// Scheme that authenticated the caller.
        actual: AuthenticationScheme,
    },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPrincipal => f.write_str("no principal"),
            Self::WrongScheme { expected, actual } => {
                write!(f, "wrong scheme: expected {expected}, got {actual}")
            }
        }
    }
}

/// Policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Proceed to the route handler.
    Allow,
    /// Reject.
    Deny {
        /// Detailed reason, for logs only.
        reason: DenyReason,
        /// Failure category the HTTP status is derived from.
        kind: FailureKind,
    },
}

impl PolicyDecision {
    /// Whether the request may proceed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// A named requirement bound to a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRequirement {
    name: String,
    required_scheme: AuthenticationScheme,
}

impl PolicyRequirement {
    /// Create a requirement.
    pub fn new(name: impl Into<String>, required_scheme: AuthenticationScheme) -> Self {
        Self {
            name: name.into(),
            required_scheme,
        }
    }

    /// `CertificateRequired`.
    #[must_use]
    pub fn certificate_required() -> Self {
        Self::new(CERTIFICATE_REQUIRED, AuthenticationScheme::Certificate)
    }

    /// `NegotiateRequired`.
    #[must_use]
    pub fn negotiate_required() -> Self {
        Self::new(NEGOTIATE_REQUIRED, AuthenticationScheme::Negotiate)
    }

    /// Policy name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scheme a principal must carry.
    #[must_use]
    pub fn required_scheme(&self) -> AuthenticationScheme {
        self.required_scheme
    }

    /// Decide. Pure and idempotent.
    #[must_use]
    pub fn evaluate(&self, result: &AuthenticationResult) -> PolicyDecision {
        match result.principal() {
            Some(p) if p.scheme() == self.required_scheme => PolicyDecision::Allow,
            Some(p) => PolicyDecision::Deny {
                reason: DenyReason::WrongScheme {
                    expected: self.required_scheme,
                    actual: p.scheme(),
                },
                kind: FailureKind::PolicyDenied,
            },
            None => PolicyDecision::Deny {
                reason: DenyReason::NoPrincipal,
                kind: result
                    .failure_for(self.required_scheme)
                    .map_or(FailureKind::CredentialAbsent, |f| f.kind()),
            },
        }
    }
}

/// Policies by name.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: HashMap<String, PolicyRequirement>,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(PolicyRequirement::certificate_required());
        registry.register(PolicyRequirement::negotiate_required());
        registry
    }
}

impl PolicyRegistry {
    /// Registry without any policy.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            policies: HashMap::new(),
        }
    }

    /// Add or replace a policy.
    pub fn register(&mut self, policy: PolicyRequirement) {
        self.policies.insert(policy.name.clone(), policy);
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Result<&PolicyRequirement> {
        self.policies
            .get(name)
            .ok_or_else(|| Error::Config(format!("Unknown policy: {name}")))
    }

    /// Number of policies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
