//! Per-request authentication entry point.
//!
//! Runs the certificate validator and the Negotiate exchange concurrently
//! for whichever inputs the request carries, joins both, and reports a
//! single principal. Certificate wins when both succeed; claims from the two
//! schemes are never merged.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::Result;
use crate::certificate::{CertificateValidator, PresentedCertificate};
use crate::config::Config;
use crate::negotiate::{
    ContextAcceptor, DEFAULT_MAX_ROUNDS, NegotiateExchange, StepOutcome, token,
};
use crate::outcome::{AuthFailure, AuthenticationOutcome, AuthenticationResult, SchemeAttempt};
use crate::principal::{AuthenticationScheme, Principal};

/// Negotiate input for one request.
pub struct NegotiateInput<'a> {
    /// The connection's exchange.
    pub exchange: &'a Mutex<NegotiateExchange>,
    /// Base64 credential from `Authorization: Negotiate <credential>`.
    pub credential: &'a str,
}

/// Credential material a request carries.
#[derive(Default)]
pub struct CredentialInputs<'a> {
    /// Client certificate chain from the TLS handshake.
    pub certificate: Option<&'a PresentedCertificate>,
    /// Negotiate header and continuation state.
    pub negotiate: Option<NegotiateInput<'a>>,
}

/// Settings for new Negotiate exchanges.
#[derive(Clone)]
pub struct NegotiateSettings {
    /// Context factory.
    pub acceptor: Arc<dyn ContextAcceptor>,
    /// Issuer recorded on the account claim.
    pub claims_issuer: String,
    /// Round-trip bound.
    pub max_rounds: u32,
}

/// Authenticates requests.
pub struct AuthenticationCoordinator {
    certificate: Option<CertificateValidator>,
    negotiate: Option<NegotiateSettings>,
}

impl AuthenticationCoordinator {
    /// Create a coordinator. A `None` scheme is disabled.
    pub fn new(
        certificate: Option<CertificateValidator>,
        negotiate: Option<NegotiateSettings>,
    ) -> Self {
        Self {
            certificate,
            negotiate,
        }
    }

    /// Build both schemes from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let certificate = if config.certificate.enabled {
            Some(CertificateValidator::from_config(
                &config.certificate,
                &config.revocation,
            )?)
        } else {
            None
        };

        let negotiate = if config.negotiate.enabled {
            Some(NegotiateSettings {
                acceptor: negotiate_acceptor(config)?,
                claims_issuer: config
                    .negotiate
                    .claims_issuer
                    .clone()
                    .unwrap_or_else(|| config.certificate.claims_issuer.clone()),
                max_rounds: config.negotiate.max_rounds.unwrap_or(DEFAULT_MAX_ROUNDS),
            })
        } else {
            None
        };

        info!(
            certificate = certificate.is_some(),
            negotiate = negotiate.is_some(),
            "Authentication schemes configured"
        );
        Ok(Self::new(certificate, negotiate))
    }

    /// The certificate validator, if that scheme is enabled.
    #[must_use]
    pub fn certificate_validator(&self) -> Option<&CertificateValidator> {
        self.certificate.as_ref()
    }

    /// Whether Negotiate is enabled.
    #[must_use]
    pub fn negotiate_enabled(&self) -> bool {
        self.negotiate.is_some()
    }

    /// Fresh exchange for a new connection, if Negotiate is enabled.
    #[must_use]
    pub fn new_negotiate_exchange(&self) -> Option<NegotiateExchange> {
        self.negotiate.as_ref().map(|settings| {
            NegotiateExchange::new(Arc::clone(&settings.acceptor))
                .with_max_rounds(settings.max_rounds)
                .with_claims_issuer(settings.claims_issuer.clone())
        })
    }

    /// Authenticate one request.
    pub async fn authenticate(&self, inputs: CredentialInputs<'_>) -> AuthenticationResult {
        let CredentialInputs {
            certificate: presented,
            negotiate: negotiate_input,
        } = inputs;

        let certificate = async move {
            match (&self.certificate, presented) {
                (Some(validator), Some(presented)) => {
                    Some(validator.validate(Some(presented)).await)
                }
                _ => None,
            }
        };

        let negotiate = async move {
            match (&self.negotiate, negotiate_input) {
                (Some(_), Some(input)) => Some(step_negotiate(input).await),
                _ => None,
            }
        };

        let (certificate, negotiate) = tokio::join!(certificate, negotiate);

        let mut attempts = Vec::with_capacity(2);
        let mut certificate_principal: Option<Principal> = None;
        let mut negotiate_principal: Option<Principal> = None;
        let mut negotiate_token = None;

        if let Some(result) = certificate {
            match result {
                Ok(principal) => {
                    attempts.push(SchemeAttempt::succeeded(AuthenticationScheme::Certificate));
                    certificate_principal = Some(principal);
                }
                Err(rejection) => attempts.push(SchemeAttempt::failed(
                    AuthenticationScheme::Certificate,
                    AuthFailure::Certificate(rejection),
                )),
            }
        }

        if let Some(outcome) = negotiate {
            match outcome {
                StepOutcome::Challenge(challenge) => {
                    attempts.push(SchemeAttempt::failed(
                        AuthenticationScheme::Negotiate,
                        AuthFailure::NegotiationIncomplete,
                    ));
                    negotiate_token = Some(challenge);
                }
                StepOutcome::Authenticated {
                    principal,
                    response,
                } => {
                    attempts.push(SchemeAttempt::succeeded(AuthenticationScheme::Negotiate));
                    negotiate_principal = Some(principal);
                    negotiate_token = response;
                }
                StepOutcome::Failed(failure) => attempts.push(SchemeAttempt::failed(
                    AuthenticationScheme::Negotiate,
                    AuthFailure::Negotiate(failure),
                )),
            }
        }

        let outcome = match certificate_principal.or(negotiate_principal) {
            Some(principal) => {
                debug!(
                    scheme = %principal.scheme(),
                    principal = principal.display_name(),
                    "Request authenticated"
                );
                AuthenticationOutcome::Authenticated(principal)
            }
            None => {
                debug!(attempts = attempts.len(), "Request unauthenticated");
                AuthenticationOutcome::Unauthenticated
            }
        };

        AuthenticationResult {
            outcome,
            attempts,
            negotiate_token,
        }
    }
}

async fn step_negotiate(input: NegotiateInput<'_>) -> StepOutcome {
    let mut exchange = input.exchange.lock().await;
    match token::decode(input.credential) {
        Ok(bytes) => exchange.step(&bytes),
        Err(failure) => exchange.reject(failure),
    }
}

#[cfg(feature = "gssapi")]
fn negotiate_acceptor(config: &Config) -> Result<Arc<dyn ContextAcceptor>> {
    let acceptor =
        crate::negotiate::gssapi::GssapiAcceptor::new(config.negotiate.service_principal.clone())?;
    Ok(Arc::new(acceptor))
}

#[cfg(not(feature = "gssapi"))]
fn negotiate_acceptor(_config: &Config) -> Result<Arc<dyn ContextAcceptor>> {
    Err(crate::Error::Negotiate(
        "negotiate.enabled requires building with the `gssapi` feature".to_string(),
    ))
}
