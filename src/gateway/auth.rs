//! Per-route authentication and policy enforcement.
//!
//! Every protected route carries one [`PolicyRequirement`]. The middleware
//! authenticates the request with whatever credentials it carries, evaluates
//! the route's policy and either forwards the request with the [`Principal`]
//! in its extensions or answers 401 / 403 with a generic body.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::router::AppState;
use crate::certificate::PresentedCertificate;
use crate::coordinator::{AuthenticationCoordinator, CredentialInputs, NegotiateInput};
use crate::negotiate::{NegotiateExchange, token};
use crate::outcome::{AuthenticationResult, FailureKind};
use crate::policy::{PolicyDecision, PolicyRequirement};
use crate::principal::{AuthenticationScheme, Principal};

/// Credential state owned by one client connection.
///
/// Inserted as a request extension by the listener; dropped with the
/// connection, which discards any half-finished Negotiate exchange.
#[derive(Clone, Default)]
pub struct ConnectionContext {
    /// Client certificate chain from the TLS handshake.
    pub certificate: Option<Arc<PresentedCertificate>>,
    /// Negotiate state shared by the connection's requests.
    pub negotiate: Option<Arc<Mutex<NegotiateExchange>>>,
}

impl ConnectionContext {
    /// Context for a new connection.
    pub fn new(
        certificate: Option<PresentedCertificate>,
        coordinator: &AuthenticationCoordinator,
    ) -> Self {
        Self {
            certificate: certificate.map(Arc::new),
            negotiate: coordinator
                .new_negotiate_exchange()
                .map(|exchange| Arc::new(Mutex::new(exchange))),
        }
    }
}

/// Middleware state: the app and the route's policy.
#[derive(Clone)]
pub struct PolicyGuard {
    /// Shared application state.
    pub state: Arc<AppState>,
    /// Requirement for this route.
    pub policy: PolicyRequirement,
}

/// Authenticate the request and enforce the route's policy.
pub async fn require_policy(
    State(guard): State<PolicyGuard>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let coordinator = &guard.state.coordinator;

    // Without a listener-provided context every request starts fresh.
    let connection = request
        .extensions()
        .get::<ConnectionContext>()
        .cloned()
        .unwrap_or_else(|| ConnectionContext::new(None, coordinator));

    let credential = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(token::credential)
        .map(str::to_owned);

    let negotiate = match (connection.negotiate.as_deref(), credential.as_deref()) {
        (Some(exchange), Some(credential)) => Some(NegotiateInput {
            exchange,
            credential,
        }),
        _ => None,
    };

    let result = coordinator
        .authenticate(CredentialInputs {
            certificate: connection.certificate.as_deref(),
            negotiate,
        })
        .await;

    let path = request.uri().path().to_owned();
    match guard.policy.evaluate(&result) {
        PolicyDecision::Allow => {
            let Some(principal) = result.principal().cloned() else {
                return deny(StatusCode::UNAUTHORIZED, coordinator, None);
            };
            debug!(
                path = %path,
                policy = guard.policy.name(),
                principal = principal.display_name(),
                "Request allowed"
            );
            let mutual = mutual_token(&principal, &result);
            request.extensions_mut().insert(principal);

            let mut response = next.run(request).await;
            if let Some(value) = mutual {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, value);
            }
            response
        }
        PolicyDecision::Deny { reason, kind } => {
            let failures: Vec<String> = result
                .attempts
                .iter()
                .filter_map(|a| a.failure.as_ref().map(|f| format!("{}: {f}", a.scheme)))
                .collect();
            warn!(
                path = %path,
                policy = guard.policy.name(),
                reason = %reason,
                kind = ?kind,
                failures = ?failures,
                "Request denied"
            );
            deny(
                status_for(kind),
                coordinator,
                result.negotiate_token.as_deref(),
            )
        }
    }
}

/// 403 for an authenticated caller on the wrong route, 401 otherwise.
#[must_use]
pub fn status_for(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::PolicyDenied => StatusCode::FORBIDDEN,
        FailureKind::CredentialAbsent
        | FailureKind::CredentialInvalid
        | FailureKind::CredentialIndeterminate
        | FailureKind::NegotiationIncomplete => StatusCode::UNAUTHORIZED,
    }
}

/// Final Negotiate token to return with a Negotiate-authenticated response.
fn mutual_token(principal: &Principal, result: &AuthenticationResult) -> Option<HeaderValue> {
    if principal.scheme() != AuthenticationScheme::Negotiate {
        return None;
    }
    let token = result.negotiate_token.as_deref()?;
    HeaderValue::from_str(&token::challenge_header(Some(token))).ok()
}

fn deny(
    status: StatusCode,
    coordinator: &AuthenticationCoordinator,
    challenge: Option<&[u8]>,
) -> Response {
    let body = if status == StatusCode::FORBIDDEN {
        "Forbidden"
    } else {
        "Unauthorized"
    };
    let mut response = (status, body).into_response();

    if status == StatusCode::UNAUTHORIZED
        && coordinator.negotiate_enabled()
        && let Ok(value) = HeaderValue::from_str(&token::challenge_header(challenge))
    {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, value);
    }
    response
}
