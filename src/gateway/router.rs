//! HTTP router and handlers

use std::sync::Arc;
use std::time::Duration;

use axum::{Extension, Json, Router, extract::State, middleware, response::IntoResponse, routing::get};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};

use super::auth::{PolicyGuard, require_policy};
use crate::Result;
use crate::coordinator::AuthenticationCoordinator;
use crate::policy::{CERTIFICATE_REQUIRED, NEGOTIATE_REQUIRED, PolicyRegistry};
use crate::principal::{ACCOUNT_NAME, Principal, SUBJECT_IDENTIFIER};

/// Body of `/w` when the principal has no account name.
pub const NO_USERNAME: &str = "No username found";
/// Body of `/c` when the principal has no subject.
pub const NO_SUBJECT: &str = "No certificate subject found";

/// Shared application state
pub struct AppState {
    /// Authentication entry point
    pub coordinator: Arc<AuthenticationCoordinator>,
    /// Named policies routes refer to
    pub policies: PolicyRegistry,
    /// Per-request time limit
    pub request_timeout: Duration,
}

/// Create the router.
///
/// Fails if a route refers to a policy the registry does not define.
pub fn create_router(state: Arc<AppState>) -> Result<Router> {
    let guard = |name: &str| -> Result<PolicyGuard> {
        Ok(PolicyGuard {
            state: Arc::clone(&state),
            policy: state.policies.get(name)?.clone(),
        })
    };

    let router = Router::new()
        .route("/health", get(health_handler))
        .route(
            "/w",
            get(negotiate_user_handler)
                .route_layer(middleware::from_fn_with_state(guard(NEGOTIATE_REQUIRED)?, require_policy)),
        )
        .route(
            "/c",
            get(certificate_subject_handler).route_layer(middleware::from_fn_with_state(
                guard(CERTIFICATE_REQUIRED)?,
                require_policy,
            )),
        )
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::new(state.request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&state));

    Ok(router)
}

/// GET /w - account name of a Negotiate-authenticated caller
async fn negotiate_user_handler(principal: Option<Extension<Principal>>) -> String {
    claim_or(principal, ACCOUNT_NAME, NO_USERNAME)
}

/// GET /c - subject of a certificate-authenticated caller
async fn certificate_subject_handler(principal: Option<Extension<Principal>>) -> String {
    claim_or(principal, SUBJECT_IDENTIFIER, NO_SUBJECT)
}

fn claim_or(principal: Option<Extension<Principal>>, claim: &str, fallback: &str) -> String {
    principal
        .and_then(|Extension(p)| p.claim(claim).map(str::to_owned))
        .unwrap_or_else(|| fallback.to_string())
}

/// GET /health - liveness plus revocation cache counters
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let revocation = state
        .coordinator
        .certificate_validator()
        .and_then(|v| v.revocation_checker())
        .map(|checker| checker.stats());

    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "schemes": {
            "certificate": state.coordinator.certificate_validator().is_some(),
            "negotiate": state.coordinator.negotiate_enabled(),
        },
        "revocation": revocation,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_or_falls_back() {
        assert_eq!(claim_or(None, ACCOUNT_NAME, NO_USERNAME), NO_USERNAME);
    }

    #[test]
    fn unknown_policy_fails_router_creation() {
        let state = Arc::new(AppState {
            coordinator: Arc::new(AuthenticationCoordinator::new(None, None)),
            policies: PolicyRegistry::empty(),
            request_timeout: Duration::from_secs(5),
        });
        assert!(create_router(state).is_err());
    }
}
