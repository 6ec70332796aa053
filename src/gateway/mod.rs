//! TLS listener, router and per-route policy enforcement

pub mod auth;
mod router;
mod server;

pub use auth::{ConnectionContext, PolicyGuard, require_policy, status_for};
pub use router::{AppState, NO_SUBJECT, NO_USERNAME, create_router};
pub use server::Gateway;
