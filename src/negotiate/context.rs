//! Security context seam between the exchange and the GSS-API provider.

use super::NegotiateFailure;

/// Result of feeding one token to a security context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextStep {
    /// Another round trip is needed; send `challenge` to the peer.
    Continue(Vec<u8>),
    /// The peer is authenticated.
    Complete {
        /// Authenticated account, e.g. `DOMAIN\bob` or `bob@REALM`.
        account_name: String,
        /// Final (mutual-authentication) token, if the mechanism produced one.
        response: Option<Vec<u8>>,
    },
}

/// One in-progress acceptor context.
pub trait SecurityContext: Send {
    /// Consume the peer's token.
    fn step(&mut self, token: &[u8]) -> Result<ContextStep, NegotiateFailure>;
}

/// Creates a fresh [`SecurityContext`] per exchange.
pub trait ContextAcceptor: Send + Sync {
    /// Start a new acceptor context.
    fn new_context(&self) -> Result<Box<dyn SecurityContext>, NegotiateFailure>;
}
