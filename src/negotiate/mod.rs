//! Negotiate (SPNEGO / Kerberos) authentication.
//!
//! # State machine
//!
//! ```text
//!            token (framing ok)        Continue(challenge)
//! AwaitingToken ────────────► step ──────────────────────► ExchangeInProgress
//!                               │                                │
//!                               │ Complete{account}              │ next token
//!                               ▼                                ▼
//!                         Authenticated ◄──────────────────────  step
//!                               │
//!   any error ─► Failed(reason) │ new token on a terminal state restarts
//! ```
//!
//! One [`NegotiateExchange`] lives per connection. The security context that
//! does the cryptographic work sits behind [`ContextAcceptor`] so a system
//! GSS-API acceptor (feature `gssapi`) or a scripted one can be plugged in.

pub mod context;
pub mod exchange;
#[cfg(feature = "gssapi")]
pub mod gssapi;
pub mod token;

use thiserror::Error;

pub use context::{ContextAcceptor, ContextStep, SecurityContext};
pub use exchange::{ExchangeState, NegotiateExchange, StepOutcome};
pub use token::Mechanism;

/// Default bound on round trips per exchange.
pub const DEFAULT_MAX_ROUNDS: u32 = 5;

/// Why a Negotiate exchange failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiateFailure {
    /// Empty, badly encoded or badly framed token.
    #[error("malformed negotiate token")]
    MalformedToken,

    /// Mechanism other than SPNEGO or Kerberos (raw NTLM included).
    #[error("unsupported mechanism: {0}")]
    UnsupportedMechanism(String),

    /// The acceptor could not produce the mutual-authentication token.
    #[error("mutual authentication failed")]
    MutualAuthenticationFailed,

    /// The security context rejected the token.
    #[error("security context error: {0}")]
    ContextError(String),

    /// The exchange needed more round trips than allowed.
    #[error("exchange exceeded {0} rounds")]
    TooManyRounds(u32),
}
