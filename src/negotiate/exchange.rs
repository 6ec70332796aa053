//! Per-connection Negotiate exchange.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::context::{ContextAcceptor, ContextStep, SecurityContext};
use super::{DEFAULT_MAX_ROUNDS, NegotiateFailure, token};
use crate::principal::{
    ACCOUNT_NAME, AuthenticationScheme, DEFAULT_CLAIMS_ISSUER, Principal, PrincipalBuilder,
};

/// Observable state of the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeState {
    /// No token seen yet.
    AwaitingToken,
    /// A challenge was issued; waiting for the peer's next token.
    ExchangeInProgress,
    /// Terminal: the peer authenticated.
    Authenticated(Principal),
    /// Terminal: the exchange failed.
    Failed(NegotiateFailure),
}

impl ExchangeState {
    /// `Authenticated` or `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Authenticated(_) | Self::Failed(_))
    }
}

/// What one inbound token produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Send this challenge back and wait.
    Challenge(Vec<u8>),
    /// Authenticated, with an optional final token for the peer.
    Authenticated {
        /// Principal with the `account-name` claim.
        principal: Principal,
        /// Mutual-authentication token.
        response: Option<Vec<u8>>,
    },
    /// The exchange failed.
    Failed(NegotiateFailure),
}

/// Negotiate state machine for one connection.
pub struct NegotiateExchange {
    acceptor: Arc<dyn ContextAcceptor>,
    context: Option<Box<dyn SecurityContext>>,
    state: ExchangeState,
    rounds: u32,
    max_rounds: u32,
    claims_issuer: String,
}

impl fmt::Debug for NegotiateExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiateExchange")
            .field("state", &self.state)
            .field("rounds", &self.rounds)
            .field("max_rounds", &self.max_rounds)
            .finish_non_exhaustive()
    }
}

impl NegotiateExchange {
    /// New exchange in `AwaitingToken`.
    pub fn new(acceptor: Arc<dyn ContextAcceptor>) -> Self {
        Self {
            acceptor,
            context: None,
            state: ExchangeState::AwaitingToken,
            rounds: 0,
            max_rounds: DEFAULT_MAX_ROUNDS,
            claims_issuer: DEFAULT_CLAIMS_ISSUER.to_string(),
        }
    }

    /// Set the round-trip bound.
    #[must_use]
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Set the issuer recorded on the account claim.
    #[must_use]
    pub fn with_claims_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.claims_issuer = issuer.into();
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &ExchangeState {
        &self.state
    }

    /// Tokens consumed since the exchange (re)started.
    #[must_use]
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Drop the context and return to `AwaitingToken`.
    pub fn reset(&mut self) {
        self.context = None;
        self.state = ExchangeState::AwaitingToken;
        self.rounds = 0;
    }

    /// Feed one decoded token.
    pub fn step(&mut self, token: &[u8]) -> StepOutcome {
        if self.state.is_terminal() {
            debug!(previous = ?self.state, "Restarting negotiate exchange");
            self.reset();
        }

        let framing = if self.state == ExchangeState::AwaitingToken {
            token::classify_initial(token).map(|mech| {
                debug!(mechanism = %mech, "Negotiate exchange started");
            })
        } else {
            token::classify_continuation(token)
        };
        if let Err(failure) = framing {
            return self.fail(failure);
        }

        self.rounds += 1;
        if self.rounds > self.max_rounds {
            return self.fail(NegotiateFailure::TooManyRounds(self.max_rounds));
        }

        let context = match self.context.take() {
            Some(ctx) => ctx,
            None => match self.acceptor.new_context() {
                Ok(ctx) => ctx,
                Err(failure) => return self.fail(failure),
            },
        };
        self.advance(context, token)
    }

    /// Mark the exchange failed without consulting the context.
    pub fn reject(&mut self, failure: NegotiateFailure) -> StepOutcome {
        self.fail(failure)
    }

    fn advance(&mut self, mut context: Box<dyn SecurityContext>, token: &[u8]) -> StepOutcome {
        match context.step(token) {
            Ok(ContextStep::Continue(challenge)) => {
                debug!(round = self.rounds, "Negotiate challenge issued");
                self.context = Some(context);
                self.state = ExchangeState::ExchangeInProgress;
                StepOutcome::Challenge(challenge)
            }
            Ok(ContextStep::Complete {
                account_name,
                response,
            }) => {
                let principal = PrincipalBuilder::build(
                    AuthenticationScheme::Negotiate,
                    [(ACCOUNT_NAME, account_name)],
                    &self.claims_issuer,
                );
                debug!(
                    account = principal.display_name(),
                    rounds = self.rounds,
                    "Negotiate exchange complete"
                );
                self.state = ExchangeState::Authenticated(principal.clone());
                StepOutcome::Authenticated {
                    principal,
                    response,
                }
            }
            Err(failure) => self.fail(failure),
        }
    }

    fn fail(&mut self, failure: NegotiateFailure) -> StepOutcome {
        warn!(reason = %failure, rounds = self.rounds, "Negotiate exchange failed");
        self.context = None;
        self.state = ExchangeState::Failed(failure.clone());
        StepOutcome::Failed(failure)
    }
}
