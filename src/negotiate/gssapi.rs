//! Kerberos / SPNEGO acceptor backed by the system GSS-API library.

use libgssapi::context::{CtxFlags, SecurityContext as _, ServerCtx};
use libgssapi::credential::{Cred, CredUsage};
use libgssapi::name::Name;
use libgssapi::oid::{GSS_MECH_KRB5, GSS_MECH_SPNEGO, GSS_NT_HOSTBASED_SERVICE, OidSet};
use tracing::debug;

use super::NegotiateFailure;
use super::context::{ContextAcceptor, ContextStep, SecurityContext};
use crate::{Error, Result};

/// Acceptor using the keytab found by the Kerberos library
/// (`KRB5_KTNAME` or the system default).
#[derive(Debug, Clone)]
pub struct GssapiAcceptor {
    /// Host-based service name, e.g. `HTTP@gateway.example.com`.
    service_principal: Option<String>,
}

impl GssapiAcceptor {
    /// Create an acceptor; acquires credentials once to fail fast on a bad keytab.
    pub fn new(service_principal: Option<String>) -> Result<Self> {
        let acceptor = Self { service_principal };
        acceptor
            .acquire()
            .map_err(|e| Error::Negotiate(format!("GSS-API credentials unavailable: {e}")))?;
        Ok(acceptor)
    }

    fn acquire(&self) -> std::result::Result<Option<Cred>, libgssapi::error::Error> {
        let Some(spn) = &self.service_principal else {
            return Ok(None);
        };
        let name = Name::new(spn.as_bytes(), Some(&GSS_NT_HOSTBASED_SERVICE))?
            .canonicalize(Some(&GSS_MECH_KRB5))?;
        let mut mechs = OidSet::new()?;
        mechs.add(&GSS_MECH_KRB5)?;
        mechs.add(&GSS_MECH_SPNEGO)?;
        Cred::acquire(Some(&name), None, CredUsage::Accept, Some(&mechs)).map(Some)
    }
}

impl ContextAcceptor for GssapiAcceptor {
    fn new_context(&self) -> std::result::Result<Box<dyn SecurityContext>, NegotiateFailure> {
        let cred = self
            .acquire()
            .map_err(|e| NegotiateFailure::ContextError(e.to_string()))?;
        Ok(Box::new(GssapiContext(ServerCtx::new(cred))))
    }
}

struct GssapiContext(ServerCtx);

impl SecurityContext for GssapiContext {
    fn step(&mut self, token: &[u8]) -> std::result::Result<ContextStep, NegotiateFailure> {
        let out = self
            .0
            .step(token)
            .map_err(|e| NegotiateFailure::ContextError(e.to_string()))?
            .map(|buf| buf.to_vec());

        if !self.0.is_complete() {
            return match out {
                Some(challenge) => Ok(ContextStep::Continue(challenge)),
                None => Err(NegotiateFailure::ContextError(
                    "incomplete context produced no token".to_string(),
                )),
            };
        }

        let mutual = self
            .0
            .flags()
            .is_ok_and(|flags| flags.contains(CtxFlags::GSS_C_MUTUAL_FLAG));
        if mutual && out.is_none() {
            return Err(NegotiateFailure::MutualAuthenticationFailed);
        }

        let account_name = self
            .0
            .source_name()
            .map_err(|e| NegotiateFailure::ContextError(e.to_string()))?
            .to_string();
        debug!(account = %account_name, "GSS-API context established");

        Ok(ContextStep::Complete {
            account_name,
            response: out,
        })
    }
}
