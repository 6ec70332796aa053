//! `Authorization: Negotiate` header parsing and GSS-API token framing.
//!
//! Framing checks are structural only: they look at the outer DER header and
//! the mechanism OID so obviously wrong input never reaches the acceptor.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::NegotiateFailure;

/// HTTP authentication scheme name.
pub const SCHEME: &str = "Negotiate";

const NTLMSSP_SIGNATURE: &[u8] = b"NTLMSSP\0";

/// `[APPLICATION 0]` InitialContextToken.
const TAG_INITIAL_CONTEXT: u8 = 0x60;
/// `[1]` NegTokenResp.
const TAG_NEG_TOKEN_RESP: u8 = 0xa1;
const TAG_OID: u8 = 0x06;

/// 1.3.6.1.5.5.2
const OID_SPNEGO: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];
/// 1.2.840.113554.1.2.2
const OID_KRB5: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x12, 0x01, 0x02, 0x02];
/// 1.2.840.48018.1.2.2 (legacy Microsoft Kerberos)
const OID_MS_KRB5: &[u8] = &[0x2a, 0x86, 0x48, 0x82, 0xf7, 0x12, 0x01, 0x02, 0x02];

/// Mechanism announced by an initial token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// SPNEGO wrapper.
    Spnego,
    /// Raw Kerberos v5.
    Kerberos,
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spnego => f.write_str("spnego"),
            Self::Kerberos => f.write_str("kerberos"),
        }
    }
}

/// Extract the base64 credential from an `Authorization` header value.
///
/// Returns `None` for any other scheme.
pub fn credential(header: &str) -> Option<&str> {
    let (scheme, rest) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));
    scheme
        .eq_ignore_ascii_case(SCHEME)
        .then(|| rest.trim())
}

/// Decode the base64 credential. Empty input is malformed.
pub fn decode(credential: &str) -> Result<Vec<u8>, NegotiateFailure> {
    let bytes = STANDARD
        .decode(credential.trim())
        .map_err(|_| NegotiateFailure::MalformedToken)?;
    if bytes.is_empty() {
        return Err(NegotiateFailure::MalformedToken);
    }
    Ok(bytes)
}

/// Encode a token for `WWW-Authenticate`.
pub fn encode(token: &[u8]) -> String {
    STANDARD.encode(token)
}

/// `WWW-Authenticate` value, with the token when there is one.
pub fn challenge_header(token: Option<&[u8]>) -> String {
    match token {
        Some(t) if !t.is_empty() => format!("{SCHEME} {}", encode(t)),
        _ => SCHEME.to_string(),
    }
}

/// Check the first token of an exchange and report its mechanism.
pub fn classify_initial(token: &[u8]) -> Result<Mechanism, NegotiateFailure> {
    reject_ntlm(token)?;
    if token.first() != Some(&TAG_INITIAL_CONTEXT) {
        return Err(NegotiateFailure::MalformedToken);
    }
    let body = der_body(token)?;

    // thisMech OID leads the body
    let (&tag, rest) = body.split_first().ok_or(NegotiateFailure::MalformedToken)?;
    if tag != TAG_OID {
        return Err(NegotiateFailure::MalformedToken);
    }
    let (&len, rest) = rest.split_first().ok_or(NegotiateFailure::MalformedToken)?;
    let oid = rest
        .get(..usize::from(len))
        .ok_or(NegotiateFailure::MalformedToken)?;

    match oid {
        OID_SPNEGO => Ok(Mechanism::Spnego),
        OID_KRB5 | OID_MS_KRB5 => Ok(Mechanism::Kerberos),
        other => Err(NegotiateFailure::UnsupportedMechanism(format!(
            "oid {}",
            hex::encode(other)
        ))),
    }
}

/// Check a follow-up token: a SPNEGO `NegTokenResp` or another GSS token.
pub fn classify_continuation(token: &[u8]) -> Result<(), NegotiateFailure> {
    reject_ntlm(token)?;
    match token.first() {
        Some(&TAG_NEG_TOKEN_RESP | &TAG_INITIAL_CONTEXT) => der_body(token).map(|_| ()),
        _ => Err(NegotiateFailure::MalformedToken),
    }
}

fn reject_ntlm(token: &[u8]) -> Result<(), NegotiateFailure> {
    if token.starts_with(NTLMSSP_SIGNATURE) {
        return Err(NegotiateFailure::UnsupportedMechanism("ntlm".to_string()));
    }
    Ok(())
}

/// Body of a single DER TLV spanning the whole token.
fn der_body(token: &[u8]) -> Result<&[u8], NegotiateFailure> {
    let first = *token.get(1).ok_or(NegotiateFailure::MalformedToken)?;
    let (len, header) = if first < 0x80 {
        (usize::from(first), 2)
    } else {
        let count = usize::from(first & 0x7f);
        if count == 0 || count > 4 {
            return Err(NegotiateFailure::MalformedToken);
        }
        let bytes = token
            .get(2..2 + count)
            .ok_or(NegotiateFailure::MalformedToken)?;
        let len = bytes.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
        (len, 2 + count)
    };

    if token.len() != header + len {
        return Err(NegotiateFailure::MalformedToken);
    }
    Ok(&token[header..])
}
