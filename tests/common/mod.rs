//! Shared fixtures for the integration tests.
//!
//! Certificates are minted with `rcgen`; revocation and Negotiate use fakes
//! so no network or KDC is involved.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::{Extension, Router};
use base64::Engine;
use http_body_util::BodyExt;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateRevocationListParams,
    DistinguishedName, DnType, IsCa, Issuer, KeyIdMethod, KeyPair, KeyUsagePurpose, RevocationReason,
    RevokedCertParams, SerialNumber,
};
use rustls::pki_types::CertificateDer;
use time::OffsetDateTime;
use tower::ServiceExt;

use certgate::certificate::{
    CertificateOptions, CertificateValidator, PresentedCertificate, TrustStore,
};
use certgate::coordinator::{AuthenticationCoordinator, NegotiateSettings};
use certgate::gateway::{AppState, ConnectionContext, create_router};
use certgate::negotiate::{ContextAcceptor, ContextStep, NegotiateFailure, SecurityContext};
use certgate::policy::PolicyRegistry;
use certgate::revocation::{
    RevocationAuthority, RevocationChecker, RevocationCheckerOptions, RevocationRequest,
    RevocationStatus,
};

pub const ALICE_SERIAL: &[u8] = &[0x0a, 0x11];

// ── certificates ────────────────────────────────────────────────────────────

pub struct TestCa {
    cert: Certificate,
    key: KeyPair,
    params: CertificateParams,
}

impl TestCa {
    pub fn new(cn: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name = dn(cn);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key, params }
    }

    pub fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    fn issuer(&self) -> Issuer<'_, &KeyPair> {
        Issuer::from_params(&self.params, &self.key)
    }

    /// DER CRL listing `revoked`, valid for a week.
    pub fn crl_der(&self, revoked: &[&[u8]]) -> Vec<u8> {
        let now = OffsetDateTime::now_utc();
        let params = CertificateRevocationListParams {
            this_update: now - time::Duration::minutes(1),
            next_update: now + time::Duration::days(7),
            crl_number: SerialNumber::from_slice(&[1]),
            issuing_distribution_point: None,
            revoked_certs: revoked
                .iter()
                .map(|serial| RevokedCertParams {
                    serial_number: SerialNumber::from_slice(serial),
                    revocation_time: now - time::Duration::minutes(1),
                    reason_code: Some(RevocationReason::KeyCompromise),
                    invalidity_date: None,
                })
                .collect(),
            key_identifier_method: KeyIdMethod::Sha256,
        };
        params
            .signed_by(&self.issuer())
            .unwrap()
            .der()
            .to_vec()
    }

    /// Leaf valid from yesterday for a year.
    pub fn issue(&self, cn: &str, serial: &[u8]) -> PresentedCertificate {
        let now = OffsetDateTime::now_utc();
        self.issue_with_validity(
            cn,
            serial,
            now - time::Duration::days(1),
            now + time::Duration::days(365),
        )
    }

    /// Leaf that expired yesterday.
    pub fn issue_expired(&self, cn: &str, serial: &[u8]) -> PresentedCertificate {
        let now = OffsetDateTime::now_utc();
        self.issue_with_validity(
            cn,
            serial,
            now - time::Duration::days(30),
            now - time::Duration::days(1),
        )
    }

    fn issue_with_validity(
        &self,
        cn: &str,
        serial: &[u8],
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    ) -> PresentedCertificate {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name = dn(cn);
        params.serial_number = Some(SerialNumber::from_slice(serial));
        params.not_before = not_before;
        params.not_after = not_after;
        let cert = params.signed_by(&key, &self.issuer()).unwrap();
        PresentedCertificate::from_chain(vec![cert.der().clone()]).unwrap()
    }
}

/// PEM encoding of a presented leaf.
pub fn leaf_pem(cert: &PresentedCertificate) -> String {
    let body = base64::engine::general_purpose::STANDARD.encode(cert.end_entity.as_ref());
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for chunk in body.as_bytes().chunks(64) {
        pem.push_str(std::str::from_utf8(chunk).unwrap());
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

fn dn(cn: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn
}

// ── revocation ──────────────────────────────────────────────────────────────

/// How the fake authority answers.
#[derive(Clone, Copy)]
pub enum AuthorityBehavior {
    /// Answer from the revoked list.
    Respond,
    /// Never answer within any reasonable timeout.
    Hang,
    /// Fail every query.
    Unreachable,
}

pub struct FakeAuthority {
    revoked: HashSet<Vec<u8>>,
    behavior: AuthorityBehavior,
    queries: AtomicUsize,
}

impl FakeAuthority {
    pub fn new(revoked: &[&[u8]], behavior: AuthorityBehavior) -> Arc<Self> {
        Arc::new(Self {
            revoked: revoked.iter().map(|s| s.to_vec()).collect(),
            behavior,
            queries: AtomicUsize::new(0),
        })
    }

    pub fn good() -> Arc<Self> {
        Self::new(&[], AuthorityBehavior::Respond)
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RevocationAuthority for FakeAuthority {
    async fn query(&self, request: &RevocationRequest) -> certgate::Result<RevocationStatus> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            AuthorityBehavior::Respond if self.revoked.contains(&request.serial) => {
                Ok(RevocationStatus::Revoked)
            }
            AuthorityBehavior::Respond => Ok(RevocationStatus::Good),
            AuthorityBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(RevocationStatus::Good)
            }
            AuthorityBehavior::Unreachable => Err(certgate::Error::Revocation(
                "connection refused".to_string(),
            )),
        }
    }
}

// ── negotiate ───────────────────────────────────────────────────────────────

/// Acceptor that authenticates `account` after `rounds` tokens.
pub struct ScriptedAcceptor {
    pub account: &'static str,
    pub rounds: u32,
}

struct ScriptedContext {
    account: &'static str,
    remaining: u32,
}

impl SecurityContext for ScriptedContext {
    fn step(&mut self, token: &[u8]) -> Result<ContextStep, NegotiateFailure> {
        if token.ends_with(b"bad-ticket") {
            return Err(NegotiateFailure::ContextError("ticket decrypt failed".into()));
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            Ok(ContextStep::Complete {
                account_name: self.account.to_string(),
                response: Some(b"mutual-auth".to_vec()),
            })
        } else {
            Ok(ContextStep::Continue(b"server-challenge".to_vec()))
        }
    }
}

impl ContextAcceptor for ScriptedAcceptor {
    fn new_context(&self) -> Result<Box<dyn SecurityContext>, NegotiateFailure> {
        Ok(Box::new(ScriptedContext {
            account: self.account,
            remaining: self.rounds,
        }))
    }
}

/// `Authorization` value carrying an initial SPNEGO token.
pub fn spnego_initial(payload: &[u8]) -> String {
    // thisMech = 1.3.6.1.5.5.2
    let mut body = vec![0x06, 0x06, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];
    body.extend_from_slice(payload);
    authorization(0x60, &body)
}

/// `Authorization` value carrying a SPNEGO NegTokenResp.
pub fn spnego_response(payload: &[u8]) -> String {
    authorization(0xa1, payload)
}

fn authorization(tag: u8, body: &[u8]) -> String {
    assert!(body.len() < 0x80, "fixture tokens use short-form lengths");
    let mut token = vec![tag, u8::try_from(body.len()).unwrap()];
    token.extend_from_slice(body);
    format!(
        "Negotiate {}",
        base64::engine::general_purpose::STANDARD.encode(token)
    )
}

// ── gateway ─────────────────────────────────────────────────────────────────

pub struct HarnessBuilder {
    ca: Option<CertificateDer<'static>>,
    options: CertificateOptions,
    authority: Option<Arc<dyn RevocationAuthority>>,
    revocation_timeout: Duration,
    negotiate_rounds: Option<u32>,
}

impl HarnessBuilder {
    pub fn new(ca: &TestCa) -> Self {
        Self {
            ca: Some(ca.der()),
            options: CertificateOptions::default(),
            authority: None,
            revocation_timeout: Duration::from_secs(5),
            negotiate_rounds: None,
        }
    }

    pub fn authority(mut self, authority: Arc<dyn RevocationAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn revocation_timeout(mut self, timeout: Duration) -> Self {
        self.revocation_timeout = timeout;
        self
    }

    pub fn options(mut self, options: CertificateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn negotiate(mut self, rounds: u32) -> Self {
        self.negotiate_rounds = Some(rounds);
        self
    }

    pub fn build(self) -> Harness {
        let trust = TrustStore::new(self.ca.into_iter().collect()).unwrap();
        let checker = self.authority.map(|authority| {
            Arc::new(RevocationChecker::new(
                authority,
                RevocationCheckerOptions {
                    timeout: self.revocation_timeout,
                    ..RevocationCheckerOptions::default()
                },
            ))
        });
        let validator = CertificateValidator::new(self.options, trust, checker);

        let negotiate = self.negotiate_rounds.map(|rounds| NegotiateSettings {
            acceptor: Arc::new(ScriptedAcceptor {
                account: "DOMAIN\\bob",
                rounds,
            }),
            claims_issuer: "LOCAL AUTHORITY".to_string(),
            max_rounds: 5,
        });

        Harness::new(AuthenticationCoordinator::new(Some(validator), negotiate))
    }
}

pub struct Harness {
    pub coordinator: Arc<AuthenticationCoordinator>,
    pub router: Router,
}

impl Harness {
    pub fn new(coordinator: AuthenticationCoordinator) -> Self {
        let coordinator = Arc::new(coordinator);
        let state = Arc::new(AppState {
            coordinator: Arc::clone(&coordinator),
            policies: PolicyRegistry::default(),
            request_timeout: Duration::from_secs(30),
        });
        let router = create_router(state).unwrap();
        Self {
            coordinator,
            router,
        }
    }

    /// Router as seen by one client connection.
    pub fn connection(&self, certificate: Option<PresentedCertificate>) -> Router {
        self.router
            .clone()
            .layer(Extension(ConnectionContext::new(
                certificate,
                &self.coordinator,
            )))
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl Reply {
    pub fn www_authenticate(&self) -> Option<&str> {
        self.headers
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
    }
}

pub async fn get(app: &Router, path: &str, authorization: Option<&str>) -> Reply {
    let mut builder = Request::builder().uri(path);
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    Reply {
        status,
        headers,
        body: String::from_utf8(bytes.to_vec()).unwrap(),
    }
}
