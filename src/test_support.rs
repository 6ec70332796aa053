//! Certificate and CRL fixtures for unit tests.

use base64::Engine;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateRevocationListParams,
    CrlDistributionPoint, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer,
    KeyIdMethod, KeyPair, KeyUsagePurpose, RevocationReason, RevokedCertParams, SerialNumber,
};
use time::{Duration, OffsetDateTime};
use x509_parser::prelude::{FromDer, X509Certificate};

/// A CA able to issue certificates and CRLs.
pub struct TestCa {
    pub cert: Certificate,
    pub key: KeyPair,
    pub params: CertificateParams,
}

impl TestCa {
    /// Self-signed root.
    pub fn root(cn: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let params = ca_params(cn);
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key, params }
    }

    /// Intermediate signed by `parent`.
    pub fn intermediate(cn: &str, parent: &TestCa) -> Self {
        let key = KeyPair::generate().unwrap();
        let params = ca_params(cn);
        let cert = params.signed_by(&key, &parent.issuer()).unwrap();
        Self { cert, key, params }
    }

    /// Intermediate signed by `parent` whose validity ended yesterday.
    pub fn expired_intermediate(cn: &str, parent: &TestCa) -> Self {
        let key = KeyPair::generate().unwrap();
        let now = OffsetDateTime::now_utc();
        let mut params = ca_params(cn);
        params.not_before = now - Duration::days(30);
        params.not_after = now - Duration::days(1);
        let cert = params.signed_by(&key, &parent.issuer()).unwrap();
        Self { cert, key, params }
    }

    /// Non-CA certificate signed by `parent` whose key can still sign.
    pub fn end_entity(cn: &str, parent: &TestCa) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name = dn(cn);
        let cert = params.signed_by(&key, &parent.issuer()).unwrap();
        Self { cert, key, params }
    }

    pub fn der(&self) -> Vec<u8> {
        self.cert.der().to_vec()
    }

    pub fn issuer(&self) -> Issuer<'_, &KeyPair> {
        Issuer::from_params(&self.params, &self.key)
    }

    /// Raw DER of the subject name, as it appears in issued certificates.
    pub fn subject_raw(&self) -> Vec<u8> {
        let der = self.der();
        let (_, cert) = X509Certificate::from_der(&der).unwrap();
        cert.subject().as_raw().to_vec()
    }

    /// DER SubjectPublicKeyInfo.
    pub fn public_key_raw(&self) -> Vec<u8> {
        let der = self.der();
        let (_, cert) = X509Certificate::from_der(&der).unwrap();
        cert.public_key().raw.to_vec()
    }
}

fn ca_params(cn: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = dn(cn);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params
}

fn dn(cn: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn
}

/// Leaf certificate description.
pub struct Leaf<'a> {
    pub cn: &'a str,
    pub serial: &'a [u8],
    pub not_before: Option<OffsetDateTime>,
    pub not_after: Option<OffsetDateTime>,
    pub crl_url: Option<&'a str>,
    pub eku: Vec<ExtendedKeyUsagePurpose>,
}

impl<'a> Leaf<'a> {
    pub fn new(cn: &'a str, serial: &'a [u8]) -> Self {
        Self {
            cn,
            serial,
            not_before: None,
            not_after: None,
            crl_url: None,
            eku: Vec::new(),
        }
    }

    pub fn expired(mut self) -> Self {
        let now = OffsetDateTime::now_utc();
        self.not_before = Some(now - Duration::days(30));
        self.not_after = Some(now - Duration::days(1));
        self
    }

    pub fn not_yet_valid(mut self) -> Self {
        let now = OffsetDateTime::now_utc();
        self.not_before = Some(now + Duration::days(1));
        self.not_after = Some(now + Duration::days(30));
        self
    }

    pub fn with_crl_url(mut self, url: &'a str) -> Self {
        self.crl_url = Some(url);
        self
    }

    pub fn with_eku(mut self, eku: Vec<ExtendedKeyUsagePurpose>) -> Self {
        self.eku = eku;
        self
    }

    fn params(&self) -> CertificateParams {
        let mut params = CertificateParams::default();
        params.distinguished_name = dn(self.cn);
        params.serial_number = Some(SerialNumber::from_slice(self.serial));
        if let Some(t) = self.not_before {
            params.not_before = t;
        }
        if let Some(t) = self.not_after {
            params.not_after = t;
        }
        if let Some(url) = self.crl_url {
            params.crl_distribution_points = vec![CrlDistributionPoint {
                uris: vec![url.to_string()],
            }];
        }
        params.extended_key_usages = self.eku.clone();
        params
    }
}

/// Leaf issued by `issuer`, DER encoded.
pub fn leaf_der(issuer: &TestCa, leaf: &Leaf<'_>) -> Vec<u8> {
    let key = KeyPair::generate().unwrap();
    leaf.params()
        .signed_by(&key, &issuer.issuer())
        .unwrap()
        .der()
        .to_vec()
}

/// Self-signed leaf, DER encoded.
pub fn self_signed_der(leaf: &Leaf<'_>) -> Vec<u8> {
    let key = KeyPair::generate().unwrap();
    leaf.params().self_signed(&key).unwrap().der().to_vec()
}

/// CRL issued by `issuer` listing `revoked`, valid for `days`.
pub fn crl_der(issuer: &TestCa, revoked: &[&[u8]], days: i64) -> Vec<u8> {
    let now = OffsetDateTime::now_utc();
    let params = CertificateRevocationListParams {
        this_update: now - Duration::minutes(1),
        next_update: now + Duration::days(days),
        crl_number: SerialNumber::from_slice(&[1]),
        issuing_distribution_point: None,
        revoked_certs: revoked
            .iter()
            .map(|serial| RevokedCertParams {
                serial_number: SerialNumber::from_slice(serial),
                revocation_time: now - Duration::minutes(1),
                reason_code: Some(RevocationReason::KeyCompromise),
                invalidity_date: None,
            })
            .collect(),
        key_identifier_method: KeyIdMethod::Sha256,
    };
    params
        .signed_by(&issuer.issuer())
        .unwrap()
        .der()
        .to_vec()
}

/// Wrap DER in a PEM block.
pub fn pem_block(label: &str, der: &[u8]) -> String {
    let body = base64::engine::general_purpose::STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {label}-----\n");
    for chunk in body.as_bytes().chunks(64) {
        pem.push_str(std::str::from_utf8(chunk).unwrap());
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {label}-----\n"));
    pem
}
