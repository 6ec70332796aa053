//! Certification path building.
//!
//! Walks from the leaf through the intermediates the client sent until a
//! configured trust anchor signs the current certificate. Every hop must
//! match issuer/subject names and verify the child's signature with the
//! issuer's key; intermediates must be CAs.

use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::objects::{oid_registry, oid2abbrev};
use x509_parser::prelude::{FromDer, X509Certificate, X509Name};

use crate::revocation::RevocationRequest;

/// Longest path accepted, anchor excluded.
pub const MAX_CHAIN_DEPTH: usize = 8;

/// `[notBefore, notAfter]` in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    /// Start of the window.
    pub not_before: i64,
    /// End of the window, inclusive.
    pub not_after: i64,
}

impl ValidityWindow {
    /// Window of `cert`.
    pub fn of(cert: &X509Certificate<'_>) -> Self {
        let validity = cert.validity();
        Self {
            not_before: validity.not_before.timestamp(),
            not_after: validity.not_after.timestamp(),
        }
    }
}

/// One child → issuer hop of a verified path.
#[derive(Debug, Clone)]
pub struct ChainLink {
    /// Revocation query for the child certificate.
    pub request: RevocationRequest,
    /// Validity of the issuing certificate (intermediate or anchor).
    pub issuer_validity: ValidityWindow,
    /// The child is itself the trust root (self-signed leaf).
    pub child_is_root: bool,
}

impl ChainLink {
    fn new(child: &X509Certificate<'_>, issuer: &X509Certificate<'_>, child_is_root: bool) -> Self {
        Self {
            request: revocation_request(child, issuer),
            issuer_validity: ValidityWindow::of(issuer),
            child_is_root,
        }
    }
}

/// Parse one DER certificate, rejecting trailing data.
pub fn parse(der: &[u8]) -> Result<X509Certificate<'_>, String> {
    let (rest, cert) = X509Certificate::from_der(der).map_err(|e| e.to_string())?;
    if !rest.is_empty() {
        return Err(format!("{} trailing bytes after certificate", rest.len()));
    }
    Ok(cert)
}

/// Distinguished name, most specific RDN first: `CN=alice, O=Example, C=US`.
///
/// Multi-valued RDNs are joined with ` + `. Values holding separators are
/// quoted; values that are not strings are written as `#` and hex DER.
pub fn display_name(name: &X509Name<'_>) -> String {
    let encoded: Vec<_> = name.iter().collect();
    let mut rdns: Vec<String> = Vec::with_capacity(encoded.len());
    for rdn in encoded.into_iter().rev() {
        let attrs: Vec<String> = rdn
            .iter()
            .map(|attr| {
                let key = oid2abbrev(attr.attr_type(), oid_registry())
                    .map_or_else(|_| attr.attr_type().to_id_string(), str::to_owned);
                let value = match attr.as_str() {
                    Ok(v) => quote_value(v),
                    Err(_) => format!("#{}", hex::encode(attr.as_slice())),
                };
                format!("{key}={value}")
            })
            .collect();
        rdns.push(attrs.join(" + "));
    }
    rdns.join(", ")
}

fn quote_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.starts_with(' ')
        || value.ends_with(' ')
        || value.contains([',', '+', '=', '"', '\n', '<', '>', '#', ';']);
    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_owned()
    }
}

/// Subject equals issuer and the signature verifies with the embedded key.
pub fn is_self_signed(cert: &X509Certificate<'_>) -> bool {
    cert.subject().as_raw() == cert.issuer().as_raw() && cert.verify_signature(None).is_ok()
}

/// Whether `issuer` issued `child`.
pub fn issued_by(child: &X509Certificate<'_>, issuer: &X509Certificate<'_>) -> bool {
    child.issuer().as_raw() == issuer.subject().as_raw()
        && child.verify_signature(Some(issuer.public_key())).is_ok()
}

fn is_ca(cert: &X509Certificate<'_>) -> bool {
    matches!(cert.basic_constraints(), Ok(Some(bc)) if bc.value.ca)
}

/// Path for a self-signed certificate: it is its own root.
pub fn self_signed_path(cert: &X509Certificate<'_>) -> Vec<ChainLink> {
    vec![ChainLink::new(cert, cert, true)]
}

/// Build a verified path from `leaf` to one of `anchors`.
pub fn build_path<'c, 'd>(
    leaf: &'c X509Certificate<'d>,
    intermediates: &'c [X509Certificate<'d>],
    anchors: &[X509Certificate<'_>],
) -> Result<Vec<ChainLink>, String> {
    let mut links = Vec::new();
    let mut used = vec![false; intermediates.len()];
    let mut current = leaf;

    for _ in 0..MAX_CHAIN_DEPTH {
        if let Some(anchor) = anchors.iter().find(|a| issued_by(current, a)) {
            links.push(ChainLink::new(current, anchor, false));
            return Ok(links);
        }

        let next = intermediates
            .iter()
            .enumerate()
            .find(|(i, c)| !used[*i] && is_ca(c) && issued_by(current, c));

        let Some((index, issuer)) = next else {
            return Err(format!(
                "no trusted issuer found for '{}' (issuer '{}')",
                current.subject(),
                current.issuer()
            ));
        };

        used[index] = true;
        links.push(ChainLink::new(current, issuer, false));
        current = issuer;
    }

    Err(format!("chain exceeds {MAX_CHAIN_DEPTH} certificates"))
}

/// Revocation query for `child` as issued by `issuer`.
pub fn revocation_request(
    child: &X509Certificate<'_>,
    issuer: &X509Certificate<'_>,
) -> RevocationRequest {
    RevocationRequest {
        serial: child.raw_serial().to_vec(),
        issuer_name: issuer.subject().as_raw().to_vec(),
        issuer_display: display_name(issuer.subject()),
        issuer_public_key: issuer.public_key().raw.to_vec(),
        subject_display: display_name(child.subject()),
        distribution_points: distribution_points(child),
    }
}

/// URIs from the CRL Distribution Points extension.
pub fn distribution_points(cert: &X509Certificate<'_>) -> Vec<String> {
    let mut uris = Vec::new();
    for ext in cert.extensions() {
        if let ParsedExtension::CRLDistributionPoints(points) = ext.parsed_extension() {
            for point in &points.points {
                if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                    for name in names {
                        if let GeneralName::URI(uri) = name {
                            uris.push((*uri).to_owned());
                        }
                    }
                }
            }
        }
    }
    uris
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Leaf, TestCa, leaf_der, self_signed_der};

    const SERIAL: &[u8] = &[0x10, 0x01];

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse(b"not a cert").is_err());
    }

    #[test]
    fn display_name_puts_common_name_first() {
        // GIVEN: a subject encoded C, O, CN
        let mut params = rcgen::CertificateParams::default();
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CountryName, "US");
        dn.push(rcgen::DnType::OrganizationName, "Example, Inc.");
        dn.push(rcgen::DnType::CommonName, "alice");
        params.distinguished_name = dn;
        let key = rcgen::KeyPair::generate().unwrap();
        let der = params.self_signed(&key).unwrap().der().to_vec();
        let cert = parse(&der).unwrap();

        // THEN: reversed order, separator-bearing value quoted
        assert_eq!(
            display_name(cert.subject()),
            "CN=alice, O=\"Example, Inc.\", C=US"
        );
    }

    #[test]
    fn display_name_single_common_name() {
        let der = self_signed_der(&Leaf::new("alice", SERIAL));
        let cert = parse(&der).unwrap();
        assert_eq!(display_name(cert.subject()), "CN=alice");
    }

    #[test]
    fn self_signed_detection() {
        let der = self_signed_der(&Leaf::new("solo", SERIAL));
        let cert = parse(&der).unwrap();
        assert!(is_self_signed(&cert));

        let ca = TestCa::root("Test CA");
        let issued = leaf_der(&ca, &Leaf::new("alice", SERIAL));
        assert!(!is_self_signed(&parse(&issued).unwrap()));
    }

    #[test]
    fn direct_path_to_anchor() {
        let ca = TestCa::root("Test CA");
        let ca_der = ca.der();
        let leaf = leaf_der(&ca, &Leaf::new("alice", SERIAL));

        let leaf_cert = parse(&leaf).unwrap();
        let anchors = vec![parse(&ca_der).unwrap()];
        let links = build_path(&leaf_cert, &[], &anchors).unwrap();

        assert_eq!(links.len(), 1);
        assert_eq!(links[0].request.serial, SERIAL);
        assert_eq!(links[0].request.subject_display, "CN=alice");
        assert_eq!(links[0].request.issuer_display, "CN=Test CA");
        assert!(!links[0].child_is_root);
    }

    #[test]
    fn path_through_intermediate() {
        let root = TestCa::root("Root CA");
        let inter = TestCa::intermediate("Issuing CA", &root);
        let (root_der, inter_der) = (root.der(), inter.der());
        let leaf = leaf_der(&inter, &Leaf::new("alice", SERIAL));

        let leaf_cert = parse(&leaf).unwrap();
        let intermediates = vec![parse(&inter_der).unwrap()];
        let anchors = vec![parse(&root_der).unwrap()];
        let links = build_path(&leaf_cert, &intermediates, &anchors).unwrap();

        assert_eq!(links.len(), 2);
        assert_eq!(links[0].request.issuer_display, "CN=Issuing CA");
        assert_eq!(links[1].request.subject_display, "CN=Issuing CA");
        assert_eq!(links[1].request.issuer_display, "CN=Root CA");
        assert_eq!(links[0].request.issuer_public_key, inter.public_key_raw());
        assert_eq!(links[1].request.issuer_public_key, root.public_key_raw());
    }

    #[test]
    fn links_carry_issuer_validity() {
        // GIVEN: root -> expired issuing CA -> alice
        let root = TestCa::root("Root CA");
        let inter = TestCa::expired_intermediate("Issuing CA", &root);
        let (root_der, inter_der) = (root.der(), inter.der());
        let leaf = leaf_der(&inter, &Leaf::new("alice", SERIAL));

        let leaf_cert = parse(&leaf).unwrap();
        let intermediates = vec![parse(&inter_der).unwrap()];
        let anchors = vec![parse(&root_der).unwrap()];
        // WHEN: building the path
        let links = build_path(&leaf_cert, &intermediates, &anchors).unwrap();

        // THEN: each hop records its issuer's window
        assert_eq!(links[0].issuer_validity, ValidityWindow::of(&intermediates[0]));
        assert_eq!(links[1].issuer_validity, ValidityWindow::of(&anchors[0]));
        assert!(links[0].issuer_validity.not_after < links[1].issuer_validity.not_after);
    }

    #[test]
    fn missing_intermediate_fails() {
        let root = TestCa::root("Root CA");
        let inter = TestCa::intermediate("Issuing CA", &root);
        let root_der = root.der();
        let leaf = leaf_der(&inter, &Leaf::new("alice", SERIAL));

        let leaf_cert = parse(&leaf).unwrap();
        let anchors = vec![parse(&root_der).unwrap()];
        let err = build_path(&leaf_cert, &[], &anchors).unwrap_err();
        assert!(err.contains("no trusted issuer"));
    }

    #[test]
    fn same_name_different_key_fails() {
        // GIVEN: an impostor CA with the trusted CA's name
        let real = TestCa::root("Test CA");
        let impostor = TestCa::root("Test CA");
        let real_der = real.der();
        let leaf = leaf_der(&impostor, &Leaf::new("mallory", SERIAL));

        let leaf_cert = parse(&leaf).unwrap();
        let anchors = vec![parse(&real_der).unwrap()];
        // THEN: signature check rejects it
        assert!(build_path(&leaf_cert, &[], &anchors).is_err());
    }

    #[test]
    fn non_ca_cannot_act_as_intermediate() {
        // GIVEN: a non-CA end entity that signed another certificate
        let root = TestCa::root("Root CA");
        let alice = TestCa::end_entity("alice", &root);
        let (root_der, alice_der) = (root.der(), alice.der());
        let mallory = leaf_der(&alice, &Leaf::new("mallory", &[0x10, 0x02]));

        let mallory_cert = parse(&mallory).unwrap();
        let intermediates = vec![parse(&alice_der).unwrap()];
        let anchors = vec![parse(&root_der).unwrap()];
        // THEN: alice is skipped as an issuer and no path exists
        assert!(build_path(&mallory_cert, &intermediates, &anchors).is_err());
    }

    #[test]
    fn distribution_points_extracted() {
        let ca = TestCa::root("Test CA");
        let leaf = leaf_der(
            &ca,
            &Leaf::new("alice", SERIAL).with_crl_url("http://crl.example.com/ca.crl"),
        );
        let cert = parse(&leaf).unwrap();
        assert_eq!(distribution_points(&cert), vec!["http://crl.example.com/ca.crl"]);
    }

    #[test]
    fn self_signed_path_marks_root() {
        let der = self_signed_der(&Leaf::new("solo", SERIAL));
        let cert = parse(&der).unwrap();
        let links = self_signed_path(&cert);
        assert_eq!(links.len(), 1);
        assert!(links[0].child_is_root);
        assert_eq!(links[0].request.issuer_display, "CN=solo");
    }
}
