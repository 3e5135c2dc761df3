//! Enveloped signatures on messages and assertions.

use chrono::{Duration, Utc};

use saml_protocol::message::{AuthnRequest, LogoutRequest, Response};
use saml_protocol::signature::{DigestAlgorithm, Signable, SignedElement, XmlSignatureValidator};
use saml_protocol::xml::{parse_instant, XmlDocument};
use saml_protocol::{
    Assertion, AuthnContextClass, AuthnStatement, Conditions, Message, MessageState, NameId,
    SamlConfig, SamlError, Subject,
};

use crate::common::{init_tracing, Party};

/// A response whose assertion was signed outside this crate, with an
/// `xs` prefix only reachable through `InclusiveNamespaces`.
const EXTERNAL_IDP_RESPONSE: &str = include_str!("../data/external-idp-response.xml");
const EXTERNAL_IDP_FINGERPRINT: &str = "E9:16:15:A1:A3:FA:AB:F4:AF:E0:AB:BE:73:3E:CA:5F:48:32:F5:4F";

fn logout() -> LogoutRequest {
    LogoutRequest::new("https://sp.example.com", NameId::persistent("abc123"))
        .with_destination("https://idp.example.com/slo")
        .with_session_index("_s1")
}

fn assertion() -> Assertion {
    Assertion::new("https://idp.example.com")
        .with_subject(Subject::new(NameId::email("user@example.com")))
        .with_conditions(Conditions::with_validity(5).with_audience("https://sp.example.com"))
        .with_authn_statement(AuthnStatement::new(AuthnContextClass::Password))
}

#[test]
fn signed_message_validates_only_against_its_certificate() -> anyhow::Result<()> {
    init_tracing();
    let sp = Party::rsa("sp.example.com")?;
    let unrelated = Party::rsa("unrelated.example.com")?;

    let mut message = Message::new(logout());
    message.sign(&sp.key, Some(&sp.certificate), DigestAlgorithm::Sha256)?;
    assert_eq!(message.state(), MessageState::Signed);

    let parsed = Message::<LogoutRequest>::parse(&message.to_xml()?)?;
    assert!(parsed.is_signed());
    assert!(parsed
        .validate_signature(&[], std::slice::from_ref(&sp.certificate))
        .is_empty());
    assert!(!parsed.is_signature_valid(&[], std::slice::from_ref(&unrelated.certificate)));

    assert!(parsed.is_signature_valid(&[sp.certificate.fingerprint()], &[]));
    assert_eq!(
        parsed.validate_signature(&[unrelated.certificate.fingerprint()], &[]),
        ["no certificate found"]
    );
    Ok(())
}

#[test]
fn signature_follows_issuer() -> anyhow::Result<()> {
    let sp = Party::rsa("sp.example.com")?;
    let mut message = Message::new(
        AuthnRequest::new("https://sp.example.com").with_destination("https://idp.example.com/sso"),
    );
    message.sign(&sp.key, None, DigestAlgorithm::Sha1)?;

    let document = XmlDocument::parse(&message.to_xml()?)?;
    let names: Vec<&str> = document.elements().map(|e| e.name.as_str()).collect();
    assert_eq!(names[..2], ["Issuer", "Signature"]);
    Ok(())
}

#[test]
fn signed_message_is_frozen() -> anyhow::Result<()> {
    let sp = Party::rsa("sp.example.com")?;
    let mut message = Message::new(logout());
    message.sign(&sp.key, Some(&sp.certificate), DigestAlgorithm::Sha256)?;

    let first = message.to_xml()?;
    assert_eq!(message.to_xml()?, first);
    assert!(matches!(message.body_mut(), Err(SamlError::InvalidState(_))));
    assert!(matches!(
        message.sign(&sp.key, None, DigestAlgorithm::Sha256),
        Err(SamlError::InvalidState(_))
    ));
    Ok(())
}

#[test]
fn dsa_signature_validates() -> anyhow::Result<()> {
    let idp = Party::dsa("idp.example.com")?;
    let mut message = Message::new(Response::success("https://idp.example.com"));
    message.sign(&idp.key, Some(&idp.certificate), DigestAlgorithm::Sha1)?;

    let parsed = Message::<Response>::parse(&message.to_xml()?)?;
    assert!(parsed.is_signature_valid(&[idp.certificate.fingerprint()], &[]));
    Ok(())
}

#[test]
fn tampered_document_fails_validation() -> anyhow::Result<()> {
    let sp = Party::rsa("sp.example.com")?;
    let mut message = Message::new(logout());
    message.sign(&sp.key, Some(&sp.certificate), DigestAlgorithm::Sha256)?;

    let tampered = message.to_xml()?.replace("_s1", "_s2");
    let parsed = Message::<LogoutRequest>::parse(&tampered)?;
    let reasons = parsed.validate_signature(&[], std::slice::from_ref(&sp.certificate));
    assert_eq!(reasons.len(), 1);
    Ok(())
}

#[test]
fn anchored_policy_requires_issued_certificate() -> anyhow::Result<()> {
    let ca = Party::rsa("Federation CA")?;
    let issued = ca.issue("idp.example.com")?;
    let rogue = Party::rsa("idp.example.com")?;

    let validator = XmlSignatureValidator::new(
        &SamlConfig::default().with_trust_anchor(ca.certificate.clone()),
    );

    for (party, trusted) in [(&issued, true), (&rogue, false)] {
        let mut message = Message::new(logout());
        message.sign(&party.key, Some(&party.certificate), DigestAlgorithm::Sha256)?;
        let parsed = Message::<LogoutRequest>::parse(&message.to_xml()?)?;

        let reasons = parsed.validate_signature_at(
            &validator,
            &[],
            std::slice::from_ref(&party.certificate),
            parsed.verification_time(),
        );
        assert_eq!(reasons.is_empty(), trusted, "{reasons:?}");
    }
    Ok(())
}

#[test]
fn certificate_validity_is_checked_at_issue_instant() -> anyhow::Result<()> {
    let sp = Party::rsa("sp.example.com")?;
    let mut message = Message::new(logout());
    message.sign(&sp.key, Some(&sp.certificate), DigestAlgorithm::Sha256)?;
    let parsed = Message::<LogoutRequest>::parse(&message.to_xml()?)?;

    let validator = XmlSignatureValidator::default();
    let certs = std::slice::from_ref(&sp.certificate);
    assert!(parsed
        .validate_signature_at(&validator, &[], certs, Utc::now())
        .is_empty());
    assert!(!parsed
        .validate_signature_at(&validator, &[], certs, Utc::now() + Duration::days(3))
        .is_empty());
    Ok(())
}

#[test]
fn assertion_signatures_are_independent() -> anyhow::Result<()> {
    let idp = Party::rsa("idp.example.com")?;
    let mut message = Message::new(
        Response::success("https://idp.example.com")
            .with_assertion(assertion())
            .with_assertion(assertion()),
    );
    message.sign_assertions(&idp.key, Some(&idp.certificate), DigestAlgorithm::Sha256)?;
    message.sign(&idp.key, Some(&idp.certificate), DigestAlgorithm::Sha256)?;

    let parsed = Message::<Response>::parse(&message.to_xml()?)?;
    assert!(parsed.is_signature_valid(&[idp.certificate.fingerprint()], &[]));
    assert!(parsed
        .validate_assertion_signatures(&[idp.certificate.fingerprint()], &[])
        .is_empty());

    let first = parsed
        .assertion_signatures()
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("assertion"))?;
    assert!(first.is_signed());

    // Signing only the response leaves its assertions unsigned.
    let mut response_only = Message::new(Response::success("https://idp.example.com").with_assertion(assertion()));
    response_only.sign(&idp.key, Some(&idp.certificate), DigestAlgorithm::Sha256)?;
    let parsed = Message::<Response>::parse(&response_only.to_xml()?)?;
    assert!(parsed.is_signature_valid(&[idp.certificate.fingerprint()], &[]));
    let reasons = parsed.validate_assertion_signatures(&[idp.certificate.fingerprint()], &[]);
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].ends_with("not signed"));
    Ok(())
}

#[test]
fn anchored_policy_applies_to_assertion_signatures() -> anyhow::Result<()> {
    let ca = Party::rsa("Federation CA")?;
    let issued = ca.issue("idp.example.com")?;
    let rogue = Party::rsa("idp.example.com")?;

    let validator = XmlSignatureValidator::new(
        &SamlConfig::default().with_trust_anchor(ca.certificate.clone()),
    );

    for (party, trusted) in [(&issued, true), (&rogue, false)] {
        let mut message = Message::new(Response::success("https://idp.example.com").with_assertion(assertion()));
        message.sign_assertions(&party.key, Some(&party.certificate), DigestAlgorithm::Sha256)?;
        let parsed = Message::<Response>::parse(&message.to_xml()?)?;
        let fingerprints = [party.certificate.fingerprint()];

        assert!(parsed.validate_assertion_signatures(&fingerprints, &[]).is_empty());
        let reasons = parsed.validate_assertion_signatures_with(&validator, &fingerprints, &[]);
        assert_eq!(reasons.is_empty(), trusted, "{reasons:?}");
        if !trusted {
            assert!(reasons[0].contains("not issued by a trust anchor"));
        }
    }
    Ok(())
}

#[test]
fn verifies_assertion_signed_by_external_idp() -> anyhow::Result<()> {
    init_tracing();
    let root = XmlDocument::parse(EXTERNAL_IDP_RESPONSE)?;
    let assertion = root
        .find_by_id("_assert")
        .ok_or_else(|| anyhow::anyhow!("assertion"))?;
    let at = parse_instant("2026-01-01T00:00:00Z")?;

    let view = SignedElement::new(&root, assertion).at(at);
    assert!(view.is_signed());
    assert_eq!(
        view.validate_signature(&[EXTERNAL_IDP_FINGERPRINT], &[]),
        Vec::<String>::new()
    );
    Ok(())
}

#[test]
fn external_idp_assertion_rejects_changed_value() -> anyhow::Result<()> {
    let changed = EXTERNAL_IDP_RESPONSE.replace("user@example.org", "admin@example.org");
    let root = XmlDocument::parse(&changed)?;
    let assertion = root
        .find_by_id("_assert")
        .ok_or_else(|| anyhow::anyhow!("assertion"))?;
    let at = parse_instant("2026-01-01T00:00:00Z")?;

    let reasons = SignedElement::new(&root, assertion)
        .at(at)
        .validate_signature(&[EXTERNAL_IDP_FINGERPRINT], &[]);
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].contains("digest mismatch"), "{reasons:?}");
    Ok(())
}
