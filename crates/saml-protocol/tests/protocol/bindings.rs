//! Binding round trips, size ceilings and redirect signature integrity.

use std::cell::RefCell;
use std::io::Write;

use base64::Engine;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use saml_protocol::bindings::{HttpPostBinding, HttpRedirectBinding, KeyResolver, TrustMaterial};
use saml_protocol::message::{
    AuthnRequest, LogoutRequest, LogoutResponse, RequestedAuthnContext, Response,
};
use saml_protocol::signature::{DigestAlgorithm, SignatureAlgorithm, VerificationKey};
use saml_protocol::{
    AnyMessage, AuthnContextClass, Message, NameId, NameIdFormat, NameIdPolicy, SamlBinding,
    SamlConfig, SamlError, SamlResult,
};

use crate::common::{init_tracing, raw_param, replace_param, Party};

const SSO_URL: &str = "https://idp.example.com/sso";

fn authn_request() -> AuthnRequest {
    AuthnRequest::new("https://sp.example.com")
        .with_destination(SSO_URL)
        .with_acs_url("https://sp.example.com/acs")
        .with_binding(SamlBinding::HttpPost)
        .with_name_id_policy(NameIdPolicy::with_format(NameIdFormat::Email))
        .with_authn_context(RequestedAuthnContext::exact(
            AuthnContextClass::PasswordProtectedTransport,
        ))
}

fn logout_request() -> LogoutRequest {
    LogoutRequest::new("https://sp.example.com", NameId::email("user@example.com"))
        .with_destination("https://idp.example.com/slo")
        .with_session_index("_session1")
}

fn bomb_query(param: &str) -> anyhow::Result<String> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&vec![0u8; 2 * 1024 * 1024])?;
    let compressed = encoder.finish()?;
    assert!(compressed.len() < 8 * 1024);
    let encoded = base64::engine::general_purpose::STANDARD.encode(compressed);
    Ok(format!("{param}={}", urlencoding::encode(&encoded)))
}

#[test]
fn post_round_trip_preserves_message_and_relay_state() -> anyhow::Result<()> {
    init_tracing();
    let binding = HttpPostBinding::default();
    let original = authn_request();

    let form = binding.encode(&Message::new(original.clone()), Some("opaque/state?x=1"))?;
    assert_eq!(form.field, "SAMLRequest");

    let decoded = binding.decode(form.fields())?;
    assert_eq!(decoded.relay_state.as_deref(), Some("opaque/state?x=1"));
    let request = decoded.message.expect::<AuthnRequest>()?;
    assert_eq!(request.body(), &original);
    Ok(())
}

#[test]
fn post_round_trip_of_any_message() -> anyhow::Result<()> {
    let binding = HttpPostBinding::default();
    let message: AnyMessage = Message::new(LogoutResponse::success("https://idp.example.com")).into();

    let form = binding.encode(&message, None)?;
    assert_eq!(form.field, "SAMLResponse");
    let decoded = binding.decode(form.fields())?;
    assert_eq!(decoded.message.element_name(), "LogoutResponse");
    assert_eq!(decoded.message.header(), message.header());
    assert!(decoded.relay_state.is_none());
    Ok(())
}

#[test]
fn post_rejects_oversized_form_value() -> anyhow::Result<()> {
    let binding = HttpPostBinding::default();
    let form = binding.encode(&Message::new(authn_request()), None)?;

    let small = HttpPostBinding::new(&SamlConfig::default().with_max_message_size(form.body.len() - 1));
    assert!(matches!(
        small.decode(form.fields()),
        Err(SamlError::MessageTooLarge { .. })
    ));
    Ok(())
}

#[test]
fn redirect_round_trip_for_each_message_kind() -> anyhow::Result<()> {
    init_tracing();
    let binding = HttpRedirectBinding::default();

    let request = logout_request();
    let url = binding.encode(&Message::new(request.clone()), Some("relay-1"), None)?;
    let decoded = binding.decode(&url, None)?;
    assert_eq!(decoded.relay_state.as_deref(), Some("relay-1"));
    assert_eq!(decoded.message.expect::<LogoutRequest>()?.body(), &request);

    let response = Response::success("https://idp.example.com")
        .in_response_to("_req1")
        .with_destination("https://sp.example.com/acs");
    let url = binding.encode(&Message::new(response.clone()), None, None)?;
    assert!(raw_param(&url, "SAMLResponse").is_some());
    let decoded = binding.decode(&url, None)?;
    assert!(decoded.relay_state.is_none());
    assert_eq!(decoded.message.expect::<Response>()?.body(), &response);
    Ok(())
}

#[test]
fn redirect_rejects_oversized_payload_before_inflating() {
    let binding = HttpRedirectBinding::new(&SamlConfig::default().with_max_message_size(64));
    // Not valid DEFLATE: only the size check can be reached.
    let query = format!("SAMLRequest={}", "A".repeat(100));
    assert!(matches!(
        binding.decode_query(&query, None),
        Err(SamlError::MessageTooLarge { limit: 64 })
    ));
}

#[test]
fn redirect_rejects_decompression_bomb() -> anyhow::Result<()> {
    init_tracing();
    let binding = HttpRedirectBinding::default();
    let url = format!("{SSO_URL}?{}", bomb_query("SAMLRequest")?);
    assert!(matches!(
        binding.decode(&url, None),
        Err(SamlError::MessageTooLarge { limit: 1_048_576 })
    ));
    Ok(())
}

#[test]
fn redirect_rejects_corrupt_payloads() {
    let binding = HttpRedirectBinding::default();
    assert!(matches!(
        binding.decode_query("SAMLRequest=%%%", None),
        Err(SamlError::CorruptMessage(_))
    ));
    assert!(matches!(
        binding.decode_query("SAMLRequest=AAAA", None),
        Err(SamlError::CorruptMessage(_))
    ));
}

#[test]
fn redirect_signed_round_trip() -> anyhow::Result<()> {
    init_tracing();
    let sp = Party::rsa("sp.example.com")?;
    let other = Party::rsa("other.example.com")?;
    let binding = HttpRedirectBinding::default();

    let url = binding.encode(&Message::new(authn_request()), Some("state"), Some(&sp.key))?;
    assert_eq!(
        raw_param(&url, "SigAlg"),
        Some(urlencoding::encode(SignatureAlgorithm::RsaSha1.uri()).as_ref())
    );

    let keys = [other.verification_key()?, sp.verification_key()?];
    let decoded = binding.decode(&url, Some(TrustMaterial::Keys(&keys)))?;
    assert_eq!(decoded.verified_key_index, Some(1));
    assert_eq!(decoded.sig_alg, Some(SignatureAlgorithm::RsaSha1));
    assert_eq!(decoded.relay_state.as_deref(), Some("state"));

    let untrusted = [other.verification_key()?];
    assert!(matches!(
        binding.decode(&url, Some(TrustMaterial::Keys(&untrusted))),
        Err(SamlError::InvalidSignature(_))
    ));
    Ok(())
}

#[test]
fn redirect_dsa_signed_round_trip() -> anyhow::Result<()> {
    let idp = Party::dsa("idp.example.com")?;
    let binding = HttpRedirectBinding::default();
    let message = Message::new(LogoutResponse::success("https://idp.example.com")
        .with_destination("https://sp.example.com/slo"));

    let url = binding.encode(&message, None, Some(&idp.key))?;
    let keys = [idp.verification_key()?];
    let decoded = binding.decode(&url, Some(TrustMaterial::Keys(&keys)))?;
    assert_eq!(decoded.sig_alg, Some(SignatureAlgorithm::DsaSha1));
    assert_eq!(decoded.verified_key_index, Some(0));
    Ok(())
}

#[test]
fn redirect_tampering_invalidates_signature() -> anyhow::Result<()> {
    let sp = Party::rsa("sp.example.com")?;
    let binding = HttpRedirectBinding::default();
    let keys = [sp.verification_key()?];
    let trust = Some(TrustMaterial::Keys(&keys));

    let url = binding.encode(&Message::new(logout_request()), Some("state"), Some(&sp.key))?;
    assert!(binding.decode(&url, trust).is_ok());

    let other = binding.encode(&Message::new(logout_request()), Some("state"), None)?;
    let swapped_message = replace_param(
        &url,
        "SAMLRequest",
        raw_param(&other, "SAMLRequest").unwrap_or_default(),
    );
    let changed_relay_state = replace_param(&url, "RelayState", "statf");
    let changed_sig_alg = replace_param(
        &url,
        "SigAlg",
        &urlencoding::encode(SignatureAlgorithm::DsaSha1.uri()),
    );

    for tampered in [swapped_message, changed_relay_state, changed_sig_alg] {
        assert_ne!(tampered, url);
        assert!(
            matches!(binding.decode(&tampered, trust), Err(SamlError::InvalidSignature(_))),
            "tampered URL verified: {tampered}"
        );
    }
    Ok(())
}

#[test]
fn redirect_verifies_raw_query_bytes() -> anyhow::Result<()> {
    let sp = Party::rsa("sp.example.com")?;
    let binding = HttpRedirectBinding::default();
    let keys = [sp.verification_key()?];

    let url = binding.encode(&Message::new(logout_request()), Some("a b/c"), Some(&sp.key))?;
    assert_eq!(raw_param(&url, "RelayState"), Some("a%20b%2Fc"));

    // Same decoded value, different bytes on the wire.
    let respelled = replace_param(&url, "RelayState", "a+b%2Fc");
    assert!(matches!(
        binding.decode(&respelled, Some(TrustMaterial::Keys(&keys))),
        Err(SamlError::InvalidSignature(_))
    ));
    assert_eq!(binding.decode(&respelled, None)?.relay_state.as_deref(), Some("a b/c"));
    Ok(())
}

#[test]
fn redirect_signature_requirements() -> anyhow::Result<()> {
    let sp = Party::rsa("sp.example.com")?;
    let binding = HttpRedirectBinding::default();
    let keys = [sp.verification_key()?];
    let trust = Some(TrustMaterial::Keys(&keys));

    let unsigned = binding.encode(&Message::new(logout_request()), None, None)?;
    assert!(matches!(binding.decode(&unsigned, trust), Err(SamlError::UnsignedMessage)));

    let signed = binding.encode(&Message::new(logout_request()), None, Some(&sp.key))?;
    let sha256 = replace_param(
        &signed,
        "SigAlg",
        &urlencoding::encode(SignatureAlgorithm::RsaSha256.uri()),
    );
    assert!(matches!(
        binding.decode(&sha256, trust),
        Err(SamlError::UnsupportedSignatureAlgorithm(_))
    ));

    let garbled = replace_param(&signed, "Signature", "%%%");
    assert!(matches!(binding.decode(&garbled, trust), Err(SamlError::CorruptMessage(_))));
    Ok(())
}

struct IssuerKeys {
    issuer: String,
    keys: Vec<VerificationKey>,
    verified: RefCell<Vec<String>>,
}

impl KeyResolver for IssuerKeys {
    fn resolve(&self, message: &AnyMessage, sig_alg: Option<&str>) -> SamlResult<Vec<VerificationKey>> {
        assert_eq!(sig_alg, Some(SignatureAlgorithm::RsaSha1.uri()));
        if message.header().issuer == self.issuer {
            Ok(self.keys.clone())
        } else {
            Ok(Vec::new())
        }
    }

    fn on_verified(&self, message: &AnyMessage, key: &VerificationKey) {
        let subject = key.certificate().map(|c| c.subject().to_string()).unwrap_or_default();
        self.verified
            .borrow_mut()
            .push(format!("{}:{subject}", message.header().id));
    }
}

#[test]
fn redirect_resolves_keys_per_message() -> anyhow::Result<()> {
    let sp = Party::rsa("sp.example.com")?;
    let binding = HttpRedirectBinding::default();
    let resolver = IssuerKeys {
        issuer: "https://sp.example.com".to_string(),
        keys: vec![sp.verification_key()?],
        verified: RefCell::new(Vec::new()),
    };

    let message = Message::new(logout_request());
    let url = binding.encode(&message, None, Some(&sp.key))?;
    let decoded = binding.decode(&url, Some(TrustMaterial::Resolver(&resolver)))?;
    assert_eq!(decoded.verified_key_index, Some(0));

    let verified = resolver.verified.borrow();
    assert_eq!(verified.len(), 1);
    assert!(verified[0].starts_with(message.id()));
    assert!(verified[0].contains("sp.example.com"));
    drop(verified);

    let stranger = Message::new(
        LogoutRequest::new("https://evil.example.com", NameId::transient())
            .with_destination("https://idp.example.com/slo"),
    );
    let url = binding.encode(&stranger, None, Some(&sp.key))?;
    assert!(matches!(
        binding.decode(&url, Some(TrustMaterial::Resolver(&resolver))),
        Err(SamlError::InvalidSignature(_))
    ));
    Ok(())
}

#[test]
fn signed_message_survives_post_binding() -> anyhow::Result<()> {
    let idp = Party::rsa("idp.example.com")?;
    let mut message = Message::new(
        Response::success("https://idp.example.com").with_destination("https://sp.example.com/acs"),
    );
    message.sign(&idp.key, Some(&idp.certificate), DigestAlgorithm::Sha256)?;

    let binding = HttpPostBinding::default();
    let decoded = binding.decode(binding.encode(&message, None)?.fields())?;
    let signable = decoded.message.as_signable();
    assert!(signable.is_signed());
    assert!(signable.is_signature_valid(&[idp.certificate.fingerprint()], &[]));
    Ok(())
}
