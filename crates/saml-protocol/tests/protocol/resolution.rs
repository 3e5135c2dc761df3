//! Metadata-driven endpoint and attribute resolution, and message dispatch.

use chrono::{Duration, Utc};

use saml_protocol::bindings::{HttpRedirectBinding, TrustMaterial};
use saml_protocol::message::{AuthnRequest, Response};
use saml_protocol::metadata::EntityDescriptor;
use saml_protocol::{
    AnyMessage, Assertion, AttributeValue, Conditions, IndexedEndpoint, IndexedEndpoints, Message,
    SamlBinding, SamlError, Status, SuppliedAttribute,
};

use crate::common::Party;

const SP_METADATA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata"
                     xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
                     entityID="https://sp.example.com">
    <md:SPSSODescriptor AuthnRequestsSigned="true" WantAssertionsSigned="true"
                        protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
        <md:SingleLogoutService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect"
                                Location="https://sp.example.com/slo"/>
        <md:NameIDFormat>urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress</md:NameIDFormat>
        <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect"
                                     Location="https://sp.example.com/acs/redirect" index="3"/>
        <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST"
                                     Location="https://sp.example.com/acs/post" index="1"/>
        <md:AttributeConsumingService index="0">
            <md:ServiceName xml:lang="en">Portal</md:ServiceName>
            <md:RequestedAttribute Name="name" isRequired="true"/>
            <md:RequestedAttribute Name="age"/>
        </md:AttributeConsumingService>
        <md:AttributeConsumingService index="7">
            <md:ServiceName xml:lang="en">Directory</md:ServiceName>
            <md:RequestedAttribute Name="urn:oid:0.9.2342.19200300.100.1.3"
                                   NameFormat="urn:oasis:names:tc:SAML:2.0:attrname-format:uri"
                                   FriendlyName="mail" isRequired="true"/>
        </md:AttributeConsumingService>
    </md:SPSSODescriptor>
</md:EntityDescriptor>"#;

fn acs(index: u32) -> IndexedEndpoint {
    IndexedEndpoint::new(SamlBinding::HttpPost, format!("https://sp.example.com/acs/{index}"), index)
}

#[test]
fn indexed_endpoint_default_and_lookup() {
    let endpoints = IndexedEndpoints::new(vec![acs(3), acs(1)]);
    assert_eq!(endpoints.default().and_then(|e| e.index), Some(1));
    assert_eq!(endpoints.resolve(Some(3)).and_then(|e| e.index), Some(3));
    assert!(endpoints.resolve(Some(99)).is_none());

    let flagged = IndexedEndpoints::new(vec![acs(0), acs(1).with_default(true)]);
    assert_eq!(flagged.default().and_then(|e| e.index), Some(1));
}

#[test]
fn metadata_drives_acs_resolution() -> anyhow::Result<()> {
    let entity = EntityDescriptor::parse(SP_METADATA)?;
    let sp = entity
        .sp_sso
        .ok_or_else(|| anyhow::anyhow!("SP role missing"))?;
    assert!(sp.authn_requests_signed);
    assert!(sp.want_assertions_signed);

    let by_default = AuthnRequest::new("https://sp.example.com");
    assert_eq!(
        by_default.resolve_acs(&sp).map(IndexedEndpoint::location),
        Some("https://sp.example.com/acs/post")
    );

    let by_index = AuthnRequest::new("https://sp.example.com").with_acs_index(3);
    assert_eq!(
        by_index.resolve_acs(&sp).map(IndexedEndpoint::location),
        Some("https://sp.example.com/acs/redirect")
    );

    let by_url = AuthnRequest::new("https://sp.example.com")
        .with_acs_url("https://sp.example.com/acs/redirect")
        .with_binding(SamlBinding::HttpRedirect);
    assert_eq!(by_url.resolve_acs(&sp).and_then(|e| e.index), Some(3));

    let unregistered =
        AuthnRequest::new("https://sp.example.com").with_acs_url("https://attacker.example.com/");
    assert!(unregistered.resolve_acs(&sp).is_none());

    let response = Response::for_request(&by_url, "https://idp.example.com");
    assert_eq!(response.header.destination.as_deref(), Some("https://sp.example.com/acs/redirect"));
    Ok(())
}

#[test]
fn attribute_statement_from_requested_attributes() -> anyhow::Result<()> {
    let sp = EntityDescriptor::parse(SP_METADATA)?
        .sp_sso
        .ok_or_else(|| anyhow::anyhow!("SP role missing"))?;
    let service = AuthnRequest::new("https://sp.example.com")
        .resolve_attribute_consuming_service(&sp)
        .ok_or_else(|| anyhow::anyhow!("default attribute service"))?;

    let statement = service.create_statement([("name", "cody")])?;
    assert_eq!(statement.attributes.len(), 1);
    assert_eq!(statement.attributes[0].name, "name");

    assert!(matches!(
        service.create_statement(Vec::<(&str, &str)>::new()),
        Err(SamlError::RequiredAttributeMissing(requested)) if requested.name == "name"
    ));

    let statement = service.create_statement(vec![
        SuppliedAttribute::from(("name", "cody")),
        SuppliedAttribute::from(("height", 73)),
    ])?;
    let names: Vec<&str> = statement.attributes.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, ["name"]);
    Ok(())
}

#[test]
fn formatted_request_matches_formatless_supply() -> anyhow::Result<()> {
    let sp = EntityDescriptor::parse(SP_METADATA)?
        .sp_sso
        .ok_or_else(|| anyhow::anyhow!("SP role missing"))?;
    let service = AuthnRequest::new("https://sp.example.com")
        .with_attribute_consuming_service_index(7)
        .resolve_attribute_consuming_service(&sp)
        .ok_or_else(|| anyhow::anyhow!("attribute service 7"))?;

    let statement = service.create_statement(vec![
        SuppliedAttribute::deferred("urn:oid:0.9.2342.19200300.100.1.3", || {
            vec![AttributeValue::from("user@example.com")]
        }),
        SuppliedAttribute::deferred("unrequested", || -> Vec<AttributeValue> {
            panic!("unrequested attributes are never evaluated")
        }),
    ])?;

    let mail = &statement.attributes[0];
    assert_eq!(mail.friendly_name.as_deref(), Some("mail"));
    assert!(mail.name_format.is_some());
    assert_eq!(mail.values, [AttributeValue::from("user@example.com")]);
    Ok(())
}

#[test]
fn dispatch_rejects_unknown_and_unexpected_messages() -> anyhow::Result<()> {
    let unknown = r#"<samlp:ManageNameIDRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_x" Version="2.0" IssueInstant="2024-01-01T00:00:00Z"/>"#;
    assert!(matches!(
        AnyMessage::parse(unknown),
        Err(SamlError::UnknownMessage(name)) if name == "ManageNameIDRequest"
    ));

    let request = Message::new(AuthnRequest::new("https://sp.example.com")).to_xml()?;
    let err = Message::<Response>::parse(&request)
        .err()
        .ok_or_else(|| anyhow::anyhow!("AuthnRequest parsed as Response"))?;
    assert!(matches!(
        err,
        SamlError::UnexpectedMessage { expected: "Response", actual: "AuthnRequest" }
    ));
    assert_eq!(err.http_status(), 400);

    assert!(matches!(
        AnyMessage::parse("<samlp:Response"),
        Err(SamlError::CorruptMessage(_))
    ));
    Ok(())
}

#[test]
fn errors_become_protocol_status() {
    let status = Status::from_error(&SamlError::UnsupportedSignatureAlgorithm(
        "urn:example".to_string(),
    ));
    assert!(!status.is_success());

    let response = Response::error("https://idp.example.com", status);
    assert!(!response.is_success());
}

#[test]
fn assertion_conditions_window_and_audience() {
    let assertion = Assertion::new("https://idp.example.com")
        .with_conditions(Conditions::with_validity(5).with_audience("https://sp.example.com"));
    let now = Utc::now();

    assert!(assertion.validate(now, Some("https://sp.example.com")).is_ok());
    assert!(assertion.validate(now, None).is_ok());
    assert!(matches!(
        assertion.validate(now, Some("https://other.example.com")),
        Err(SamlError::InvalidAudience(_))
    ));
    assert!(matches!(
        assertion.validate(now + Duration::minutes(10), None),
        Err(SamlError::AssertionExpired)
    ));
}

#[test]
fn idp_metadata_keys_verify_redirects() -> anyhow::Result<()> {
    let idp = Party::rsa("idp.example.com")?;
    let xml = EntityDescriptor::new("https://idp.example.com")
        .with_idp(saml_protocol::metadata::IdpSsoDescriptor {
            single_sign_on_services: vec![saml_protocol::Endpoint::new(
                SamlBinding::HttpRedirect,
                "https://idp.example.com/sso",
            )],
            signing_certificates: vec![idp.certificate.clone()],
            want_authn_requests_signed: true,
            ..Default::default()
        })
        .to_xml()?;

    let metadata = EntityDescriptor::parse(&xml)?
        .idp_sso
        .ok_or_else(|| anyhow::anyhow!("IdP role missing"))?;
    let keys = metadata.verification_keys()?;

    let logout = Message::new(
        Response::success("https://idp.example.com").with_destination("https://sp.example.com/acs"),
    );
    let binding = HttpRedirectBinding::default();
    let url = binding.encode(&logout, None, Some(&idp.key))?;
    let decoded = binding.decode(&url, Some(TrustMaterial::Keys(&keys)))?;
    assert_eq!(decoded.verified_key_index, Some(0));
    Ok(())
}
