//! SAML 2.0 metadata model.
//!
//! Only the parts of `<md:EntityDescriptor>` that drive protocol decisions
//! are modelled: endpoints, signing keys, attribute consuming services and
//! the signing flags. Organization and contact details are skipped.

use crate::error::{SamlError, SamlResult};
use crate::signature::{Certificate, VerificationKey};
use crate::types::{
    AttributeConsumingService, Endpoint, IndexedEndpoint, IndexedEndpoints, SamlBinding, MD_NS,
    SAMLP_NS, XMLDSIG_NS,
};
use crate::xml::{parse_bool_attr, XmlDocument, XmlElement};

/// A parsed `<md:EntityDescriptor>`.
#[derive(Debug, Clone, Default)]
pub struct EntityDescriptor {
    /// The `entityID` attribute.
    pub entity_id: String,

    /// SAML 2.0 service provider role, if declared.
    pub sp_sso: Option<SpSsoDescriptor>,

    /// SAML 2.0 identity provider role, if declared.
    pub idp_sso: Option<IdpSsoDescriptor>,
}

impl EntityDescriptor {
    /// Creates an entity with no roles.
    #[must_use]
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            ..Self::default()
        }
    }

    /// Sets the service provider role.
    #[must_use]
    pub fn with_sp(mut self, sp: SpSsoDescriptor) -> Self {
        self.sp_sso = Some(sp);
        self
    }

    /// Sets the identity provider role.
    #[must_use]
    pub fn with_idp(mut self, idp: IdpSsoDescriptor) -> Self {
        self.idp_sso = Some(idp);
        self
    }

    /// Parses a metadata document whose root is `<md:EntityDescriptor>`.
    ///
    /// Role descriptors that do not list the SAML 2.0 protocol in
    /// `protocolSupportEnumeration` are ignored.
    pub fn parse(xml: &str) -> SamlResult<Self> {
        Self::from_element(&XmlDocument::parse(xml)?)
    }

    /// Reads an `<md:EntityDescriptor>` element.
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        if !element.is(MD_NS, "EntityDescriptor") {
            return Err(SamlError::MissingElement("<md:EntityDescriptor>".to_string()));
        }

        let sp_sso = element
            .children_named(MD_NS, "SPSSODescriptor")
            .find(|e| supports_saml2(e))
            .map(SpSsoDescriptor::from_element)
            .transpose()?;
        let idp_sso = element
            .children_named(MD_NS, "IDPSSODescriptor")
            .find(|e| supports_saml2(e))
            .map(IdpSsoDescriptor::from_element)
            .transpose()?;

        let entity_id = element.required_attribute("entityID")?.to_string();
        tracing::debug!(
            entity_id = %entity_id,
            sp = sp_sso.is_some(),
            idp = idp_sso.is_some(),
            "Parsed entity metadata"
        );

        Ok(Self {
            entity_id,
            sp_sso,
            idp_sso,
        })
    }

    /// Builds the `<md:EntityDescriptor>` element.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        XmlElement::new(MD_NS, "md", "EntityDescriptor")
            .declare("md", MD_NS)
            .attr("entityID", self.entity_id.as_str())
            .child_opt(self.sp_sso.as_ref().map(SpSsoDescriptor::to_element))
            .child_opt(self.idp_sso.as_ref().map(IdpSsoDescriptor::to_element))
    }

    /// Serializes the metadata document.
    pub fn to_xml(&self) -> SamlResult<String> {
        self.to_element().to_xml()
    }
}

/// Service provider SSO role.
#[derive(Debug, Clone, Default)]
pub struct SpSsoDescriptor {
    /// Assertion consumer services.
    pub assertion_consumer_services: IndexedEndpoints<IndexedEndpoint>,

    /// Single logout services.
    pub single_logout_services: Vec<Endpoint>,

    /// Attribute consuming services.
    pub attribute_consuming_services: IndexedEndpoints<AttributeConsumingService>,

    /// Certificates from signing key descriptors.
    pub signing_certificates: Vec<Certificate>,

    /// Whether the SP signs its authentication requests.
    pub authn_requests_signed: bool,

    /// Whether the SP wants assertions signed.
    pub want_assertions_signed: bool,

    /// Supported NameID formats.
    pub name_id_formats: Vec<String>,
}

impl SpSsoDescriptor {
    /// Returns the first single logout service for `binding`.
    #[must_use]
    pub fn single_logout_service(&self, binding: SamlBinding) -> Option<&Endpoint> {
        endpoint_for(&self.single_logout_services, binding)
    }

    /// Returns the first assertion consumer service for `binding`, in
    /// index order.
    #[must_use]
    pub fn assertion_consumer_service(&self, binding: SamlBinding) -> Option<&IndexedEndpoint> {
        self.assertion_consumer_services
            .iter()
            .find(|acs| acs.endpoint.binding == binding.uri())
    }

    /// Builds verification keys from the signing certificates.
    pub fn verification_keys(&self) -> SamlResult<Vec<VerificationKey>> {
        verification_keys(&self.signing_certificates)
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            assertion_consumer_services: element
                .children_named(MD_NS, "AssertionConsumerService")
                .map(IndexedEndpoint::from_element)
                .collect::<SamlResult<Vec<_>>>()?
                .into_iter()
                .collect(),
            single_logout_services: endpoints(element, "SingleLogoutService")?,
            attribute_consuming_services: element
                .children_named(MD_NS, "AttributeConsumingService")
                .map(AttributeConsumingService::from_element)
                .collect::<SamlResult<Vec<_>>>()?
                .into_iter()
                .collect(),
            signing_certificates: signing_certificates(element)?,
            authn_requests_signed: parse_bool_attr(element, "AuthnRequestsSigned")?
                .unwrap_or(false),
            want_assertions_signed: parse_bool_attr(element, "WantAssertionsSigned")?
                .unwrap_or(false),
            name_id_formats: name_id_formats(element),
        })
    }

    fn to_element(&self) -> XmlElement {
        let element = role_element("SPSSODescriptor", &self.signing_certificates)
            .attr("AuthnRequestsSigned", self.authn_requests_signed.to_string())
            .attr("WantAssertionsSigned", self.want_assertions_signed.to_string());
        let element = self
            .single_logout_services
            .iter()
            .fold(element, |e, slo| e.child(slo.to_element("SingleLogoutService")));
        let element = with_name_id_formats(element, &self.name_id_formats);
        let element = self
            .assertion_consumer_services
            .iter()
            .fold(element, |e, acs| e.child(acs.to_element("AssertionConsumerService")));
        self.attribute_consuming_services
            .iter()
            .fold(element, |e, service| e.child(service.to_element()))
    }
}

/// Identity provider SSO role.
#[derive(Debug, Clone, Default)]
pub struct IdpSsoDescriptor {
    /// Single sign-on services.
    pub single_sign_on_services: Vec<Endpoint>,

    /// Single logout services.
    pub single_logout_services: Vec<Endpoint>,

    /// Certificates from signing key descriptors.
    pub signing_certificates: Vec<Certificate>,

    /// Whether the IdP requires signed authentication requests.
    pub want_authn_requests_signed: bool,

    /// Supported NameID formats.
    pub name_id_formats: Vec<String>,
}

impl IdpSsoDescriptor {
    /// Returns the first single sign-on service for `binding`.
    #[must_use]
    pub fn single_sign_on_service(&self, binding: SamlBinding) -> Option<&Endpoint> {
        endpoint_for(&self.single_sign_on_services, binding)
    }

    /// Returns the first single logout service for `binding`.
    #[must_use]
    pub fn single_logout_service(&self, binding: SamlBinding) -> Option<&Endpoint> {
        endpoint_for(&self.single_logout_services, binding)
    }

    /// Builds verification keys from the signing certificates.
    pub fn verification_keys(&self) -> SamlResult<Vec<VerificationKey>> {
        verification_keys(&self.signing_certificates)
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            single_sign_on_services: endpoints(element, "SingleSignOnService")?,
            single_logout_services: endpoints(element, "SingleLogoutService")?,
            signing_certificates: signing_certificates(element)?,
            want_authn_requests_signed: parse_bool_attr(element, "WantAuthnRequestsSigned")?
                .unwrap_or(false),
            name_id_formats: name_id_formats(element),
        })
    }

    fn to_element(&self) -> XmlElement {
        let element = role_element("IDPSSODescriptor", &self.signing_certificates).attr(
            "WantAuthnRequestsSigned",
            self.want_authn_requests_signed.to_string(),
        );
        let element = self
            .single_logout_services
            .iter()
            .fold(element, |e, slo| e.child(slo.to_element("SingleLogoutService")));
        let element = with_name_id_formats(element, &self.name_id_formats);
        self.single_sign_on_services
            .iter()
            .fold(element, |e, sso| e.child(sso.to_element("SingleSignOnService")))
    }
}

/// Returns the first endpoint declared for `binding`.
#[must_use]
pub fn endpoint_for(endpoints: &[Endpoint], binding: SamlBinding) -> Option<&Endpoint> {
    endpoints.iter().find(|e| e.binding == binding.uri())
}

fn verification_keys(certificates: &[Certificate]) -> SamlResult<Vec<VerificationKey>> {
    certificates
        .iter()
        .cloned()
        .map(VerificationKey::from_certificate)
        .collect()
}

fn supports_saml2(element: &XmlElement) -> bool {
    element
        .attribute("protocolSupportEnumeration")
        .is_some_and(|protocols| protocols.split_whitespace().any(|p| p == SAMLP_NS))
}

fn endpoints(element: &XmlElement, name: &str) -> SamlResult<Vec<Endpoint>> {
    element
        .children_named(MD_NS, name)
        .map(Endpoint::from_element)
        .collect()
}

fn name_id_formats(element: &XmlElement) -> Vec<String> {
    element
        .children_named(MD_NS, "NameIDFormat")
        .map(|e| e.text_content().trim().to_string())
        .collect()
}

/// Certificates of key descriptors usable for signing. A descriptor
/// without `use` applies to both signing and encryption.
fn signing_certificates(element: &XmlElement) -> SamlResult<Vec<Certificate>> {
    element
        .children_named(MD_NS, "KeyDescriptor")
        .filter(|kd| kd.attribute("use").map_or(true, |u| u == "signing"))
        .filter_map(|kd| kd.child_element(XMLDSIG_NS, "KeyInfo"))
        .flat_map(|info| info.children_named(XMLDSIG_NS, "X509Data"))
        .flat_map(|data| data.children_named(XMLDSIG_NS, "X509Certificate"))
        .map(|cert| Certificate::from_base64(&cert.text_content()))
        .collect()
}

fn role_element(name: &str, certificates: &[Certificate]) -> XmlElement {
    let element = XmlElement::new(MD_NS, "md", name).attr("protocolSupportEnumeration", SAMLP_NS);
    certificates.iter().fold(element, |element, cert| {
        element.child(
            XmlElement::new(MD_NS, "md", "KeyDescriptor")
                .attr("use", "signing")
                .child(
                    XmlElement::new(XMLDSIG_NS, "ds", "KeyInfo")
                        .declare("ds", XMLDSIG_NS)
                        .child(XmlElement::new(XMLDSIG_NS, "ds", "X509Data").child(
                            XmlElement::new(XMLDSIG_NS, "ds", "X509Certificate")
                                .text(cert.to_base64()),
                        )),
                ),
        )
    })
}

fn with_name_id_formats(element: XmlElement, formats: &[String]) -> XmlElement {
    formats.iter().fold(element, |element, format| {
        element.child(XmlElement::new(MD_NS, "md", "NameIDFormat").text(format.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::fixtures;
    use crate::types::{NameIdFormat, RequestedAttribute};

    fn idp_xml(cert: &Certificate) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="https://idp.example.com">
    <md:IDPSSODescriptor WantAuthnRequestsSigned="true" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
        <md:KeyDescriptor use="signing">
            <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
                <ds:X509Data>
                    <ds:X509Certificate>
{}
                    </ds:X509Certificate>
                </ds:X509Data>
            </ds:KeyInfo>
        </md:KeyDescriptor>
        <md:KeyDescriptor use="encryption">
            <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
                <ds:X509Data>
                    <ds:X509Certificate>{}</ds:X509Certificate>
                </ds:X509Data>
            </ds:KeyInfo>
        </md:KeyDescriptor>
        <md:NameIDFormat>urn:oasis:names:tc:SAML:2.0:nameid-format:persistent</md:NameIDFormat>
        <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="https://idp.example.com/sso/post"/>
        <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="https://idp.example.com/sso/redirect"/>
        <md:SingleLogoutService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="https://idp.example.com/slo"/>
    </md:IDPSSODescriptor>
</md:EntityDescriptor>"#,
            cert.to_base64(),
            cert.to_base64()
        )
    }

    #[test]
    fn parses_idp_metadata() {
        let (_, cert) = fixtures::rsa("idp");
        let entity = EntityDescriptor::parse(&idp_xml(&cert)).unwrap();

        assert_eq!(entity.entity_id, "https://idp.example.com");
        assert!(entity.sp_sso.is_none());

        let idp = entity.idp_sso.unwrap();
        assert!(idp.want_authn_requests_signed);
        assert_eq!(idp.signing_certificates, vec![cert]);
        assert_eq!(idp.verification_keys().unwrap().len(), 1);
        assert_eq!(
            idp.single_sign_on_service(SamlBinding::HttpRedirect)
                .map(|e| e.location.as_str()),
            Some("https://idp.example.com/sso/redirect")
        );
        assert!(idp.single_logout_service(SamlBinding::HttpPost).is_none());
        assert_eq!(idp.name_id_formats, [NameIdFormat::Persistent.uri()]);
    }

    #[test]
    fn ignores_roles_without_saml2_support() {
        let xml = r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="https://sp.example.com">
    <md:SPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:1.1:protocol">
        <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:1.0:profiles:browser-post" Location="https://sp.example.com/acs" index="0"/>
    </md:SPSSODescriptor>
</md:EntityDescriptor>"#;
        let entity = EntityDescriptor::parse(xml).unwrap();
        assert!(entity.sp_sso.is_none());
    }

    #[test]
    fn rejects_other_roots() {
        let xml = r#"<md:EntitiesDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata"/>"#;
        assert!(matches!(
            EntityDescriptor::parse(xml),
            Err(SamlError::MissingElement(_))
        ));
    }

    #[test]
    fn sp_metadata_round_trip() {
        let (_, cert) = fixtures::rsa("sp");
        let sp = SpSsoDescriptor {
            assertion_consumer_services: IndexedEndpoints::new(vec![
                IndexedEndpoint::new(SamlBinding::HttpPost, "https://sp.example.com/acs/post", 2),
                IndexedEndpoint::new(SamlBinding::HttpRedirect, "https://sp.example.com/acs/redirect", 1)
                    .with_default(true),
            ]),
            single_logout_services: vec![Endpoint::new(
                SamlBinding::HttpRedirect,
                "https://sp.example.com/slo",
            )],
            attribute_consuming_services: IndexedEndpoints::new(vec![
                AttributeConsumingService::new(0, vec![RequestedAttribute::required("mail")]),
            ]),
            signing_certificates: vec![cert.clone()],
            authn_requests_signed: true,
            want_assertions_signed: true,
            name_id_formats: vec![NameIdFormat::Email.uri().to_string()],
        };
        let xml = EntityDescriptor::new("https://sp.example.com")
            .with_sp(sp)
            .to_xml()
            .unwrap();

        let parsed = EntityDescriptor::parse(&xml).unwrap().sp_sso.unwrap();
        assert!(parsed.authn_requests_signed);
        assert!(parsed.want_assertions_signed);
        assert_eq!(parsed.signing_certificates, vec![cert]);
        assert_eq!(
            parsed.assertion_consumer_services.default().and_then(|e| e.index),
            Some(1)
        );
        assert_eq!(
            parsed
                .assertion_consumer_service(SamlBinding::HttpPost)
                .map(IndexedEndpoint::location),
            Some("https://sp.example.com/acs/post")
        );
        assert_eq!(
            parsed
                .single_logout_service(SamlBinding::HttpRedirect)
                .map(Endpoint::response_url),
            Some("https://sp.example.com/slo")
        );
        assert_eq!(
            parsed
                .attribute_consuming_services
                .resolve(None)
                .map(|s| s.requested_attributes.len()),
            Some(1)
        );
    }
}
