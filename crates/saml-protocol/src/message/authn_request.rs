//! SAML AuthnRequest.
//!
//! Authentication request message sent by a service provider to an identity provider.

use serde::{Deserialize, Serialize};

use super::{AnyMessage, Message, MessageHeader, ProtocolMessage};
use crate::error::SamlResult;
use crate::metadata::SpSsoDescriptor;
use crate::types::{
    AttributeConsumingService, AuthnContextClass, IndexedEndpoint, MessageKind, NameIdPolicy,
    SamlBinding, SAMLP_NS, SAML_NS,
};
use crate::xml::{parse_bool_attr, parse_u32_attr, XmlElement};

/// SAML Authentication Request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthnRequest {
    /// Identity, issue time, issuer and destination.
    #[serde(flatten)]
    pub header: MessageHeader,

    /// The URL where the response should be sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assertion_consumer_service_url: Option<String>,

    /// Index into the SP's assertion consumer service list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assertion_consumer_service_index: Option<u32>,

    /// Binding to use for the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_binding: Option<String>,

    /// Name ID policy constraints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_id_policy: Option<NameIdPolicy>,

    /// Requested authentication context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_authn_context: Option<RequestedAuthnContext>,

    /// Whether the IdP must authenticate the user directly.
    #[serde(default)]
    pub force_authn: bool,

    /// Whether the IdP must not interact with the user.
    #[serde(default)]
    pub is_passive: bool,

    /// Index into the SP's attribute consuming service list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_consuming_service_index: Option<u32>,

    /// A human-readable name for the requester.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
}

impl AuthnRequest {
    /// Creates a new authentication request.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            header: MessageHeader::new(issuer),
            assertion_consumer_service_url: None,
            assertion_consumer_service_index: None,
            protocol_binding: None,
            name_id_policy: None,
            requested_authn_context: None,
            force_authn: false,
            is_passive: false,
            attribute_consuming_service_index: None,
            provider_name: None,
        }
    }

    /// Sets the assertion consumer service URL.
    #[must_use]
    pub fn with_acs_url(mut self, url: impl Into<String>) -> Self {
        self.assertion_consumer_service_url = Some(url.into());
        self
    }

    /// Sets the assertion consumer service index.
    #[must_use]
    pub const fn with_acs_index(mut self, index: u32) -> Self {
        self.assertion_consumer_service_index = Some(index);
        self
    }

    /// Sets the attribute consuming service index.
    #[must_use]
    pub const fn with_attribute_consuming_service_index(mut self, index: u32) -> Self {
        self.attribute_consuming_service_index = Some(index);
        self
    }

    /// Sets the destination URL.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.header.destination = Some(url.into());
        self
    }

    /// Sets the protocol binding for the response.
    #[must_use]
    pub fn with_binding(mut self, binding: SamlBinding) -> Self {
        self.protocol_binding = Some(binding.uri().to_string());
        self
    }

    /// Sets the name ID policy.
    #[must_use]
    pub fn with_name_id_policy(mut self, policy: NameIdPolicy) -> Self {
        self.name_id_policy = Some(policy);
        self
    }

    /// Sets the requested authentication context.
    #[must_use]
    pub fn with_authn_context(mut self, context: RequestedAuthnContext) -> Self {
        self.requested_authn_context = Some(context);
        self
    }

    /// Sets force authentication.
    #[must_use]
    pub const fn force_authn(mut self, force: bool) -> Self {
        self.force_authn = force;
        self
    }

    /// Sets passive authentication.
    #[must_use]
    pub const fn is_passive(mut self, passive: bool) -> Self {
        self.is_passive = passive;
        self
    }

    /// Sets the provider name.
    #[must_use]
    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = Some(name.into());
        self
    }

    /// Returns the parsed protocol binding.
    #[must_use]
    pub fn parsed_binding(&self) -> Option<SamlBinding> {
        self.protocol_binding.as_deref().and_then(SamlBinding::from_uri)
    }

    /// Chooses the assertion consumer service to answer this request.
    ///
    /// An explicit URL must match a registered endpoint (and its binding,
    /// when one was requested). Otherwise the explicit index is used, and
    /// without one the SP's default endpoint.
    #[must_use]
    pub fn resolve_acs<'a>(&self, sp: &'a SpSsoDescriptor) -> Option<&'a IndexedEndpoint> {
        let services = &sp.assertion_consumer_services;

        if let Some(url) = &self.assertion_consumer_service_url {
            let binding = self.protocol_binding.as_deref();
            let found = services.iter().find(|acs| {
                acs.location() == url
                    && binding.map_or(true, |b| acs.endpoint.binding == b)
            });
            if found.is_none() {
                tracing::warn!(acs_url = %url, "AuthnRequest names an unregistered ACS URL");
            }
            return found;
        }

        services.resolve(self.assertion_consumer_service_index)
    }

    /// Chooses the attribute consuming service named by this request.
    #[must_use]
    pub fn resolve_attribute_consuming_service<'a>(
        &self,
        sp: &'a SpSsoDescriptor,
    ) -> Option<&'a AttributeConsumingService> {
        sp.attribute_consuming_services
            .resolve(self.attribute_consuming_service_index)
    }
}

impl ProtocolMessage for AuthnRequest {
    const ELEMENT: &'static str = "AuthnRequest";
    const KIND: MessageKind = MessageKind::Request;

    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn to_element(&self) -> XmlElement {
        self.header
            .start_element(Self::ELEMENT)
            .attr_opt("ForceAuthn", self.force_authn.then_some("true"))
            .attr_opt("IsPassive", self.is_passive.then_some("true"))
            .attr_opt("ProtocolBinding", self.protocol_binding.as_deref())
            .attr_opt(
                "AssertionConsumerServiceURL",
                self.assertion_consumer_service_url.as_deref(),
            )
            .attr_opt(
                "AssertionConsumerServiceIndex",
                self.assertion_consumer_service_index.map(|i| i.to_string()),
            )
            .attr_opt(
                "AttributeConsumingServiceIndex",
                self.attribute_consuming_service_index.map(|i| i.to_string()),
            )
            .attr_opt("ProviderName", self.provider_name.as_deref())
            .child_opt(self.name_id_policy.as_ref().map(NameIdPolicy::to_element))
            .child_opt(
                self.requested_authn_context
                    .as_ref()
                    .map(RequestedAuthnContext::to_element),
            )
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            header: MessageHeader::from_element(element)?,
            assertion_consumer_service_url: element
                .attribute("AssertionConsumerServiceURL")
                .map(str::to_string),
            assertion_consumer_service_index: parse_u32_attr(element, "AssertionConsumerServiceIndex")?,
            protocol_binding: element.attribute("ProtocolBinding").map(str::to_string),
            name_id_policy: element
                .child_element(SAMLP_NS, "NameIDPolicy")
                .map(NameIdPolicy::from_element)
                .transpose()?,
            requested_authn_context: element
                .child_element(SAMLP_NS, "RequestedAuthnContext")
                .map(RequestedAuthnContext::from_element),
            force_authn: parse_bool_attr(element, "ForceAuthn")?.unwrap_or(false),
            is_passive: parse_bool_attr(element, "IsPassive")?.unwrap_or(false),
            attribute_consuming_service_index: parse_u32_attr(
                element,
                "AttributeConsumingServiceIndex",
            )?,
            provider_name: element.attribute("ProviderName").map(str::to_string),
        })
    }

    fn wrap(message: Message<Self>) -> AnyMessage {
        AnyMessage::AuthnRequest(message)
    }

    fn unwrap(message: AnyMessage) -> Result<Message<Self>, AnyMessage> {
        match message {
            AnyMessage::AuthnRequest(m) => Ok(m),
            other => Err(other),
        }
    }
}

/// Requested authentication context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedAuthnContext {
    /// Comparison method for the authentication context.
    #[serde(default)]
    pub comparison: AuthnContextComparison,

    /// List of acceptable authentication context class references.
    #[serde(default)]
    pub authn_context_class_refs: Vec<String>,
}

impl RequestedAuthnContext {
    /// Creates a context requiring exact match of a class reference.
    #[must_use]
    pub fn exact(class: AuthnContextClass) -> Self {
        Self {
            comparison: AuthnContextComparison::Exact,
            authn_context_class_refs: vec![class.uri().to_string()],
        }
    }

    /// Adds a class reference.
    #[must_use]
    pub fn with_class_ref(mut self, class: AuthnContextClass) -> Self {
        self.authn_context_class_refs.push(class.uri().to_string());
        self
    }

    /// Sets the comparison method.
    #[must_use]
    pub const fn with_comparison(mut self, comparison: AuthnContextComparison) -> Self {
        self.comparison = comparison;
        self
    }

    fn to_element(&self) -> XmlElement {
        self.authn_context_class_refs.iter().fold(
            XmlElement::new(SAMLP_NS, "samlp", "RequestedAuthnContext")
                .attr("Comparison", self.comparison.as_str()),
            |element, class_ref| {
                element.child(
                    XmlElement::new(SAML_NS, "saml", "AuthnContextClassRef").text(class_ref.as_str()),
                )
            },
        )
    }

    fn from_element(element: &XmlElement) -> Self {
        Self {
            comparison: element
                .attribute("Comparison")
                .and_then(AuthnContextComparison::parse)
                .unwrap_or_default(),
            authn_context_class_refs: element
                .children_named(SAML_NS, "AuthnContextClassRef")
                .map(|e| e.text_content().trim().to_string())
                .collect(),
        }
    }
}

/// Authentication context comparison methods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthnContextComparison {
    /// Exact match required.
    #[default]
    Exact,
    /// Match must be at least as strong.
    Minimum,
    /// Match must be at most as strong.
    Maximum,
    /// Match must be stronger.
    Better,
}

impl AuthnContextComparison {
    /// Returns the string value for this comparison.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Minimum => "minimum",
            Self::Maximum => "maximum",
            Self::Better => "better",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "exact" => Some(Self::Exact),
            "minimum" => Some(Self::Minimum),
            "maximum" => Some(Self::Maximum),
            "better" => Some(Self::Better),
            _ => None,
        }
    }
}
