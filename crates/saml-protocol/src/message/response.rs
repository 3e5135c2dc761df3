//! SAML Response.
//!
//! Response messages sent by an identity provider to a service provider.

use serde::{Deserialize, Serialize};

use super::{AnyMessage, AuthnRequest, Message, MessageHeader, ProtocolMessage, StatusResponse};
use crate::error::SamlResult;
use crate::signature::{Certificate, Signable, SignedElement, XmlSignatureValidator};
use crate::types::{Assertion, MessageKind, Status, SAML_NS};
use crate::xml::{parse_instant, XmlElement};

/// SAML Response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Identity, issue time, issuer and destination.
    #[serde(flatten)]
    pub header: MessageHeader,

    /// Request correlation and status.
    #[serde(flatten)]
    pub status_response: StatusResponse,

    /// The assertions in this response.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<Assertion>,
}

impl Response {
    /// Creates a new success response.
    #[must_use]
    pub fn success(issuer: impl Into<String>) -> Self {
        Self::error(issuer, Status::success())
    }

    /// Creates a response carrying `status`.
    #[must_use]
    pub fn error(issuer: impl Into<String>, status: Status) -> Self {
        Self {
            header: MessageHeader::new(issuer),
            status_response: StatusResponse::new(status),
            assertions: Vec::new(),
        }
    }

    /// Creates a success response answering `request`.
    ///
    /// The destination is the request's assertion consumer service URL.
    #[must_use]
    pub fn for_request(request: &AuthnRequest, issuer: impl Into<String>) -> Self {
        let mut response = Self::success(issuer).in_response_to(request.header.id.as_str());
        response.header.destination = request.assertion_consumer_service_url.clone();
        response
    }

    /// Sets the request ID this response is for.
    #[must_use]
    pub fn in_response_to(mut self, request_id: impl Into<String>) -> Self {
        self.status_response.in_response_to = Some(request_id.into());
        self
    }

    /// Sets the destination URL.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.header.destination = Some(url.into());
        self
    }

    /// Adds an assertion to this response.
    #[must_use]
    pub fn with_assertion(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    /// Returns true if this response indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_response.is_success()
    }

    /// Gets the first assertion if present.
    #[must_use]
    pub fn first_assertion(&self) -> Option<&Assertion> {
        self.assertions.first()
    }
}

impl ProtocolMessage for Response {
    const ELEMENT: &'static str = "Response";
    const KIND: MessageKind = MessageKind::Response;

    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn to_element(&self) -> XmlElement {
        let element = self
            .status_response
            .write(self.header.start_element(Self::ELEMENT));
        self.assertions
            .iter()
            .fold(element, |element, assertion| element.child(assertion.to_element()))
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            header: MessageHeader::from_element(element)?,
            status_response: StatusResponse::from_element(element)?,
            assertions: element
                .children_named(SAML_NS, "Assertion")
                .map(Assertion::from_element)
                .collect::<SamlResult<_>>()?,
        })
    }

    fn wrap(message: Message<Self>) -> AnyMessage {
        AnyMessage::Response(message)
    }

    fn unwrap(message: AnyMessage) -> Result<Message<Self>, AnyMessage> {
        match message {
            AnyMessage::Response(m) => Ok(m),
            other => Err(other),
        }
    }
}

impl Message<Response> {
    /// Views each `<saml:Assertion>` of the built or parsed document as a
    /// signed element, checked as of the assertion's own issue instant.
    #[must_use]
    pub fn assertion_signatures(&self) -> Vec<SignedElement<'_>> {
        let Some(root) = self.document() else {
            return Vec::new();
        };
        root.children_named(SAML_NS, "Assertion")
            .map(|assertion| {
                let view = SignedElement::new(root, assertion);
                match assertion.attribute("IssueInstant").map(parse_instant) {
                    Some(Ok(at)) => view.at(at),
                    _ => view,
                }
            })
            .collect()
    }

    /// Validates the signature of every assertion with the default trust policy.
    ///
    /// Reasons are prefixed with the assertion ID. An empty list means
    /// every assertion carries a valid signature.
    #[must_use]
    pub fn validate_assertion_signatures(
        &self,
        fingerprints: &[&str],
        certificates: &[Certificate],
    ) -> Vec<String> {
        self.validate_assertion_signatures_with(
            &XmlSignatureValidator::default(),
            fingerprints,
            certificates,
        )
    }

    /// Validates the signature of every assertion under `validator`'s trust policy.
    #[must_use]
    pub fn validate_assertion_signatures_with(
        &self,
        validator: &XmlSignatureValidator,
        fingerprints: &[&str],
        certificates: &[Certificate],
    ) -> Vec<String> {
        self.assertion_signatures()
            .iter()
            .flat_map(|view| {
                let id = view.target().attribute("ID").unwrap_or_default().to_string();
                view.validate_signature_with(validator, fingerprints, certificates)
                    .into_iter()
                    .map(move |reason| format!("assertion {id}: {reason}"))
            })
            .collect()
    }
}
