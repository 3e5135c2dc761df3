//! Dispatch from a parsed document to the message variant it holds.

use std::collections::HashMap;
use std::sync::LazyLock;

use super::{AuthnRequest, LogoutRequest, LogoutResponse, Message, MessageHeader, ProtocolMessage, Response};
use crate::error::{SamlError, SamlResult};
use crate::signature::Signable;
use crate::types::{MessageKind, SAMLP_NS};
use crate::xml::{XmlDocument, XmlElement};

type Constructor = fn(XmlElement) -> SamlResult<AnyMessage>;

/// Root element local name to variant constructor, for the closed set of
/// protocol messages.
static REGISTRY: LazyLock<HashMap<&'static str, Constructor>> = LazyLock::new(|| {
    let mut registry = HashMap::new();
    register::<AuthnRequest>(&mut registry);
    register::<Response>(&mut registry);
    register::<LogoutRequest>(&mut registry);
    register::<LogoutResponse>(&mut registry);
    registry
});

fn register<T: ProtocolMessage>(registry: &mut HashMap<&'static str, Constructor>) {
    registry.insert(T::ELEMENT, construct::<T>);
}

fn construct<T: ProtocolMessage>(document: XmlElement) -> SamlResult<AnyMessage> {
    Message::<T>::from_document(document).map(T::wrap)
}

/// Any protocol message.
#[derive(Debug)]
pub enum AnyMessage {
    /// `<samlp:AuthnRequest>`.
    AuthnRequest(Message<AuthnRequest>),
    /// `<samlp:Response>`.
    Response(Message<Response>),
    /// `<samlp:LogoutRequest>`.
    LogoutRequest(Message<LogoutRequest>),
    /// `<samlp:LogoutResponse>`.
    LogoutResponse(Message<LogoutResponse>),
}

impl AnyMessage {
    /// Parses a message, choosing the variant by root element name.
    ///
    /// Malformed XML fails with `CorruptMessage`; a root element that is
    /// not a known protocol message fails with `UnknownMessage`.
    pub fn parse(xml: &str) -> SamlResult<Self> {
        Self::from_document(XmlDocument::parse(xml)?)
    }

    /// Dispatches an already-parsed document.
    pub fn from_document(document: XmlElement) -> SamlResult<Self> {
        let constructor = (document.namespace.as_deref() == Some(SAMLP_NS))
            .then(|| REGISTRY.get(document.name.as_str()))
            .flatten()
            .copied()
            .ok_or_else(|| {
                tracing::debug!(
                    element = %document.name,
                    namespace = ?document.namespace,
                    "Unknown message root element"
                );
                SamlError::UnknownMessage(document.name.clone())
            })?;
        constructor(document)
    }

    /// Returns the root element name of the variant.
    #[must_use]
    pub const fn element_name(&self) -> &'static str {
        match self {
            Self::AuthnRequest(_) => AuthnRequest::ELEMENT,
            Self::Response(_) => Response::ELEMENT,
            Self::LogoutRequest(_) => LogoutRequest::ELEMENT,
            Self::LogoutResponse(_) => LogoutResponse::ELEMENT,
        }
    }

    /// Returns whether this is a request or a response.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::AuthnRequest(_) => AuthnRequest::KIND,
            Self::Response(_) => Response::KIND,
            Self::LogoutRequest(_) => LogoutRequest::KIND,
            Self::LogoutResponse(_) => LogoutResponse::KIND,
        }
    }

    /// Returns the shared header.
    #[must_use]
    pub fn header(&self) -> &MessageHeader {
        match self {
            Self::AuthnRequest(m) => m.header(),
            Self::Response(m) => m.header(),
            Self::LogoutRequest(m) => m.header(),
            Self::LogoutResponse(m) => m.header(),
        }
    }

    /// Returns the destination URL, if any.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.header().destination.as_deref()
    }

    /// Serializes the message document.
    pub fn to_xml(&self) -> SamlResult<String> {
        match self {
            Self::AuthnRequest(m) => m.to_xml(),
            Self::Response(m) => m.to_xml(),
            Self::LogoutRequest(m) => m.to_xml(),
            Self::LogoutResponse(m) => m.to_xml(),
        }
    }

    /// Returns the message as a signable document.
    #[must_use]
    pub fn as_signable(&self) -> &dyn Signable {
        match self {
            Self::AuthnRequest(m) => m,
            Self::Response(m) => m,
            Self::LogoutRequest(m) => m,
            Self::LogoutResponse(m) => m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NameId;

    #[test]
    fn dispatches_by_root_element() {
        let xml = Message::new(LogoutRequest::new("https://sp.example.com", NameId::transient()))
            .to_xml()
            .unwrap();
        let message = AnyMessage::parse(&xml).unwrap();
        assert_eq!(message.element_name(), "LogoutRequest");
        assert_eq!(message.kind(), MessageKind::Request);
        assert_eq!(message.header().issuer, "https://sp.example.com");
    }

    #[test]
    fn unknown_root_element() {
        let xml = r#"<samlp:ArtifactResolve xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_a" Version="2.0" IssueInstant="2024-01-01T00:00:00Z"/>"#;
        assert!(matches!(
            AnyMessage::parse(xml),
            Err(SamlError::UnknownMessage(name)) if name == "ArtifactResolve"
        ));
    }

    #[test]
    fn known_name_in_wrong_namespace_is_unknown() {
        let xml = r#"<AuthnRequest xmlns="urn:example" ID="_a"/>"#;
        assert!(matches!(
            AnyMessage::parse(xml),
            Err(SamlError::UnknownMessage(_))
        ));
    }

    #[test]
    fn unexpected_variant() {
        let xml = Message::new(AuthnRequest::new("https://sp.example.com"))
            .to_xml()
            .unwrap();
        assert!(matches!(
            Message::<Response>::parse(&xml),
            Err(SamlError::UnexpectedMessage {
                expected: "Response",
                actual: "AuthnRequest"
            })
        ));
    }

    #[test]
    fn malformed_xml_is_corrupt() {
        assert!(matches!(
            AnyMessage::parse("<samlp:AuthnRequest"),
            Err(SamlError::CorruptMessage(_))
        ));
    }
}
