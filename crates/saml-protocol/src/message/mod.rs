//! SAML protocol messages.
//!
//! The four message variants, the [`Message`] lifecycle wrapper that owns
//! a message's XML document, and dispatch from a parsed document to the
//! right variant.
//!
//! An outbound message starts [`MessageState::Unbuilt`] and may be freely
//! edited. Building serializes it once and caches the document; signing
//! attaches a signature to that cached document, after which the message
//! is frozen. A parsed message keeps the document it was read from.

mod authn_request;
mod dispatch;
mod header;
mod logout;
mod response;

pub use authn_request::*;
pub use dispatch::AnyMessage;
pub use header::*;
pub use logout::*;
pub use response::*;

use std::cell::OnceCell;

use chrono::{DateTime, Utc};

use crate::error::{SamlError, SamlResult};
use crate::signature::{
    locate_signature, Certificate, DigestAlgorithm, Signable, SigningKey, XmlSigner,
};
use crate::types::{MessageKind, SAML_NS};
use crate::xml::{XmlElement, XmlNode};

/// A concrete protocol message variant.
pub trait ProtocolMessage: Sized {
    /// Local name of the root element.
    const ELEMENT: &'static str;

    /// Whether this travels as `SAMLRequest` or `SAMLResponse`.
    const KIND: MessageKind;

    /// Returns the shared header.
    fn header(&self) -> &MessageHeader;

    /// Returns the shared header for editing.
    fn header_mut(&mut self) -> &mut MessageHeader;

    /// Builds the message's root element.
    fn to_element(&self) -> XmlElement;

    /// Reads the message from its root element.
    fn from_element(element: &XmlElement) -> SamlResult<Self>;

    /// Wraps a message into the closed variant set.
    fn wrap(message: Message<Self>) -> AnyMessage;

    /// Unwraps a message of this variant, handing others back.
    fn unwrap(message: AnyMessage) -> Result<Message<Self>, AnyMessage>;
}

/// Where a message is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// Constructed outbound; the body may be edited.
    Unbuilt,
    /// Serialized once; the document is cached.
    Built,
    /// A signature is attached; the document is never rebuilt.
    Signed,
    /// Read from the wire.
    Parsed,
}

/// A protocol message together with its XML document.
#[derive(Debug)]
pub struct Message<T> {
    body: T,
    document: OnceCell<XmlElement>,
    parsed: bool,
    signed: bool,
    assertions_signed: bool,
    signature_index: OnceCell<Option<usize>>,
}

impl<T: ProtocolMessage> Message<T> {
    /// Wraps an outbound message body.
    #[must_use]
    pub fn new(body: T) -> Self {
        Self {
            body,
            document: OnceCell::new(),
            parsed: false,
            signed: false,
            assertions_signed: false,
            signature_index: OnceCell::new(),
        }
    }

    /// Parses a message of this variant.
    ///
    /// Any other known variant fails with `UnexpectedMessage`.
    pub fn parse(xml: &str) -> SamlResult<Self> {
        AnyMessage::parse(xml)?.expect::<T>()
    }

    /// Reads a message from an already-parsed document.
    pub(crate) fn from_document(document: XmlElement) -> SamlResult<Self> {
        let body = T::from_element(&document)?;
        Ok(Self {
            body,
            document: OnceCell::from(document),
            parsed: true,
            signed: false,
            assertions_signed: false,
            signature_index: OnceCell::new(),
        })
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> MessageState {
        if self.parsed {
            MessageState::Parsed
        } else if self.signed {
            MessageState::Signed
        } else if self.document.get().is_some() {
            MessageState::Built
        } else {
            MessageState::Unbuilt
        }
    }

    /// Returns the message body.
    #[must_use]
    pub fn body(&self) -> &T {
        &self.body
    }

    /// Returns the body for editing, discarding any built document.
    ///
    /// Signed and parsed messages are immutable.
    pub fn body_mut(&mut self) -> SamlResult<&mut T> {
        match self.state() {
            MessageState::Signed | MessageState::Parsed => Err(SamlError::InvalidState(format!(
                "cannot modify a {:?} {}",
                self.state(),
                T::ELEMENT
            ))),
            _ if self.assertions_signed => Err(SamlError::InvalidState(format!(
                "cannot modify a {} with signed assertions",
                T::ELEMENT
            ))),
            _ => {
                self.document.take();
                self.signature_index.take();
                Ok(&mut self.body)
            }
        }
    }

    /// Consumes the wrapper, returning the body.
    #[must_use]
    pub fn into_body(self) -> T {
        self.body
    }

    /// Returns the shared header.
    #[must_use]
    pub fn header(&self) -> &MessageHeader {
        self.body.header()
    }

    /// Returns the message ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.header().id
    }

    /// Returns the issuer entity ID.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.header().issuer
    }

    /// Returns the destination URL, if any.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.header().destination.as_deref()
    }

    /// Returns the issue instant.
    #[must_use]
    pub fn issue_instant(&self) -> DateTime<Utc> {
        self.header().issue_instant
    }

    /// Returns the document, building it on first use.
    ///
    /// The document is built at most once; a signed or parsed document is
    /// always returned as is.
    pub fn build(&self) -> &XmlElement {
        self.document.get_or_init(|| self.body.to_element())
    }

    /// Returns the document if it has been built or parsed.
    #[must_use]
    pub fn document(&self) -> Option<&XmlElement> {
        self.document.get()
    }

    /// Serializes the document.
    pub fn to_xml(&self) -> SamlResult<String> {
        self.build().to_xml()
    }

    /// Signs the message with an enveloped signature.
    ///
    /// The signature is placed immediately after `<saml:Issuer>`.
    pub fn sign(
        &mut self,
        key: &SigningKey,
        certificate: Option<&Certificate>,
        digest: DigestAlgorithm,
    ) -> SamlResult<()> {
        if matches!(self.state(), MessageState::Signed | MessageState::Parsed) {
            return Err(SamlError::InvalidState(format!(
                "cannot sign a {:?} {}",
                self.state(),
                T::ELEMENT
            )));
        }

        let mut document = self
            .document
            .get()
            .cloned()
            .unwrap_or_else(|| self.body.to_element());
        let position = XmlSigner::new(key, certificate)
            .with_digest(digest)
            .sign(&mut document)?;
        place_after_issuer(&mut document, position);

        tracing::debug!(id = %self.id(), element = T::ELEMENT, "Signed message");
        self.document = OnceCell::from(document);
        self.signature_index = OnceCell::new();
        self.signed = true;
        Ok(())
    }

    fn expect_from(message: AnyMessage) -> SamlResult<Self> {
        T::unwrap(message).map_err(|other| SamlError::UnexpectedMessage {
            expected: T::ELEMENT,
            actual: other.element_name(),
        })
    }
}

impl Message<Response> {
    /// Signs every assertion of the response, leaving the response itself
    /// unsigned. The message may still be signed afterwards.
    pub fn sign_assertions(
        &mut self,
        key: &SigningKey,
        certificate: Option<&Certificate>,
        digest: DigestAlgorithm,
    ) -> SamlResult<()> {
        if matches!(self.state(), MessageState::Signed | MessageState::Parsed) {
            return Err(SamlError::InvalidState(format!(
                "cannot sign assertions of a {:?} Response",
                self.state()
            )));
        }

        let mut document = self
            .document
            .get()
            .cloned()
            .unwrap_or_else(|| self.body.to_element());
        let signer = XmlSigner::new(key, certificate).with_digest(digest);
        for node in &mut document.children {
            if let XmlNode::Element(assertion) = node {
                if assertion.is(SAML_NS, "Assertion") && locate_signature(assertion, assertion).is_none() {
                    let position = signer.sign(assertion)?;
                    place_after_issuer(assertion, position);
                }
            }
        }

        self.document = OnceCell::from(document);
        self.assertions_signed = true;
        Ok(())
    }
}

impl<T: ProtocolMessage> Signable for Message<T> {
    fn signed_document(&self) -> Option<&XmlElement> {
        self.document.get()
    }

    fn signature_position(&self) -> Option<usize> {
        *self.signature_index.get_or_init(|| {
            self.document
                .get()
                .and_then(|document| locate_signature(document, document))
        })
    }

    /// Certificates are checked as of the message's own issue instant.
    fn verification_time(&self) -> DateTime<Utc> {
        self.issue_instant()
    }
}

impl<T: ProtocolMessage> From<Message<T>> for AnyMessage {
    fn from(message: Message<T>) -> Self {
        T::wrap(message)
    }
}

impl<T: ProtocolMessage> From<T> for Message<T> {
    fn from(body: T) -> Self {
        Self::new(body)
    }
}

fn place_after_issuer(element: &mut XmlElement, position: usize) {
    let signature = element.children.remove(position);
    let at = element
        .child_position(SAML_NS, "Issuer")
        .map_or(0, |issuer| issuer + 1);
    element.children.insert(at, signature);
}

impl AnyMessage {
    /// Unwraps to the variant `T`, or fails with `UnexpectedMessage`.
    pub fn expect<T: ProtocolMessage>(self) -> SamlResult<Message<T>> {
        Message::<T>::expect_from(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::fixtures;
    use crate::types::{NameId, XMLDSIG_NS};

    fn logout_request() -> Message<LogoutRequest> {
        Message::new(
            LogoutRequest::new("https://sp.example.com", NameId::email("user@example.com"))
                .with_destination("https://idp.example.com/slo")
                .with_session_index("s1"),
        )
    }

    #[test]
    fn lifecycle_transitions() {
        let mut message = logout_request();
        assert_eq!(message.state(), MessageState::Unbuilt);

        message.build();
        assert_eq!(message.state(), MessageState::Built);

        message.body_mut().unwrap().reason = Some(LogoutRequest::REASON_USER.to_string());
        assert_eq!(message.state(), MessageState::Unbuilt);
        assert!(message.to_xml().unwrap().contains("Reason="));

        let (key, cert) = fixtures::rsa("sp");
        message.sign(&key, Some(&cert), DigestAlgorithm::Sha256).unwrap();
        assert_eq!(message.state(), MessageState::Signed);
        assert!(matches!(message.body_mut(), Err(SamlError::InvalidState(_))));
        assert!(matches!(
            message.sign(&key, Some(&cert), DigestAlgorithm::Sha256),
            Err(SamlError::InvalidState(_))
        ));
    }

    #[test]
    fn signature_follows_issuer() {
        let mut message = logout_request();
        let (key, cert) = fixtures::rsa("sp");
        message.sign(&key, Some(&cert), DigestAlgorithm::Sha1).unwrap();

        let names: Vec<&str> = message.build().elements().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Issuer", "Signature", "NameID", "SessionIndex"]);
        assert!(message.build().child_element(XMLDSIG_NS, "Signature").is_some());
    }

    #[test]
    fn signed_document_is_reused() {
        let mut message = logout_request();
        let (key, cert) = fixtures::rsa("sp");
        message.sign(&key, Some(&cert), DigestAlgorithm::Sha256).unwrap();

        let first = message.to_xml().unwrap();
        assert_eq!(message.to_xml().unwrap(), first);
        assert!(message.is_signed());
        assert!(message.is_signature_valid(&[], &[cert]));
    }

    #[test]
    fn parsed_message_verifies_with_issue_instant() {
        let (key, cert) = fixtures::dsa("sp");
        let mut message = logout_request();
        message.sign(&key, Some(&cert), DigestAlgorithm::Sha1).unwrap();

        let parsed = Message::<LogoutRequest>::parse(&message.to_xml().unwrap()).unwrap();
        assert_eq!(parsed.state(), MessageState::Parsed);
        assert_eq!(parsed.body(), message.body());
        assert_eq!(parsed.verification_time(), message.issue_instant());
        assert!(parsed.validate_signature(&[cert.fingerprint()], &[]).is_empty());

        let (_, other) = fixtures::rsa("other");
        assert!(!parsed.is_signature_valid(&[], &[other]));
    }

    #[test]
    fn unsigned_message_reports_not_signed() {
        let message = logout_request();
        assert_eq!(message.validate_signature(&[], &[]), vec!["not signed"]);
    }
}
