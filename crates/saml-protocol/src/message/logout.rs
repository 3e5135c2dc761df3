//! SAML Logout messages.
//!
//! Single Logout (SLO) request and response messages.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{AnyMessage, Message, MessageHeader, ProtocolMessage, StatusResponse};
use crate::error::{SamlError, SamlResult};
use crate::types::{
    status_codes, sub_status_codes, MessageKind, NameId, Status, StatusCode, SAMLP_NS, SAML_NS,
};
use crate::xml::{format_instant, parse_instant_attr, XmlElement};

/// SAML Logout Request.
///
/// A request to terminate an existing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutRequest {
    /// Identity, issue time, issuer and destination.
    #[serde(flatten)]
    pub header: MessageHeader,

    /// The name identifier of the principal to log out.
    pub name_id: NameId,

    /// Session indexes to terminate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub session_indexes: Vec<String>,

    /// Reason for the logout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Time after which the request is no longer valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_on_or_after: Option<DateTime<Utc>>,
}

impl LogoutRequest {
    /// User logout reason.
    pub const REASON_USER: &'static str = "urn:oasis:names:tc:SAML:2.0:logout:user";

    /// Admin logout reason.
    pub const REASON_ADMIN: &'static str = "urn:oasis:names:tc:SAML:2.0:logout:admin";

    /// Creates a new logout request.
    #[must_use]
    pub fn new(issuer: impl Into<String>, name_id: NameId) -> Self {
        Self {
            header: MessageHeader::new(issuer),
            name_id,
            session_indexes: Vec::new(),
            reason: None,
            not_on_or_after: None,
        }
    }

    /// Sets the destination URL.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.header.destination = Some(url.into());
        self
    }

    /// Adds a session index to terminate.
    #[must_use]
    pub fn with_session_index(mut self, index: impl Into<String>) -> Self {
        self.session_indexes.push(index.into());
        self
    }

    /// Sets the logout reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Limits the request to `minutes` after its issue instant.
    #[must_use]
    pub fn valid_for(mut self, minutes: i64) -> Self {
        self.not_on_or_after = Some(self.header.issue_instant + Duration::minutes(minutes));
        self
    }

    /// Checks if the request has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.not_on_or_after.is_some_and(|not_after| now >= not_after)
    }
}

impl ProtocolMessage for LogoutRequest {
    const ELEMENT: &'static str = "LogoutRequest";
    const KIND: MessageKind = MessageKind::Request;

    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn to_element(&self) -> XmlElement {
        let element = self
            .header
            .start_element(Self::ELEMENT)
            .attr_opt("Reason", self.reason.as_deref())
            .attr_opt("NotOnOrAfter", self.not_on_or_after.as_ref().map(format_instant))
            .child(self.name_id.to_element());
        self.session_indexes.iter().fold(element, |element, index| {
            element.child(XmlElement::new(SAMLP_NS, "samlp", "SessionIndex").text(index.as_str()))
        })
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        let name_id = element
            .child_element(SAML_NS, "NameID")
            .map(NameId::from_element)
            .ok_or_else(|| SamlError::MissingElement("<NameID> in <LogoutRequest>".to_string()))?;

        Ok(Self {
            header: MessageHeader::from_element(element)?,
            name_id,
            session_indexes: element
                .children_named(SAMLP_NS, "SessionIndex")
                .map(|e| e.text_content().trim().to_string())
                .collect(),
            reason: element.attribute("Reason").map(str::to_string),
            not_on_or_after: parse_instant_attr(element, "NotOnOrAfter")?,
        })
    }

    fn wrap(message: Message<Self>) -> AnyMessage {
        AnyMessage::LogoutRequest(message)
    }

    fn unwrap(message: AnyMessage) -> Result<Message<Self>, AnyMessage> {
        match message {
            AnyMessage::LogoutRequest(m) => Ok(m),
            other => Err(other),
        }
    }
}

/// SAML Logout Response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutResponse {
    /// Identity, issue time, issuer and destination.
    #[serde(flatten)]
    pub header: MessageHeader,

    /// Request correlation and status.
    #[serde(flatten)]
    pub status_response: StatusResponse,
}

impl LogoutResponse {
    /// Creates a new success logout response.
    #[must_use]
    pub fn success(issuer: impl Into<String>) -> Self {
        Self::error(issuer, Status::success())
    }

    /// Creates a logout response carrying `status`.
    #[must_use]
    pub fn error(issuer: impl Into<String>, status: Status) -> Self {
        Self {
            header: MessageHeader::new(issuer),
            status_response: StatusResponse::new(status),
        }
    }

    /// Creates a partial logout response.
    #[must_use]
    pub fn partial_logout(issuer: impl Into<String>) -> Self {
        Self::error(
            issuer,
            Status {
                status_code: StatusCode::new(status_codes::SUCCESS)
                    .with_sub_status(StatusCode::new(sub_status_codes::PARTIAL_LOGOUT)),
                status_message: Some("Some sessions could not be terminated".to_string()),
            },
        )
    }

    /// Creates a success response answering `request`.
    #[must_use]
    pub fn for_request(request: &LogoutRequest, issuer: impl Into<String>) -> Self {
        Self::success(issuer).in_response_to(request.header.id.as_str())
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

    /// Returns true if this response indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_response.is_success()
    }
}

impl ProtocolMessage for LogoutResponse {
    const ELEMENT: &'static str = "LogoutResponse";
    const KIND: MessageKind = MessageKind::Response;

    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn to_element(&self) -> XmlElement {
        self.status_response
            .write(self.header.start_element(Self::ELEMENT))
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            header: MessageHeader::from_element(element)?,
            status_response: StatusResponse::from_element(element)?,
        })
    }

    fn wrap(message: Message<Self>) -> AnyMessage {
        AnyMessage::LogoutResponse(message)
    }

    fn unwrap(message: AnyMessage) -> Result<Message<Self>, AnyMessage> {
        match message {
            AnyMessage::LogoutResponse(m) => Ok(m),
            other => Err(other),
        }
    }
}
