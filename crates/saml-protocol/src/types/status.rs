//! SAML Status types.
//!
//! Status information carried by every status response.

use serde::{Deserialize, Serialize};

use super::{status_codes, SAMLP_NS};
use crate::error::{SamlError, SamlResult};
use crate::xml::XmlElement;

/// SAML protocol status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// The status code chain.
    pub status_code: StatusCode,

    /// Optional status message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

impl Status {
    /// Creates a success status.
    #[must_use]
    pub fn success() -> Self {
        Self {
            status_code: StatusCode::new(status_codes::SUCCESS),
            status_message: None,
        }
    }

    /// Creates a requester error status.
    #[must_use]
    pub fn requester_error(message: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::new(status_codes::REQUESTER),
            status_message: Some(message.into()),
        }
    }

    /// Creates a responder error status.
    #[must_use]
    pub fn responder_error(message: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::new(status_codes::RESPONDER),
            status_message: Some(message.into()),
        }
    }

    /// Creates a status describing a protocol error.
    #[must_use]
    pub fn from_error(err: &SamlError) -> Self {
        let mut code = StatusCode::new(err.status_code());
        if let Some(sub) = err.sub_status_code() {
            code = code.with_sub_status(StatusCode::new(sub));
        }
        Self {
            status_code: code,
            status_message: Some(err.to_string()),
        }
    }

    /// Returns true if this status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code.is_success()
    }

    /// Builds the `<samlp:Status>` element.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        XmlElement::new(SAMLP_NS, "samlp", "Status")
            .child(self.status_code.to_element())
            .child_opt(self.status_message.as_ref().map(|m| {
                XmlElement::new(SAMLP_NS, "samlp", "StatusMessage").text(m.as_str())
            }))
    }

    /// Reads a `<samlp:Status>` element.
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            status_code: StatusCode::from_element(element.required_child(SAMLP_NS, "StatusCode")?)?,
            status_message: element.child_text(SAMLP_NS, "StatusMessage"),
        })
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::success()
    }
}

/// SAML status code.
///
/// Status codes nest: a top-level code with an optional chain of sub-codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCode {
    /// The status code URI value.
    pub value: String,

    /// Optional nested status code providing more detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<Box<StatusCode>>,
}

impl StatusCode {
    /// Creates a new status code with the given value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            status_code: None,
        }
    }

    /// Adds a sub-status code.
    #[must_use]
    pub fn with_sub_status(mut self, sub: StatusCode) -> Self {
        self.status_code = Some(Box::new(sub));
        self
    }

    /// Returns true if this is a success status code.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.value == status_codes::SUCCESS
    }

    /// Returns the sub-status code value if present.
    #[must_use]
    pub fn sub_status_value(&self) -> Option<&str> {
        self.status_code.as_ref().map(|s| s.value.as_str())
    }

    /// Iterates over this code and every nested code, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &StatusCode> {
        std::iter::successors(Some(self), |code| code.status_code.as_deref())
    }

    fn to_element(&self) -> XmlElement {
        XmlElement::new(SAMLP_NS, "samlp", "StatusCode")
            .attr("Value", self.value.as_str())
            .child_opt(self.status_code.as_ref().map(|sub| sub.to_element()))
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        let value = element.required_attribute("Value")?.to_string();
        let status_code = element
            .child_element(SAMLP_NS, "StatusCode")
            .map(Self::from_element)
            .transpose()?
            .map(Box::new);
        if value.is_empty() {
            return Err(SamlError::MissingElement("StatusCode Value".to_string()));
        }
        Ok(Self { value, status_code })
    }
}
