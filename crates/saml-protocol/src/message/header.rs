//! Fields shared by every protocol message.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SamlError, SamlResult};
use crate::types::{Status, SAMLP_NS, SAML_NS, SAML_VERSION};
use crate::xml::{format_instant, parse_instant, XmlElement};

/// Identity, issue time, issuer and destination of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Unique identifier for this message.
    pub id: String,

    /// Version of the SAML protocol (always "2.0").
    #[serde(default = "default_version")]
    pub version: String,

    /// Timestamp when this message was issued.
    pub issue_instant: DateTime<Utc>,

    /// The entity ID of the sender.
    pub issuer: String,

    /// The URL this message is sent to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// The consent obtained for this message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent: Option<String>,
}

fn default_version() -> String {
    SAML_VERSION.to_string()
}

impl MessageHeader {
    /// Creates a header with a random ID issued now.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            id: format!("_id{}", uuid::Uuid::new_v4()),
            version: default_version(),
            issue_instant: Utc::now().trunc_subsecs(0),
            issuer: issuer.into(),
            destination: None,
            consent: None,
        }
    }

    /// Starts the root element of a message, with the header attributes
    /// and the `<saml:Issuer>` child.
    pub(crate) fn start_element(&self, name: &str) -> XmlElement {
        XmlElement::new(SAMLP_NS, "samlp", name)
            .declare("samlp", SAMLP_NS)
            .declare("saml", SAML_NS)
            .attr("ID", self.id.as_str())
            .attr("Version", self.version.as_str())
            .attr("IssueInstant", format_instant(&self.issue_instant))
            .attr_opt("Destination", self.destination.as_deref())
            .attr_opt("Consent", self.consent.as_deref())
            .child(XmlElement::new(SAML_NS, "saml", "Issuer").text(self.issuer.as_str()))
    }

    /// Reads the header from a message root element.
    pub(crate) fn from_element(element: &XmlElement) -> SamlResult<Self> {
        let version = element.required_attribute("Version")?;
        if version != SAML_VERSION {
            return Err(SamlError::CorruptMessage(format!(
                "unsupported SAML version: {version}"
            )));
        }

        Ok(Self {
            id: element.required_attribute("ID")?.to_string(),
            version: version.to_string(),
            issue_instant: parse_instant(element.required_attribute("IssueInstant")?)?,
            issuer: element.child_text(SAML_NS, "Issuer").ok_or_else(|| {
                SamlError::MissingElement(format!("<Issuer> in <{}>", element.name))
            })?,
            destination: element.attribute("Destination").map(str::to_string),
            consent: element.attribute("Consent").map(str::to_string),
        })
    }
}

/// The part shared by responses: what they answer and how it went.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// The ID of the request this responds to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<String>,

    /// The outcome.
    pub status: Status,
}

impl StatusResponse {
    /// A response carrying `status`.
    #[must_use]
    pub fn new(status: Status) -> Self {
        Self {
            in_response_to: None,
            status,
        }
    }

    /// Returns true if the top-level status code is success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub(crate) fn write(&self, element: XmlElement) -> XmlElement {
        element
            .attr_opt("InResponseTo", self.in_response_to.as_deref())
            .child(self.status.to_element())
    }

    pub(crate) fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            in_response_to: element.attribute("InResponseTo").map(str::to_string),
            status: Status::from_element(element.required_child(SAMLP_NS, "Status")?)?,
        })
    }
}
