//! SAML Name ID types.
//!
//! Name identifiers are used to identify subjects in SAML assertions and
//! logout requests.

use serde::{Deserialize, Serialize};

use super::{NameIdFormat, SAMLP_NS, SAML_NS};
use crate::error::SamlResult;
use crate::xml::{parse_bool_attr, XmlElement};

/// SAML Name ID.
///
/// Immutable once constructed; builders consume and return a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameId {
    /// The actual identifier value.
    pub value: String,

    /// The format of the name identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// The security or administrative domain that qualifies the name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_qualifier: Option<String>,

    /// The service provider's entity ID that qualifies the name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sp_name_qualifier: Option<String>,
}

impl NameId {
    /// Creates a new name ID with the given value and no format.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            format: None,
            name_qualifier: None,
            sp_name_qualifier: None,
        }
    }

    /// Creates an email address name ID.
    #[must_use]
    pub fn email(email: impl Into<String>) -> Self {
        Self::new(email).with_format(NameIdFormat::Email)
    }

    /// Creates a persistent name ID.
    #[must_use]
    pub fn persistent(value: impl Into<String>) -> Self {
        Self::new(value).with_format(NameIdFormat::Persistent)
    }

    /// Creates a transient name ID with a random value.
    #[must_use]
    pub fn transient() -> Self {
        Self::new(format!("_{}", uuid::Uuid::new_v4().simple())).with_format(NameIdFormat::Transient)
    }

    /// Sets the format for this name ID.
    #[must_use]
    pub fn with_format(mut self, format: NameIdFormat) -> Self {
        self.format = Some(format.uri().to_string());
        self
    }

    /// Sets the name qualifier.
    #[must_use]
    pub fn with_name_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.name_qualifier = Some(qualifier.into());
        self
    }

    /// Sets the SP name qualifier.
    #[must_use]
    pub fn with_sp_name_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.sp_name_qualifier = Some(qualifier.into());
        self
    }

    /// Returns the parsed name ID format, `Unspecified` when absent or unknown.
    #[must_use]
    pub fn parsed_format(&self) -> NameIdFormat {
        self.format
            .as_deref()
            .and_then(NameIdFormat::from_uri)
            .unwrap_or_default()
    }

    /// Builds the `<saml:NameID>` element.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        XmlElement::new(SAML_NS, "saml", "NameID")
            .attr_opt("Format", self.format.as_deref())
            .attr_opt("NameQualifier", self.name_qualifier.as_deref())
            .attr_opt("SPNameQualifier", self.sp_name_qualifier.as_deref())
            .text(self.value.as_str())
    }

    /// Reads a `<saml:NameID>` element.
    #[must_use]
    pub fn from_element(element: &XmlElement) -> Self {
        Self {
            value: element.text_content().trim().to_string(),
            format: element.attribute("Format").map(str::to_string),
            name_qualifier: element.attribute("NameQualifier").map(str::to_string),
            sp_name_qualifier: element.attribute("SPNameQualifier").map(str::to_string),
        }
    }
}

/// Name ID policy for authentication requests.
///
/// Specifies constraints on the name identifier to be returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameIdPolicy {
    /// The requested name ID format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// The SP name qualifier for the name ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sp_name_qualifier: Option<String>,

    /// Whether the identity provider may create a new identifier.
    #[serde(default)]
    pub allow_create: bool,
}

impl NameIdPolicy {
    /// Creates a policy requesting a specific format.
    #[must_use]
    pub fn with_format(format: NameIdFormat) -> Self {
        Self {
            format: Some(format.uri().to_string()),
            sp_name_qualifier: None,
            allow_create: false,
        }
    }

    /// Sets whether new identifiers can be created.
    #[must_use]
    pub const fn allow_create(mut self, allow: bool) -> Self {
        self.allow_create = allow;
        self
    }

    /// Returns the parsed name ID format.
    #[must_use]
    pub fn parsed_format(&self) -> Option<NameIdFormat> {
        self.format.as_deref().and_then(NameIdFormat::from_uri)
    }

    /// Builds the `<samlp:NameIDPolicy>` element.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        XmlElement::new(SAMLP_NS, "samlp", "NameIDPolicy")
            .attr_opt("Format", self.format.as_deref())
            .attr_opt("SPNameQualifier", self.sp_name_qualifier.as_deref())
            .attr("AllowCreate", self.allow_create.to_string())
    }

    /// Reads a `<samlp:NameIDPolicy>` element.
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            format: element.attribute("Format").map(str::to_string),
            sp_name_qualifier: element.attribute("SPNameQualifier").map(str::to_string),
            allow_create: parse_bool_attr(element, "AllowCreate")?.unwrap_or(false),
        })
    }
}
