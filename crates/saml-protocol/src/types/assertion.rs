//! SAML Assertion types.
//!
//! Assertions contain statements about a subject made by an issuer.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::{AttributeStatement, AuthnContextClass, NameId, SAML_NS, SAML_VERSION};
use crate::error::{SamlError, SamlResult};
use crate::xml::{format_instant, parse_instant, parse_instant_attr, XmlElement};

/// SAML Assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    /// Unique identifier for this assertion.
    pub id: String,

    /// Timestamp when this assertion was issued.
    pub issue_instant: DateTime<Utc>,

    /// The entity ID of the identity provider that issued this assertion.
    pub issuer: String,

    /// The subject of this assertion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Subject>,

    /// Conditions that must hold for the assertion to be valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,

    /// Authentication statement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authn_statement: Option<AuthnStatement>,

    /// Attribute statement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_statement: Option<AttributeStatement>,
}

impl Assertion {
    /// Creates a new assertion with a random ID issued now.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            id: format!("_id{}", uuid::Uuid::new_v4()),
            issue_instant: Utc::now().trunc_subsecs(0),
            issuer: issuer.into(),
            subject: None,
            conditions: None,
            authn_statement: None,
            attribute_statement: None,
        }
    }

    /// Sets the subject.
    #[must_use]
    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Sets the conditions.
    #[must_use]
    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Sets the authentication statement.
    #[must_use]
    pub fn with_authn_statement(mut self, statement: AuthnStatement) -> Self {
        self.authn_statement = Some(statement);
        self
    }

    /// Sets the attribute statement.
    #[must_use]
    pub fn with_attribute_statement(mut self, statement: AttributeStatement) -> Self {
        self.attribute_statement = Some(statement);
        self
    }

    /// Validates the assertion's conditions at `now`.
    ///
    /// The audience is checked only when one is given.
    pub fn validate(&self, now: DateTime<Utc>, audience: Option<&str>) -> SamlResult<()> {
        match &self.conditions {
            Some(conditions) => conditions.validate(now, audience),
            None => Ok(()),
        }
    }

    /// Builds the `<saml:Assertion>` element.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        XmlElement::new(SAML_NS, "saml", "Assertion")
            .attr("ID", self.id.as_str())
            .attr("Version", SAML_VERSION)
            .attr("IssueInstant", format_instant(&self.issue_instant))
            .child(XmlElement::new(SAML_NS, "saml", "Issuer").text(self.issuer.as_str()))
            .child_opt(self.subject.as_ref().map(Subject::to_element))
            .child_opt(self.conditions.as_ref().map(Conditions::to_element))
            .child_opt(self.authn_statement.as_ref().map(AuthnStatement::to_element))
            .child_opt(self.attribute_statement.as_ref().map(AttributeStatement::to_element))
    }

    /// Reads a `<saml:Assertion>` element.
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        let version = element.required_attribute("Version")?;
        if version != SAML_VERSION {
            return Err(SamlError::CorruptMessage(format!(
                "unsupported assertion version: {version}"
            )));
        }

        Ok(Self {
            id: element.required_attribute("ID")?.to_string(),
            issue_instant: parse_instant(element.required_attribute("IssueInstant")?)?,
            issuer: element
                .child_text(SAML_NS, "Issuer")
                .ok_or_else(|| SamlError::MissingElement("<Issuer> in <Assertion>".to_string()))?,
            subject: element
                .child_element(SAML_NS, "Subject")
                .map(Subject::from_element)
                .transpose()?,
            conditions: element
                .child_element(SAML_NS, "Conditions")
                .map(Conditions::from_element)
                .transpose()?,
            authn_statement: element
                .child_element(SAML_NS, "AuthnStatement")
                .map(AuthnStatement::from_element)
                .transpose()?,
            attribute_statement: element
                .child_element(SAML_NS, "AttributeStatement")
                .map(AttributeStatement::from_element)
                .transpose()?,
        })
    }
}

/// Subject of an assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// The name identifier for the subject.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_id: Option<NameId>,

    /// Subject confirmations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subject_confirmations: Vec<SubjectConfirmation>,
}

impl Subject {
    /// Creates a new subject with a name ID.
    #[must_use]
    pub fn new(name_id: NameId) -> Self {
        Self {
            name_id: Some(name_id),
            subject_confirmations: Vec::new(),
        }
    }

    /// Adds a subject confirmation.
    #[must_use]
    pub fn with_confirmation(mut self, confirmation: SubjectConfirmation) -> Self {
        self.subject_confirmations.push(confirmation);
        self
    }

    fn to_element(&self) -> XmlElement {
        self.subject_confirmations.iter().fold(
            XmlElement::new(SAML_NS, "saml", "Subject")
                .child_opt(self.name_id.as_ref().map(NameId::to_element)),
            |element, confirmation| element.child(confirmation.to_element()),
        )
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            name_id: element
                .child_element(SAML_NS, "NameID")
                .map(NameId::from_element),
            subject_confirmations: element
                .children_named(SAML_NS, "SubjectConfirmation")
                .map(SubjectConfirmation::from_element)
                .collect::<SamlResult<_>>()?,
        })
    }
}

/// Subject confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectConfirmation {
    /// The confirmation method.
    pub method: String,

    /// Additional confirmation data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_confirmation_data: Option<SubjectConfirmationData>,
}

impl SubjectConfirmation {
    /// Bearer confirmation method URI.
    pub const BEARER: &'static str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";

    /// Creates a bearer confirmation.
    #[must_use]
    pub fn bearer() -> Self {
        Self {
            method: Self::BEARER.to_string(),
            subject_confirmation_data: None,
        }
    }

    /// Sets the confirmation data.
    #[must_use]
    pub fn with_data(mut self, data: SubjectConfirmationData) -> Self {
        self.subject_confirmation_data = Some(data);
        self
    }

    fn to_element(&self) -> XmlElement {
        XmlElement::new(SAML_NS, "saml", "SubjectConfirmation")
            .attr("Method", self.method.as_str())
            .child_opt(self.subject_confirmation_data.as_ref().map(|data| {
                XmlElement::new(SAML_NS, "saml", "SubjectConfirmationData")
                    .attr_opt("InResponseTo", data.in_response_to.as_deref())
                    .attr_opt("NotBefore", data.not_before.as_ref().map(format_instant))
                    .attr_opt("NotOnOrAfter", data.not_on_or_after.as_ref().map(format_instant))
                    .attr_opt("Recipient", data.recipient.as_deref())
            }))
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        let subject_confirmation_data = element
            .child_element(SAML_NS, "SubjectConfirmationData")
            .map(|data| -> SamlResult<_> {
                Ok(SubjectConfirmationData {
                    in_response_to: data.attribute("InResponseTo").map(str::to_string),
                    not_before: parse_instant_attr(data, "NotBefore")?,
                    not_on_or_after: parse_instant_attr(data, "NotOnOrAfter")?,
                    recipient: data.attribute("Recipient").map(str::to_string),
                })
            })
            .transpose()?;

        Ok(Self {
            method: element.required_attribute("Method")?.to_string(),
            subject_confirmation_data,
        })
    }
}

/// Subject confirmation data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectConfirmationData {
    /// The request ID that this assertion responds to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<String>,

    /// Time before which the subject cannot be confirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,

    /// Time after which the subject can no longer be confirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_on_or_after: Option<DateTime<Utc>>,

    /// The location to which the assertion can be presented.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

impl SubjectConfirmationData {
    /// Creates confirmation data answering a request, valid for five minutes.
    #[must_use]
    pub fn for_request(request_id: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            in_response_to: Some(request_id.into()),
            not_before: None,
            not_on_or_after: Some(Utc::now().trunc_subsecs(0) + Duration::minutes(5)),
            recipient: Some(recipient.into()),
        }
    }
}

/// Conditions for assertion validity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditions {
    /// Time before which the assertion is not valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,

    /// Time at or after which the assertion is not valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_on_or_after: Option<DateTime<Utc>>,

    /// Audience restrictions; every one must admit the audience.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audience_restrictions: Vec<AudienceRestriction>,

    /// One-time use condition.
    #[serde(default)]
    pub one_time_use: bool,
}

impl Conditions {
    /// Creates conditions valid from now for `validity_minutes`.
    #[must_use]
    pub fn with_validity(validity_minutes: i64) -> Self {
        let now = Utc::now().trunc_subsecs(0);
        Self {
            not_before: Some(now),
            not_on_or_after: Some(now + Duration::minutes(validity_minutes)),
            audience_restrictions: Vec::new(),
            one_time_use: false,
        }
    }

    /// Adds an audience restriction.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience_restrictions.push(AudienceRestriction {
            audiences: vec![audience.into()],
        });
        self
    }

    /// Sets the one-time use flag.
    #[must_use]
    pub const fn one_time_use(mut self) -> Self {
        self.one_time_use = true;
        self
    }

    /// Checks the time window and, if `audience` is given, the audience
    /// restrictions.
    ///
    /// # Errors
    ///
    /// `AssertionNotYetValid` before `NotBefore`, `AssertionExpired` at or
    /// after `NotOnOrAfter`, `InvalidAudience` when a restriction does not
    /// list the audience.
    pub fn validate(&self, now: DateTime<Utc>, audience: Option<&str>) -> SamlResult<()> {
        if self.not_before.is_some_and(|not_before| now < not_before) {
            return Err(SamlError::AssertionNotYetValid);
        }
        if self
            .not_on_or_after
            .is_some_and(|not_on_or_after| now >= not_on_or_after)
        {
            return Err(SamlError::AssertionExpired);
        }

        if let Some(audience) = audience {
            let admitted = self
                .audience_restrictions
                .iter()
                .all(|restriction| restriction.audiences.iter().any(|a| a == audience));
            if !admitted {
                return Err(SamlError::InvalidAudience(audience.to_string()));
            }
        }

        Ok(())
    }

    fn to_element(&self) -> XmlElement {
        let element = XmlElement::new(SAML_NS, "saml", "Conditions")
            .attr_opt("NotBefore", self.not_before.as_ref().map(format_instant))
            .attr_opt("NotOnOrAfter", self.not_on_or_after.as_ref().map(format_instant));
        let element = self
            .audience_restrictions
            .iter()
            .fold(element, |element, restriction| {
                element.child(restriction.audiences.iter().fold(
                    XmlElement::new(SAML_NS, "saml", "AudienceRestriction"),
                    |r, audience| {
                        r.child(XmlElement::new(SAML_NS, "saml", "Audience").text(audience.as_str()))
                    },
                ))
            });
        if self.one_time_use {
            element.child(XmlElement::new(SAML_NS, "saml", "OneTimeUse"))
        } else {
            element
        }
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            not_before: parse_instant_attr(element, "NotBefore")?,
            not_on_or_after: parse_instant_attr(element, "NotOnOrAfter")?,
            audience_restrictions: element
                .children_named(SAML_NS, "AudienceRestriction")
                .map(|restriction| AudienceRestriction {
                    audiences: restriction
                        .children_named(SAML_NS, "Audience")
                        .map(|a| a.text_content().trim().to_string())
                        .collect(),
                })
                .collect(),
            one_time_use: element.child_element(SAML_NS, "OneTimeUse").is_some(),
        })
    }
}

/// Audience restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudienceRestriction {
    /// Audiences admitted by this restriction.
    pub audiences: Vec<String>,
}

/// Authentication statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthnStatement {
    /// The time of authentication.
    pub authn_instant: DateTime<Utc>,

    /// The session index, referenced later by logout requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_index: Option<String>,

    /// Time at which the session ends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_not_on_or_after: Option<DateTime<Utc>>,

    /// Authentication context class reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authn_context_class_ref: Option<String>,
}

impl AuthnStatement {
    /// Creates an authentication statement for a new session.
    #[must_use]
    pub fn new(context_class: AuthnContextClass) -> Self {
        Self {
            authn_instant: Utc::now().trunc_subsecs(0),
            session_index: Some(format!("_session{}", uuid::Uuid::new_v4())),
            session_not_on_or_after: None,
            authn_context_class_ref: Some(context_class.uri().to_string()),
        }
    }

    /// Sets the session timeout.
    #[must_use]
    pub fn with_session_timeout(mut self, timeout_minutes: i64) -> Self {
        self.session_not_on_or_after =
            Some(self.authn_instant + Duration::minutes(timeout_minutes));
        self
    }

    fn to_element(&self) -> XmlElement {
        XmlElement::new(SAML_NS, "saml", "AuthnStatement")
            .attr("AuthnInstant", format_instant(&self.authn_instant))
            .attr_opt("SessionIndex", self.session_index.as_deref())
            .attr_opt(
                "SessionNotOnOrAfter",
                self.session_not_on_or_after.as_ref().map(format_instant),
            )
            .child(XmlElement::new(SAML_NS, "saml", "AuthnContext").child_opt(
                self.authn_context_class_ref.as_ref().map(|class| {
                    XmlElement::new(SAML_NS, "saml", "AuthnContextClassRef").text(class.as_str())
                }),
            ))
    }

    fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            authn_instant: parse_instant(element.required_attribute("AuthnInstant")?)?,
            session_index: element.attribute("SessionIndex").map(str::to_string),
            session_not_on_or_after: parse_instant_attr(element, "SessionNotOnOrAfter")?,
            authn_context_class_ref: element
                .child_element(SAML_NS, "AuthnContext")
                .and_then(|ctx| ctx.child_text(SAML_NS, "AuthnContextClassRef")),
        })
    }
}
