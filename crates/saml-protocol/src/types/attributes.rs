//! Attributes, requested attributes and attribute resolution.
//!
//! A service provider declares the attributes it wants through an
//! `AttributeConsumingService`. [`AttributeConsumingService::create_statement`]
//! matches the values an identity provider can supply against that
//! declaration and produces the `AttributeStatement` for an assertion.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Indexed, MD_NS, SAML_NS, XSI_NS, XS_NS};
use crate::error::{SamlError, SamlResult};
use crate::xml::{format_instant, parse_bool_attr, parse_instant, parse_u32_attr, XmlElement};

/// A typed attribute value, written with a matching `xsi:type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// `xs:string`.
    String(String),
    /// `xs:integer`.
    Integer(i64),
    /// `xs:boolean`.
    Boolean(bool),
    /// `xs:dateTime`.
    DateTime(DateTime<Utc>),
}

impl AttributeValue {
    fn xsi_type(&self) -> &'static str {
        match self {
            Self::String(_) => "xs:string",
            Self::Integer(_) => "xs:integer",
            Self::Boolean(_) => "xs:boolean",
            Self::DateTime(_) => "xs:dateTime",
        }
    }

    /// Returns the value as a string if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    fn to_element(&self) -> XmlElement {
        XmlElement::new(SAML_NS, "saml", "AttributeValue")
            .declare("xs", XS_NS)
            .declare("xsi", XSI_NS)
            .attr_ns(XSI_NS, "xsi", "type", self.xsi_type())
            .text(self.to_string())
    }

    fn from_element(element: &XmlElement) -> Self {
        let text = element.text_content();
        let declared = element
            .attribute_ns(XSI_NS, "type")
            .map(|t| t.rsplit(':').next().unwrap_or(t));

        let typed = match declared {
            Some("integer" | "int" | "long" | "short") => {
                text.trim().parse().ok().map(Self::Integer)
            }
            Some("boolean") => match text.trim() {
                "true" | "1" => Some(Self::Boolean(true)),
                "false" | "0" => Some(Self::Boolean(false)),
                _ => None,
            },
            Some("dateTime") => parse_instant(&text).ok().map(Self::DateTime),
            _ => None,
        };
        typed.unwrap_or(Self::String(text))
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::DateTime(dt) => f.write_str(&format_instant(dt)),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }
}

/// SAML Attribute as carried in an attribute statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// The attribute name (typically a URI).
    pub name: String,

    /// The format of the attribute name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_format: Option<String>,

    /// A human-readable name for the attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,

    /// The attribute values.
    pub values: Vec<AttributeValue>,
}

impl Attribute {
    /// Creates an attribute with a single value.
    #[must_use]
    pub fn single(name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            name: name.into(),
            name_format: None,
            friendly_name: None,
            values: vec![value.into()],
        }
    }

    /// Sets the name format.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.name_format = Some(format.into());
        self
    }

    /// Builds the `<saml:Attribute>` element.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        self.values.iter().fold(
            XmlElement::new(SAML_NS, "saml", "Attribute")
                .attr("Name", self.name.as_str())
                .attr_opt("NameFormat", self.name_format.as_deref())
                .attr_opt("FriendlyName", self.friendly_name.as_deref()),
            |element, value| element.child(value.to_element()),
        )
    }

    /// Reads a `<saml:Attribute>` element.
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            name: element.required_attribute("Name")?.to_string(),
            name_format: element.attribute("NameFormat").map(str::to_string),
            friendly_name: element.attribute("FriendlyName").map(str::to_string),
            values: element
                .children_named(SAML_NS, "AttributeValue")
                .map(AttributeValue::from_element)
                .collect(),
        })
    }
}

/// Attribute statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeStatement {
    /// Attributes in output order.
    pub attributes: Vec<Attribute>,
}

impl AttributeStatement {
    /// Returns the attribute with the given name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Builds the `<saml:AttributeStatement>` element.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        self.attributes.iter().fold(
            XmlElement::new(SAML_NS, "saml", "AttributeStatement"),
            |element, attr| element.child(attr.to_element()),
        )
    }

    /// Reads a `<saml:AttributeStatement>` element.
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            attributes: element
                .children_named(SAML_NS, "Attribute")
                .map(Attribute::from_element)
                .collect::<SamlResult<_>>()?,
        })
    }
}

/// An attribute a service provider asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedAttribute {
    /// Attribute name.
    pub name: String,

    /// Attribute name format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_format: Option<String>,

    /// Human-readable name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,

    /// Whether a statement can be produced without it.
    #[serde(default)]
    pub is_required: bool,
}

impl RequestedAttribute {
    /// Creates a required requested attribute.
    #[must_use]
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            name_format: None,
            friendly_name: None,
            is_required: true,
        }
    }

    /// Creates an optional requested attribute.
    #[must_use]
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            is_required: false,
            ..Self::required(name)
        }
    }

    /// Sets the name format.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.name_format = Some(format.into());
        self
    }

    /// Sets the friendly name.
    #[must_use]
    pub fn with_friendly_name(mut self, name: impl Into<String>) -> Self {
        self.friendly_name = Some(name.into());
        self
    }

    /// Builds the `<md:RequestedAttribute>` element.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        XmlElement::new(MD_NS, "md", "RequestedAttribute")
            .attr("Name", self.name.as_str())
            .attr_opt("NameFormat", self.name_format.as_deref())
            .attr_opt("FriendlyName", self.friendly_name.as_deref())
            .attr("isRequired", self.is_required.to_string())
    }

    /// Reads an `<md:RequestedAttribute>` element.
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            name: element.required_attribute("Name")?.to_string(),
            name_format: element.attribute("NameFormat").map(str::to_string),
            friendly_name: element.attribute("FriendlyName").map(str::to_string),
            is_required: parse_bool_attr(element, "isRequired")?.unwrap_or(false),
        })
    }
}

/// Where a supplied attribute's values come from.
pub enum AttributeSource {
    /// Values known up front.
    Values(Vec<AttributeValue>),
    /// Values computed only if the attribute is requested.
    Deferred(Box<dyn FnOnce() -> Vec<AttributeValue>>),
}

impl AttributeSource {
    fn evaluate(self) -> Vec<AttributeValue> {
        match self {
            Self::Values(values) => values,
            Self::Deferred(compute) => compute(),
        }
    }
}

impl fmt::Debug for AttributeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Values(values) => f.debug_tuple("Values").field(values).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// An attribute an identity provider can supply.
#[derive(Debug)]
pub struct SuppliedAttribute {
    /// Attribute name.
    pub name: String,
    /// Attribute name format, if the supplier knows it.
    pub name_format: Option<String>,
    /// The values.
    pub source: AttributeSource,
}

impl SuppliedAttribute {
    /// Supplies attribute values computed on demand.
    #[must_use]
    pub fn deferred<F>(name: impl Into<String>, compute: F) -> Self
    where
        F: FnOnce() -> Vec<AttributeValue> + 'static,
    {
        Self {
            name: name.into(),
            name_format: None,
            source: AttributeSource::Deferred(Box::new(compute)),
        }
    }

    /// Sets the name format.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.name_format = Some(format.into());
        self
    }
}

impl<K: Into<String>, V: Into<AttributeValue>> From<(K, V)> for SuppliedAttribute {
    fn from((name, value): (K, V)) -> Self {
        Self {
            name: name.into(),
            name_format: None,
            source: AttributeSource::Values(vec![value.into()]),
        }
    }
}

impl From<Attribute> for SuppliedAttribute {
    fn from(attr: Attribute) -> Self {
        Self {
            name: attr.name,
            name_format: attr.name_format,
            source: AttributeSource::Values(attr.values),
        }
    }
}

/// A service provider's declared attribute requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeConsumingService {
    /// Service index.
    pub index: u32,

    /// Explicit default flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,

    /// Service names.
    #[serde(default)]
    pub service_names: Vec<String>,

    /// Requested attributes in declaration order.
    pub requested_attributes: Vec<RequestedAttribute>,
}

impl AttributeConsumingService {
    /// Creates a service with the given index and requested attributes.
    #[must_use]
    pub fn new(index: u32, requested_attributes: Vec<RequestedAttribute>) -> Self {
        Self {
            index,
            is_default: None,
            service_names: Vec::new(),
            requested_attributes,
        }
    }

    /// Produces an attribute statement from supplied attributes.
    ///
    /// Each requested attribute is matched first on `(name, format)`, then,
    /// if it declares a format, on the name alone. Deferred values are only
    /// evaluated for attributes that match. Supplied attributes nobody asked
    /// for are dropped. Output follows declaration order.
    ///
    /// # Errors
    ///
    /// Returns `RequiredAttributeMissing` for the first required attribute
    /// with no supplied value.
    pub fn create_statement<I>(&self, supplied: I) -> SamlResult<AttributeStatement>
    where
        I: IntoIterator,
        I::Item: Into<SuppliedAttribute>,
    {
        let mut supplied: Vec<Option<SuppliedAttribute>> =
            supplied.into_iter().map(|s| Some(s.into())).collect();

        let mut lookup: HashMap<(String, Option<String>), usize> = HashMap::new();
        for (position, attr) in supplied.iter().flatten().enumerate() {
            lookup.insert((attr.name.clone(), attr.name_format.clone()), position);
        }
        for (position, attr) in supplied.iter().flatten().enumerate() {
            if attr.name_format.is_some() {
                lookup
                    .entry((attr.name.clone(), None))
                    .or_insert(position);
            }
        }

        let mut evaluated: Vec<Option<Vec<AttributeValue>>> = vec![None; supplied.len()];
        let mut attributes = Vec::with_capacity(self.requested_attributes.len());

        for requested in &self.requested_attributes {
            let exact = (requested.name.clone(), requested.name_format.clone());
            let position = lookup.get(&exact).copied().or_else(|| {
                requested
                    .name_format
                    .as_ref()
                    .and_then(|_| lookup.get(&(requested.name.clone(), None)).copied())
            });

            let Some(position) = position else {
                if requested.is_required {
                    return Err(SamlError::RequiredAttributeMissing(requested.clone()));
                }
                continue;
            };

            let values = evaluated[position].get_or_insert_with(|| {
                supplied[position]
                    .take()
                    .map(|attr| attr.source.evaluate())
                    .unwrap_or_default()
            });

            attributes.push(Attribute {
                name: requested.name.clone(),
                name_format: requested.name_format.clone(),
                friendly_name: requested.friendly_name.clone(),
                values: values.clone(),
            });
        }

        tracing::debug!(
            "Resolved {} of {} requested attributes for service {}",
            attributes.len(),
            self.requested_attributes.len(),
            self.index
        );

        Ok(AttributeStatement { attributes })
    }

    /// Builds the `<md:AttributeConsumingService>` element.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        let element = XmlElement::new(MD_NS, "md", "AttributeConsumingService")
            .attr("index", self.index.to_string())
            .attr_opt("isDefault", self.is_default.map(|d| d.to_string()));
        let element = self.service_names.iter().fold(element, |element, name| {
            element.child(
                XmlElement::new(MD_NS, "md", "ServiceName")
                    .attr_ns(super::XML_NS, "xml", "lang", "en")
                    .text(name.as_str()),
            )
        });
        self.requested_attributes
            .iter()
            .fold(element, |element, attr| element.child(attr.to_element()))
    }

    /// Reads an `<md:AttributeConsumingService>` element.
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        let index = parse_u32_attr(element, "index")?.ok_or_else(|| {
            SamlError::MissingElement("index attribute on <AttributeConsumingService>".to_string())
        })?;
        Ok(Self {
            index,
            is_default: parse_bool_attr(element, "isDefault")?,
            service_names: element
                .children_named(MD_NS, "ServiceName")
                .map(|e| e.text_content().trim().to_string())
                .collect(),
            requested_attributes: element
                .children_named(MD_NS, "RequestedAttribute")
                .map(RequestedAttribute::from_element)
                .collect::<SamlResult<_>>()?,
        })
    }
}

impl Indexed for AttributeConsumingService {
    fn index(&self) -> Option<u32> {
        Some(self.index)
    }

    fn is_default(&self) -> Option<bool> {
        self.is_default
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::types::attrname_formats;

    fn name_and_age() -> AttributeConsumingService {
        AttributeConsumingService::new(
            1,
            vec![
                RequestedAttribute::required("name"),
                RequestedAttribute::optional("age"),
            ],
        )
    }

    #[test]
    fn required_attribute_supplied() {
        let statement = name_and_age()
            .create_statement(HashMap::from([("name", "cody")]))
            .unwrap();
        assert_eq!(statement.attributes.len(), 1);
        assert_eq!(statement.attributes[0].values, vec![AttributeValue::from("cody")]);
    }

    #[test]
    fn required_attribute_missing() {
        let err = name_and_age()
            .create_statement(HashMap::<String, String>::new())
            .unwrap_err();
        match err {
            SamlError::RequiredAttributeMissing(requested) => assert_eq!(requested.name, "name"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unrequested_attributes_are_dropped() {
        let supplied: Vec<(&str, AttributeValue)> = vec![
            ("name", "cody".into()),
            ("height", 73.into()),
        ];
        let statement = name_and_age().create_statement(supplied).unwrap();
        assert_eq!(statement.attributes.len(), 1);
        assert_eq!(statement.attributes[0].name, "name");
        assert!(statement.get("height").is_none());
    }

    #[test]
    fn output_follows_declaration_order() {
        let statement = name_and_age()
            .create_statement(vec![("age", AttributeValue::from(30)), ("name", "cody".into())])
            .unwrap();
        let names: Vec<_> = statement.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["name", "age"]);
    }

    #[test]
    fn format_falls_back_to_formatless_key() {
        let service = AttributeConsumingService::new(
            0,
            vec![RequestedAttribute::required("mail").with_format(attrname_formats::URI)],
        );
        let statement = service.create_statement([("mail", "a@example.com")]).unwrap();
        assert_eq!(statement.attributes[0].name_format.as_deref(), Some(attrname_formats::URI));
    }

    #[test]
    fn formatted_supply_matches_exactly() {
        let service = AttributeConsumingService::new(
            0,
            vec![RequestedAttribute::required("mail").with_format(attrname_formats::BASIC)],
        );
        let statement = service
            .create_statement([
                Attribute::single("mail", "uri@example.com").with_format(attrname_formats::URI),
                Attribute::single("mail", "basic@example.com").with_format(attrname_formats::BASIC),
            ])
            .unwrap();
        assert_eq!(statement.attributes.len(), 1);
        assert_eq!(
            statement.attributes[0].values,
            vec![AttributeValue::from("basic@example.com")]
        );
        assert_eq!(
            statement.attributes[0].name_format.as_deref(),
            Some(attrname_formats::BASIC)
        );
    }

    #[test]
    fn formatted_request_takes_other_format_through_formatless_key() {
        let service = AttributeConsumingService::new(
            0,
            vec![RequestedAttribute::required("mail").with_format(attrname_formats::BASIC)],
        );
        let supplied = Attribute::single("mail", "a@example.com").with_format(attrname_formats::URI);
        let statement = service.create_statement([supplied]).unwrap();
        assert_eq!(
            statement.attributes[0].values,
            vec![AttributeValue::from("a@example.com")]
        );
    }

    #[test]
    fn deferred_values_only_run_when_requested() {
        let calls = Rc::new(Cell::new(0));
        let name_calls = Rc::clone(&calls);
        let height_calls = Rc::clone(&calls);

        let statement = name_and_age()
            .create_statement([
                SuppliedAttribute::deferred("name", move || {
                    name_calls.set(name_calls.get() + 1);
                    vec!["cody".into()]
                }),
                SuppliedAttribute::deferred("height", move || {
                    height_calls.set(height_calls.get() + 10);
                    vec![73.into()]
                }),
            ])
            .unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(statement.attributes[0].values, vec![AttributeValue::from("cody")]);
    }

    #[test]
    fn statement_element_round_trip() {
        let statement = AttributeStatement {
            attributes: vec![
                Attribute::single("name", "cody"),
                Attribute::single("age", 30),
                Attribute::single("admin", true),
            ],
        };
        let parsed = AttributeStatement::from_element(&statement.to_element()).unwrap();
        assert_eq!(parsed, statement);
    }

    #[test]
    fn service_element_round_trip() {
        let mut service = name_and_age();
        service.service_names.push("Portal".to_string());
        service.is_default = Some(true);
        let parsed = AttributeConsumingService::from_element(&service.to_element()).unwrap();
        assert_eq!(parsed, service);
    }
}
