//! Namespace-aware XML tree used by the message and metadata models.
//!
//! Parsing is built on `quick-xml`'s `NsReader`, serialization on its
//! `Writer`. Exclusive canonicalization is written straight from the tree.

mod canonical;
mod parse;
mod serialize;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{SamlError, SamlResult};

pub use canonical::{ExclusiveC14n, DEFAULT_PREFIX_TOKEN};
pub use parse::XmlDocument;

/// A node in an element's child list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    /// A child element.
    Element(XmlElement),
    /// Character data, already unescaped.
    Text(String),
}

/// An attribute of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    /// Namespace prefix as written, if any.
    pub prefix: Option<String>,
    /// Local name.
    pub name: String,
    /// Resolved namespace URI (unprefixed attributes have none).
    pub namespace: Option<String>,
    /// Unescaped value.
    pub value: String,
}

/// An XML element with resolved namespaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    /// Namespace prefix as written, if any.
    pub prefix: Option<String>,
    /// Local name.
    pub name: String,
    /// Resolved namespace URI.
    pub namespace: Option<String>,
    /// Namespace declarations made on this element, as `(prefix, uri)`.
    /// A `None` prefix is the default namespace.
    pub namespaces: Vec<(Option<String>, String)>,
    /// Attributes in document order, excluding namespace declarations.
    pub attributes: Vec<XmlAttribute>,
    /// Children in document order.
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    /// Creates an element in `namespace` written with `prefix`.
    ///
    /// An empty prefix places the element in the default namespace.
    #[must_use]
    pub fn new(namespace: &str, prefix: &str, name: &str) -> Self {
        Self {
            prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
            name: name.to_string(),
            namespace: (!namespace.is_empty()).then(|| namespace.to_string()),
            namespaces: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Declares a namespace prefix on this element.
    #[must_use]
    pub fn declare(mut self, prefix: &str, namespace: &str) -> Self {
        let prefix = (!prefix.is_empty()).then(|| prefix.to_string());
        if !self.namespaces.iter().any(|(p, _)| *p == prefix) {
            self.namespaces.push((prefix, namespace.to_string()));
        }
        self
    }

    /// Adds an unqualified attribute.
    #[must_use]
    pub fn attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Adds an unqualified attribute when `value` is present.
    #[must_use]
    pub fn attr_opt(self, name: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.attr(name, value),
            None => self,
        }
    }

    /// Adds a namespace-qualified attribute.
    #[must_use]
    pub fn attr_ns(mut self, namespace: &str, prefix: &str, name: &str, value: impl Into<String>) -> Self {
        self.attributes.push(XmlAttribute {
            prefix: Some(prefix.to_string()),
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
            value: value.into(),
        });
        self
    }

    /// Appends a child element.
    #[must_use]
    pub fn child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    /// Appends a child element when present.
    #[must_use]
    pub fn child_opt(self, child: Option<XmlElement>) -> Self {
        match child {
            Some(child) => self.child(child),
            None => self,
        }
    }

    /// Appends character data.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    /// Sets or replaces an unqualified attribute.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attributes
            .iter_mut()
            .find(|a| a.namespace.is_none() && a.name == name)
        {
            Some(existing) => existing.value = value,
            None => self.attributes.push(XmlAttribute {
                prefix: None,
                name: name.to_string(),
                namespace: None,
                value,
            }),
        }
    }

    /// Returns true if this element has the given namespace and local name.
    #[must_use]
    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(namespace)
    }

    /// Returns the value of an unqualified attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.is_none() && a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Returns the value of a namespace-qualified attribute.
    #[must_use]
    pub fn attribute_ns(&self, namespace: &str, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.as_deref() == Some(namespace) && a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Returns an unqualified attribute or a `MissingElement` error.
    pub fn required_attribute(&self, name: &str) -> SamlResult<&str> {
        self.attribute(name).ok_or_else(|| {
            SamlError::MissingElement(format!("{} attribute on <{}>", name, self.name))
        })
    }

    /// Iterates over child elements.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// Returns the first child element with the given name.
    #[must_use]
    pub fn child_element(&self, namespace: &str, name: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.is(namespace, name))
    }

    /// Returns the first child element with the given name or a `MissingElement` error.
    pub fn required_child(&self, namespace: &str, name: &str) -> SamlResult<&XmlElement> {
        self.child_element(namespace, name)
            .ok_or_else(|| SamlError::MissingElement(format!("<{}> in <{}>", name, self.name)))
    }

    /// Iterates over child elements with the given name.
    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.elements().filter(move |e| e.is(namespace, name))
    }

    /// Returns the position of the first child element with the given name.
    #[must_use]
    pub fn child_position(&self, namespace: &str, name: &str) -> Option<usize> {
        self.children
            .iter()
            .position(|node| matches!(node, XmlNode::Element(e) if e.is(namespace, name)))
    }

    /// Returns the concatenated text of this element and its descendants.
    #[must_use]
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Returns the trimmed text content of a named child element.
    #[must_use]
    pub fn child_text(&self, namespace: &str, name: &str) -> Option<String> {
        self.child_element(namespace, name)
            .map(|e| e.text_content().trim().to_string())
    }

    /// Finds the element (self included) whose `ID` attribute equals `id`.
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<&XmlElement> {
        if self.attribute("ID") == Some(id) {
            return Some(self);
        }
        self.elements().find_map(|e| e.find_by_id(id))
    }

    /// Counts elements (self included) whose `ID` attribute equals `id`.
    #[must_use]
    pub fn count_id(&self, id: &str) -> usize {
        let own = usize::from(self.attribute("ID") == Some(id));
        own + self.elements().map(|e| e.count_id(id)).sum::<usize>()
    }

    /// Serializes this subtree as a standalone document.
    ///
    /// Namespace prefixes used by the subtree but declared on ancestors
    /// are re-declared, so the output of any element stands on its own.
    pub fn to_xml(&self) -> SamlResult<String> {
        serialize::write_element(self)
    }

    /// Returns the namespace declarations `target` inherits from its
    /// ancestors within this document, outermost first.
    ///
    /// `None` when `target` is not this element or one of its descendants.
    #[must_use]
    pub fn inherited_namespaces(&self, target: &XmlElement) -> Option<Vec<(Option<String>, String)>> {
        let mut scope = Vec::new();
        collect_scope(self, target, &mut scope).then_some(scope)
    }
}

fn collect_scope(
    node: &XmlElement,
    target: &XmlElement,
    scope: &mut Vec<(Option<String>, String)>,
) -> bool {
    if std::ptr::eq(node, target) {
        return true;
    }
    let mark = scope.len();
    scope.extend(node.namespaces.iter().cloned());
    if node.elements().any(|child| collect_scope(child, target, scope)) {
        return true;
    }
    scope.truncate(mark);
    false
}

fn collect_text(element: &XmlElement, out: &mut String) {
    for node in &element.children {
        match node {
            XmlNode::Text(t) => out.push_str(t),
            XmlNode::Element(e) => collect_text(e, out),
        }
    }
}

/// Formats a timestamp the way SAML `xs:dateTime` attributes carry it.
#[must_use]
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parses an `xs:dateTime` attribute value.
pub fn parse_instant(value: &str) -> SamlResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SamlError::CorruptMessage(format!("invalid timestamp '{}': {}", value, e)))
}

/// Parses an optional `xs:dateTime` attribute.
pub fn parse_instant_attr(element: &XmlElement, name: &str) -> SamlResult<Option<DateTime<Utc>>> {
    element.attribute(name).map(parse_instant).transpose()
}

/// Parses an optional `xs:boolean` attribute.
pub fn parse_bool_attr(element: &XmlElement, name: &str) -> SamlResult<Option<bool>> {
    element
        .attribute(name)
        .map(|v| match v.trim() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(SamlError::CorruptMessage(format!(
                "invalid boolean '{}' for {}",
                other, name
            ))),
        })
        .transpose()
}

/// Parses an optional unsigned integer attribute.
pub fn parse_u32_attr(element: &XmlElement, name: &str) -> SamlResult<Option<u32>> {
    element
        .attribute(name)
        .map(|v| {
            v.trim().parse::<u32>().map_err(|e| {
                SamlError::CorruptMessage(format!("invalid integer '{}' for {}: {}", v, name, e))
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SAMLP_NS, SAML_NS};

    #[test]
    fn builder_and_queries() {
        let element = XmlElement::new(SAMLP_NS, "samlp", "AuthnRequest")
            .attr("ID", "_abc")
            .child(XmlElement::new(SAML_NS, "saml", "Issuer").text(" https://sp.example.com "));

        assert!(element.is(SAMLP_NS, "AuthnRequest"));
        assert_eq!(element.attribute("ID"), Some("_abc"));
        assert_eq!(
            element.child_text(SAML_NS, "Issuer").as_deref(),
            Some("https://sp.example.com")
        );
        assert_eq!(element.child_position(SAML_NS, "Issuer"), Some(0));
        assert!(element.find_by_id("_abc").is_some());
        assert_eq!(element.count_id("_abc"), 1);
    }

    #[test]
    fn set_attribute_replaces() {
        let mut element = XmlElement::new(SAML_NS, "saml", "Issuer").attr("Format", "a");
        element.set_attribute("Format", "b");
        assert_eq!(element.attributes.len(), 1);
        assert_eq!(element.attribute("Format"), Some("b"));
    }

    #[test]
    fn instants_round_trip() {
        let instant = parse_instant("2024-01-15T10:30:00Z").unwrap();
        assert_eq!(format_instant(&instant), "2024-01-15T10:30:00Z");
        assert!(parse_instant("yesterday").is_err());
    }

    #[test]
    fn boolean_attribute_forms() {
        let element = XmlElement::new(SAMLP_NS, "samlp", "AuthnRequest")
            .attr("IsPassive", "1")
            .attr("ForceAuthn", "maybe");
        assert_eq!(parse_bool_attr(&element, "IsPassive").unwrap(), Some(true));
        assert!(parse_bool_attr(&element, "ForceAuthn").is_err());
        assert_eq!(parse_bool_attr(&element, "Missing").unwrap(), None);
    }
}
