//! Serialization with namespace fix-up.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::{XmlElement, XmlNode};
use crate::error::{SamlError, SamlResult};

type Scope = Vec<(Option<String>, String)>;

/// Writes `element` and its subtree, declaring every namespace prefix the
/// subtree uses that is not declared within it.
pub(super) fn write_element(element: &XmlElement) -> SamlResult<String> {
    let mut writer = Writer::new(Vec::new());
    let mut scope = Scope::new();
    write_node(&mut writer, element, &mut scope)?;
    String::from_utf8(writer.into_inner())
        .map_err(|e| SamlError::CorruptMessage(format!("serialized XML is not UTF-8: {e}")))
}

fn write_node(
    writer: &mut Writer<Vec<u8>>,
    element: &XmlElement,
    scope: &mut Scope,
) -> SamlResult<()> {
    let mark = scope.len();
    let mut declared: Scope = Vec::new();

    for (prefix, uri) in &element.namespaces {
        bind(scope, &mut declared, prefix.as_deref(), uri, true);
    }

    let qname = match (&element.namespace, &element.prefix) {
        (Some(uri), prefix) => {
            bind(scope, &mut declared, prefix.as_deref(), uri, false);
            qualified(prefix.as_deref(), &element.name)
        }
        (None, _) => {
            if lookup(scope, None).is_some_and(|uri| !uri.is_empty()) {
                bind(scope, &mut declared, None, "", false);
            }
            element.name.clone()
        }
    };

    let mut attributes = Vec::with_capacity(element.attributes.len());
    for attr in &element.attributes {
        let name = match (&attr.namespace, &attr.prefix) {
            (Some(_), Some(prefix)) if prefix == "xml" => qualified(Some(prefix), &attr.name),
            (Some(uri), Some(prefix)) => {
                bind(scope, &mut declared, Some(prefix), uri, false);
                qualified(Some(prefix), &attr.name)
            }
            _ => attr.name.clone(),
        };
        attributes.push((name, attr.value.as_str()));
    }

    let mut start = BytesStart::new(qname.as_str());
    for (prefix, uri) in &declared {
        let key = match prefix {
            Some(p) => format!("xmlns:{p}"),
            None => "xmlns".to_string(),
        };
        start.push_attribute((key.as_str(), uri.as_str()));
    }
    for (name, value) in &attributes {
        start.push_attribute((name.as_str(), *value));
    }

    if element.children.is_empty() {
        emit(writer, Event::Empty(start))?;
    } else {
        emit(writer, Event::Start(start))?;
        for child in &element.children {
            match child {
                XmlNode::Element(e) => write_node(writer, e, scope)?,
                XmlNode::Text(t) => emit(writer, Event::Text(BytesText::new(t)))?,
            }
        }
        emit(writer, Event::End(BytesEnd::new(qname.as_str())))?;
    }

    scope.truncate(mark);
    Ok(())
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> SamlResult<()> {
    writer
        .write_event(event)
        .map_err(|e| SamlError::CorruptMessage(format!("XML write error: {e}")))
}

fn qualified(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(p) => format!("{p}:{name}"),
        None => name.to_string(),
    }
}

fn lookup<'a>(scope: &'a Scope, prefix: Option<&str>) -> Option<&'a str> {
    scope
        .iter()
        .rev()
        .find(|(p, _)| p.as_deref() == prefix)
        .map(|(_, uri)| uri.as_str())
}

/// Records a declaration on the current element unless the binding is
/// already in effect. Explicit declarations are always written.
fn bind(scope: &mut Scope, declared: &mut Scope, prefix: Option<&str>, uri: &str, explicit: bool) {
    if declared.iter().any(|(p, _)| p.as_deref() == prefix) {
        return;
    }
    if !explicit && lookup(scope, prefix) == Some(uri) {
        return;
    }
    let binding = (prefix.map(str::to_string), uri.to_string());
    scope.push(binding.clone());
    declared.push(binding);
}
