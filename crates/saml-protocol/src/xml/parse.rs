//! Tree construction over `quick_xml::NsReader`.

use std::borrow::Cow;

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;

use super::{XmlAttribute, XmlElement, XmlNode};
use crate::error::{SamlError, SamlResult};

/// Entry point for parsing untrusted XML into an [`XmlElement`] tree.
pub struct XmlDocument;

impl XmlDocument {
    /// Parses a complete document and returns its root element.
    ///
    /// DOCTYPE declarations are rejected outright. Comments, processing
    /// instructions and the XML declaration are dropped.
    pub fn parse(xml: &str) -> SamlResult<XmlElement> {
        let mut reader = NsReader::from_str(xml);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            let (resolved, event) = reader.read_resolved_event()?;
            let namespace = owned_namespace(resolved)?;

            match event {
                Event::Start(start) => {
                    let element = open_element(&reader, &start, namespace)?;
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let element = open_element(&reader, &start, namespace)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| {
                        SamlError::CorruptMessage("unbalanced closing tag".to_string())
                    })?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let text = unescape_text(&text)?;
                    push_text(&mut stack, &text)?;
                }
                Event::CData(data) => {
                    let text = std::str::from_utf8(&data)
                        .map_err(|e| SamlError::CorruptMessage(format!("invalid UTF-8: {e}")))?;
                    push_text(&mut stack, &normalize_line_ends(text))?;
                }
                Event::DocType(_) => {
                    return Err(SamlError::CorruptMessage(
                        "DOCTYPE declarations are not allowed".to_string(),
                    ));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(SamlError::CorruptMessage(
                "unexpected end of document".to_string(),
            ));
        }

        root.ok_or_else(|| SamlError::CorruptMessage("document has no root element".to_string()))
    }
}

fn owned_namespace(resolved: ResolveResult<'_>) -> SamlResult<Option<String>> {
    match resolved {
        ResolveResult::Bound(ns) => Ok(Some(utf8(ns.into_inner())?)),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(SamlError::CorruptMessage(format!(
            "undeclared namespace prefix '{}'",
            String::from_utf8_lossy(&prefix)
        ))),
    }
}

fn utf8(bytes: &[u8]) -> SamlResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| SamlError::CorruptMessage(format!("invalid UTF-8: {e}")))
}

fn open_element(
    reader: &NsReader<&[u8]>,
    start: &BytesStart<'_>,
    namespace: Option<String>,
) -> SamlResult<XmlElement> {
    let qname = start.name();
    let mut element = XmlElement {
        prefix: qname.prefix().map(|p| utf8(p.as_ref())).transpose()?,
        name: utf8(qname.local_name().as_ref())?,
        namespace,
        namespaces: Vec::new(),
        attributes: Vec::new(),
        children: Vec::new(),
    };

    for attr in start.attributes() {
        let attr = attr?;
        let key = attr.key.as_ref();
        let value = unescape_attribute(&attr.value)?;

        if key == b"xmlns" {
            element.namespaces.push((None, value));
            continue;
        }
        if let Some(prefix) = key.strip_prefix(b"xmlns:") {
            element.namespaces.push((Some(utf8(prefix)?), value));
            continue;
        }

        let (resolved, local) = reader.resolve_attribute(attr.key);
        let namespace = owned_namespace(resolved)?;
        let name = utf8(local.as_ref())?;
        if element
            .attributes
            .iter()
            .any(|a| a.name == name && a.namespace == namespace)
        {
            return Err(SamlError::CorruptMessage(format!(
                "duplicate attribute '{}' on <{}>",
                name, element.name
            )));
        }
        element.attributes.push(XmlAttribute {
            prefix: attr.key.prefix().map(|p| utf8(p.as_ref())).transpose()?,
            name,
            namespace,
            value,
        });
    }

    Ok(element)
}

/// Line ends arrive as `\n`, as an XML processor must deliver them.
fn normalize_line_ends(raw: &str) -> Cow<'_, str> {
    if raw.contains('\r') {
        Cow::Owned(raw.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(raw)
    }
}

fn unescape_text(raw: &[u8]) -> SamlResult<String> {
    let raw = std::str::from_utf8(raw)
        .map_err(|e| SamlError::CorruptMessage(format!("invalid UTF-8: {e}")))?;
    unescape(&normalize_line_ends(raw))
        .map(Cow::into_owned)
        .map_err(|e| SamlError::CorruptMessage(format!("XML text error: {e}")))
}

/// Literal whitespace in an attribute value becomes a space before
/// character references are expanded, so `&#9;` still yields a tab.
fn unescape_attribute(raw: &[u8]) -> SamlResult<String> {
    let raw = std::str::from_utf8(raw)
        .map_err(|e| SamlError::CorruptMessage(format!("invalid UTF-8: {e}")))?;
    let spaced = normalize_line_ends(raw).replace(['\t', '\n'], " ");
    unescape(&spaced)
        .map(Cow::into_owned)
        .map_err(|e| SamlError::CorruptMessage(format!("XML attribute error: {e}")))
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> SamlResult<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(XmlNode::Element(element));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(SamlError::CorruptMessage(
            "multiple root elements".to_string(),
        )),
    }
}

fn push_text(stack: &mut [XmlElement], text: &str) -> SamlResult<()> {
    match stack.last_mut() {
        Some(parent) => {
            if let Some(XmlNode::Text(previous)) = parent.children.last_mut() {
                previous.push_str(text);
            } else {
                parent.children.push(XmlNode::Text(text.to_string()));
            }
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(SamlError::CorruptMessage(
            "text content outside the root element".to_string(),
        )),
    }
}
