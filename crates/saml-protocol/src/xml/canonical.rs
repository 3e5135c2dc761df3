//! Exclusive XML canonicalization (exc-c14n, comments omitted).
//!
//! Written directly from the element tree. A namespace declaration is
//! rendered only where its prefix is visibly used by the element or one of
//! its attributes, or is listed in the `InclusiveNamespaces` prefix list,
//! and only when the nearest rendered ancestor does not already bind it to
//! the same URI.

use super::{XmlElement, XmlNode};

type Bindings = Vec<(Option<String>, String)>;

/// The token an `InclusiveNamespaces` prefix list uses for the default namespace.
pub const DEFAULT_PREFIX_TOKEN: &str = "#default";

/// Exclusive canonicalization of one subtree.
#[derive(Debug, Clone, Default)]
pub struct ExclusiveC14n {
    inherited: Bindings,
    inclusive_prefixes: Vec<Option<String>>,
    omitted_child: Option<usize>,
}

impl ExclusiveC14n {
    /// Canonicalization with no inherited namespaces and no inclusive prefixes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespace declarations in scope from the subtree's ancestors.
    ///
    /// Only consulted for inclusive prefixes; visibly used prefixes carry
    /// their resolved URI on the tree itself.
    #[must_use]
    pub fn with_inherited(mut self, inherited: Bindings) -> Self {
        self.inherited = inherited;
        self
    }

    /// Prefixes from an `InclusiveNamespaces PrefixList`, rendered like
    /// inclusive C14N would render them.
    #[must_use]
    pub fn with_inclusive_prefixes<S: AsRef<str>>(mut self, prefixes: &[S]) -> Self {
        self.inclusive_prefixes = prefixes
            .iter()
            .map(|p| match p.as_ref() {
                DEFAULT_PREFIX_TOKEN => None,
                prefix => Some(prefix.to_string()),
            })
            .collect();
        self
    }

    /// Leaves out the apex element's child node at `position`.
    #[must_use]
    pub fn omitting_child(mut self, position: usize) -> Self {
        self.omitted_child = Some(position);
        self
    }

    /// Returns the canonical octets of `element` and its descendants.
    #[must_use]
    pub fn canonicalize(&self, element: &XmlElement) -> Vec<u8> {
        let mut out = String::new();
        let mut in_scope = self.inherited.clone();
        let mut rendered = Bindings::new();
        self.write_element(element, true, &mut in_scope, &mut rendered, &mut out);
        out.into_bytes()
    }

    fn write_element(
        &self,
        element: &XmlElement,
        apex: bool,
        in_scope: &mut Bindings,
        rendered: &mut Bindings,
        out: &mut String,
    ) {
        let scope_mark = in_scope.len();
        let rendered_mark = rendered.len();
        in_scope.extend(element.namespaces.iter().cloned());

        let mut declarations = self.declarations(element, in_scope, rendered);
        declarations.sort_by(|a, b| a.0.cmp(&b.0));
        rendered.extend(declarations.iter().cloned());

        let mut attributes: Vec<(&str, &str, String, &str)> = element
            .attributes
            .iter()
            .map(|a| {
                (
                    a.namespace.as_deref().unwrap_or_default(),
                    a.name.as_str(),
                    qualified(a.prefix.as_deref(), &a.name),
                    a.value.as_str(),
                )
            })
            .collect();
        attributes.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let qname = qualified(element.prefix.as_deref(), &element.name);
        out.push('<');
        out.push_str(&qname);
        for (prefix, uri) in &declarations {
            match prefix {
                Some(p) => {
                    out.push_str(" xmlns:");
                    out.push_str(p);
                }
                None => out.push_str(" xmlns"),
            }
            out.push_str("=\"");
            escape_attribute(uri, out);
            out.push('"');
        }
        for (_, _, name, value) in &attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            escape_attribute(value, out);
            out.push('"');
        }
        out.push('>');

        for (position, child) in element.children.iter().enumerate() {
            if apex && self.omitted_child == Some(position) {
                continue;
            }
            match child {
                XmlNode::Element(e) => self.write_element(e, false, in_scope, rendered, out),
                XmlNode::Text(t) => escape_text(t, out),
            }
        }

        out.push_str("</");
        out.push_str(&qname);
        out.push('>');

        in_scope.truncate(scope_mark);
        rendered.truncate(rendered_mark);
    }

    /// Namespace nodes to render on `element`, unsorted.
    fn declarations(&self, element: &XmlElement, in_scope: &Bindings, rendered: &Bindings) -> Bindings {
        let mut candidates: Bindings = vec![(
            element.prefix.clone(),
            element.namespace.clone().unwrap_or_default(),
        )];
        for attr in &element.attributes {
            if let (Some(prefix), Some(uri)) = (&attr.prefix, &attr.namespace) {
                if prefix != "xml" {
                    candidates.push((Some(prefix.clone()), uri.clone()));
                }
            }
        }
        for prefix in &self.inclusive_prefixes {
            if let Some(uri) = lookup(in_scope, prefix.as_deref()) {
                candidates.push((prefix.clone(), uri.to_string()));
            }
        }

        let mut declarations = Bindings::new();
        for (prefix, uri) in candidates {
            if declarations.iter().any(|(p, _)| *p == prefix) {
                continue;
            }
            let already_rendered = match lookup(rendered, prefix.as_deref()) {
                Some(existing) => existing == uri,
                // An empty default namespace needs no declaration until a
                // non-empty one has been rendered above it.
                None => prefix.is_none() && uri.is_empty(),
            };
            if !already_rendered {
                declarations.push((prefix, uri));
            }
        }
        declarations
    }
}

fn lookup<'a>(bindings: &'a Bindings, prefix: Option<&str>) -> Option<&'a str> {
    bindings
        .iter()
        .rev()
        .find(|(p, _)| p.as_deref() == prefix)
        .map(|(_, uri)| uri.as_str())
}

fn qualified(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(p) => format!("{p}:{name}"),
        None => name.to_string(),
    }
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}

impl XmlElement {
    /// Returns the exclusive canonical form of this subtree.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        ExclusiveC14n::new().canonicalize(self)
    }
}
