//! Transport endpoints and indexed-endpoint resolution.
//!
//! Metadata lists endpoints such as assertion consumer services with an
//! optional `index` and `isDefault` flag. Requests refer to them by index,
//! or not at all, in which case the default endpoint applies.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{SamlBinding, MD_NS};
use crate::error::SamlResult;
use crate::xml::{parse_bool_attr, parse_u32_attr, XmlElement};

/// A transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Binding URI.
    pub binding: String,

    /// Endpoint URL.
    pub location: String,

    /// Optional separate URL for responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_location: Option<String>,
}

impl Endpoint {
    /// Creates an endpoint for a binding and location.
    #[must_use]
    pub fn new(binding: SamlBinding, location: impl Into<String>) -> Self {
        Self {
            binding: binding.uri().to_string(),
            location: location.into(),
            response_location: None,
        }
    }

    /// Returns the parsed binding.
    #[must_use]
    pub fn parsed_binding(&self) -> Option<SamlBinding> {
        SamlBinding::from_uri(&self.binding)
    }

    /// Returns the URL responses should be sent to.
    #[must_use]
    pub fn response_url(&self) -> &str {
        self.response_location.as_deref().unwrap_or(&self.location)
    }

    /// Builds a metadata endpoint element with the given local name.
    #[must_use]
    pub fn to_element(&self, name: &str) -> XmlElement {
        XmlElement::new(MD_NS, "md", name)
            .attr("Binding", self.binding.as_str())
            .attr("Location", self.location.as_str())
            .attr_opt("ResponseLocation", self.response_location.as_deref())
    }

    /// Reads a metadata endpoint element.
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            binding: element.required_attribute("Binding")?.to_string(),
            location: element.required_attribute("Location")?.to_string(),
            response_location: element.attribute("ResponseLocation").map(str::to_string),
        })
    }
}

/// Something that can be selected by an optional index or a default flag.
pub trait Indexed {
    /// The declared index, if any.
    fn index(&self) -> Option<u32>;

    /// The explicit default flag, if declared.
    fn is_default(&self) -> Option<bool>;
}

/// An endpoint carrying an index and default flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedEndpoint {
    /// The endpoint itself.
    #[serde(flatten)]
    pub endpoint: Endpoint,

    /// Declared index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,

    /// Explicit default flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
}

impl IndexedEndpoint {
    /// Creates an indexed endpoint.
    #[must_use]
    pub fn new(binding: SamlBinding, location: impl Into<String>, index: u32) -> Self {
        Self {
            endpoint: Endpoint::new(binding, location),
            index: Some(index),
            is_default: None,
        }
    }

    /// Sets the explicit default flag.
    #[must_use]
    pub const fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = Some(is_default);
        self
    }

    /// Returns the endpoint location.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.endpoint.location
    }

    /// Builds a metadata indexed endpoint element.
    #[must_use]
    pub fn to_element(&self, name: &str) -> XmlElement {
        self.endpoint
            .to_element(name)
            .attr_opt("index", self.index.map(|i| i.to_string()))
            .attr_opt("isDefault", self.is_default.map(|d| d.to_string()))
    }

    /// Reads a metadata indexed endpoint element.
    pub fn from_element(element: &XmlElement) -> SamlResult<Self> {
        Ok(Self {
            endpoint: Endpoint::from_element(element)?,
            index: parse_u32_attr(element, "index")?,
            is_default: parse_bool_attr(element, "isDefault")?,
        })
    }
}

impl Indexed for IndexedEndpoint {
    fn index(&self) -> Option<u32> {
        self.index
    }

    fn is_default(&self) -> Option<bool> {
        self.is_default
    }
}

/// Ordered collection resolving elements by index or default.
///
/// Elements are kept sorted ascending by index, with a missing index
/// ordered as 0. Duplicate indices are allowed: index lookup returns the
/// last one inserted. Both lookups are computed once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEndpoints<T> {
    items: Vec<T>,
    by_index: HashMap<u32, usize>,
    default: Option<usize>,
}

impl<T: Indexed> IndexedEndpoints<T> {
    /// Creates a collection, sorting `items` by index.
    #[must_use]
    pub fn new(mut items: Vec<T>) -> Self {
        items.sort_by_key(|item| item.index().unwrap_or(0));

        let mut by_index = HashMap::new();
        for (position, item) in items.iter().enumerate() {
            if let Some(index) = item.index() {
                by_index.insert(index, position);
            }
        }

        let default = items
            .iter()
            .position(|item| item.is_default() == Some(true))
            .or(if items.is_empty() { None } else { Some(0) });

        Self {
            items,
            by_index,
            default,
        }
    }

    /// Returns the element with the given index.
    #[must_use]
    pub fn by_index(&self, index: u32) -> Option<&T> {
        self.by_index.get(&index).map(|&position| &self.items[position])
    }

    /// Returns the default element.
    ///
    /// The first element flagged as default, else the first element in
    /// index order, else `None` when empty.
    #[must_use]
    pub fn default(&self) -> Option<&T> {
        self.default.map(|position| &self.items[position])
    }

    /// Resolves an optional index: by index when given, else the default.
    #[must_use]
    pub fn resolve(&self, index: Option<u32>) -> Option<&T> {
        match index {
            Some(index) => self.by_index(index),
            None => self.default(),
        }
    }
}

impl<T> IndexedEndpoints<T> {
    /// Iterates over elements in index order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Returns the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for IndexedEndpoints<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            by_index: HashMap::new(),
            default: None,
        }
    }
}

impl<T: Indexed> FromIterator<T> for IndexedEndpoints<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a, T> IntoIterator for &'a IndexedEndpoints<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
