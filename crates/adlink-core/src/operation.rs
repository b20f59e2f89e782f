//! Directory operation types
//!
//! Entries returned by searches, filters, search requests, new entries for
//! add, and attribute modifications.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::codec::{escape_filter_bytes, escape_filter_value};

/// An entry returned by a search.
///
/// Attribute names are kept as the server sent them; lookups are
/// case-insensitive because LDAP attribute descriptions are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Distinguished name as returned by the server.
    pub dn: String,

    /// Text-valued attributes.
    #[serde(default)]
    pub attrs: HashMap<String, Vec<String>>,

    /// Attributes whose values are not valid UTF-8.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

impl Entry {
    /// Create an entry with no attributes.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Default::default()
        }
    }

    /// Add a text attribute using builder pattern.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.entry(name.into()).or_default().push(value.into());
        self
    }

    /// Add a binary attribute using builder pattern.
    pub fn with_bytes(mut self, name: impl Into<String>, value: Vec<u8>) -> Self {
        self.bin_attrs.entry(name.into()).or_default().push(value);
        self
    }

    fn lookup<'a, V>(map: &'a HashMap<String, V>, name: &str) -> Option<&'a V> {
        map.get(name).or_else(|| {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }

    /// All text values of an attribute.
    pub fn values(&self, name: &str) -> &[String] {
        Self::lookup(&self.attrs, name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First text value of an attribute.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }

    /// First value of a binary attribute.
    ///
    /// Binary values that happen to be valid UTF-8 are delivered as text by
    /// the protocol layer, so both maps are consulted.
    pub fn first_bytes(&self, name: &str) -> Option<&[u8]> {
        Self::lookup(&self.bin_attrs, name)
            .and_then(|v| v.first())
            .map(Vec::as_slice)
            .or_else(|| self.first(name).map(str::as_bytes))
    }

    /// Whether the attribute is present with at least one value.
    pub fn has(&self, name: &str) -> bool {
        !self.values(name).is_empty()
            || Self::lookup(&self.bin_attrs, name).is_some_and(|v| !v.is_empty())
    }

    /// Attribute names matching `prefix` case-insensitively (e.g. `member;range=`).
    pub fn names_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.attrs
            .keys()
            .filter(move |k| {
                k.get(..prefix.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
            })
            .map(String::as_str)
    }

    /// Whether `objectClass` contains `class`.
    pub fn has_object_class(&self, class: &str) -> bool {
        self.values("objectClass")
            .iter()
            .any(|c| c.eq_ignore_ascii_case(class))
    }
}

/// Search scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// The base object only.
    Base,
    /// Immediate children of the base.
    OneLevel,
    /// The base and everything below it.
    #[default]
    Subtree,
}

/// Filter for search operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// Match objects where attribute equals value.
    Equals { attribute: String, value: String },

    /// Match objects where a binary attribute equals the given bytes.
    EqualsBytes { attribute: String, value: Vec<u8> },

    /// Match objects where attribute exists (has any value).
    Present { attribute: String },

    /// Logical AND of multiple filters.
    And { filters: Vec<Filter> },

    /// Logical OR of multiple filters.
    Or { filters: Vec<Filter> },
}

impl Filter {
    /// Create an equals filter.
    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Create a binary equals filter.
    pub fn eq_bytes(attribute: impl Into<String>, value: Vec<u8>) -> Self {
        Filter::EqualsBytes {
            attribute: attribute.into(),
            value,
        }
    }

    /// Create a present (attribute exists) filter.
    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present {
            attribute: attribute.into(),
        }
    }

    /// Create an AND filter.
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And { filters }
    }

    /// Create an OR filter.
    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or { filters }
    }

    /// Render as an RFC 4515 filter string with every value escaped.
    pub fn to_ldap_string(&self) -> String {
        match self {
            Filter::And { filters } => {
                let inner: String = filters.iter().map(Filter::to_ldap_string).collect();
                format!("(&{inner})")
            }
            Filter::Or { filters } => {
                let inner: String = filters.iter().map(Filter::to_ldap_string).collect();
                format!("(|{inner})")
            }
            Filter::Equals { attribute, value } => {
                format!("({attribute}={})", escape_filter_value(value))
            }
            Filter::EqualsBytes { attribute, value } => {
                format!("({attribute}={})", escape_filter_bytes(value))
            }
            Filter::Present { attribute } => format!("({attribute}=*)"),
        }
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_ldap_string())
    }
}

/// Parameters of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Search base DN.
    pub base: String,
    /// Search scope.
    pub scope: Scope,
    /// Search filter.
    pub filter: Filter,
    /// Attributes to return; empty means all user attributes.
    pub attributes: Vec<String>,
    /// Simple paged results page size; `None` disables paging.
    pub page_size: Option<u32>,
}

impl SearchRequest {
    /// Subtree search under `base`.
    pub fn subtree(base: impl Into<String>, filter: Filter) -> Self {
        Self {
            base: base.into(),
            scope: Scope::Subtree,
            filter,
            attributes: Vec::new(),
            page_size: None,
        }
    }

    /// Read a single entry by DN.
    pub fn base_object(dn: impl Into<String>) -> Self {
        Self {
            base: dn.into(),
            scope: Scope::Base,
            filter: Filter::present("objectClass"),
            attributes: Vec::new(),
            page_size: None,
        }
    }

    /// Set the attributes to return.
    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Enable paged results.
    pub fn paged(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

/// An entry to be created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewEntry {
    /// DN of the new entry.
    pub dn: String,
    /// Attributes in insertion order.
    pub attributes: Vec<(String, Vec<Vec<u8>>)>,
}

impl NewEntry {
    /// Create a new entry with no attributes.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: Vec::new(),
        }
    }

    /// Add a single-valued text attribute.
    pub fn with(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_bytes(name, value.into().into_bytes())
    }

    /// Add a multi-valued text attribute.
    pub fn with_values<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes.push((
            name.into(),
            values.into_iter().map(|v| v.into().into_bytes()).collect(),
        ));
        self
    }

    /// Add a single-valued binary attribute.
    pub fn with_bytes(mut self, name: impl Into<String>, value: Vec<u8>) -> Self {
        let name = name.into();
        match self
            .attributes
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some((_, values)) => values.push(value),
            None => self.attributes.push((name, vec![value])),
        }
        self
    }

    /// Add a text attribute only when a value is present.
    pub fn with_opt(self, name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.with(name, v),
            None => self,
        }
    }

    /// Names of all attributes (for logging; values may be secrets).
    pub fn attribute_names(&self) -> Vec<&str> {
        self.attributes.iter().map(|(n, _)| n.as_str()).collect()
    }
}

/// Kind of attribute modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModOp {
    /// Add values.
    Add,
    /// Delete the given values, or the whole attribute when none are given.
    Delete,
    /// Replace all values.
    Replace,
}

/// One attribute change within a modify request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    /// Operation.
    pub op: ModOp,
    /// Attribute name.
    pub attribute: String,
    /// Values (raw bytes, so binary attributes pass through unchanged).
    pub values: Vec<Vec<u8>>,
}

impl Modification {
    fn text(op: ModOp, attribute: impl Into<String>, values: impl IntoIterator<Item = String>) -> Self {
        Self {
            op,
            attribute: attribute.into(),
            values: values.into_iter().map(String::into_bytes).collect(),
        }
    }

    /// Add text values.
    pub fn add<I, S>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::text(ModOp::Add, attribute, values.into_iter().map(Into::into))
    }

    /// Delete specific text values.
    pub fn delete<I, S>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::text(ModOp::Delete, attribute, values.into_iter().map(Into::into))
    }

    /// Remove the attribute entirely.
    pub fn clear(attribute: impl Into<String>) -> Self {
        Self {
            op: ModOp::Delete,
            attribute: attribute.into(),
            values: Vec::new(),
        }
    }

    /// Replace with a single text value.
    pub fn replace(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::text(ModOp::Replace, attribute, [value.into()])
    }

    /// Replace with raw bytes.
    pub fn replace_bytes(attribute: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            op: ModOp::Replace,
            attribute: attribute.into(),
            values: vec![value],
        }
    }

    /// Values as UTF-8 text, skipping anything that is not.
    pub fn text_values(&self) -> impl Iterator<Item = &str> {
        self.values.iter().filter_map(|v| std::str::from_utf8(v).ok())
    }
}
