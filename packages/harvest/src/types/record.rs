//! Catalog identifiers and harvested records.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A unique, opaque catalog key.
///
/// Identity for deduplication across search terms and for resume matching
/// between the checkpoint and the output store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Create an identifier from its catalog representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as written by the catalog.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Identifier {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A sorted, deduplicated set of identifiers.
pub type IdSet = BTreeSet<Identifier>;

/// A record harvested from a detail page.
///
/// Field insertion order is preserved and becomes the output column order.
/// Absent fields are simply absent; the schema treats missing values as
/// empty, not as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Identifier this record was fetched for
    pub id: Identifier,

    /// Field name to value, in extraction order
    pub fields: IndexMap<String, String>,
}

impl Record {
    /// Create an empty record for an identifier.
    pub fn new(id: Identifier) -> Self {
        Self {
            id,
            fields: IndexMap::new(),
        }
    }

    /// Set a field value, replacing any previous value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Set a field value in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Look up a field value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Number of populated fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record carries no fields beyond its identifier.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_ordering_is_stable() {
        let mut set = IdSet::new();
        set.insert(Identifier::new("00213"));
        set.insert(Identifier::new("00007"));
        set.insert(Identifier::new("00213"));

        let ids: Vec<_> = set.iter().map(|i| i.as_str().to_string()).collect();
        assert_eq!(ids, vec!["00007", "00213"]);
    }

    #[test]
    fn test_record_preserves_field_order() {
        let record = Record::new(Identifier::new("42"))
            .with_field("Name", "DOE, JOHN")
            .with_field("Institution", "Elsewhere");

        let names: Vec<_> = record.fields.keys().cloned().collect();
        assert_eq!(names, vec!["Name", "Institution"]);
        assert_eq!(record.get("Name"), Some("DOE, JOHN"));
        assert_eq!(record.get("Race"), None);
    }
}
