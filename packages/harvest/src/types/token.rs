//! Hidden form state extracted from catalog responses.

use indexmap::IndexMap;

/// The opaque hidden state fields a postback server requires to be echoed
/// back on the next request, plus the sequence number assigned when the
/// fields were extracted.
///
/// Field values are round-tripped byte-for-byte; the library never inspects
/// or rewrites them. The sequence number lives beside the field bag and is
/// what lets [`crate::postback::PostbackBuilder`] reject a token that has
/// already been superseded by a newer extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateToken {
    fields: IndexMap<String, String>,
    seq: u64,
}

impl StateToken {
    /// Create a token from extracted fields and its extraction sequence.
    pub fn new(fields: IndexMap<String, String>, seq: u64) -> Self {
        Self { fields, seq }
    }

    /// Sequence number assigned at extraction time.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// All hidden fields, in document order.
    pub fn fields(&self) -> &IndexMap<String, String> {
        &self.fields
    }

    /// Look up a single field value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Number of fields carried.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no fields were extracted.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_preserve_document_order() {
        let mut fields = IndexMap::new();
        fields.insert("__VIEWSTATE".to_string(), "AAAA".to_string());
        fields.insert("__EVENTVALIDATION".to_string(), "BBBB".to_string());

        let token = StateToken::new(fields, 1);

        let names: Vec<_> = token.fields().keys().cloned().collect();
        assert_eq!(names, vec!["__VIEWSTATE", "__EVENTVALIDATION"]);
        assert_eq!(token.get("__VIEWSTATE"), Some("AAAA"));
        assert_eq!(token.seq(), 1);
    }
}
