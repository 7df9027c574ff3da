//! Postback request construction.
//!
//! Each server response yields a fresh token set that invalidates the
//! previous one; combining a stale token with a new action is the classic
//! correctness bug in this class of client. The builder owns both ends of
//! the invariant: it stamps sequence numbers onto extracted tokens via
//! [`PostbackBuilder::adopt`] and refuses to build from any token older
//! than the newest it has consumed.

use indexmap::IndexMap;

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Action, StateToken};

/// Form-level names a postback server expects, beyond the opaque state
/// fields themselves.
#[derive(Debug, Clone)]
pub struct FormProfile {
    /// Field naming the virtual control that triggered the postback
    pub event_target_field: String,

    /// Field the search term is written into
    pub search_field: String,

    /// Name of the search submit button
    pub submit_field: String,

    /// Value posted for the search submit button
    pub submit_value: String,
}

impl Default for FormProfile {
    fn default() -> Self {
        Self {
            event_target_field: "__EVENTTARGET".to_string(),
            search_field: "ctl00$MainContent$txtSearch".to_string(),
            submit_field: "ctl00$MainContent$btnSearch".to_string(),
            submit_value: "Search".to_string(),
        }
    }
}

impl FormProfile {
    /// Use a different search input field.
    pub fn with_search_field(mut self, field: impl Into<String>) -> Self {
        self.search_field = field.into();
        self
    }

    /// Use a different submit button name and value.
    pub fn with_submit(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.submit_field = field.into();
        self.submit_value = value.into();
        self
    }
}

/// An ordered form body ready for encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostbackForm {
    fields: Vec<(String, String)>,
}

impl PostbackForm {
    /// Fields in post order.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Consume into the field list.
    pub fn into_fields(self) -> Vec<(String, String)> {
        self.fields
    }

    /// Look up a field value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Builds postback request bodies from the latest state token.
///
/// One builder per traversal; the sequence counter is scoped to it.
#[derive(Debug)]
pub struct PostbackBuilder {
    profile: FormProfile,
    next_seq: u64,
    newest_consumed: Option<u64>,
}

impl PostbackBuilder {
    /// Create a builder for a form profile.
    pub fn new(profile: FormProfile) -> Self {
        Self {
            profile,
            next_seq: 0,
            newest_consumed: None,
        }
    }

    /// Stamp freshly extracted fields into a token.
    ///
    /// Every extraction supersedes all earlier tokens of this traversal.
    pub fn adopt(&mut self, fields: IndexMap<String, String>) -> StateToken {
        self.next_seq += 1;
        StateToken::new(fields, self.next_seq)
    }

    /// Build the form body for an action using the latest token.
    ///
    /// Fails with `MissingToken` when no token is supplied and with
    /// `StaleToken` when the supplied token is older than the newest this
    /// builder has consumed.
    pub fn build(
        &mut self,
        action: &Action,
        token: Option<&StateToken>,
    ) -> ProtocolResult<PostbackForm> {
        let token = token.ok_or(ProtocolError::MissingToken {
            action: action.name(),
        })?;

        if let Some(newest) = self.newest_consumed {
            if token.seq() < newest {
                return Err(ProtocolError::StaleToken {
                    got: token.seq(),
                    newest,
                });
            }
        }
        self.newest_consumed = Some(token.seq());

        // Echo every extracted field byte-for-byte, in document order.
        let mut fields: Vec<(String, String)> = token
            .fields()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        match action {
            Action::Search { term } => {
                push_or_replace(&mut fields, &self.profile.search_field, term);
                push_or_replace(
                    &mut fields,
                    &self.profile.submit_field,
                    &self.profile.submit_value,
                );
            }
            Action::NextPage { target } | Action::SelectRecord { target } => {
                push_or_replace(&mut fields, &self.profile.event_target_field, target);
            }
        }

        Ok(PostbackForm { fields })
    }
}

fn push_or_replace(fields: &mut Vec<(String, String)>, name: &str, value: &str) {
    match fields.iter_mut().find(|(k, _)| k == name) {
        Some((_, v)) => *v = value.to_string(),
        None => fields.push((name.to_string(), value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_fields(viewstate: &str) -> IndexMap<String, String> {
        let mut fields = IndexMap::new();
        fields.insert("__VIEWSTATE".to_string(), viewstate.to_string());
        fields.insert("__EVENTTARGET".to_string(), String::new());
        fields
    }

    #[test]
    fn test_search_sets_term_and_submit() {
        let mut builder = PostbackBuilder::new(FormProfile::default());
        let token = builder.adopt(token_fields("AAAA"));

        let form = builder
            .build(
                &Action::Search {
                    term: "a".to_string(),
                },
                Some(&token),
            )
            .unwrap();

        assert_eq!(form.get("__VIEWSTATE"), Some("AAAA"));
        assert_eq!(form.get("ctl00$MainContent$txtSearch"), Some("a"));
        assert_eq!(form.get("ctl00$MainContent$btnSearch"), Some("Search"));
        assert_eq!(form.get("__EVENTTARGET"), Some(""));
    }

    #[test]
    fn test_next_page_sets_event_target_only() {
        let mut builder = PostbackBuilder::new(FormProfile::default());
        let token = builder.adopt(token_fields("BBBB"));

        let form = builder
            .build(
                &Action::NextPage {
                    target: "ctl00$MainContent$gvResults$btnNext".to_string(),
                },
                Some(&token),
            )
            .unwrap();

        assert_eq!(
            form.get("__EVENTTARGET"),
            Some("ctl00$MainContent$gvResults$btnNext")
        );
        assert_eq!(form.get("ctl00$MainContent$txtSearch"), None);
        assert_eq!(form.get("ctl00$MainContent$btnSearch"), None);
    }

    #[test]
    fn test_missing_token_rejected() {
        let mut builder = PostbackBuilder::new(FormProfile::default());
        let err = builder
            .build(
                &Action::Search {
                    term: "a".to_string(),
                },
                None,
            )
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MissingToken { .. }));
    }

    #[test]
    fn test_stale_token_rejected() {
        let mut builder = PostbackBuilder::new(FormProfile::default());
        let first = builder.adopt(token_fields("AAAA"));
        let second = builder.adopt(token_fields("BBBB"));

        let next = Action::NextPage {
            target: "btnNext".to_string(),
        };
        builder.build(&next, Some(&second)).unwrap();

        let err = builder.build(&next, Some(&first)).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::StaleToken { got: 1, newest: 2 }
        ));
    }

    #[test]
    fn test_latest_token_may_be_reused_until_superseded() {
        let mut builder = PostbackBuilder::new(FormProfile::default());
        let token = builder.adopt(token_fields("AAAA"));

        let next = Action::NextPage {
            target: "btnNext".to_string(),
        };
        builder.build(&next, Some(&token)).unwrap();
        assert!(builder.build(&next, Some(&token)).is_ok());
    }
}
