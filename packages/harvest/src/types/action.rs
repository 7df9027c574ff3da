//! Logical postback actions.

/// A logical action against the catalog, mapped by the request builder to a
/// concrete combination of event target and form field overrides.
///
/// `NextPage` and `SelectRecord` carry the event-target control name read
/// out of the current page rather than a hard-coded one, since grid control
/// names vary by page and site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Submit the search form with a term.
    Search {
        /// Term placed in the profile's search field
        term: String,
    },

    /// Activate the next-page control of a results grid.
    NextPage {
        /// Event-target name of the enabled next-page control
        target: String,
    },

    /// Activate the row link that opens a record's detail page.
    SelectRecord {
        /// Event-target name of the row's selection control
        target: String,
    },
}

impl Action {
    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Search { .. } => "search",
            Action::NextPage { .. } => "next-page",
            Action::SelectRecord { .. } => "select-record",
        }
    }
}
