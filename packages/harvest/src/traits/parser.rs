//! Parser trait for turning response bodies into protocol data.
//!
//! Keeps the traversal and harvester logic independent of any one site's
//! markup. The shipped implementation is [`crate::webforms::WebFormsParser`];
//! a different catalog layout only needs a new implementation of this trait.

use indexmap::IndexMap;

use crate::error::ProtocolResult;
use crate::types::{Identifier, Record};

/// What a results page contributes to a traversal.
#[derive(Debug, Clone, Default)]
pub struct ResultsPage {
    /// Identifiers present on this page, in row order
    pub identifiers: Vec<Identifier>,

    /// Event target of the enabled next-page control, if more pages exist.
    ///
    /// `None` is the sole "no more pages" signal; a disabled control counts
    /// as absent.
    pub next_page: Option<String>,

    /// Event target of the first row's detail-selection control, if any
    pub select_record: Option<String>,
}

impl ResultsPage {
    /// Whether the response signals further pages.
    pub fn has_more(&self) -> bool {
        self.next_page.is_some()
    }
}

/// Parses catalog response bodies.
///
/// Implementations must be cheap to call and free of I/O; they run inline
/// on worker tasks.
pub trait CatalogParser: Send + Sync {
    /// Extract the hidden state fields required for the next postback.
    ///
    /// Fails with `MalformedResponse` when a critical state field is
    /// absent; non-critical fields are carried opaquely or ignored.
    fn parse_state(&self, body: &str) -> ProtocolResult<IndexMap<String, String>>;

    /// Extract identifiers and pagination signals from a results page.
    ///
    /// A page with no results grid is an empty [`ResultsPage`], not an
    /// error: a search may legitimately match nothing.
    fn parse_results(&self, body: &str) -> ProtocolResult<ResultsPage>;

    /// Extract the full field mapping from a record's detail page.
    ///
    /// Absent fields are omitted from the record rather than treated as
    /// errors.
    fn parse_record(&self, body: &str, id: &Identifier) -> ProtocolResult<Record>;

    /// The record written when an identifier's lookup matches nothing.
    ///
    /// The catalog can drop records between discovery and harvest; a bare
    /// row keyed by the identifier marks that outcome in the output store.
    fn empty_record(&self, id: &Identifier) -> Record {
        Record::new(id.clone())
    }
}
