//! Pagination traversal: exhausting one search term's result space.
//!
//! Each traversal is a small state machine: `Init` fetches the landing page
//! for a first token, `Searching` submits the term, `Paginating` walks the
//! grid until the next-page signal disappears. Pagination is strictly
//! sequential, since every page's request depends on the token extracted
//! from the previous page; concurrency lives one level up, across terms.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{FetchError, HarvestError, ProtocolError};
use crate::postback::{FormProfile, PostbackBuilder};
use crate::traits::{CatalogParser, Transport};
use crate::types::{Action, IdSet, StateToken};

/// Where a finished traversal ended up.
#[derive(Debug)]
pub enum TraversalEnd {
    /// The next-page signal disappeared; the term is exhausted
    Done,

    /// The failure budget ran out, or a sequencing bug surfaced
    Failed(HarvestError),
}

/// Result of one traversal, terminal either way.
///
/// Identifiers accumulated before a failure are retained: partial work is
/// never discarded.
#[derive(Debug)]
pub struct TraversalOutcome {
    /// The search term this traversal covered
    pub term: String,

    /// Identifiers collected across all pages processed
    pub identifiers: IdSet,

    /// Pages successfully processed
    pub pages: u32,

    /// Terminal state
    pub end: TraversalEnd,
}

impl TraversalOutcome {
    /// Whether the traversal exhausted its term.
    pub fn is_done(&self) -> bool {
        matches!(self.end, TraversalEnd::Done)
    }
}

/// Mutable per-traversal state, exclusively owned by the worker driving it.
struct TraversalState {
    phase: Phase,
    token: Option<StateToken>,
    page: u32,
    identifiers: IdSet,
}

enum Phase {
    Init,
    Searching,
    Paginating { target: String },
    Done,
}

impl TraversalState {
    fn new() -> Self {
        Self {
            phase: Phase::Init,
            token: None,
            page: 0,
            identifiers: IdSet::new(),
        }
    }
}

/// Drives one extractor/builder pair through a term's full result space.
pub struct TraversalEngine<'a, T, P> {
    transport: &'a T,
    parser: &'a P,
    search_url: &'a str,
    form: FormProfile,
    failure_budget: u32,
}

impl<'a, T, P> TraversalEngine<'a, T, P>
where
    T: Transport,
    P: CatalogParser,
{
    /// Create an engine for a search endpoint.
    pub fn new(
        transport: &'a T,
        parser: &'a P,
        search_url: &'a str,
        form: FormProfile,
        failure_budget: u32,
    ) -> Self {
        Self {
            transport,
            parser,
            search_url,
            form,
            failure_budget,
        }
    }

    /// Run the traversal for one term to a terminal state.
    pub async fn run(&self, term: &str, cancel: &CancellationToken) -> TraversalOutcome {
        let mut builder = PostbackBuilder::new(self.form.clone());
        let mut state = TraversalState::new();
        // Pagination posts back to wherever the previous response landed.
        let mut post_url = self.search_url.to_string();
        let mut failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                return self.finish(term, state, TraversalEnd::Failed(FetchError::Cancelled.into()));
            }
            if matches!(state.phase, Phase::Done) {
                return self.finish(term, state, TraversalEnd::Done);
            }

            let step = self
                .step(term, &mut builder, &mut state, &mut post_url)
                .await;

            match step {
                Ok(()) => failures = 0,
                Err(error) if is_fatal(&error) => {
                    return self.finish(term, state, TraversalEnd::Failed(error));
                }
                Err(error) => {
                    failures += 1;
                    warn!(
                        term = %term,
                        page = state.page,
                        attempt = failures,
                        error = %error,
                        "traversal request failed"
                    );
                    if failures >= self.failure_budget {
                        return self.finish(term, state, TraversalEnd::Failed(error));
                    }
                    tokio::time::sleep(Duration::from_millis(500) * failures).await;
                }
            }
        }
    }

    fn finish(&self, term: &str, state: TraversalState, end: TraversalEnd) -> TraversalOutcome {
        if let TraversalEnd::Failed(error) = &end {
            warn!(
                term = %term,
                pages = state.page,
                identifiers = state.identifiers.len(),
                error = %error,
                "traversal failed; keeping partial results"
            );
        } else {
            info!(
                term = %term,
                pages = state.page,
                identifiers = state.identifiers.len(),
                "traversal done"
            );
        }
        TraversalOutcome {
            term: term.to_string(),
            identifiers: state.identifiers,
            pages: state.page,
            end,
        }
    }

    /// One request/extract cycle in the current phase.
    async fn step(
        &self,
        term: &str,
        builder: &mut PostbackBuilder,
        state: &mut TraversalState,
        post_url: &mut String,
    ) -> Result<(), HarvestError> {
        match &state.phase {
            Phase::Init => {
                let response = self
                    .transport
                    .get(self.search_url)
                    .await?
                    .error_for_status()?;
                let fields = self.parser.parse_state(&response.body)?;
                state.token = Some(builder.adopt(fields));
                state.phase = Phase::Searching;
                Ok(())
            }
            Phase::Searching => {
                let action = Action::Search {
                    term: term.to_string(),
                };
                self.postback(&action, builder, state, post_url).await
            }
            Phase::Paginating { target } => {
                let action = Action::NextPage {
                    target: target.clone(),
                };
                self.postback(&action, builder, state, post_url).await
            }
            Phase::Done => Ok(()),
        }
    }

    /// Send one postback and absorb the response into the traversal.
    async fn postback(
        &self,
        action: &Action,
        builder: &mut PostbackBuilder,
        state: &mut TraversalState,
        post_url: &mut String,
    ) -> Result<(), HarvestError> {
        let form = builder.build(action, state.token.as_ref())?;
        let response = self
            .transport
            .post_form(post_url, form.fields())
            .await?
            .error_for_status()?;

        let results = self.parser.parse_results(&response.body)?;
        let fields = self.parser.parse_state(&response.body)?;
        state.token = Some(builder.adopt(fields));
        *post_url = response.url;
        state.page += 1;

        let before = state.identifiers.len();
        state.identifiers.extend(results.identifiers.iter().cloned());
        let newly_found = state.identifiers.len() - before;

        info!(
            page = state.page,
            found = newly_found,
            total = state.identifiers.len(),
            "page scraped"
        );

        state.phase = match results.next_page {
            // A repeating page with the next control still present means the
            // server has stopped advancing the grid; end rather than loop.
            Some(_) if state.page > 1 && newly_found == 0 => {
                warn!(page = state.page, "pagination stalled; ending traversal");
                Phase::Done
            }
            Some(target) => Phase::Paginating { target },
            None => Phase::Done,
        };
        Ok(())
    }
}

fn is_fatal(error: &HarvestError) -> bool {
    matches!(
        error,
        HarvestError::Protocol(
            ProtocolError::MissingToken { .. } | ProtocolError::StaleToken { .. }
        ) | HarvestError::Fetch(FetchError::Cancelled)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCatalog;
    use crate::webforms::WebFormsParser;

    fn engine<'a>(
        catalog: &'a MockCatalog,
        parser: &'a WebFormsParser,
    ) -> TraversalEngine<'a, MockCatalog, WebFormsParser> {
        TraversalEngine::new(
            catalog,
            parser,
            MockCatalog::SEARCH_URL,
            parser.profile().term_form(),
            3,
        )
    }

    #[tokio::test]
    async fn test_walks_all_pages() {
        let catalog = MockCatalog::new().with_term("a", vec![vec!["1", "2"], vec!["3"]]);
        let parser = WebFormsParser::new(catalog.profile());

        let outcome = engine(&catalog, &parser)
            .run("a", &CancellationToken::new())
            .await;

        assert!(outcome.is_done());
        assert_eq!(outcome.pages, 2);
        let ids: Vec<_> = outcome.identifiers.iter().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_empty_term_is_done_with_nothing() {
        let catalog = MockCatalog::new().with_term("b", vec![]);
        let parser = WebFormsParser::new(catalog.profile());

        let outcome = engine(&catalog, &parser)
            .run("b", &CancellationToken::new())
            .await;

        assert!(outcome.is_done());
        assert!(outcome.identifiers.is_empty());
    }

    #[tokio::test]
    async fn test_mid_pagination_failure_keeps_earlier_pages() {
        let catalog = MockCatalog::new()
            .with_term("a", vec![vec!["1", "2"], vec!["3"], vec!["4"]])
            .fail_page("a", 2);
        let parser = WebFormsParser::new(catalog.profile());

        let outcome = engine(&catalog, &parser)
            .run("a", &CancellationToken::new())
            .await;

        assert!(!outcome.is_done());
        let ids: Vec<_> = outcome.identifiers.iter().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_stalled_grid_ends_instead_of_looping() {
        // The next control never disables; past page 2 the server keeps
        // re-serving the same rows.
        let catalog =
            MockCatalog::new().with_stalling_term("a", vec![vec!["1", "2"], vec!["3"]]);
        let parser = WebFormsParser::new(catalog.profile());

        let outcome = engine(&catalog, &parser)
            .run("a", &CancellationToken::new())
            .await;

        assert!(outcome.is_done());
        assert_eq!(outcome.identifiers.len(), 3);
        assert_eq!(outcome.pages, 3);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_within_budget() {
        let catalog = MockCatalog::new()
            .with_term("a", vec![vec!["1"]])
            .fail_search_times("a", 2);
        let parser = WebFormsParser::new(catalog.profile());

        let outcome = engine(&catalog, &parser)
            .run("a", &CancellationToken::new())
            .await;

        assert!(outcome.is_done());
        assert_eq!(outcome.identifiers.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_ends_without_new_requests() {
        let catalog = MockCatalog::new().with_term("a", vec![vec!["1"]]);
        let parser = WebFormsParser::new(catalog.profile());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = engine(&catalog, &parser).run("a", &cancel).await;

        assert!(!outcome.is_done());
        assert_eq!(catalog.request_count(), 0);
    }
}
