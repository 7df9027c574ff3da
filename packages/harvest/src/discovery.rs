//! Phase 1: fan the search space into concurrent traversals and merge the
//! deduplicated identifier set.
//!
//! Duplicates across terms are expected (a record can match several terms)
//! and collapse silently in the merge. Individual traversal failures are
//! reported, not fatal; the phase only fails when *no* traversal reaches
//! Done, which signals the catalog itself is unreachable.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::checkpoint::CheckpointLog;
use crate::error::{HarvestError, Result};
use crate::postback::FormProfile;
use crate::traits::{CatalogParser, Transport};
use crate::traversal::TraversalEngine;
use crate::types::{DiscoveryConfig, IdSet};

/// Per-term summary carried in the discovery report.
#[derive(Debug, Clone)]
pub struct TraversalSummary {
    /// Search term
    pub term: String,

    /// Identifiers this traversal contributed (pre-merge)
    pub identifiers: usize,

    /// Pages processed
    pub pages: u32,

    /// Whether the traversal reached Done
    pub done: bool,
}

/// Outcome of a discovery run.
#[derive(Debug)]
pub struct DiscoveryReport {
    /// Merged, deduplicated identifier set
    pub discovered: IdSet,

    /// Per-term outcomes, in completion order
    pub traversals: Vec<TraversalSummary>,

    /// Whether the run was cut short by cancellation
    pub cancelled: bool,
}

impl DiscoveryReport {
    /// Traversals that reached Done.
    pub fn succeeded(&self) -> usize {
        self.traversals.iter().filter(|t| t.done).count()
    }

    /// Traversals that ended Failed.
    pub fn failed(&self) -> usize {
        self.traversals.len() - self.succeeded()
    }
}

/// Run discovery over a search space and checkpoint the merged set.
///
/// The merged set is persisted before returning, so a crash after
/// enumeration cannot lose completed discovery work. Partial results from
/// failed traversals are merged and persisted too.
pub async fn discover<T, P>(
    transport: Arc<T>,
    parser: Arc<P>,
    search_url: &str,
    form: FormProfile,
    config: &DiscoveryConfig,
    checkpoint: &CheckpointLog,
    cancel: &CancellationToken,
) -> Result<DiscoveryReport>
where
    T: Transport + 'static,
    P: CatalogParser + 'static,
{
    info!(
        terms = config.terms.len(),
        parallelism = config.parallelism(),
        "discovery starting"
    );

    let semaphore = Arc::new(Semaphore::new(config.parallelism()));
    let mut tasks = JoinSet::new();

    for term in &config.terms {
        let transport = Arc::clone(&transport);
        let parser = Arc::clone(&parser);
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        let search_url = search_url.to_string();
        let form = form.clone();
        let failure_budget = config.failure_budget;
        let term = term.clone();

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            let engine = TraversalEngine::new(
                transport.as_ref(),
                parser.as_ref(),
                &search_url,
                form,
                failure_budget,
            );
            engine.run(&term, &cancel).await
        });
    }

    let mut discovered = IdSet::new();
    let mut traversals = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => {
                traversals.push(TraversalSummary {
                    term: outcome.term.clone(),
                    identifiers: outcome.identifiers.len(),
                    pages: outcome.pages,
                    done: outcome.is_done(),
                });
                discovered.extend(outcome.identifiers);
            }
            Err(join_error) => {
                error!(error = %join_error, "traversal task panicked");
            }
        }
    }

    let report = DiscoveryReport {
        discovered,
        traversals,
        cancelled: cancel.is_cancelled(),
    };

    // Persist before returning, whatever the outcome: work already done is
    // never discarded.
    checkpoint.record_discovered(&report.discovered).await?;

    if report.succeeded() == 0 && !report.cancelled {
        return Err(HarvestError::NoTraversalSucceeded {
            attempted: report.traversals.len(),
        });
    }

    if report.failed() > 0 {
        warn!(
            failed = report.failed(),
            succeeded = report.succeeded(),
            "some traversals failed; their partial results were kept"
        );
    }
    info!(
        discovered = report.discovered.len(),
        succeeded = report.succeeded(),
        failed = report.failed(),
        "discovery complete"
    );

    Ok(report)
}
