//! Phase 2: fetch one record per discovered identifier into the output
//! store, resumably.
//!
//! A bounded pool of workers pulls identifiers from a shared queue. Each
//! worker replays the detail-fetch conversation (landing page, identifier
//! lookup postback, row-selection postback) and parses the resulting
//! detail page. Completed records funnel through one writer task that
//! appends the row and only then marks the identifier harvested: a crash
//! can at worst redo a fetch, never lose a written row.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::checkpoint::CheckpointLog;
use crate::error::{FetchError, HarvestError, ProtocolError, Result};
use crate::output::CsvStore;
use crate::postback::{FormProfile, PostbackBuilder};
use crate::traits::{CatalogParser, Transport};
use crate::types::{Action, HarvestConfig, Identifier, Record};

/// Outcome of a harvest run.
#[derive(Debug)]
pub struct HarvestReport {
    /// Identifiers in the worklist after the startup diff
    pub attempted: usize,

    /// Rows written this run
    pub harvested: usize,

    /// Identifiers that exhausted retries this run
    pub unharvestable: usize,

    /// Identifiers skipped because they were already in the store or
    /// checkpoint
    pub skipped: usize,

    /// Whether the run was cut short by cancellation
    pub cancelled: bool,
}

/// Run Phase 2 against the checkpointed identifier set.
///
/// The resume diff (discovered minus already-written minus
/// already-checkpointed) is computed once at startup. Previously
/// unharvestable identifiers are retried: they are discovered but
/// unharvested, and the catalog may have recovered.
pub async fn harvest<T, P>(
    transport: Arc<T>,
    parser: Arc<P>,
    search_url: &str,
    details_url: &str,
    form: FormProfile,
    config: &HarvestConfig,
    checkpoint: Arc<CheckpointLog>,
    store: CsvStore,
    cancel: &CancellationToken,
) -> Result<HarvestReport>
where
    T: Transport + 'static,
    P: CatalogParser + 'static,
{
    let discovered = checkpoint.load_discovered().await?;
    let harvested = checkpoint.load_harvested().await?;

    let pending: VecDeque<Identifier> = discovered
        .iter()
        .filter(|id| !harvested.contains(*id) && !store.contains(id))
        .cloned()
        .collect();

    let skipped = discovered.len() - pending.len();
    let attempted = pending.len();

    info!(
        discovered = discovered.len(),
        skipped,
        remaining = attempted,
        workers = config.concurrency,
        "harvest starting"
    );

    if pending.is_empty() {
        return Ok(HarvestReport {
            attempted: 0,
            harvested: 0,
            unharvestable: 0,
            skipped,
            cancelled: false,
        });
    }

    // Single writer: append the row, then mark the checkpoint. The mpsc
    // capacity just keeps slow disks from buffering unboundedly.
    let (record_tx, record_rx) = mpsc::channel::<Record>(config.concurrency.max(1));
    let writer = tokio::spawn(write_loop(store, Arc::clone(&checkpoint), record_rx));

    let queue = Arc::new(Mutex::new(pending));
    let unharvestable = Arc::new(AtomicUsize::new(0));
    let fatal: Arc<Mutex<Option<HarvestError>>> = Arc::new(Mutex::new(None));

    let mut workers = JoinSet::new();
    for _ in 0..config.concurrency.min(attempted) {
        let transport = Arc::clone(&transport);
        let parser = Arc::clone(&parser);
        let checkpoint = Arc::clone(&checkpoint);
        let queue = Arc::clone(&queue);
        let unharvestable = Arc::clone(&unharvestable);
        let fatal = Arc::clone(&fatal);
        let record_tx = record_tx.clone();
        let cancel = cancel.clone();
        let search_url = search_url.to_string();
        let details_url = details_url.to_string();
        let form = form.clone();
        let config = config.clone();

        workers.spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let Some(id) = queue.lock().expect("queue lock").pop_front() else {
                    break;
                };

                match fetch_with_retry(
                    transport.as_ref(),
                    parser.as_ref(),
                    &search_url,
                    &details_url,
                    &form,
                    &config,
                    &id,
                    &cancel,
                )
                .await
                {
                    Ok(record) => {
                        // Writer gone means the store failed; stop pulling.
                        if record_tx.send(record).await.is_err() {
                            break;
                        }
                    }
                    Err(WorkerFailure::Exhausted(error)) => {
                        warn!(id = %id, error = %error, "identifier unharvestable");
                        unharvestable.fetch_add(1, Ordering::Relaxed);
                        if let Err(e) = checkpoint.record_unharvestable(&id).await {
                            error!(id = %id, error = %e, "failed to checkpoint unharvestable");
                        }
                    }
                    Err(WorkerFailure::Cancelled) => break,
                    Err(WorkerFailure::Fatal(error)) => {
                        error!(id = %id, error = %error, "fatal sequencing error; aborting harvest");
                        *fatal.lock().expect("fatal lock") = Some(error);
                        cancel.cancel();
                        break;
                    }
                }
            }
        });
    }
    drop(record_tx);

    while let Some(joined) = workers.join_next().await {
        if let Err(join_error) = joined {
            error!(error = %join_error, "harvest worker panicked");
        }
    }

    let written = writer.await.map_err(|e| {
        HarvestError::Store(format!("writer task panicked: {e}").into())
    })??;

    if let Some(error) = fatal.lock().expect("fatal lock").take() {
        return Err(error);
    }

    let report = HarvestReport {
        attempted,
        harvested: written,
        unharvestable: unharvestable.load(Ordering::Relaxed),
        skipped,
        cancelled: cancel.is_cancelled(),
    };
    info!(
        harvested = report.harvested,
        unharvestable = report.unharvestable,
        skipped = report.skipped,
        cancelled = report.cancelled,
        "harvest finished"
    );
    Ok(report)
}

/// Append records and mark them harvested, strictly in that order.
async fn write_loop(
    mut store: CsvStore,
    checkpoint: Arc<CheckpointLog>,
    mut records: mpsc::Receiver<Record>,
) -> Result<usize> {
    let mut written = 0usize;
    while let Some(record) = records.recv().await {
        let id = record.id.clone();
        store.append(&record)?;
        checkpoint.record_harvested(&id).await?;
        written += 1;
    }
    Ok(written)
}

enum WorkerFailure {
    /// Retries exhausted; record the identifier and move on
    Exhausted(HarvestError),
    /// Builder/extractor sequencing bug; abort the phase
    Fatal(HarvestError),
    /// Cancellation observed mid-retry
    Cancelled,
}

/// Fetch one identifier's record, retrying transient failures with
/// exponential backoff.
#[allow(clippy::too_many_arguments)]
async fn fetch_with_retry<T, P>(
    transport: &T,
    parser: &P,
    search_url: &str,
    details_url: &str,
    form: &FormProfile,
    config: &HarvestConfig,
    id: &Identifier,
    cancel: &CancellationToken,
) -> std::result::Result<Record, WorkerFailure>
where
    T: Transport,
    P: CatalogParser,
{
    let mut last_error = None;
    for attempt in 0..config.retry.attempts {
        if cancel.is_cancelled() {
            return Err(WorkerFailure::Cancelled);
        }
        if attempt > 0 {
            tokio::time::sleep(config.retry.backoff_for(attempt - 1)).await;
        }

        match fetch_record(transport, parser, search_url, details_url, form, id).await {
            Ok(record) => return Ok(record),
            Err(
                error @ HarvestError::Protocol(
                    ProtocolError::MissingToken { .. } | ProtocolError::StaleToken { .. },
                ),
            ) => return Err(WorkerFailure::Fatal(error)),
            Err(HarvestError::Fetch(FetchError::Cancelled)) => {
                return Err(WorkerFailure::Cancelled)
            }
            Err(error) => {
                warn!(
                    id = %id,
                    attempt = attempt + 1,
                    attempts = config.retry.attempts,
                    error = %error,
                    "detail fetch failed"
                );
                last_error = Some(error);
            }
        }
    }

    Err(WorkerFailure::Exhausted(last_error.unwrap_or(
        HarvestError::Fetch(FetchError::Cancelled),
    )))
}

/// One complete detail-fetch conversation for an identifier.
async fn fetch_record<T, P>(
    transport: &T,
    parser: &P,
    search_url: &str,
    details_url: &str,
    form: &FormProfile,
    id: &Identifier,
) -> Result<Record>
where
    T: Transport,
    P: CatalogParser,
{
    let mut builder = PostbackBuilder::new(form.clone());

    // Landing page for the first token.
    let landing = transport.get(search_url).await?.error_for_status()?;
    let token = builder.adopt(parser.parse_state(&landing.body)?);

    // Identifier lookup.
    let lookup = Action::Search {
        term: id.as_str().to_string(),
    };
    let lookup_form = builder.build(&lookup, Some(&token))?;
    let results_page = transport
        .post_form(&landing.url, lookup_form.fields())
        .await?
        .error_for_status()?;

    let results = parser.parse_results(&results_page.body)?;
    let Some(target) = results.select_record else {
        // Discovered but no longer present; write a bare row.
        warn!(id = %id, "no detail link in lookup results");
        return Ok(parser.empty_record(id));
    };
    let token = builder.adopt(parser.parse_state(&results_page.body)?);

    // Row selection against the details endpoint.
    let select = Action::SelectRecord { target };
    let select_form = builder.build(&select, Some(&token))?;
    let detail_page = transport
        .post_form(details_url, select_form.fields())
        .await?
        .error_for_status()?;

    Ok(parser.parse_record(&detail_page.body, id)?)
}
