//! End-to-end pipeline tests against the scripted mock catalog.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use harvest::{
    discover, harvest, CheckpointLog, CsvStore, DiscoveryConfig, HarvestConfig, HarvestReport,
    IdSet, Identifier, MockCatalog, RetryPolicy, WebFormsParser,
};

fn quick_retry() -> RetryPolicy {
    RetryPolicy::with_attempts(3).with_initial_backoff(Duration::from_millis(1))
}

/// Catalog with three pages for "a" ({1,2,3}, {4,5}, {6}) and nothing for
/// "b"; every identifier resolves to a detail record.
fn three_page_catalog() -> MockCatalog {
    let mut catalog = MockCatalog::new()
        .with_term("a", vec![vec!["1", "2", "3"], vec!["4", "5"], vec!["6"]])
        .with_term("b", vec![]);
    for id in ["1", "2", "3", "4", "5", "6"] {
        catalog = catalog.with_record_field(id, "Name", &format!("NAME {id}"));
    }
    catalog
}

async fn run_discovery(catalog: &Arc<MockCatalog>, checkpoint: &CheckpointLog) -> IdSet {
    let parser = Arc::new(WebFormsParser::new(catalog.profile()));
    let report = discover(
        Arc::clone(catalog),
        Arc::clone(&parser),
        MockCatalog::SEARCH_URL,
        parser.profile().term_form(),
        &DiscoveryConfig::letters().with_terms(["a", "b"]),
        checkpoint,
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    report.discovered
}

async fn run_harvest(
    catalog: &Arc<MockCatalog>,
    checkpoint: Arc<CheckpointLog>,
    store: CsvStore,
    retry: RetryPolicy,
) -> HarvestReport {
    let parser = Arc::new(WebFormsParser::new(catalog.profile()));
    harvest(
        Arc::clone(catalog),
        Arc::clone(&parser),
        MockCatalog::SEARCH_URL,
        MockCatalog::DETAILS_URL,
        parser.profile().record_form(),
        &HarvestConfig::default().with_retry(retry),
        checkpoint,
        store,
        &CancellationToken::new(),
    )
    .await
    .unwrap()
}

fn ids(values: &[&str]) -> IdSet {
    values.iter().map(|v| Identifier::new(*v)).collect()
}

#[tokio::test]
async fn discovery_merges_pages_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = CheckpointLog::open(dir.path().join("cp.log")).await.unwrap();
    let catalog = Arc::new(three_page_catalog());

    let discovered = run_discovery(&catalog, &checkpoint).await;

    assert_eq!(discovered, ids(&["1", "2", "3", "4", "5", "6"]));
    assert_eq!(checkpoint.load_discovered().await.unwrap(), discovered);
}

#[tokio::test]
async fn discovery_is_idempotent_against_unchanged_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = CheckpointLog::open(dir.path().join("cp.log")).await.unwrap();
    let catalog = Arc::new(three_page_catalog());

    let first = run_discovery(&catalog, &checkpoint).await;
    let second = run_discovery(&catalog, &checkpoint).await;

    assert_eq!(first, second);
    // Replaying the duplicate checkpoint entries changes nothing.
    assert_eq!(checkpoint.load_discovered().await.unwrap(), first);
}

#[tokio::test]
async fn full_pipeline_with_one_flaky_detail_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = Arc::new(CheckpointLog::open(dir.path().join("cp.log")).await.unwrap());
    let catalog = Arc::new(three_page_catalog().fail_detail_once("4"));

    let discovered = run_discovery(&catalog, &checkpoint).await;
    assert_eq!(discovered.len(), 6);

    let store = CsvStore::open(dir.path().join("out.csv"), "Identifier").unwrap();
    let report = run_harvest(&catalog, Arc::clone(&checkpoint), store, quick_retry()).await;

    assert_eq!(report.harvested, 6);
    assert_eq!(report.unharvestable, 0);
    // The flaky identifier took exactly one extra conversation.
    assert_eq!(catalog.lookup_count("4"), 2);

    // Bijection: every harvested identifier has a row, and vice versa.
    let store = CsvStore::open(dir.path().join("out.csv"), "Identifier").unwrap();
    assert_eq!(*store.keys(), checkpoint.load_harvested().await.unwrap());
    assert_eq!(store.len(), 6);
}

#[tokio::test]
async fn interrupted_harvest_resumes_with_exactly_the_remainder() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = Arc::new(CheckpointLog::open(dir.path().join("cp.log")).await.unwrap());

    // First run: identifiers 4, 5, 6 fail hard, so only three rows land.
    let first_catalog = Arc::new({
        let mut catalog = three_page_catalog();
        for id in ["4", "5", "6"] {
            catalog = catalog.fail_detail(id);
        }
        catalog
    });

    let discovered = run_discovery(&first_catalog, &checkpoint).await;
    assert_eq!(discovered.len(), 6);

    let store = CsvStore::open(dir.path().join("out.csv"), "Identifier").unwrap();
    let first = run_harvest(
        &first_catalog,
        Arc::clone(&checkpoint),
        store,
        RetryPolicy::with_attempts(1).with_initial_backoff(Duration::from_millis(1)),
    )
    .await;
    assert_eq!(first.harvested, 3);
    assert_eq!(first.unharvestable, 3);

    // Second run against a healthy catalog: exactly the remaining three are
    // fetched, nothing is fetched twice, and the store ends complete.
    let second_catalog = Arc::new(three_page_catalog());
    let store = CsvStore::open(dir.path().join("out.csv"), "Identifier").unwrap();
    let second = run_harvest(
        &second_catalog,
        Arc::clone(&checkpoint),
        store,
        quick_retry(),
    )
    .await;

    assert_eq!(second.skipped, 3);
    assert_eq!(second.attempted, 3);
    assert_eq!(second.harvested, 3);
    assert_eq!(second_catalog.total_lookups(), 3);
    assert_eq!(second_catalog.lookup_count("1"), 0);

    let store = CsvStore::open(dir.path().join("out.csv"), "Identifier").unwrap();
    assert_eq!(*store.keys(), ids(&["1", "2", "3", "4", "5", "6"]));
    assert_eq!(checkpoint.load_harvested().await.unwrap(), *store.keys());
}

#[tokio::test]
async fn rerun_after_completion_does_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = Arc::new(CheckpointLog::open(dir.path().join("cp.log")).await.unwrap());
    let catalog = Arc::new(three_page_catalog());

    run_discovery(&catalog, &checkpoint).await;

    let store = CsvStore::open(dir.path().join("out.csv"), "Identifier").unwrap();
    run_harvest(&catalog, Arc::clone(&checkpoint), store, quick_retry()).await;

    let fresh_catalog = Arc::new(three_page_catalog());
    let store = CsvStore::open(dir.path().join("out.csv"), "Identifier").unwrap();
    let report = run_harvest(&fresh_catalog, checkpoint, store, quick_retry()).await;

    assert_eq!(report.attempted, 0);
    assert_eq!(report.skipped, 6);
    assert_eq!(fresh_catalog.total_lookups(), 0);
}
