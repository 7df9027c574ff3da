//! Command-line surface for the two-phase catalog harvester.
//!
//! `discover` runs Phase 1 and checkpoints the identifier set; `harvest`
//! runs Phase 2 against that checkpoint, resuming past work. Both leave
//! checkpoint and output state consistent whatever the exit code.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harvest::{
    discover, harvest as run_harvest, CheckpointLog, CsvStore, DiscoveryConfig, HarvestConfig,
    HttpTransport, RetryPolicy, SiteProfile, WebFormsParser,
};

#[derive(Parser)]
#[command(name = "harvest-cli", about = "Two-phase stateful catalog harvester")]
struct Cli {
    /// Site profile JSON (endpoints, field names, element IDs)
    #[arg(long, env = "HARVEST_PROFILE")]
    profile: Option<PathBuf>,

    /// Search page URL (overrides the profile)
    #[arg(long, env = "HARVEST_SEARCH_URL")]
    search_url: Option<String>,

    /// Details page URL (overrides the profile)
    #[arg(long, env = "HARVEST_DETAILS_URL")]
    details_url: Option<String>,

    /// Checkpoint file path
    #[arg(long, env = "HARVEST_CHECKPOINT", default_value = "checkpoint.log")]
    checkpoint: PathBuf,

    /// Per-request timeout in seconds
    #[arg(long, env = "HARVEST_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Phase 1: discover the deduplicated identifier set
    Discover {
        /// Length of the letter-prefix search space (1 = a..z)
        #[arg(long, default_value_t = 1)]
        prefix_len: usize,

        /// Ceiling on concurrent traversals (default: one per term)
        #[arg(long)]
        max_parallel: Option<usize>,
    },

    /// Phase 2: harvest one record per identifier (resumable)
    Harvest {
        /// Output CSV path
        #[arg(long, env = "HARVEST_OUTPUT", default_value = "records.csv")]
        output: PathBuf,

        /// Worker pool size
        #[arg(long, default_value_t = 50)]
        concurrency: usize,

        /// Attempts per identifier before marking it unharvestable
        #[arg(long, default_value_t = 3)]
        attempts: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,harvest=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let profile = load_profile(&cli)?;

    let transport = Arc::new(HttpTransport::with_timeout(Duration::from_secs(
        cli.timeout_secs,
    )));
    let parser = Arc::new(WebFormsParser::new(profile.clone()));

    // Ctrl-C stops new work; in-flight requests finish or time out, and
    // committed checkpoint writes stay valid.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; letting in-flight requests settle");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Discover {
            prefix_len,
            max_parallel,
        } => {
            let checkpoint = CheckpointLog::open(&cli.checkpoint)
                .await
                .context("Failed to open checkpoint")?;

            let mut config = DiscoveryConfig::prefixes(prefix_len);
            if let Some(ceiling) = max_parallel {
                config = config.with_max_parallel(ceiling);
            }

            let report = discover(
                transport,
                parser,
                &profile.search_url,
                profile.term_form(),
                &config,
                &checkpoint,
                &cancel,
            )
            .await
            .context("Discovery failed")?;

            tracing::info!(
                discovered = report.discovered.len(),
                traversals_done = report.succeeded(),
                traversals_failed = report.failed(),
                checkpoint = %cli.checkpoint.display(),
                "discovery summary"
            );
            if report.cancelled {
                bail!("discovery interrupted; rerun to continue");
            }
        }

        Command::Harvest {
            output,
            concurrency,
            attempts,
        } => {
            let checkpoint = Arc::new(
                CheckpointLog::open(&cli.checkpoint)
                    .await
                    .context("Failed to open checkpoint")?,
            );
            let store = CsvStore::open(&output, &profile.id_column)
                .context("Failed to open output store")?;

            let config = HarvestConfig::default()
                .with_concurrency(concurrency)
                .with_retry(RetryPolicy::with_attempts(attempts));

            let report = run_harvest(
                transport,
                parser,
                &profile.search_url,
                &profile.details_url,
                profile.record_form(),
                &config,
                checkpoint,
                store,
                &cancel,
            )
            .await
            .context("Harvest failed")?;

            tracing::info!(
                harvested = report.harvested,
                unharvestable = report.unharvestable,
                skipped = report.skipped,
                output = %output.display(),
                "harvest summary"
            );
            if report.cancelled {
                bail!("harvest interrupted; rerun to resume");
            }
        }
    }

    Ok(())
}

fn load_profile(cli: &Cli) -> Result<SiteProfile> {
    let mut profile = match &cli.profile {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read profile {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse profile {}", path.display()))?
        }
        None => SiteProfile::default(),
    };

    if let Some(url) = &cli.search_url {
        profile.search_url = url.clone();
    }
    if let Some(url) = &cli.details_url {
        profile.details_url = url.clone();
    }

    if profile.search_url.is_empty() {
        bail!("no search URL configured; pass --search-url or a profile file");
    }
    if profile.details_url.is_empty() {
        bail!("no details URL configured; pass --details-url or a profile file");
    }
    url::Url::parse(&profile.search_url)
        .with_context(|| format!("invalid search URL: {}", profile.search_url))?;
    url::Url::parse(&profile.details_url)
        .with_context(|| format!("invalid details URL: {}", profile.details_url))?;

    Ok(profile)
}
