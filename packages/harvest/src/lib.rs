//! Stateful Postback Catalog Harvesting Library
//!
//! Harvests every record from a paginated web catalog that exposes no API:
//! the kind of server that emulates application state by requiring hidden
//! form fields (`__VIEWSTATE` and friends) to be echoed back with every
//! request. The library replays that hidden state machine without a
//! browser and runs a two-phase, resumable, bounded-concurrency pipeline
//! on top of it.
//!
//! # Design Philosophy
//!
//! - Phase 1 (discovery) fans a search space into concurrent pagination
//!   traversals and checkpoints one deduplicated identifier set
//! - Phase 2 (harvest) turns that set into one output row per identifier,
//!   resumable at any interruption point
//! - The stale-token bug class is prevented structurally: tokens carry an
//!   extraction sequence and the request builder refuses old ones
//! - Transport and markup parsing are pluggable trait seams; the pipeline
//!   never touches reqwest or HTML directly
//!
//! # Usage
//!
//! ```rust,ignore
//! use harvest::{discover, harvest, CheckpointLog, CsvStore, DiscoveryConfig};
//! use harvest::{HttpTransport, SiteProfile, WebFormsParser};
//!
//! let profile = SiteProfile::new(
//!     "https://catalog.example/search.aspx",
//!     "https://catalog.example/details.aspx",
//! );
//! let transport = Arc::new(HttpTransport::new());
//! let parser = Arc::new(WebFormsParser::new(profile.clone()));
//! let checkpoint = CheckpointLog::open("checkpoint.log").await?;
//!
//! // Phase 1: identifier discovery
//! let report = discover(
//!     transport.clone(), parser.clone(), &profile.search_url,
//!     profile.term_form(), &DiscoveryConfig::letters(), &checkpoint, &cancel,
//! ).await?;
//!
//! // Phase 2: record harvesting (resumable)
//! let store = CsvStore::open("records.csv", &profile.id_column)?;
//! let report = harvest(
//!     transport, parser, &profile.search_url, &profile.details_url,
//!     profile.record_form(), &HarvestConfig::default(),
//!     checkpoint.into(), store, &cancel,
//! ).await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Core trait abstractions (Transport, CatalogParser)
//! - [`types`] - Protocol and pipeline data types
//! - [`postback`] - Postback form construction and token sequencing
//! - [`traversal`] - Per-term pagination state machine
//! - [`discovery`] - Phase 1 fan-out and merge
//! - [`harvester`] - Phase 2 worker pool and single writer
//! - [`checkpoint`] - Durable progress log for resume
//! - [`output`] - Append-only CSV store keyed by identifier
//! - [`webforms`] - ASP.NET WebForms parser implementation
//! - [`transports`] - reqwest transport implementation
//! - [`testing`] - Scripted mock catalog for tests

pub mod checkpoint;
pub mod discovery;
pub mod error;
pub mod harvester;
pub mod output;
pub mod postback;
pub mod testing;
pub mod traits;
pub mod transports;
pub mod traversal;
pub mod types;
pub mod webforms;

// Re-export core types at crate root
pub use error::{FetchError, HarvestError, ProtocolError, Result};
pub use traits::{
    parser::{CatalogParser, ResultsPage},
    transport::{Response, Transport},
};
pub use types::{
    action::Action,
    config::{DiscoveryConfig, HarvestConfig, RetryPolicy},
    record::{IdSet, Identifier, Record},
    token::StateToken,
};

// Re-export the pipeline entry points
pub use discovery::{discover, DiscoveryReport, TraversalSummary};
pub use harvester::{harvest, HarvestReport};
pub use traversal::{TraversalEngine, TraversalEnd, TraversalOutcome};

// Re-export protocol pieces
pub use postback::{FormProfile, PostbackBuilder, PostbackForm};

// Re-export persistence
pub use checkpoint::CheckpointLog;
pub use output::CsvStore;

// Re-export shipped implementations
pub use transports::HttpTransport;
pub use webforms::{HistoryTable, SiteProfile, WebFormsParser};

// Re-export testing utilities
pub use testing::{MockCall, MockCatalog};
