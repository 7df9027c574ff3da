//! Durable progress log enabling interrupt-and-resume for both phases.
//!
//! One append-only file, one tab-separated entry per line:
//!
//! ```text
//! discovered<TAB>00123
//! harvested<TAB>00123
//! unharvestable<TAB>00456
//! ```
//!
//! Every write is flushed and synced before returning; the entire resume
//! contract depends on checkpoint state surviving process termination at
//! any point. Replay is idempotent: entries land in sets, so re-applying a
//! line twice cannot change the result, and a torn final line from a crash
//! is skipped on load.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{HarvestError, Result};
use crate::types::{IdSet, Identifier};

const DISCOVERED: &str = "discovered";
const HARVESTED: &str = "harvested";
const UNHARVESTABLE: &str = "unharvestable";

/// Append-only checkpoint log.
///
/// `record_*` calls are safe under concurrent invocation; the file handle
/// is mutex-serialized so entries never interleave.
pub struct CheckpointLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl CheckpointLog {
    /// Open (or create) the log at a path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(HarvestError::Checkpoint)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a set of discovered identifiers.
    ///
    /// Written sorted, so discovery output is stable run-over-run against
    /// an unchanged catalog.
    pub async fn record_discovered(&self, ids: &IdSet) -> Result<()> {
        let mut lines = String::new();
        for id in ids {
            lines.push_str(DISCOVERED);
            lines.push('\t');
            lines.push_str(id.as_str());
            lines.push('\n');
        }
        self.append(&lines).await
    }

    /// Mark one identifier as fully harvested.
    pub async fn record_harvested(&self, id: &Identifier) -> Result<()> {
        self.append(&format!("{HARVESTED}\t{id}\n")).await
    }

    /// Mark one identifier as permanently failed.
    pub async fn record_unharvestable(&self, id: &Identifier) -> Result<()> {
        self.append(&format!("{UNHARVESTABLE}\t{id}\n")).await
    }

    /// Replay the log into the discovered set.
    pub async fn load_discovered(&self) -> Result<IdSet> {
        self.load(DISCOVERED).await
    }

    /// Replay the log into the harvested set.
    pub async fn load_harvested(&self) -> Result<IdSet> {
        self.load(HARVESTED).await
    }

    /// Replay the log into the unharvestable set.
    pub async fn load_unharvestable(&self) -> Result<IdSet> {
        self.load(UNHARVESTABLE).await
    }

    async fn append(&self, lines: &str) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let mut file = self.file.lock().await;
        file.write_all(lines.as_bytes())
            .await
            .map_err(HarvestError::Checkpoint)?;
        file.flush().await.map_err(HarvestError::Checkpoint)?;
        file.sync_data().await.map_err(HarvestError::Checkpoint)?;
        Ok(())
    }

    async fn load(&self, kind: &str) -> Result<IdSet> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(HarvestError::Checkpoint)?;

        let mut ids = IdSet::new();
        for line in content.lines() {
            match line.split_once('\t') {
                Some((k, id)) if k == kind && !id.is_empty() => {
                    ids.insert(Identifier::new(id));
                }
                Some(_) => {}
                None if line.is_empty() => {}
                None => {
                    // Torn write from a crash mid-line; committed entries
                    // above it remain valid.
                    warn!(path = %self.path.display(), line = %line, "skipping malformed checkpoint line");
                }
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> IdSet {
        values.iter().map(|v| Identifier::new(*v)).collect()
    }

    #[tokio::test]
    async fn test_roundtrip_discovered_and_harvested() {
        let dir = tempfile::tempdir().unwrap();
        let log = CheckpointLog::open(dir.path().join("checkpoint.log"))
            .await
            .unwrap();

        log.record_discovered(&ids(&["3", "1", "2"])).await.unwrap();
        log.record_harvested(&Identifier::new("1")).await.unwrap();

        assert_eq!(log.load_discovered().await.unwrap(), ids(&["1", "2", "3"]));
        assert_eq!(log.load_harvested().await.unwrap(), ids(&["1"]));
        assert!(log.load_unharvestable().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.log");

        {
            let log = CheckpointLog::open(&path).await.unwrap();
            log.record_discovered(&ids(&["7", "8"])).await.unwrap();
            log.record_harvested(&Identifier::new("7")).await.unwrap();
        }

        let reopened = CheckpointLog::open(&path).await.unwrap();
        assert_eq!(reopened.load_discovered().await.unwrap(), ids(&["7", "8"]));
        assert_eq!(reopened.load_harvested().await.unwrap(), ids(&["7"]));

        // Appends after reopen extend, never truncate.
        reopened
            .record_harvested(&Identifier::new("8"))
            .await
            .unwrap();
        assert_eq!(
            reopened.load_harvested().await.unwrap(),
            ids(&["7", "8"])
        );
    }

    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let log = CheckpointLog::open(dir.path().join("checkpoint.log"))
            .await
            .unwrap();

        log.record_discovered(&ids(&["1", "2"])).await.unwrap();
        log.record_discovered(&ids(&["1", "2"])).await.unwrap();
        log.record_harvested(&Identifier::new("1")).await.unwrap();
        log.record_harvested(&Identifier::new("1")).await.unwrap();

        assert_eq!(log.load_discovered().await.unwrap(), ids(&["1", "2"]));
        assert_eq!(log.load_harvested().await.unwrap(), ids(&["1"]));
    }

    #[tokio::test]
    async fn test_torn_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.log");
        tokio::fs::write(&path, "discovered\t1\ndiscov")
            .await
            .unwrap();

        let log = CheckpointLog::open(&path).await.unwrap();
        assert_eq!(log.load_discovered().await.unwrap(), ids(&["1"]));
    }

    #[tokio::test]
    async fn test_concurrent_harvest_marks() {
        let dir = tempfile::tempdir().unwrap();
        let log = std::sync::Arc::new(
            CheckpointLog::open(dir.path().join("checkpoint.log"))
                .await
                .unwrap(),
        );

        let mut handles = Vec::new();
        for n in 0..20 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.record_harvested(&Identifier::new(n.to_string()))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(log.load_harvested().await.unwrap().len(), 20);
    }
}
