//! Periodic, incremental indexing pass
//!
//! Each pass diffs the storage layout against the store: runs that are
//! absent or still incomplete are (re)indexed concurrently, with store
//! writes funneled through the store's own mutex. Per-run failures are
//! logged and retried on the next pass; nothing is ever deleted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use benchmarkoor_runner::{RunConfigArtifact, RunResult, RunStatus};
use benchmarkoor_storage::{layout, StorageReader};

use crate::error::Result;
use crate::store::{IndexStore, RunIndexEntry, TestIndexRow};

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub interval: Duration,
    pub concurrency: usize,
    /// When set, a `runs/index.json` roll-up is rewritten after each pass.
    pub rollup_root: Option<std::path::PathBuf>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            concurrency: 4,
            rollup_root: None,
        }
    }
}

/// Outcome counters of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub scanned: usize,
    pub indexed: usize,
    pub failed: usize,
}

pub struct Indexer {
    storage: Arc<dyn StorageReader>,
    store: Arc<dyn IndexStore>,
    config: IndexerConfig,
}

#[derive(Serialize)]
struct RollupEntry {
    run_id: String,
    status: RunStatus,
    instance_id: String,
    client: String,
}

impl Indexer {
    pub fn new(
        storage: Arc<dyn StorageReader>,
        store: Arc<dyn IndexStore>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            storage,
            store,
            config,
        }
    }

    /// Run passes at the configured interval until cancelled.
    pub async fn run(&self, cancel: &CancellationToken) {
        loop {
            match self.pass().await {
                Ok(stats) if stats.indexed > 0 || stats.failed > 0 => {
                    info!(
                        scanned = stats.scanned,
                        indexed = stats.indexed,
                        failed = stats.failed,
                        "indexer pass finished"
                    );
                }
                Ok(_) => {}
                Err(error) => warn!(%error, "indexer pass failed"),
            }
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    /// One incremental pass over every discovered run.
    pub async fn pass(&self) -> Result<PassStats> {
        let run_ids = self.storage.list_run_ids().await?;
        let indexed = self.store.indexed_run_ids()?;
        let incomplete = self.store.incomplete_run_ids()?;

        let to_index: Vec<String> = run_ids
            .iter()
            .filter(|id| !indexed.contains(*id) || incomplete.contains(*id))
            .cloned()
            .collect();

        let mut stats = PassStats {
            scanned: run_ids.len(),
            ..PassStats::default()
        };

        let outcomes = stream::iter(to_index)
            .map(|run_id| async move {
                let outcome = self.index_run(&run_id).await;
                (run_id, outcome)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        for (run_id, outcome) in outcomes {
            match outcome {
                Ok(()) => stats.indexed += 1,
                Err(error) => {
                    // No retry here; the next pass picks the run up again.
                    warn!(run_id = %run_id, %error, "failed to index run");
                    stats.failed += 1;
                }
            }
        }

        if let Some(root) = &self.config.rollup_root {
            if let Err(error) = self.write_rollup(root) {
                warn!(%error, "failed to write runs/index.json roll-up");
            }
        }

        Ok(stats)
    }

    async fn index_run(&self, run_id: &str) -> Result<()> {
        let (config_bytes, result_bytes) = tokio::join!(
            self.storage.read_config(run_id),
            self.storage.read_result(run_id),
        );
        let config: RunConfigArtifact = serde_json::from_slice(&config_bytes?)?;
        let result: Option<RunResult> = match result_bytes? {
            Some(bytes) => Some(serde_json::from_slice(&bytes)?),
            None => None,
        };

        let now = Utc::now();
        let indexed_at = self
            .store
            .run_entry(run_id)?
            .map_or(now, |existing| existing.indexed_at);

        let entry = match &result {
            Some(result) => RunIndexEntry {
                run_id: run_id.to_string(),
                timestamp: result.timestamp,
                timestamp_end: result.timestamp_end,
                suite_hash: result.suite_hash.clone(),
                instance_id: result.instance_id.clone(),
                client: result.client.clone(),
                status: result.status,
                tests_total: result.tests.len(),
                tests_failed: result.tests.iter().filter(|test| !test.success).count(),
                indexed_at,
                reindexed_at: now,
            },
            None => RunIndexEntry {
                run_id: run_id.to_string(),
                timestamp: config.timestamp,
                timestamp_end: None,
                suite_hash: config.suite_hash.clone(),
                instance_id: config.instance.id.clone(),
                client: config.instance.client.clone(),
                status: RunStatus::Pending,
                tests_total: 0,
                tests_failed: 0,
                indexed_at,
                reindexed_at: now,
            },
        };
        self.store.upsert_run(&entry)?;

        if let Some(result) = result {
            let rows: Vec<TestIndexRow> = result
                .tests
                .iter()
                .map(|test| TestIndexRow {
                    run_id: run_id.to_string(),
                    test_path: test.path.clone(),
                    name: test.name.clone(),
                    success: test.success,
                    test_duration_ns: test.test_duration_ns,
                })
                .collect();
            self.store.replace_test_rows(run_id, &rows)?;
        }

        debug!(run_id, "indexed run");
        Ok(())
    }

    fn write_rollup(&self, root: &std::path::Path) -> Result<()> {
        let mut entries: Vec<RollupEntry> = self
            .store
            .indexed_run_ids()?
            .into_iter()
            .filter_map(|run_id| self.store.run_entry(&run_id).ok().flatten())
            .map(|entry| RollupEntry {
                run_id: entry.run_id,
                status: entry.status,
                instance_id: entry.instance_id,
                client: entry.client,
            })
            .collect();
        entries.sort_by(|a, b| a.run_id.cmp(&b.run_id));

        let path = layout::runs_index_path(root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(&entries)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchmarkoor_runner::RunResult;
    use benchmarkoor_storage::FsStorage;
    use serde_json::json;

    use crate::store::RedbStore;

    fn seed_config(root: &std::path::Path, run_id: &str) {
        let dir = layout::run_dir(root, run_id);
        std::fs::create_dir_all(&dir).expect("mkdir");
        let config = json!({
            "run_id": run_id,
            "timestamp": "2026-08-01T10:00:00Z",
            "suite_hash": "f".repeat(64),
            "instance": { "id": "geth-default", "client": "geth", "genesis": "./genesis.json" },
            "run": {},
            "system": { "os": "linux", "arch": "x86_64", "hostname": "bench-01" },
        });
        std::fs::write(dir.join("config.json"), config.to_string()).expect("config");
    }

    fn seed_result(root: &std::path::Path, run_id: &str, status: &str, tests: usize) {
        let dir = layout::run_dir(root, run_id);
        let tests: Vec<_> = (0..tests)
            .map(|i| {
                json!({
                    "name": format!("test_{i}"),
                    "path": format!("file/test_{i}"),
                    "success": i != 1,
                    "test_duration_ns": 1_000_000 + i,
                    "steps": {},
                })
            })
            .collect();
        let result = json!({
            "run_id": run_id,
            "timestamp": "2026-08-01T10:00:00Z",
            "timestamp_end": "2026-08-01T10:05:00Z",
            "suite_hash": "f".repeat(64),
            "instance_id": "geth-default",
            "client": "geth",
            "status": status,
            "tests": tests,
        });
        std::fs::write(dir.join("result.json"), result.to_string()).expect("result");
    }

    fn indexer(root: &std::path::Path, db_dir: &std::path::Path) -> (Indexer, Arc<RedbStore>) {
        let storage = Arc::new(FsStorage::new(root));
        let store = Arc::new(RedbStore::open(&db_dir.join("index.redb")).expect("store"));
        let indexer = Indexer::new(
            storage,
            Arc::clone(&store) as Arc<dyn IndexStore>,
            IndexerConfig::default(),
        );
        (indexer, store)
    }

    #[tokio::test]
    async fn test_pass_indexes_new_runs_with_test_rows() {
        let root = tempfile::tempdir().expect("tempdir");
        let db = tempfile::tempdir().expect("tempdir");
        seed_config(root.path(), "aaaa0001");
        seed_result(root.path(), "aaaa0001", "completed", 3);

        let (indexer, store) = indexer(root.path(), db.path());
        let stats = indexer.pass().await.expect("pass");
        assert_eq!(stats, PassStats { scanned: 1, indexed: 1, failed: 0 });

        let entry = store.run_entry("aaaa0001").expect("entry").expect("present");
        assert_eq!(entry.status, RunStatus::Completed);
        assert_eq!(entry.tests_total, 3);
        assert_eq!(entry.tests_failed, 1);
        assert_eq!(store.test_rows("aaaa0001").expect("rows").len(), 3);
    }

    #[tokio::test]
    async fn test_completed_runs_are_not_reindexed() {
        let root = tempfile::tempdir().expect("tempdir");
        let db = tempfile::tempdir().expect("tempdir");
        seed_config(root.path(), "aaaa0001");
        seed_result(root.path(), "aaaa0001", "completed", 1);

        let (indexer, _store) = indexer(root.path(), db.path());
        indexer.pass().await.expect("first pass");
        let stats = indexer.pass().await.expect("second pass");
        assert_eq!(stats.indexed, 0);
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent_except_reindexed_at() {
        let root = tempfile::tempdir().expect("tempdir");
        let db = tempfile::tempdir().expect("tempdir");
        seed_config(root.path(), "aaaa0001");
        seed_result(root.path(), "aaaa0001", "running", 2);

        let (indexer, store) = indexer(root.path(), db.path());
        indexer.pass().await.expect("first pass");
        let first = store.run_entry("aaaa0001").expect("entry").expect("present");
        let first_rows = store.test_rows("aaaa0001").expect("rows");

        // Still incomplete, so the next pass picks it up again.
        tokio::time::sleep(Duration::from_millis(5)).await;
        indexer.pass().await.expect("second pass");
        let second = store.run_entry("aaaa0001").expect("entry").expect("present");
        let second_rows = store.test_rows("aaaa0001").expect("rows");

        assert_eq!(first_rows, second_rows);
        assert_eq!(first.indexed_at, second.indexed_at);
        assert_eq!(first.tests_total, second.tests_total);
        assert!(second.reindexed_at > first.reindexed_at);
    }

    #[tokio::test]
    async fn test_incomplete_run_promotes_once_result_lands() {
        let root = tempfile::tempdir().expect("tempdir");
        let db = tempfile::tempdir().expect("tempdir");
        seed_config(root.path(), "aaaa0002");

        let (indexer, store) = indexer(root.path(), db.path());
        indexer.pass().await.expect("first pass");
        let pending = store.run_entry("aaaa0002").expect("entry").expect("present");
        assert_eq!(pending.status, RunStatus::Pending);

        seed_result(root.path(), "aaaa0002", "completed", 1);
        indexer.pass().await.expect("second pass");
        let done = store.run_entry("aaaa0002").expect("entry").expect("present");
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(store.test_rows("aaaa0002").expect("rows").len(), 1);
    }

    #[tokio::test]
    async fn test_orphaned_store_entries_survive() {
        let root = tempfile::tempdir().expect("tempdir");
        let db = tempfile::tempdir().expect("tempdir");
        let (indexer, store) = indexer(root.path(), db.path());

        // Present in the store, absent from storage.
        store
            .upsert_run(&RunIndexEntry {
                run_id: "gone0001".to_string(),
                timestamp: Utc::now(),
                timestamp_end: None,
                suite_hash: "f".repeat(64),
                instance_id: "geth-default".to_string(),
                client: "geth".to_string(),
                status: RunStatus::Completed,
                tests_total: 0,
                tests_failed: 0,
                indexed_at: Utc::now(),
                reindexed_at: Utc::now(),
            })
            .expect("upsert");

        indexer.pass().await.expect("pass");
        assert!(store.run_entry("gone0001").expect("entry").is_some());
    }

    #[tokio::test]
    async fn test_broken_run_is_logged_and_skipped() {
        let root = tempfile::tempdir().expect("tempdir");
        let db = tempfile::tempdir().expect("tempdir");
        let dir = layout::run_dir(root.path(), "bad00001");
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(dir.join("config.json"), "not json").expect("config");
        seed_config(root.path(), "good0001");
        seed_result(root.path(), "good0001", "completed", 1);

        let (indexer, store) = indexer(root.path(), db.path());
        let stats = indexer.pass().await.expect("pass");
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.indexed, 1);
        assert!(store.run_entry("good0001").expect("entry").is_some());
    }

    #[tokio::test]
    async fn test_rollup_written_when_configured() {
        let root = tempfile::tempdir().expect("tempdir");
        let db = tempfile::tempdir().expect("tempdir");
        seed_config(root.path(), "aaaa0003");
        seed_result(root.path(), "aaaa0003", "completed", 1);

        let storage = Arc::new(FsStorage::new(root.path()));
        let store = Arc::new(RedbStore::open(&db.path().join("index.redb")).expect("store"));
        let indexer = Indexer::new(
            storage,
            store as Arc<dyn IndexStore>,
            IndexerConfig {
                rollup_root: Some(root.path().to_path_buf()),
                ..IndexerConfig::default()
            },
        );
        indexer.pass().await.expect("pass");

        let rollup = std::fs::read_to_string(layout::runs_index_path(root.path())).expect("rollup");
        assert!(rollup.contains("aaaa0003"));
    }
}
