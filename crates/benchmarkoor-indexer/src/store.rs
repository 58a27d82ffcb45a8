//! Key-ordered index store
//!
//! Run entries live under their run id; per-test timing rows under
//! `{run_id}/{test_path}` so one range scan covers a run. All writes go
//! through a single mutex: some deployments point several indexer
//! workers at one single-writer store.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use benchmarkoor_runner::RunStatus;

use crate::error::Result;

const RUNS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("runs");
const TESTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("test_timings");

/// Batch size for per-test bulk upserts.
pub const UPSERT_BATCH_SIZE: usize = 256;

/// One indexed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunIndexEntry {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_end: Option<DateTime<Utc>>,
    pub suite_hash: String,
    pub instance_id: String,
    pub client: String,
    pub status: RunStatus,
    pub tests_total: usize,
    pub tests_failed: usize,
    pub indexed_at: DateTime<Utc>,
    pub reindexed_at: DateTime<Utc>,
}

/// One indexed per-test timing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestIndexRow {
    pub run_id: String,
    pub test_path: String,
    pub name: String,
    pub success: bool,
    pub test_duration_ns: u64,
}

/// Store contract the indexer writes through.
pub trait IndexStore: Send + Sync {
    fn indexed_run_ids(&self) -> Result<HashSet<String>>;
    /// Indexed runs whose status is not terminal yet.
    fn incomplete_run_ids(&self) -> Result<HashSet<String>>;
    fn run_entry(&self, run_id: &str) -> Result<Option<RunIndexEntry>>;
    fn upsert_run(&self, entry: &RunIndexEntry) -> Result<()>;
    /// Replace all timing rows of a run: prior rows are deleted first so
    /// reindexing is idempotent, inserts land in fixed-size batches
    /// inside one transaction.
    fn replace_test_rows(&self, run_id: &str, rows: &[TestIndexRow]) -> Result<()>;
    fn test_rows(&self, run_id: &str) -> Result<Vec<TestIndexRow>>;
}

pub struct RedbStore {
    db: Database,
    write_lock: Mutex<()>,
}

impl RedbStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;
        let store = Self {
            db,
            write_lock: Mutex::new(()),
        };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        let tx = self.db.begin_write()?;
        tx.open_table(RUNS_TABLE)?;
        tx.open_table(TESTS_TABLE)?;
        tx.commit()?;
        Ok(())
    }

    /// Range covering every `{run_id}/…` key. `0x30` ('0') is the first
    /// byte after '/'.
    fn run_prefix_range(run_id: &str) -> (String, String) {
        (format!("{run_id}/"), format!("{run_id}0"))
    }
}

impl IndexStore for RedbStore {
    fn indexed_run_ids(&self) -> Result<HashSet<String>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(RUNS_TABLE)?;
        let mut ids = HashSet::new();
        for row in table.iter()? {
            let (key, _) = row?;
            ids.insert(key.value().to_string());
        }
        Ok(ids)
    }

    fn incomplete_run_ids(&self) -> Result<HashSet<String>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(RUNS_TABLE)?;
        let mut ids = HashSet::new();
        for row in table.iter()? {
            let (key, value) = row?;
            let entry: RunIndexEntry = serde_json::from_slice(value.value())?;
            if !entry.status.is_terminal() {
                ids.insert(key.value().to_string());
            }
        }
        Ok(ids)
    }

    fn run_entry(&self, run_id: &str) -> Result<Option<RunIndexEntry>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(RUNS_TABLE)?;
        match table.get(run_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn upsert_run(&self, entry: &RunIndexEntry) -> Result<()> {
        let _guard = self.write_lock.lock();
        let bytes = serde_json::to_vec(entry)?;
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(RUNS_TABLE)?;
            table.insert(entry.run_id.as_str(), bytes.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    fn replace_test_rows(&self, run_id: &str, rows: &[TestIndexRow]) -> Result<()> {
        let _guard = self.write_lock.lock();
        let (start, end) = Self::run_prefix_range(run_id);
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(TESTS_TABLE)?;
            let stale: Vec<String> = table
                .range(start.as_str()..end.as_str())?
                .map(|row| row.map(|(key, _)| key.value().to_string()))
                .collect::<std::result::Result<_, _>>()?;
            for key in stale {
                table.remove(key.as_str())?;
            }
            for batch in rows.chunks(UPSERT_BATCH_SIZE) {
                for row in batch {
                    let key = format!("{run_id}/{}", row.test_path);
                    let bytes = serde_json::to_vec(row)?;
                    table.insert(key.as_str(), bytes.as_slice())?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn test_rows(&self, run_id: &str) -> Result<Vec<TestIndexRow>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(TESTS_TABLE)?;
        let (start, end) = Self::run_prefix_range(run_id);
        let mut rows = Vec::new();
        for row in table.range(start.as_str()..end.as_str())? {
            let (_, value) = row?;
            rows.push(serde_json::from_slice(value.value())?);
        }
        Ok(rows)
    }
}
