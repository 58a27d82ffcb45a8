//! Read contract over the persisted layout
//!
//! Downstream consumers (the indexer and the uploader) see only this
//! trait, never the filesystem directly.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::layout;

#[async_trait]
pub trait StorageReader: Send + Sync {
    /// All run ids present in storage.
    async fn list_run_ids(&self) -> Result<Vec<String>>;

    /// Bytes of the run's `config.json`.
    async fn read_config(&self, run_id: &str) -> Result<Vec<u8>>;

    /// Bytes of the run's `result.json`, or `None` when the run produced
    /// no result (yet).
    async fn read_result(&self, run_id: &str) -> Result<Option<Vec<u8>>>;

    /// Relative paths of every file under the run directory.
    async fn list_run_files(&self, run_id: &str) -> Result<Vec<String>>;
}

/// Local-filesystem storage rooted at the results directory.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collect_files(dir: &Path, base: &Path, files: &mut Vec<String>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                Self::collect_files(&path, base, files)?;
            } else {
                let relative = path
                    .strip_prefix(base)
                    .unwrap_or(&path)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push(relative);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageReader for FsStorage {
    async fn list_run_ids(&self) -> Result<Vec<String>> {
        let runs = layout::runs_dir(&self.root);
        if !runs.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&runs).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn read_config(&self, run_id: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(layout::config_path(&self.root, run_id)).await?)
    }

    async fn read_result(&self, run_id: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(layout::result_path(&self.root, run_id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn list_run_files(&self, run_id: &str) -> Result<Vec<String>> {
        let dir = layout::run_dir(&self.root, run_id);
        let mut files = Vec::new();
        Self::collect_files(&dir, &dir, &mut files)?;
        files.sort();
        Ok(files)
    }
}
