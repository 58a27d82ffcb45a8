//! Uploader interface and S3 object mapping
//!
//! The engine itself never talks to S3; it exposes the mapping from the
//! persisted layout to object keys and a trait an external uploader
//! implements. A preflight write proves the credentials before any run
//! data moves.

use async_trait::async_trait;

use crate::error::Result;

/// Object written by the preflight check.
pub const WRITE_TEST_OBJECT: &str = ".benchmarkoor-write-test";

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[async_trait]
pub trait Uploader: Send + Sync {
    /// Prove write access by putting [`WRITE_TEST_OBJECT`].
    async fn preflight(&self) -> Result<()>;

    /// Mirror `runs/{run_id}/…` into the remote prefix.
    async fn upload_run(&self, run_id: &str) -> Result<()>;

    /// Mirror `suites/{hash}/…` into the remote prefix.
    async fn upload_suite(&self, hash: &str) -> Result<()>;
}

/// Remote key for a file under `runs/{run_id}/`.
pub fn run_object_key(prefix: &str, run_id: &str, relative: &str) -> String {
    join_key(prefix, &format!("runs/{run_id}/{relative}"))
}

/// Remote key for a file under `suites/{hash}/`.
pub fn suite_object_key(prefix: &str, hash: &str, relative: &str) -> String {
    join_key(prefix, &format!("suites/{hash}/{relative}"))
}

fn join_key(prefix: &str, rest: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        rest.to_string()
    } else {
        format!("{prefix}/{rest}")
    }
}

/// Content type derived from the file extension.
pub fn content_type(path: &str) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}
