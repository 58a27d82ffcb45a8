//! Canonical paths of the persisted results layout
//!
//! ```text
//! runs/{run_id}/
//!   config.json
//!   result.json
//!   result.block-logs.json
//!   {test_path}.result-details.json
//!   container.log, container-init.log
//! suites/{hash}/
//!   summary.json
//!   tests/{path}, warmup/{path}
//! runs/index.json
//! ```

use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";
pub const RESULT_FILE: &str = "result.json";
pub const BLOCK_LOGS_FILE: &str = "result.block-logs.json";
pub const CONTAINER_LOG_FILE: &str = "container.log";
pub const CONTAINER_INIT_LOG_FILE: &str = "container-init.log";
pub const RUNS_INDEX_FILE: &str = "index.json";
pub const RESULT_DETAILS_SUFFIX: &str = ".result-details.json";

pub fn runs_dir(root: &Path) -> PathBuf {
    root.join("runs")
}

pub fn run_dir(root: &Path, run_id: &str) -> PathBuf {
    runs_dir(root).join(run_id)
}

pub fn config_path(root: &Path, run_id: &str) -> PathBuf {
    run_dir(root, run_id).join(CONFIG_FILE)
}

pub fn result_path(root: &Path, run_id: &str) -> PathBuf {
    run_dir(root, run_id).join(RESULT_FILE)
}

pub fn block_logs_path(root: &Path, run_id: &str) -> PathBuf {
    run_dir(root, run_id).join(BLOCK_LOGS_FILE)
}

pub fn result_details_path(root: &Path, run_id: &str, test_path: &str) -> PathBuf {
    run_dir(root, run_id).join(format!("{test_path}{RESULT_DETAILS_SUFFIX}"))
}

pub fn runs_index_path(root: &Path) -> PathBuf {
    runs_dir(root).join(RUNS_INDEX_FILE)
}

pub fn suites_dir(root: &Path) -> PathBuf {
    root.join("suites")
}

pub fn suite_dir(root: &Path, hash: &str) -> PathBuf {
    suites_dir(root).join(hash)
}
