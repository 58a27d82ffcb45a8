//! Content-addressed suite persistence
//!
//! Layout relative to the results root:
//!
//! ```text
//! suites/{hash}/summary.json
//! suites/{hash}/tests/{path}
//! suites/{hash}/warmup/{path}
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::builder::{Suite, SuiteTest};
use crate::error::Result;
use crate::source::SourceDescriptor;

/// `summary.json`: the ordered test and warmup lists plus provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    pub sources: Vec<SourceDescriptor>,
    pub tests: Vec<SummaryEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warmup: Vec<SummaryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub path: String,
    pub name: String,
    pub payload_count: usize,
    pub genesis_hash: String,
    pub final_block_hash: String,
}

impl SummaryEntry {
    fn from_test(test: &SuiteTest) -> Self {
        Self {
            path: test.path.clone(),
            name: test.script.name.clone(),
            payload_count: test.script.payload_count,
            genesis_hash: test.script.genesis_hash.clone(),
            final_block_hash: test.script.final_block_hash.clone(),
        }
    }
}

/// Directory of a persisted suite.
pub fn suite_dir(results_root: &Path, hash: &str) -> PathBuf {
    results_root.join("suites").join(hash)
}

/// Write the suite under `suites/{hash}/`.
///
/// Idempotent: a directory that already carries a `summary.json` for the
/// same hash is left untouched.
pub fn persist(suite: &Suite, results_root: &Path) -> Result<PathBuf> {
    let base = suite_dir(results_root, &suite.hash);
    let summary_path = base.join("summary.json");
    if summary_path.exists() {
        info!(hash = %suite.hash, "suite already persisted");
        return Ok(base);
    }

    for (subdir, tests) in [("tests", &suite.tests), ("warmup", &suite.warmup)] {
        for test in tests.iter() {
            let path = base.join(subdir).join(&test.path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            // One request per line, no trailing newline.
            let lines: Vec<&str> = test
                .script
                .all_lines()
                .map(String::as_str)
                .collect();
            std::fs::write(&path, lines.join("\n"))?;
        }
    }

    let summary = SuiteSummary {
        hash: suite.hash.clone(),
        filter: suite.filter.clone(),
        sources: suite.sources.clone(),
        tests: suite.tests.iter().map(SummaryEntry::from_test).collect(),
        warmup: suite.warmup.iter().map(SummaryEntry::from_test).collect(),
    };
    std::fs::create_dir_all(&base)?;
    std::fs::write(&summary_path, serde_json::to_vec_pretty(&summary)?)?;

    info!(hash = %suite.hash, tests = suite.tests.len(), "suite persisted");
    Ok(base)
}
