//! Suite building, content hashing and suite persistence
//!
//! Groups discovered fixtures into a content-addressed [`Suite`] keyed by a
//! deterministic digest over its inputs, and writes the line-delimited
//! JSON-RPC scripts under `suites/{hash}/`.

pub mod builder;
pub mod error;
pub mod hash;
pub mod persist;
pub mod source;

pub use builder::{build, Suite, SuiteTest};
pub use error::{Result, SuiteError};
pub use hash::{suite_hash, SUITE_FORMAT_VERSION};
pub use persist::{persist, suite_dir, SuiteSummary, SummaryEntry};
pub use source::{discover_files, matches_filter, resolve_source, SourceDescriptor};
