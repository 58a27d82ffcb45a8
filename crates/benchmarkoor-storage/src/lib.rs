//! Persisted run layout, storage reader contract and uploader interface
//!
//! The writer side lives with the runner; this crate owns the canonical
//! paths plus the read and upload contracts consumers depend on.

pub mod error;
pub mod layout;
pub mod reader;
pub mod upload;

pub use error::{Result, StorageError};
pub use reader::{FsStorage, StorageReader};
pub use upload::{
    content_type, run_object_key, suite_object_key, Uploader, DEFAULT_CONTENT_TYPE,
    WRITE_TEST_OBJECT,
};
