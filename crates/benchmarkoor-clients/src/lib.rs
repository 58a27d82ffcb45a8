//! Execution client catalog and block-log line parsers
//!
//! The registry is a closed, read-only mapping from client type to its
//! container image, command line, paths, ports and rollback behavior.

pub mod parser;
pub mod registry;

pub use parser::{log_parser, BlockLogParser, BlockLogPayload, GethParser, NoopParser};
pub use registry::{spec, ClientKind, ClientSpec, RollbackSpec};
