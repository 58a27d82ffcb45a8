//! Per-client block-log line parsers
//!
//! Instrumented clients emit one JSON record per executed block with
//! fine-grained timing and cache statistics. The parser contract is
//! line-oriented: offered a complete log line, it either extracts the
//! payload and its `block.hash` or declines.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::registry::ClientKind;

/// A parsed per-block metrics record.
///
/// The payload is opaque apart from the guaranteed `block.hash` field and
/// is persisted exactly as extracted.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockLogPayload {
    pub block_hash: String,
    pub payload: Value,
}

/// Line parser contract. Implementations are stateless.
pub trait BlockLogParser: Send + Sync {
    /// Offer one newline-stripped log line; `None` means not a block log.
    fn parse_line(&self, line: &str) -> Option<BlockLogPayload>;
}

/// Select the parser for a client type. Clients without a known block-log
/// format get the no-op parser.
pub fn log_parser(kind: ClientKind) -> &'static dyn BlockLogParser {
    match kind {
        ClientKind::Geth => &GethParser,
        ClientKind::Nethermind
        | ClientKind::Besu
        | ClientKind::Erigon
        | ClientKind::Reth
        | ClientKind::Nimbus => &NoopParser,
    }
}

/// Parser stub for clients with no known block-log format.
pub struct NoopParser;

impl BlockLogParser for NoopParser {
    fn parse_line(&self, _line: &str) -> Option<BlockLogPayload> {
        None
    }
}

/// Geth's instrumented block log: a level/timestamp prefix followed by a
/// JSON body, e.g.
///
/// ```text
/// INFO [08-01|12:00:00.123] {"block":{"hash":"0xabc","number":1},"execution":{...}}
/// ```
pub struct GethParser;

static GETH_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z]+\s*\[[^\]]*\]\s*(\{.*\})\s*$").expect("static regex compiles")
});

impl BlockLogParser for GethParser {
    fn parse_line(&self, line: &str) -> Option<BlockLogPayload> {
        let captures = GETH_LINE.captures(line)?;
        let body = captures.get(1)?.as_str();
        let payload: Value = serde_json::from_str(body).ok()?;
        let block_hash = payload
            .get("block")?
            .get("hash")?
            .as_str()
            .filter(|hash| !hash.is_empty())?
            .to_string();
        Some(BlockLogPayload {
            block_hash,
            payload,
        })
    }
}
