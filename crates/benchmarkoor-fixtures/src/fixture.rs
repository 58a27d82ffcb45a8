//! Serde model for standardized engine fixture files
//!
//! A fixture file is a mapping of test name to fixture. Only fixtures
//! tagged with the supported `fixture_format` are converted; everything
//! else is skipped.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::Result;

/// The fixture format this converter understands.
pub const SUPPORTED_FIXTURE_FORMAT: &str = "blockchain_test_engine_x";

/// Parse the bytes of a fixture file into its named fixtures.
///
/// Ordering follows the test names so repeated builds walk fixtures in a
/// stable order regardless of the on-disk JSON object order.
pub fn parse_fixture_file(bytes: &[u8]) -> Result<BTreeMap<String, Fixture>> {
    Ok(serde_json::from_slice(bytes)?)
}

/// One engine fixture: a genesis header plus an ordered payload sequence.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    #[serde(default, rename = "fixture_format")]
    pub fixture_format: String,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub genesis_block_header: GenesisHeader,
    #[serde(default)]
    pub engine_new_payloads: Vec<EngineNewPayload>,
}

impl Fixture {
    /// Whether this fixture carries the supported format tag.
    pub fn is_supported(&self) -> bool {
        self.fixture_format == SUPPORTED_FIXTURE_FORMAT
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenesisHeader {
    #[serde(default)]
    pub hash: String,
}

/// One `engine_newPayload` step of a fixture.
///
/// The execution payload is kept as the raw JSON object so hex-string
/// fields pass through to the wire verbatim.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineNewPayload {
    #[serde(deserialize_with = "version_from_string_or_number")]
    pub new_payload_version: u8,
    #[serde(
        default = "default_fcu_version",
        deserialize_with = "version_from_string_or_number"
    )]
    pub forkchoice_updated_version: u8,
    pub execution_payload: Map<String, Value>,
    #[serde(default)]
    pub blob_versioned_hashes: Option<Vec<String>>,
    #[serde(default)]
    pub parent_beacon_block_root: Option<String>,
    #[serde(default)]
    pub execution_requests: Option<Vec<String>>,
    #[serde(default)]
    pub validation_error: Option<String>,
}

impl EngineNewPayload {
    /// The payload's `blockHash` field, if present and non-empty.
    pub fn block_hash(&self) -> Option<&str> {
        self.execution_payload
            .get("blockHash")
            .and_then(Value::as_str)
            .filter(|hash| !hash.is_empty())
    }

    /// The payload's `parentHash` field, if present.
    pub fn parent_hash(&self) -> Option<&str> {
        self.execution_payload.get("parentHash").and_then(Value::as_str)
    }

    /// The payload's `blockNumber` field decoded from its hex quantity form.
    pub fn block_number(&self) -> Option<u64> {
        let raw = self.execution_payload.get("blockNumber")?.as_str()?;
        u64::from_str_radix(raw.trim_start_matches("0x"), 16).ok()
    }
}

fn default_fcu_version() -> u8 {
    1
}

// Fixture generators emit versions both as JSON numbers and as strings.
fn version_from_string_or_number<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u8),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(v) => Ok(v),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
