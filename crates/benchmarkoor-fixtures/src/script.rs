//! Conversion of fixtures into pre-serialized JSON-RPC test scripts
//!
//! Each payload becomes two calls: `engine_newPayloadV{v}` with
//! version-dependent params, immediately followed by the
//! `engine_forkchoiceUpdatedV{v}` that canonicalizes the block. The first
//! N−1 pairs form the setup phase, the final pair is the measured test.

use serde_json::{json, Map, Value};

use crate::error::{FixtureError, Result};
use crate::fixture::{EngineNewPayload, Fixture};

/// All-zero block hash used for the safe and finalized fields.
pub const ZERO_HASH: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000000";

/// A fully serialized request stream for one test.
///
/// Lines are complete JSON-RPC 2.0 request bodies; the RPC client sends
/// them as-is without re-serializing.
#[derive(Debug, Clone, Default)]
pub struct TestScript {
    pub name: String,
    pub warmup_lines: Vec<String>,
    pub setup_lines: Vec<String>,
    pub test_lines: Vec<String>,
    pub genesis_hash: String,
    pub final_block_hash: String,
    pub final_parent_hash: String,
    pub final_block_number: u64,
    pub payload_count: usize,
}

impl TestScript {
    /// All lines in submission order.
    pub fn all_lines(&self) -> impl Iterator<Item = &String> {
        self.warmup_lines
            .iter()
            .chain(self.setup_lines.iter())
            .chain(self.test_lines.iter())
    }
}

/// Convert one named fixture into a test script with ids starting at 1.
pub fn convert(name: &str, fixture: &Fixture) -> Result<TestScript> {
    let mut next_id = 1u64;
    convert_with_ids(name, fixture, &mut next_id)
}

/// Convert one named fixture, drawing request ids from a shared counter.
///
/// The suite builder threads one counter through every script it
/// produces, so ids stay strictly increasing across the whole run.
pub fn convert_with_ids(name: &str, fixture: &Fixture, next_id: &mut u64) -> Result<TestScript> {
    if fixture.engine_new_payloads.is_empty() {
        return Err(FixtureError::EmptyPayloads {
            name: name.to_string(),
        });
    }

    let mut lines = Vec::with_capacity(fixture.engine_new_payloads.len() * 2);

    for (index, payload) in fixture.engine_new_payloads.iter().enumerate() {
        lines.push(new_payload_line(name, index, payload, next_id)?);
        lines.push(forkchoice_line(name, index, payload, next_id)?);
    }

    let test_lines = lines.split_off(lines.len() - 2);
    let last_index = fixture.engine_new_payloads.len() - 1;
    let last = &fixture.engine_new_payloads[last_index];

    let final_block_hash = last
        .block_hash()
        .ok_or_else(|| FixtureError::MissingBlockHash {
            name: name.to_string(),
            index: last_index,
        })?
        .to_string();
    let final_block_number =
        last.block_number()
            .ok_or_else(|| FixtureError::InvalidBlockNumber {
                name: name.to_string(),
                index: last_index,
                value: last
                    .execution_payload
                    .get("blockNumber")
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            })?;
    let final_parent_hash = last.parent_hash().unwrap_or_default().to_string();

    Ok(TestScript {
        name: name.to_string(),
        warmup_lines: Vec::new(),
        setup_lines: lines,
        test_lines,
        genesis_hash: fixture.genesis_block_header.hash.clone(),
        final_block_hash,
        final_parent_hash,
        final_block_number,
        payload_count: fixture.engine_new_payloads.len(),
    })
}

fn new_payload_line(
    name: &str,
    index: usize,
    payload: &EngineNewPayload,
    next_id: &mut u64,
) -> Result<String> {
    let version = payload.new_payload_version;
    if !(1..=4).contains(&version) {
        return Err(FixtureError::UnsupportedVersion {
            name: name.to_string(),
            version,
        });
    }
    if payload.block_hash().is_none() {
        return Err(FixtureError::MissingBlockHash {
            name: name.to_string(),
            index,
        });
    }

    let mut params = vec![Value::Object(versioned_payload(payload))];
    if version >= 3 {
        params.push(require_field(
            name,
            index,
            version,
            "blobVersionedHashes",
            payload.blob_versioned_hashes.as_ref().map(|hashes| json!(hashes)),
        )?);
        params.push(require_field(
            name,
            index,
            version,
            "parentBeaconBlockRoot",
            payload.parent_beacon_block_root.as_ref().map(|root| json!(root)),
        )?);
    }
    if version >= 4 {
        params.push(require_field(
            name,
            index,
            version,
            "executionRequests",
            payload.execution_requests.as_ref().map(|requests| json!(requests)),
        )?);
    }

    Ok(request_line(
        next_id,
        &format!("engine_newPayloadV{version}"),
        Value::Array(params),
    ))
}

fn forkchoice_line(
    name: &str,
    index: usize,
    payload: &EngineNewPayload,
    next_id: &mut u64,
) -> Result<String> {
    let head = payload.block_hash().ok_or_else(|| FixtureError::MissingBlockHash {
        name: name.to_string(),
        index,
    })?;

    let state = json!({
        "headBlockHash": head,
        "safeBlockHash": ZERO_HASH,
        "finalizedBlockHash": ZERO_HASH,
    });

    Ok(request_line(
        next_id,
        &format!(
            "engine_forkchoiceUpdatedV{}",
            payload.forkchoice_updated_version
        ),
        Value::Array(vec![state, Value::Null]),
    ))
}

/// The execution payload object with fields gated by the payload version.
///
/// Hex-string fields pass through verbatim; only presence changes with
/// the version.
fn versioned_payload(payload: &EngineNewPayload) -> Map<String, Value> {
    let version = payload.new_payload_version;
    let mut object = payload.execution_payload.clone();
    if version < 2 {
        object.remove("withdrawals");
    }
    if version < 3 {
        object.remove("blobGasUsed");
        object.remove("excessBlobGas");
    }
    object
}

fn require_field(
    name: &str,
    index: usize,
    version: u8,
    field: &'static str,
    value: Option<Value>,
) -> Result<Value> {
    value.ok_or(FixtureError::MissingVersionedField {
        name: name.to_string(),
        index,
        field,
        version,
    })
}

fn request_line(next_id: &mut u64, method: &str, params: Value) -> String {
    let id = *next_id;
    *next_id += 1;
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::SUPPORTED_FIXTURE_FORMAT;
    use serde_json::json;

    fn fixture_with_payloads(payloads: Vec<Value>) -> Fixture {
        serde_json::from_value(json!({
            "fixture_format": SUPPORTED_FIXTURE_FORMAT,
            "network": "Cancun",
            "genesisBlockHeader": { "hash": "0xgenesis" },
            "engineNewPayloads": payloads,
        }))
        .expect("fixture json")
    }

    fn v3_payload(number: u64, parent: &str, hash: &str) -> Value {
        json!({
            "newPayloadVersion": 3,
            "forkchoiceUpdatedVersion": 3,
            "executionPayload": {
                "parentHash": parent,
                "blockNumber": format!("0x{number:x}"),
                "blockHash": hash,
                "blobGasUsed": "0x0",
                "excessBlobGas": "0x0",
                "withdrawals": [],
                "transactions": [],
            },
            "blobVersionedHashes": [],
            "parentBeaconBlockRoot": ZERO_HASH,
        })
    }

    #[test]
    fn test_single_payload_has_empty_setup() {
        let fixture = fixture_with_payloads(vec![v3_payload(1, "0xgenesis", "0xblock1")]);
        let script = convert("single", &fixture).expect("convert");

        assert!(script.setup_lines.is_empty());
        assert_eq!(script.test_lines.len(), 2);
        assert_eq!(script.payload_count, 1);
        assert_eq!(script.final_block_hash, "0xblock1");
        assert_eq!(script.final_parent_hash, "0xgenesis");
        assert_eq!(script.final_block_number, 1);

        let first: Value = serde_json::from_str(&script.test_lines[0]).expect("line json");
        assert_eq!(first["method"], "engine_newPayloadV3");
        assert_eq!(first["params"].as_array().map(Vec::len), Some(3));

        let last: Value = serde_json::from_str(&script.test_lines[1]).expect("line json");
        assert_eq!(last["method"], "engine_forkchoiceUpdatedV3");
        assert_eq!(last["params"][0]["headBlockHash"], "0xblock1");
        assert_eq!(last["params"][0]["safeBlockHash"], ZERO_HASH);
        assert_eq!(last["params"][1], Value::Null);
    }

    #[test]
    fn test_setup_and_test_line_counts() {
        for n in 1..=5usize {
            let payloads = (1..=n)
                .map(|i| v3_payload(i as u64, &format!("0xblock{}", i - 1), &format!("0xblock{i}")))
                .collect();
            let script = convert("counts", &fixture_with_payloads(payloads)).expect("convert");
            assert_eq!(script.setup_lines.len(), 2 * (n - 1));
            assert_eq!(script.test_lines.len(), 2);
        }
    }

    #[test]
    fn test_request_ids_are_monotonic() {
        let fixture = fixture_with_payloads(vec![
            v3_payload(1, "0xgenesis", "0xblock1"),
            v3_payload(2, "0xblock1", "0xblock2"),
        ]);
        let script = convert("ids", &fixture).expect("convert");

        let ids: Vec<u64> = script
            .all_lines()
            .map(|line| {
                let value: Value = serde_json::from_str(line).expect("line json");
                value["id"].as_u64().expect("id")
            })
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_shared_counter_spans_scripts() {
        let fixture = fixture_with_payloads(vec![v3_payload(1, "0xgenesis", "0xblock1")]);
        let mut next_id = 1u64;
        let first = convert_with_ids("first", &fixture, &mut next_id).expect("convert");
        let second = convert_with_ids("second", &fixture, &mut next_id).expect("convert");

        let id_of = |line: &str| {
            let value: Value = serde_json::from_str(line).expect("line json");
            value["id"].as_u64().expect("id")
        };
        assert_eq!(id_of(&first.test_lines[1]), 2);
        assert_eq!(id_of(&second.test_lines[0]), 3);
        assert_eq!(next_id, 5);
    }

    #[test]
    fn test_v1_and_v2_omit_later_params() {
        for version in [1u8, 2] {
            let mut payload = v3_payload(1, "0xgenesis", "0xblock1");
            payload["newPayloadVersion"] = json!(version);
            payload["forkchoiceUpdatedVersion"] = json!(1);
            let script =
                convert("old", &fixture_with_payloads(vec![payload])).expect("convert");

            let first: Value = serde_json::from_str(&script.test_lines[0]).expect("line json");
            assert_eq!(first["params"].as_array().map(Vec::len), Some(1));

            let object = &first["params"][0];
            assert!(object.get("blobGasUsed").is_none());
            assert!(object.get("excessBlobGas").is_none());
            if version < 2 {
                assert!(object.get("withdrawals").is_none());
            } else {
                assert!(object.get("withdrawals").is_some());
            }
        }
    }

    #[test]
    fn test_v4_sends_execution_requests() {
        let mut payload = v3_payload(1, "0xgenesis", "0xblock1");
        payload["newPayloadVersion"] = json!(4);
        payload["executionRequests"] = json!(["0x00aa"]);
        let script = convert("v4", &fixture_with_payloads(vec![payload])).expect("convert");

        let first: Value = serde_json::from_str(&script.test_lines[0]).expect("line json");
        assert_eq!(first["method"], "engine_newPayloadV4");
        assert_eq!(first["params"].as_array().map(Vec::len), Some(4));
        assert_eq!(first["params"][3], json!(["0x00aa"]));
    }

    #[test]
    fn test_v3_without_beacon_root_is_rejected() {
        let mut payload = v3_payload(1, "0xgenesis", "0xblock1");
        payload.as_object_mut().expect("object").remove("parentBeaconBlockRoot");
        let err = convert("broken", &fixture_with_payloads(vec![payload]))
            .expect_err("missing field");
        assert!(matches!(err, FixtureError::MissingVersionedField { field: "parentBeaconBlockRoot", .. }));
    }

    #[test]
    fn test_empty_payload_list_is_rejected() {
        let err = convert("empty", &fixture_with_payloads(vec![])).expect_err("no payloads");
        assert!(matches!(err, FixtureError::EmptyPayloads { .. }));
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let mut payload = v3_payload(1, "0xgenesis", "0xblock1");
        payload["newPayloadVersion"] = json!(7);
        let err = convert("future", &fixture_with_payloads(vec![payload]))
            .expect_err("unsupported version");
        assert!(matches!(err, FixtureError::UnsupportedVersion { version: 7, .. }));
    }
}
