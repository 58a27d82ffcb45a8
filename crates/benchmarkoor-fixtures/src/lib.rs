//! Engine fixture parsing and JSON-RPC test script generation
//!
//! Reads standardized engine-fixture JSON files and converts each fixture
//! into a [`TestScript`]: pre-serialized JSON-RPC request lines split into
//! setup and test phases, plus the hashes the run engine needs for
//! correlation and rollback.

pub mod error;
pub mod fixture;
pub mod script;

pub use error::{FixtureError, Result};
pub use fixture::{
    parse_fixture_file, EngineNewPayload, Fixture, GenesisHeader, SUPPORTED_FIXTURE_FORMAT,
};
pub use script::{convert, convert_with_ids, TestScript, ZERO_HASH};
