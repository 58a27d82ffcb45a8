//! Static catalog of execution client specifications
//!
//! Specs are process-wide constants: flags, paths and ports never change
//! per client type, only the instance config can override the image and
//! command line.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The closed set of supported execution clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    Geth,
    Nethermind,
    Besu,
    Erigon,
    Reth,
    Nimbus,
}

impl ClientKind {
    /// Case-sensitive lookup by type name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "geth" => Some(Self::Geth),
            "nethermind" => Some(Self::Nethermind),
            "besu" => Some(Self::Besu),
            "erigon" => Some(Self::Erigon),
            "reth" => Some(Self::Reth),
            "nimbus" => Some(Self::Nimbus),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Geth => "geth",
            Self::Nethermind => "nethermind",
            Self::Besu => "besu",
            Self::Erigon => "erigon",
            Self::Reth => "reth",
            Self::Nimbus => "nimbus",
        }
    }

    pub fn all() -> &'static [Self] {
        &[
            Self::Geth,
            Self::Nethermind,
            Self::Besu,
            Self::Erigon,
            Self::Reth,
            Self::Nimbus,
        ]
    }
}

impl std::fmt::Display for ClientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How `debug_setHead`'s positional argument is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackSpec {
    /// `0x`-prefixed hex block number (Geth, Besu).
    HexString,
    /// Decimal integer block number (Reth).
    Int,
    /// The client has no usable rollback RPC; recreate the container.
    None,
}

impl RollbackSpec {
    /// Encode the rollback target as the RPC argument, if the client
    /// supports RPC rollback at all.
    pub fn encode(self, block_number: u64) -> Option<Value> {
        match self {
            Self::HexString => Some(json!(format!("0x{block_number:x}"))),
            Self::Int => Some(json!(block_number)),
            Self::None => None,
        }
    }
}

/// Immutable per-type client specification.
#[derive(Debug, Clone)]
pub struct ClientSpec {
    pub kind: ClientKind,
    pub default_image: &'static str,
    pub default_command: &'static [&'static str],
    /// Flag that points the client at the genesis file; empty when the
    /// init command consumes the genesis instead.
    pub genesis_flag: &'static str,
    pub requires_init: bool,
    pub init_command: &'static [&'static str],
    pub data_dir: &'static str,
    pub genesis_path: &'static str,
    pub jwt_path: &'static str,
    pub rpc_port: u16,
    pub engine_port: u16,
    pub metrics_port: u16,
    pub default_env: &'static [(&'static str, &'static str)],
    pub rollback: RollbackSpec,
}

/// Look up the process-wide spec for a client type.
pub fn spec(kind: ClientKind) -> &'static ClientSpec {
    match kind {
        ClientKind::Geth => &GETH,
        ClientKind::Nethermind => &NETHERMIND,
        ClientKind::Besu => &BESU,
        ClientKind::Erigon => &ERIGON,
        ClientKind::Reth => &RETH,
        ClientKind::Nimbus => &NIMBUS,
    }
}

static GETH: ClientSpec = ClientSpec {
    kind: ClientKind::Geth,
    default_image: "ethereum/client-go:stable",
    default_command: &[
        "--datadir=/data",
        "--http",
        "--http.addr=0.0.0.0",
        "--http.port=8545",
        "--http.api=eth,net,web3,debug",
        "--http.vhosts=*",
        "--authrpc.addr=0.0.0.0",
        "--authrpc.port=8551",
        "--authrpc.jwtsecret=/jwt.hex",
        "--authrpc.vhosts=*",
        "--metrics",
        "--metrics.addr=0.0.0.0",
        "--metrics.port=6060",
        "--syncmode=full",
        "--nodiscover",
        "--maxpeers=0",
    ],
    genesis_flag: "",
    requires_init: true,
    init_command: &["init", "--datadir=/data", "--state.scheme=hash", "/genesis.json"],
    data_dir: "/data",
    genesis_path: "/genesis.json",
    jwt_path: "/jwt.hex",
    rpc_port: 8545,
    engine_port: 8551,
    metrics_port: 6060,
    default_env: &[],
    rollback: RollbackSpec::HexString,
};

static NETHERMIND: ClientSpec = ClientSpec {
    kind: ClientKind::Nethermind,
    default_image: "nethermind/nethermind:latest",
    default_command: &[
        "--datadir=/data",
        "--Init.ChainSpecPath=/genesis.json",
        "--Init.DiscoveryEnabled=false",
        "--JsonRpc.Enabled=true",
        "--JsonRpc.Host=0.0.0.0",
        "--JsonRpc.Port=8545",
        "--JsonRpc.EnabledModules=Eth,Net,Web3,Debug",
        "--JsonRpc.EngineHost=0.0.0.0",
        "--JsonRpc.EnginePort=8551",
        "--JsonRpc.JwtSecretFile=/jwt.hex",
        "--Metrics.Enabled=true",
        "--Metrics.ExposePort=6060",
        "--Network.MaxActivePeers=0",
    ],
    genesis_flag: "--Init.ChainSpecPath",
    requires_init: false,
    init_command: &[],
    data_dir: "/data",
    genesis_path: "/genesis.json",
    jwt_path: "/jwt.hex",
    rpc_port: 8545,
    engine_port: 8551,
    metrics_port: 6060,
    default_env: &[("DOTNET_BundleExtractBaseDir", "/data/bundle")],
    rollback: RollbackSpec::None,
};

static BESU: ClientSpec = ClientSpec {
    kind: ClientKind::Besu,
    default_image: "hyperledger/besu:latest",
    default_command: &[
        "--data-path=/data",
        "--genesis-file=/genesis.json",
        "--rpc-http-enabled",
        "--rpc-http-host=0.0.0.0",
        "--rpc-http-port=8545",
        "--rpc-http-api=ETH,NET,WEB3,DEBUG",
        "--host-allowlist=*",
        "--engine-rpc-enabled",
        "--engine-host-allowlist=*",
        "--engine-rpc-port=8551",
        "--engine-jwt-secret=/jwt.hex",
        "--metrics-enabled",
        "--metrics-host=0.0.0.0",
        "--metrics-port=6060",
        "--p2p-enabled=false",
    ],
    genesis_flag: "--genesis-file",
    requires_init: false,
    init_command: &[],
    data_dir: "/data",
    genesis_path: "/genesis.json",
    jwt_path: "/jwt.hex",
    rpc_port: 8545,
    engine_port: 8551,
    metrics_port: 6060,
    default_env: &[("BESU_OPTS", "-Xmx8g")],
    rollback: RollbackSpec::HexString,
};

static ERIGON: ClientSpec = ClientSpec {
    kind: ClientKind::Erigon,
    default_image: "erigontech/erigon:latest",
    default_command: &[
        "--datadir=/data",
        "--http",
        "--http.addr=0.0.0.0",
        "--http.port=8545",
        "--http.api=eth,net,web3,debug",
        "--http.vhosts=*",
        "--authrpc.addr=0.0.0.0",
        "--authrpc.port=8551",
        "--authrpc.jwtsecret=/jwt.hex",
        "--authrpc.vhosts=*",
        "--metrics",
        "--metrics.addr=0.0.0.0",
        "--metrics.port=6060",
        "--nodiscover",
        "--maxpeers=0",
    ],
    genesis_flag: "",
    requires_init: true,
    init_command: &["init", "--datadir=/data", "/genesis.json"],
    data_dir: "/data",
    genesis_path: "/genesis.json",
    jwt_path: "/jwt.hex",
    rpc_port: 8545,
    engine_port: 8551,
    metrics_port: 6060,
    default_env: &[],
    rollback: RollbackSpec::None,
};

static RETH: ClientSpec = ClientSpec {
    kind: ClientKind::Reth,
    default_image: "ghcr.io/paradigmxyz/reth:latest",
    default_command: &[
        "node",
        "--datadir=/data",
        "--chain=/genesis.json",
        "--http",
        "--http.addr=0.0.0.0",
        "--http.port=8545",
        "--http.api=eth,net,web3,debug",
        "--authrpc.addr=0.0.0.0",
        "--authrpc.port=8551",
        "--authrpc.jwtsecret=/jwt.hex",
        "--metrics=0.0.0.0:6060",
        "--disable-discovery",
        "--max-outbound-peers=0",
    ],
    genesis_flag: "--chain",
    requires_init: false,
    init_command: &[],
    data_dir: "/data",
    genesis_path: "/genesis.json",
    jwt_path: "/jwt.hex",
    rpc_port: 8545,
    engine_port: 8551,
    metrics_port: 6060,
    default_env: &[("RUST_LOG", "info")],
    rollback: RollbackSpec::Int,
};

static NIMBUS: ClientSpec = ClientSpec {
    kind: ClientKind::Nimbus,
    default_image: "statusim/nimbus-eth1:latest",
    default_command: &[
        "--data-dir=/data",
        "--custom-network=/genesis.json",
        "--rpc",
        "--rpc-address=0.0.0.0",
        "--rpc-port=8545",
        "--engine-api",
        "--engine-api-address=0.0.0.0",
        "--engine-api-port=8551",
        "--jwt-secret=/jwt.hex",
        "--metrics",
        "--metrics-address=0.0.0.0",
        "--metrics-port=6060",
        "--max-peers=0",
    ],
    genesis_flag: "--custom-network",
    requires_init: false,
    init_command: &[],
    data_dir: "/data",
    genesis_path: "/genesis.json",
    jwt_path: "/jwt.hex",
    rpc_port: 8545,
    engine_port: 8551,
    metrics_port: 6060,
    default_env: &[],
    rollback: RollbackSpec::None,
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_is_case_sensitive() {
        assert_eq!(ClientKind::from_name("geth"), Some(ClientKind::Geth));
        assert_eq!(ClientKind::from_name("Geth"), None);
        assert_eq!(ClientKind::from_name("GETH"), None);
        assert_eq!(ClientKind::from_name("openethereum"), None);
    }

    #[test]
    fn test_every_kind_has_a_spec() {
        for kind in ClientKind::all() {
            let spec = spec(*kind);
            assert_eq!(spec.kind, *kind);
            assert!(!spec.default_image.is_empty());
            assert_ne!(spec.rpc_port, spec.engine_port);
            assert_eq!(spec.requires_init, !spec.init_command.is_empty());
        }
    }

    #[test]
    fn test_rollback_argument_encoding() {
        assert_eq!(RollbackSpec::HexString.encode(255), Some(json!("0xff")));
        assert_eq!(RollbackSpec::Int.encode(255), Some(json!(255)));
        assert_eq!(RollbackSpec::None.encode(255), None);
    }

    #[test]
    fn test_geth_and_besu_roll_back_over_rpc() {
        assert_eq!(spec(ClientKind::Geth).rollback, RollbackSpec::HexString);
        assert_eq!(spec(ClientKind::Besu).rollback, RollbackSpec::HexString);
        assert_eq!(spec(ClientKind::Reth).rollback, RollbackSpec::Int);
        assert_eq!(spec(ClientKind::Nethermind).rollback, RollbackSpec::None);
    }
}
