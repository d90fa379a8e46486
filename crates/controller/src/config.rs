//! Workload template data and timing for the controller.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Container image running both the ledger node and the benchmark client.
    pub image: String,
    /// Optional registry credential secret attached to every pod.
    pub image_pull_secret: Option<String>,
    /// Directory holding persisted wallets.
    pub wallet_dir: PathBuf,
    /// Wallet argument handed to the bootstrap node (index 0).
    pub bootstrap_wallet: String,
    /// Peer-to-peer port nodes bootstrap against.
    pub node_port: i32,
    /// HTTP API port benchmark pods drive load against.
    pub api_port: i32,
    /// Static environment added to every node container.
    pub node_env: BTreeMap<String, String>,
    /// Requeue delay while waiting on address assignment.
    #[serde(with = "millis")]
    pub wait_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let node_env = [
            ("LEDGER_SNOWBALL_K", "10"),
            ("LEDGER_SNOWBALL_BETA", "20"),
            ("LEDGER_DB_PATH", "db"),
            ("LEDGER_MEMORY_MAX", "4096"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            image: "ghcr.io/stratum-dev/ledger-node:latest".to_string(),
            image_pull_secret: None,
            wallet_dir: PathBuf::from("config"),
            bootstrap_wallet: "config/wallet.txt".to_string(),
            node_port: 3000,
            api_port: 9000,
            node_env,
            wait_delay: Duration::from_secs(1),
        }
    }
}

impl ControllerConfig {
    /// Defaults overridden by `STRATUM_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("STRATUM_IMAGE") {
            cfg.image = v;
        }
        if let Ok(v) = std::env::var("STRATUM_PULL_SECRET") {
            cfg.image_pull_secret = Some(v).filter(|s| !s.is_empty());
        }
        if let Ok(v) = std::env::var("STRATUM_WALLET_DIR") {
            cfg.wallet_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("STRATUM_BOOTSTRAP_WALLET") {
            cfg.bootstrap_wallet = v;
        }
        if let Some(ms) = std::env::var("STRATUM_WAIT_MS").ok().and_then(|s| s.parse::<u64>().ok()) {
            cfg.wait_delay = Duration::from_millis(ms);
        }
        cfg
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
