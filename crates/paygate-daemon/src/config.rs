use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use ethers::types::{Address, U256};
use serde::Deserialize;
use thiserror::Error;

use paygate_core::etcd::{EtcdConfig, DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("unable to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

/// Payment channel storage client options, mirroring the etcd defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KvConfig {
    pub endpoints: Vec<String>,
    pub connection_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl KvConfig {
    pub fn to_etcd_config(&self) -> EtcdConfig {
        EtcdConfig {
            endpoints: self.endpoints.clone(),
            connection_timeout_ms: self.connection_timeout_ms,
            request_timeout_ms: self.request_timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PaymentConfig {
    /// Channel lock expiry. Must be at least twice the KV request timeout so
    /// a live transaction never sees its own lock expire.
    pub lock_ttl_ms: u64,
    /// Fixed price per call, decimal, in wei-equivalent base units.
    pub price: String,
    /// Re-check the on-chain nonce even on a storage hit. Stricter but adds
    /// one contract read per request; off by default.
    pub reconcile_on_hit: bool,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            lock_ttl_ms: 4 * DEFAULT_REQUEST_TIMEOUT_MS,
            price: "1".to_string(),
            reconcile_on_hit: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub listen: String,
    pub telemetry_listen: String,
    pub service_id: String,
    pub mpe_contract_address: String,
    pub replica_group_id: String,
    pub ethereum_rpc_endpoint: String,
    pub downstream_endpoint: String,
    pub kv: KvConfig,
    pub payment: PaymentConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7000".to_string(),
            telemetry_listen: "127.0.0.1:9464".to_string(),
            service_id: "service".to_string(),
            mpe_contract_address: String::new(),
            replica_group_id: "0".to_string(),
            ethereum_rpc_endpoint: "http://127.0.0.1:8545".to_string(),
            downstream_endpoint: "http://127.0.0.1:7003".to_string(),
            kv: KvConfig::default(),
            payment: PaymentConfig::default(),
        }
    }
}

/// Configuration after parsing and cross-field validation. Obtaining one is
/// the daemon's "configuration valid" gate (exit code 2 on failure).
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub listen: SocketAddr,
    pub telemetry_listen: SocketAddr,
    pub mpe_contract_address: Address,
    pub replica_group_id: U256,
    pub price: U256,
    pub lock_ttl: Duration,
    pub reconcile_on_hit: bool,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        let listen: SocketAddr = self
            .listen
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid listen address: {}", self.listen)))?;
        let telemetry_listen: SocketAddr = self.telemetry_listen.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "invalid telemetry listen address: {}",
                self.telemetry_listen
            ))
        })?;
        let mpe_contract_address: Address = self.mpe_contract_address.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "invalid mpe contract address: {:?}",
                self.mpe_contract_address
            ))
        })?;
        let replica_group_id = U256::from_dec_str(&self.replica_group_id).map_err(|_| {
            ConfigError::Invalid(format!(
                "invalid replica group id: {:?}",
                self.replica_group_id
            ))
        })?;
        let price = U256::from_dec_str(&self.payment.price)
            .map_err(|_| ConfigError::Invalid(format!("invalid price: {:?}", self.payment.price)))?;

        if self.kv.endpoints.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one kv endpoint is required".to_string(),
            ));
        }
        if self.downstream_endpoint.is_empty() {
            return Err(ConfigError::Invalid(
                "downstream endpoint is required".to_string(),
            ));
        }
        if self.payment.lock_ttl_ms < 2 * self.kv.request_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "payment.lock_ttl_ms ({}) must be at least twice kv.request_timeout_ms ({})",
                self.payment.lock_ttl_ms, self.kv.request_timeout_ms
            )));
        }

        Ok(ResolvedConfig {
            listen,
            telemetry_listen,
            mpe_contract_address,
            replica_group_id,
            price,
            lock_ttl: Duration::from_millis(self.payment.lock_ttl_ms),
            reconcile_on_hit: self.payment.reconcile_on_hit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, DaemonConfig};
    use ethers::types::U256;

    const MPE_ADDRESS: &str = "0xf25186b5081ff5ce73482ad761db0eb0d25abfbf";

    fn valid_config() -> DaemonConfig {
        DaemonConfig {
            mpe_contract_address: MPE_ADDRESS.to_string(),
            replica_group_id: "7".to_string(),
            ..DaemonConfig::default()
        }
    }

    #[test]
    fn defaults_carry_the_documented_timeouts() {
        let config = DaemonConfig::default();
        assert_eq!(config.kv.connection_timeout_ms, 5000);
        assert_eq!(config.kv.request_timeout_ms, 3000);
        assert!(!config.payment.reconcile_on_hit);
    }

    #[test]
    fn resolve_parses_addresses_and_integers() {
        let resolved = valid_config().resolve().unwrap();
        assert_eq!(resolved.replica_group_id, U256::from(7));
        assert_eq!(
            format!("{:#x}", resolved.mpe_contract_address),
            MPE_ADDRESS
        );
    }

    #[test]
    fn lock_ttl_below_twice_the_request_timeout_is_rejected() {
        let mut config = valid_config();
        config.payment.lock_ttl_ms = config.kv.request_timeout_ms;
        let err = config.resolve().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_contract_address_is_rejected() {
        let mut config = valid_config();
        config.mpe_contract_address = "not-an-address".to_string();
        assert!(config.resolve().is_err());
    }

    #[test]
    fn empty_kv_endpoints_are_rejected() {
        let mut config = valid_config();
        config.kv.endpoints.clear();
        assert!(config.resolve().is_err());
    }

    #[test]
    fn config_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paygate.json");
        std::fs::write(
            &path,
            format!(
                r#"{{
                    "mpe_contract_address": "{MPE_ADDRESS}",
                    "replica_group_id": "7",
                    "kv": {{ "endpoints": ["http://10.0.0.1:2379"] }},
                    "payment": {{ "lock_ttl_ms": 10000, "price": "45" }}
                }}"#
            ),
        )
        .unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.kv.endpoints, vec!["http://10.0.0.1:2379"]);
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.price, U256::from(45));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paygate.json");
        std::fs::write(&path, r#"{ "no_such_option": true }"#).unwrap();
        assert!(matches!(
            DaemonConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            DaemonConfig::load(std::path::Path::new("/nonexistent/paygate.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
