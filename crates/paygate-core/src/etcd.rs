use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, ConnectOptions, Txn, TxnOp};

use crate::error::{PaymentError, PaymentResult};
use crate::kv::KeyValueStore;

pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 3000;

/// Client configuration for the etcd v3 backend shared by a replica group.
#[derive(Debug, Clone)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    pub connection_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

/// Replicated [`KeyValueStore`] over an etcd cluster.
///
/// Compare-and-swap maps onto an etcd transaction: a value-equality compare
/// for the swap form, and a `create_revision == 0` compare for the
/// insert-if-absent form (etcd has no native absent-value compare). Every
/// operation is bounded by the configured request timeout.
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    pub async fn connect(config: &EtcdConfig) -> PaymentResult<Self> {
        let options = ConnectOptions::new()
            .with_connect_timeout(Duration::from_millis(config.connection_timeout_ms))
            .with_timeout(Duration::from_millis(config.request_timeout_ms));
        let client = Client::connect(config.endpoints.clone(), Some(options))
            .await
            .map_err(|err| {
                PaymentError::unavailable(format!("unable to connect to etcd: {err}"))
            })?;
        tracing::info!(endpoints = ?config.endpoints, "connected to etcd cluster");
        Ok(Self { client })
    }
}

fn io_error(err: etcd_client::Error) -> PaymentError {
    PaymentError::unavailable(format!("etcd request failed: {err}"))
}

#[async_trait]
impl KeyValueStore for EtcdStore {
    async fn get(&self, key: &[u8]) -> PaymentResult<Option<Vec<u8>>> {
        let mut kv = self.client.kv_client();
        let response = kv.get(key, None).await.map_err(io_error)?;
        Ok(response.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> PaymentResult<()> {
        let mut kv = self.client.kv_client();
        kv.put(key, value, None).await.map_err(io_error)?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &[u8],
        expect: Option<&[u8]>,
        update: Option<&[u8]>,
    ) -> PaymentResult<bool> {
        let compare = match expect {
            Some(expect) => Compare::value(key, CompareOp::Equal, expect),
            None => Compare::create_revision(key, CompareOp::Equal, 0),
        };
        let operation = match update {
            Some(update) => TxnOp::put(key, update, None),
            None => TxnOp::delete(key, None),
        };
        let txn = Txn::new().when([compare]).and_then([operation]);
        let mut kv = self.client.kv_client();
        let response = kv.txn(txn).await.map_err(io_error)?;
        Ok(response.succeeded())
    }

    async fn delete(&self, key: &[u8]) -> PaymentResult<()> {
        let mut kv = self.client.kv_client();
        kv.delete(key, None).await.map_err(io_error)?;
        Ok(())
    }
}
