use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::providers::{Http, Provider};
use ethers::types::{Address, U256};

use crate::error::{PaymentError, PaymentResult};

abigen!(
    MultiPartyEscrow,
    r#"[
        function channels(uint256 channelId) view returns (address sender, address recipient, uint256 groupId, uint256 value, uint256 nonce, uint256 expiration)
    ]"#
);

/// Channel state as read from the escrow contract. Only the `channels(id)`
/// getter is consumed; opening and claiming stay outside the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainChannel {
    pub sender: Address,
    pub recipient: Address,
    pub group_id: U256,
    pub value: U256,
    pub nonce: U256,
    pub expiration: U256,
}

#[async_trait]
pub trait EscrowContract: Send + Sync {
    /// Reads one channel from the contract. `Ok(None)` means the id was
    /// never opened on-chain.
    async fn channel(&self, channel_id: U256) -> PaymentResult<Option<OnChainChannel>>;
}

/// Production [`EscrowContract`] over a JSON-RPC endpoint. The contract is
/// stateless for reads, so one shared handle serves every request task.
pub struct MpeContract {
    contract: MultiPartyEscrow<Provider<Http>>,
    request_timeout: Duration,
}

impl MpeContract {
    pub fn new(
        rpc_endpoint: &str,
        contract_address: Address,
        request_timeout: Duration,
    ) -> PaymentResult<Self> {
        let provider = Provider::<Http>::try_from(rpc_endpoint).map_err(|err| {
            PaymentError::internal(format!("invalid ethereum rpc endpoint: {err}"))
        })?;
        Ok(Self {
            contract: MultiPartyEscrow::new(contract_address, Arc::new(provider)),
            request_timeout,
        })
    }
}

#[async_trait]
impl EscrowContract for MpeContract {
    async fn channel(&self, channel_id: U256) -> PaymentResult<Option<OnChainChannel>> {
        let call = self.contract.channels(channel_id);
        let (sender, recipient, group_id, value, nonce, expiration) =
            tokio::time::timeout(self.request_timeout, call.call())
                .await
                .map_err(|_| PaymentError::unavailable("escrow contract read timed out"))?
                .map_err(|err| {
                    PaymentError::unavailable(format!("escrow contract read failed: {err}"))
                })?;
        // Solidity mappings read as zeroed structs for unknown ids.
        if sender == Address::zero() {
            return Ok(None);
        }
        Ok(Some(OnChainChannel {
            sender,
            recipient,
            group_id,
            value,
            nonce,
            expiration,
        }))
    }
}
