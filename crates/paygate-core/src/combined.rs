use std::sync::Arc;

use ethers::types::U256;

use crate::blockchain::EscrowContract;
use crate::error::{PaymentError, PaymentResult};
use crate::payment::{ChannelData, ChannelKey, ChannelState};
use crate::storage::ChannelStorage;

/// Channel storage reconciled with on-chain truth.
///
/// A storage miss falls back to the escrow contract and installs the fresh
/// row with an insert-if-absent CAS, so that under concurrent first-touch
/// across replicas at most one hydration wins and committed cheque progress
/// is never overwritten with a blockchain zero.
pub struct CombinedStorage {
    storage: ChannelStorage,
    contract: Arc<dyn EscrowContract>,
    group_id: U256,
    reconcile_on_hit: bool,
}

impl CombinedStorage {
    pub fn new(
        storage: ChannelStorage,
        contract: Arc<dyn EscrowContract>,
        group_id: U256,
        reconcile_on_hit: bool,
    ) -> Self {
        Self {
            storage,
            contract,
            group_id,
            reconcile_on_hit,
        }
    }

    pub fn storage(&self) -> &ChannelStorage {
        &self.storage
    }

    /// Returns the current channel row, hydrating from the blockchain on a
    /// miss. `Ok(None)` is a soft miss: either the channel does not exist
    /// on-chain, or a concurrent replica won the hydration race and the
    /// caller should retry.
    pub async fn get(&self, key: &ChannelKey) -> PaymentResult<Option<ChannelData>> {
        if let Some(data) = self.storage.get(key).await? {
            if self.reconcile_on_hit {
                self.verify_nonce_on_chain(key).await?;
            }
            return Ok(Some(data));
        }
        tracing::info!(channel = %key, "channel key is not found in storage");

        let Some(channel) = self.contract.channel(key.channel_id).await? else {
            return Ok(None);
        };
        tracing::debug!(channel = %key, nonce = %channel.nonce, "channel found in blockchain");

        if channel.group_id != self.group_id {
            tracing::warn!(
                channel = %key,
                channel_group = %channel.group_id,
                "channel belongs to another replica group"
            );
            return Err(PaymentError::incorrect_channel_id(format!(
                "channel belongs to another replica group, current group: {}, channel group: {}",
                self.group_id, channel.group_id
            )));
        }
        if channel.nonce != key.nonce {
            tracing::warn!(
                channel = %key,
                chain_nonce = %channel.nonce,
                "channel nonce is not equal to expected"
            );
            return Err(PaymentError::incorrect_channel_id(format!(
                "channel nonce: {} is not equal to expected: {}",
                channel.nonce, key.nonce
            )));
        }

        let fresh = ChannelData {
            nonce: channel.nonce,
            state: ChannelState::Open,
            sender: channel.sender,
            recipient: channel.recipient,
            group_id: channel.group_id,
            full_amount: channel.value,
            authorized_amount: U256::zero(),
            signature: None,
        };
        let installed = self.storage.compare_and_swap(key, None, Some(&fresh)).await?;
        if !installed {
            // A concurrent replica hydrated first; its row may already carry
            // cheque progress, so report a soft miss and let the caller retry.
            tracing::warn!(channel = %key, "lost hydration race, key already present");
            return Ok(None);
        }
        tracing::info!(channel = %key, "channel saved in storage");
        Ok(Some(fresh))
    }

    async fn verify_nonce_on_chain(&self, key: &ChannelKey) -> PaymentResult<()> {
        let Some(channel) = self.contract.channel(key.channel_id).await? else {
            return Err(PaymentError::incorrect_channel_id(
                "channel is not found in blockchain",
            ));
        };
        if channel.nonce != key.nonce {
            return Err(PaymentError::incorrect_channel_id(format!(
                "channel nonce: {} is not equal to expected: {}",
                channel.nonce, key.nonce
            )));
        }
        Ok(())
    }
}
