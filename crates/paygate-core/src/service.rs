// Copyright [2026] [Paygate Contributors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 Paygate Contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use ethers::types::U256;
use serde::{Deserialize, Serialize};

use crate::combined::CombinedStorage;
use crate::crypto::{cheque_digest, recover_signer};
use crate::error::{PaymentError, PaymentResult};
use crate::kv::KeyValueStore;
use crate::payment::{ChannelData, ChannelKey, ChannelState, Payment};
use crate::storage::ChannelStorage;

/// Value stored under `channel-lock/<id>` while a transaction is open.
///
/// Daemon replicas share the same channels, so per-channel exclusion lives in
/// the replicated KV store rather than an in-process mutex. A crashed holder
/// is recovered by expiry; configuration requires the TTL to be at least
/// twice the KV request timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelLock {
    pub holder: String,
    pub expires_at_ms: u64,
}

/// Exclusive intent on one channel for the span of one request.
///
/// Exactly one of `commit` or `rollback` ends the transaction; both are
/// idempotent after the first call.
#[async_trait]
pub trait PaymentTransaction: Send + std::fmt::Debug {
    /// Channel state loaded at transaction start.
    fn channel(&self) -> &ChannelData;

    /// Advances the authorized-amount watermark via row CAS and releases the
    /// channel lock.
    async fn commit(&mut self) -> PaymentResult<()>;

    /// Releases the channel lock without mutating the row.
    async fn rollback(&mut self) -> PaymentResult<()>;

    fn is_finished(&self) -> bool;
}

#[async_trait]
pub trait PaymentChannelService: Send + Sync {
    /// Validates the cheque and acquires exclusive intent on its channel.
    async fn start_payment_transaction(
        &self,
        payment: Payment,
    ) -> PaymentResult<Box<dyn PaymentTransaction>>;
}

pub struct EscrowPaymentService {
    combined: Arc<CombinedStorage>,
    lock_store: Arc<dyn KeyValueStore>,
    lock_ttl: Duration,
    holder: String,
}

impl EscrowPaymentService {
    pub fn new(
        combined: Arc<CombinedStorage>,
        lock_store: Arc<dyn KeyValueStore>,
        lock_ttl: Duration,
        holder: impl Into<String>,
    ) -> Self {
        Self {
            combined,
            lock_store,
            lock_ttl,
            holder: holder.into(),
        }
    }

    fn validate_payment(payment: &Payment, channel: &ChannelData) -> PaymentResult<()> {
        if channel.state != ChannelState::Open {
            return Err(PaymentError::failed_precondition("payment channel is closed"));
        }
        let digest = cheque_digest(
            payment.mpe_contract_address,
            payment.channel_id,
            payment.channel_nonce,
            payment.amount,
        );
        let signer = recover_signer(digest, &payment.signature)?;
        if signer != channel.sender {
            return Err(PaymentError::unauthenticated(
                "payment is not signed by the channel sender",
            ));
        }
        // Replay defense: a cheque authorizes a cumulative amount, so the
        // watermark must strictly advance.
        if payment.amount <= channel.authorized_amount {
            return Err(PaymentError::unauthenticated(format!(
                "payment amount is not greater than already authorized amount: {} <= {}",
                payment.amount, channel.authorized_amount
            )));
        }
        if payment.amount > channel.full_amount {
            return Err(PaymentError::unauthenticated(format!(
                "not enough tokens on payment channel, channel value: {}, payment amount: {}",
                channel.full_amount, payment.amount
            )));
        }
        Ok(())
    }

    async fn acquire_channel_lock(&self, channel_id: U256) -> PaymentResult<(Vec<u8>, Vec<u8>)> {
        let lock_key = format!("channel-lock/{channel_id}").into_bytes();
        let now = now_ms()?;
        let lock = ChannelLock {
            holder: self.holder.clone(),
            expires_at_ms: now + self.lock_ttl.as_millis() as u64,
        };
        let lock_bytes = serde_json::to_vec(&lock)
            .map_err(|err| PaymentError::internal(format!("unable to encode lock: {err}")))?;

        if self
            .lock_store
            .compare_and_swap(&lock_key, None, Some(&lock_bytes))
            .await?
        {
            return Ok((lock_key, lock_bytes));
        }

        // The lock is held; take it over only if the holder's TTL elapsed.
        if let Some(current) = self.lock_store.get(&lock_key).await? {
            if let Ok(existing) = serde_json::from_slice::<ChannelLock>(&current) {
                if existing.expires_at_ms <= now {
                    tracing::warn!(
                        channel_id = %channel_id,
                        stale_holder = %existing.holder,
                        "taking over expired channel lock"
                    );
                    if self
                        .lock_store
                        .compare_and_swap(&lock_key, Some(&current), Some(&lock_bytes))
                        .await?
                    {
                        return Ok((lock_key, lock_bytes));
                    }
                }
            }
        }

        Err(PaymentError::failed_precondition(
            "another transaction in progress",
        ))
    }
}

#[async_trait]
impl PaymentChannelService for EscrowPaymentService {
    async fn start_payment_transaction(
        &self,
        payment: Payment,
    ) -> PaymentResult<Box<dyn PaymentTransaction>> {
        let key = ChannelKey {
            channel_id: payment.channel_id,
            nonce: payment.channel_nonce,
        };
        let Some(channel) = self.combined.get(&key).await? else {
            return Err(PaymentError::incorrect_channel_id(format!(
                "payment channel is not found: {key}"
            )));
        };
        Self::validate_payment(&payment, &channel)?;

        let (lock_key, lock_bytes) = self.acquire_channel_lock(payment.channel_id).await?;

        let mut proposed = channel.clone();
        proposed.authorized_amount = payment.amount;
        proposed.signature = Some(payment.signature.clone());

        Ok(Box::new(EscrowPaymentTransaction {
            storage: self.combined.storage().clone(),
            lock_store: Arc::clone(&self.lock_store),
            key,
            loaded: channel,
            proposed,
            lock_key,
            lock_bytes,
            finished: false,
        }))
    }
}

struct EscrowPaymentTransaction {
    storage: ChannelStorage,
    lock_store: Arc<dyn KeyValueStore>,
    key: ChannelKey,
    loaded: ChannelData,
    proposed: ChannelData,
    lock_key: Vec<u8>,
    lock_bytes: Vec<u8>,
    finished: bool,
}

impl std::fmt::Debug for EscrowPaymentTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscrowPaymentTransaction")
            .field("key", &self.key)
            .field("loaded", &self.loaded)
            .field("proposed", &self.proposed)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl EscrowPaymentTransaction {
    /// Conditional delete: releases only the lock this transaction wrote, so
    /// an expiry takeover by another replica is never clobbered.
    async fn release_lock(&self) -> PaymentResult<()> {
        let released = self
            .lock_store
            .compare_and_swap(&self.lock_key, Some(&self.lock_bytes), None)
            .await?;
        if !released {
            tracing::warn!(channel = %self.key, "channel lock was taken over before release");
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentTransaction for EscrowPaymentTransaction {
    fn channel(&self) -> &ChannelData {
        &self.loaded
    }

    async fn commit(&mut self) -> PaymentResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        match self
            .storage
            .compare_and_swap(&self.key, Some(&self.loaded), Some(&self.proposed))
            .await
        {
            Ok(true) => {
                if let Err(err) = self.release_lock().await {
                    // The committed watermark is durable; the stuck lock
                    // recovers by TTL.
                    tracing::warn!(channel = %self.key, error = %err, "lock release failed after commit");
                }
                Ok(())
            }
            Ok(false) => {
                if let Err(err) = self.release_lock().await {
                    tracing::warn!(channel = %self.key, error = %err, "lock release failed after lost commit");
                }
                Err(PaymentError::failed_precondition("state changed under us"))
            }
            Err(err) => {
                if let Err(release_err) = self.release_lock().await {
                    tracing::warn!(channel = %self.key, error = %release_err, "lock release failed after commit error");
                }
                Err(err)
            }
        }
    }

    async fn rollback(&mut self) -> PaymentResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.release_lock().await
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

fn now_ms() -> PaymentResult<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| PaymentError::internal("system clock is before the unix epoch"))?
        .as_millis() as u64)
}
