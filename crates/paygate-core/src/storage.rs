use std::sync::Arc;

use crate::error::PaymentResult;
use crate::kv::KeyValueStore;
use crate::payment::{ChannelData, ChannelKey};

/// Typed layer over the KV backend holding the durable channel rows.
///
/// Keys are `channel/<id>/<nonce>` in decimal; values use the deterministic
/// [`ChannelData`] codec so that compare-and-swap byte equality coincides
/// with record equality. The `expect = None` insert-if-absent form is
/// propagated verbatim for blockchain hydration.
#[derive(Clone)]
pub struct ChannelStorage {
    store: Arc<dyn KeyValueStore>,
}

impl ChannelStorage {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn storage_key(key: &ChannelKey) -> Vec<u8> {
        format!("channel/{}/{}", key.channel_id, key.nonce).into_bytes()
    }

    pub async fn get(&self, key: &ChannelKey) -> PaymentResult<Option<ChannelData>> {
        match self.store.get(&Self::storage_key(key)).await? {
            Some(bytes) => Ok(Some(ChannelData::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, key: &ChannelKey, data: &ChannelData) -> PaymentResult<()> {
        self.store
            .put(&Self::storage_key(key), &data.to_bytes())
            .await
    }

    pub async fn compare_and_swap(
        &self,
        key: &ChannelKey,
        expect: Option<&ChannelData>,
        update: Option<&ChannelData>,
    ) -> PaymentResult<bool> {
        let expect = expect.map(ChannelData::to_bytes);
        let update = update.map(ChannelData::to_bytes);
        self.store
            .compare_and_swap(
                &Self::storage_key(key),
                expect.as_deref(),
                update.as_deref(),
            )
            .await
    }
}
