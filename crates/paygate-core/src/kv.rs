use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::PaymentResult;

/// A CAS-capable byte/byte store, linearizable per key.
///
/// `compare_and_swap` is the sole serialization primitive used on the hot
/// path; `put` exists for administrative seeding only. `expect = None` means
/// "only if the key is currently absent"; `update = None` turns the swap into
/// a conditional delete.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &[u8]) -> PaymentResult<Option<Vec<u8>>>;

    async fn put(&self, key: &[u8], value: &[u8]) -> PaymentResult<()>;

    async fn compare_and_swap(
        &self,
        key: &[u8],
        expect: Option<&[u8]>,
        update: Option<&[u8]>,
    ) -> PaymentResult<bool>;

    async fn delete(&self, key: &[u8]) -> PaymentResult<()>;
}

/// Single-process in-memory backend for tests and local development. The
/// replicated deployment uses [`crate::etcd::EtcdStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &[u8]) -> PaymentResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> PaymentResult<()> {
        self.entries.lock().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &[u8],
        expect: Option<&[u8]>,
        update: Option<&[u8]>,
    ) -> PaymentResult<bool> {
        let mut entries = self.entries.lock();
        let current = entries.get(key).map(Vec::as_slice);
        if current != expect {
            return Ok(false);
        }
        match update {
            Some(update) => entries.insert(key.to_vec(), update.to_vec()),
            None => entries.remove(key),
        };
        Ok(true)
    }

    async fn delete(&self, key: &[u8]) -> PaymentResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{KeyValueStore, MemoryStore};

    #[tokio::test]
    async fn insert_if_absent_applies_once() {
        let store = MemoryStore::new();
        assert!(store.compare_and_swap(b"k", None, Some(b"a")).await.unwrap());
        assert!(!store.compare_and_swap(b"k", None, Some(b"b")).await.unwrap());
        assert_eq!(store.get(b"k").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn swap_requires_exact_current_value() {
        let store = MemoryStore::new();
        store.put(b"k", b"a").await.unwrap();
        assert!(!store
            .compare_and_swap(b"k", Some(b"x"), Some(b"b"))
            .await
            .unwrap());
        assert!(store
            .compare_and_swap(b"k", Some(b"a"), Some(b"b"))
            .await
            .unwrap());
        assert_eq!(store.get(b"k").await.unwrap(), Some(b"b".to_vec()));
    }

    #[tokio::test]
    async fn conditional_delete_removes_only_the_expected_value() {
        let store = MemoryStore::new();
        store.put(b"k", b"a").await.unwrap();
        assert!(!store.compare_and_swap(b"k", Some(b"x"), None).await.unwrap());
        assert_eq!(store.get(b"k").await.unwrap(), Some(b"a".to_vec()));
        assert!(store.compare_and_swap(b"k", Some(b"a"), None).await.unwrap());
        assert_eq!(store.get(b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_is_unconditional() {
        let store = MemoryStore::new();
        store.put(b"k", b"a").await.unwrap();
        store.delete(b"k").await.unwrap();
        assert_eq!(store.get(b"k").await.unwrap(), None);
    }
}
