//! Persistence seam for app-state sync keys and per-collection hash states

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::keys::{KeyRing, PatchName};
use super::state::LtHashState;
use crate::errors::Result;
use crate::types::Timestamp;

/// App-state sync key shared by the primary device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncKey {
    pub key_id: Vec<u8>,
    pub key_data: Vec<u8>,
    pub timestamp: Timestamp,
}

#[async_trait]
pub trait AppStateStore: Send + Sync {
    async fn put_sync_key(&self, key: SyncKey) -> Result<()>;

    async fn sync_key(&self, key_id: &[u8]) -> Result<Option<SyncKey>>;

    /// Most recently shared key, used to encrypt outgoing patches
    async fn latest_sync_key(&self) -> Result<Option<SyncKey>>;

    async fn hash_state(&self, name: PatchName) -> Result<Option<LtHashState>>;

    async fn save_hash_state(&self, name: PatchName, state: &LtHashState) -> Result<()>;

    async fn delete_hash_state(&self, name: PatchName) -> Result<()>;

    /// Expand every known key among `key_ids`; unknown ids are left out and
    /// surface later as missing keys
    async fn key_ring(&self, key_ids: &[Vec<u8>]) -> Result<KeyRing> {
        let mut ring = KeyRing::new();
        for key_id in key_ids {
            if let Some(key) = self.sync_key(key_id).await? {
                ring.insert(&key.key_id, &key.key_data)?;
            }
        }
        Ok(ring)
    }
}

#[derive(Default)]
pub struct InMemoryAppStateStore {
    keys: RwLock<HashMap<Vec<u8>, SyncKey>>,
    states: RwLock<HashMap<PatchName, LtHashState>>,
}

impl InMemoryAppStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AppStateStore for InMemoryAppStateStore {
    async fn put_sync_key(&self, key: SyncKey) -> Result<()> {
        self.keys.write().await.insert(key.key_id.clone(), key);
        Ok(())
    }

    async fn sync_key(&self, key_id: &[u8]) -> Result<Option<SyncKey>> {
        Ok(self.keys.read().await.get(key_id).cloned())
    }

    async fn latest_sync_key(&self) -> Result<Option<SyncKey>> {
        Ok(self
            .keys
            .read()
            .await
            .values()
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.key_id.cmp(&b.key_id)))
            .cloned())
    }

    async fn hash_state(&self, name: PatchName) -> Result<Option<LtHashState>> {
        Ok(self.states.read().await.get(&name).cloned())
    }

    async fn save_hash_state(&self, name: PatchName, state: &LtHashState) -> Result<()> {
        self.states.write().await.insert(name, state.clone());
        Ok(())
    }

    async fn delete_hash_state(&self, name: PatchName) -> Result<()> {
        self.states.write().await.remove(&name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: u8, at: u64) -> SyncKey {
        SyncKey {
            key_id: vec![0, 0, 0, id],
            key_data: vec![id; 32],
            timestamp: Timestamp::new(at),
        }
    }

    #[tokio::test]
    async fn test_latest_key_and_ring() {
        let store = InMemoryAppStateStore::new();
        store.put_sync_key(key(1, 100)).await.unwrap();
        store.put_sync_key(key(2, 200)).await.unwrap();
        assert_eq!(store.latest_sync_key().await.unwrap().unwrap().key_id, vec![0, 0, 0, 2]);

        let ring = store
            .key_ring(&[vec![0, 0, 0, 1], vec![0, 0, 0, 9]])
            .await
            .unwrap();
        assert_eq!(ring.len(), 1);
        assert!(ring.contains(&[0, 0, 0, 1]));
    }

    #[tokio::test]
    async fn test_hash_state_lifecycle() {
        let store = InMemoryAppStateStore::new();
        assert!(store.hash_state(PatchName::Regular).await.unwrap().is_none());
        let state = LtHashState {
            version: 4,
            ..LtHashState::default()
        };
        store.save_hash_state(PatchName::Regular, &state).await.unwrap();
        assert_eq!(store.hash_state(PatchName::Regular).await.unwrap(), Some(state));
        store.delete_hash_state(PatchName::Regular).await.unwrap();
        assert!(store.hash_state(PatchName::Regular).await.unwrap().is_none());
    }
}
