//! Persistence seam for Signal state
//!
//! Sessions, pre-keys, identities and sender keys live behind the async
//! [`SignalStore`] trait so that the session layer stays independent of
//! where the host keeps them. [`InMemorySignalStore`] backs tests and
//! short-lived clients.

use std::collections::HashMap;

use async_trait::async_trait;
use rand_core::{CryptoRng, OsRng, RngCore};
use tokio::sync::RwLock;

use super::address::{SenderKeyName, SignalAddress};
use super::keys::{IdentityKeyPair, KeyPair, PublicKey};
use super::records::{PreKeyBundle, PreKeyRecord, SignedPreKeyRecord};
use super::sender_key::SenderKeyRecord;
use super::session::SessionRecord;
use crate::errors::Result;
use crate::types::Timestamp;

#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn identity_key_pair(&self) -> Result<IdentityKeyPair>;

    async fn local_registration_id(&self) -> Result<u32>;

    /// Record a remote identity; returns whether it replaced a different key
    async fn save_identity(&self, address: &SignalAddress, identity: &PublicKey) -> Result<bool>;

    async fn identity(&self, address: &SignalAddress) -> Result<Option<PublicKey>>;

    async fn load_session(&self, address: &SignalAddress) -> Result<Option<SessionRecord>>;

    async fn store_session(&self, address: &SignalAddress, record: &SessionRecord) -> Result<()>;

    async fn contains_session(&self, address: &SignalAddress) -> Result<bool> {
        Ok(self
            .load_session(address)
            .await?
            .is_some_and(|record| record.has_current_state()))
    }

    async fn delete_session(&self, address: &SignalAddress) -> Result<()>;

    async fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>>;

    async fn remove_pre_key(&self, id: u32) -> Result<()>;

    async fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>>;

    async fn load_sender_key(&self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>>;

    async fn store_sender_key(&self, name: &SenderKeyName, record: &SenderKeyRecord) -> Result<()>;
}

// ----------------------------------------------------------------------------
// In-Memory Store
// ----------------------------------------------------------------------------

pub struct InMemorySignalStore {
    identity: IdentityKeyPair,
    registration_id: u32,
    signed_pre_key: SignedPreKeyRecord,
    next_pre_key_id: RwLock<u32>,
    pre_keys: RwLock<HashMap<u32, PreKeyRecord>>,
    identities: RwLock<HashMap<SignalAddress, PublicKey>>,
    sessions: RwLock<HashMap<SignalAddress, SessionRecord>>,
    sender_keys: RwLock<HashMap<SenderKeyName, SenderKeyRecord>>,
}

impl InMemorySignalStore {
    pub fn new() -> Self {
        Self::with_rng(&mut OsRng)
    }

    pub fn with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let identity = KeyPair::generate_with_rng(rng);
        let registration_id = (rng.next_u32() & 0x3FFF) + 1;
        let signed_pre_key = SignedPreKeyRecord::generate(1, &identity, Timestamp::now());
        Self {
            identity,
            registration_id,
            signed_pre_key,
            next_pre_key_id: RwLock::new(1),
            pre_keys: RwLock::new(HashMap::new()),
            identities: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            sender_keys: RwLock::new(HashMap::new()),
        }
    }

    pub fn signed_pre_key(&self) -> &SignedPreKeyRecord {
        &self.signed_pre_key
    }

    /// Mint `count` one-time pre-keys with consecutive ids
    pub async fn generate_pre_keys(&self, count: u32) -> Vec<PreKeyRecord> {
        let mut next_id = self.next_pre_key_id.write().await;
        let records: Vec<PreKeyRecord> = (0..count)
            .map(|offset| PreKeyRecord::new(*next_id + offset, KeyPair::generate()))
            .collect();
        *next_id += count;

        let mut pre_keys = self.pre_keys.write().await;
        for record in &records {
            pre_keys.insert(record.id, record.clone());
        }
        records
    }

    pub async fn pre_key_count(&self) -> usize {
        self.pre_keys.read().await.len()
    }

    /// Bundle another device would fetch from the server for us
    pub async fn pre_key_bundle(&self, device_id: u32, with_one_time: bool) -> PreKeyBundle {
        let pre_key = if with_one_time {
            let existing = self
                .pre_keys
                .read()
                .await
                .values()
                .min_by_key(|record| record.id)
                .map(|record| (record.id, record.key_pair.public_key));
            match existing {
                Some(pre_key) => Some(pre_key),
                None => self
                    .generate_pre_keys(1)
                    .await
                    .first()
                    .map(|record| (record.id, record.key_pair.public_key)),
            }
        } else {
            None
        };

        PreKeyBundle {
            registration_id: self.registration_id,
            device_id,
            pre_key,
            signed_pre_key_id: self.signed_pre_key.id,
            signed_pre_key: self.signed_pre_key.key_pair.public_key,
            signed_pre_key_signature: self.signed_pre_key.signature.clone(),
            identity_key: self.identity.public_key,
        }
    }
}

impl Default for InMemorySignalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalStore for InMemorySignalStore {
    async fn identity_key_pair(&self) -> Result<IdentityKeyPair> {
        Ok(self.identity.clone())
    }

    async fn local_registration_id(&self) -> Result<u32> {
        Ok(self.registration_id)
    }

    async fn save_identity(&self, address: &SignalAddress, identity: &PublicKey) -> Result<bool> {
        let previous = self
            .identities
            .write()
            .await
            .insert(address.clone(), *identity);
        Ok(previous.is_some_and(|old| &old != identity))
    }

    async fn identity(&self, address: &SignalAddress) -> Result<Option<PublicKey>> {
        Ok(self.identities.read().await.get(address).copied())
    }

    async fn load_session(&self, address: &SignalAddress) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.read().await.get(address).cloned())
    }

    async fn store_session(&self, address: &SignalAddress, record: &SessionRecord) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(address.clone(), record.clone());
        Ok(())
    }

    async fn delete_session(&self, address: &SignalAddress) -> Result<()> {
        self.sessions.write().await.remove(address);
        Ok(())
    }

    async fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>> {
        Ok(self.pre_keys.read().await.get(&id).cloned())
    }

    async fn remove_pre_key(&self, id: u32) -> Result<()> {
        self.pre_keys.write().await.remove(&id);
        Ok(())
    }

    async fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>> {
        Ok((self.signed_pre_key.id == id).then(|| self.signed_pre_key.clone()))
    }

    async fn load_sender_key(&self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>> {
        Ok(self.sender_keys.read().await.get(name).cloned())
    }

    async fn store_sender_key(&self, name: &SenderKeyName, record: &SenderKeyRecord) -> Result<()> {
        self.sender_keys
            .write()
            .await
            .insert(name.clone(), record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pre_key_ids_are_consecutive() {
        let store = InMemorySignalStore::new();
        let first = store.generate_pre_keys(3).await;
        let second = store.generate_pre_keys(2).await;
        let ids: Vec<u32> = first.iter().chain(&second).map(|record| record.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(store.pre_key_count().await, 5);

        store.remove_pre_key(2).await.unwrap();
        assert!(store.load_pre_key(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_identity_change_detected() {
        let store = InMemorySignalStore::new();
        let address = SignalAddress::new("15551234567", 0);
        let first = KeyPair::generate().public_key;
        assert!(!store.save_identity(&address, &first).await.unwrap());
        assert!(!store.save_identity(&address, &first).await.unwrap());
        let second = KeyPair::generate().public_key;
        assert!(store.save_identity(&address, &second).await.unwrap());
    }

    #[tokio::test]
    async fn test_bundle_verifies() {
        let store = InMemorySignalStore::new();
        let bundle = store.pre_key_bundle(3, true).await;
        assert!(bundle.verify().is_ok());
        assert!(bundle.pre_key.is_some());
        assert_eq!(bundle.device_id, 3);
    }
}
