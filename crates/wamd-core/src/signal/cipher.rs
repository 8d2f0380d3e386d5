//! Session cipher
//!
//! The operations the message pipeline needs from the Signal layer: open a
//! session from a bundle, encrypt and decrypt per device, and the sender-key
//! group operations. Every call loads the record from the store, works on
//! that copy and writes it back only when the operation succeeded.

use std::sync::Arc;

use rand_core::{OsRng, RngCore};
use tracing::{debug, warn};

use super::address::{SenderKeyName, SignalAddress};
use super::keys::KeyPair;
use super::protocol::{
    Envelope, EnvelopeKind, PreKeySignalMessage, SenderKeyDistributionMessage, SignalMessage,
};
use super::records::PreKeyBundle;
use super::session::SessionState;
use super::store::SignalStore;
use crate::config::SessionConfig;
use crate::errors::{CryptographicError, Result, SessionError, WamdError};

pub struct SessionCipher<S: SignalStore + ?Sized> {
    store: Arc<S>,
    limits: SessionConfig,
}

impl<S: SignalStore + ?Sized> Clone for SessionCipher<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            limits: self.limits.clone(),
        }
    }
}

fn no_sender_key(name: &SenderKeyName) -> WamdError {
    SessionError::NoSenderKey {
        group: name.group_id().to_string(),
        sender: name.sender().to_string(),
    }
    .into()
}

impl<S: SignalStore + ?Sized> SessionCipher<S> {
    pub fn new(store: Arc<S>, limits: SessionConfig) -> Self {
        Self { store, limits }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn has_session(&self, address: &SignalAddress) -> Result<bool> {
        self.store.contains_session(address).await
    }

    /// Open (or replace) the session with `address` from a fetched bundle
    pub async fn process_bundle(&self, address: &SignalAddress, bundle: &PreKeyBundle) -> Result<()> {
        bundle.verify()?;
        let identity = self.store.identity_key_pair().await?;
        let registration_id = self.store.local_registration_id().await?;
        let base_key = KeyPair::generate();
        let state =
            SessionState::initialize_as_initiator(&identity, &base_key, registration_id, bundle)?;

        if self.store.save_identity(address, &bundle.identity_key).await? {
            warn!(%address, "Identity key changed");
        }
        let mut record = self.store.load_session(address).await?.unwrap_or_default();
        record.promote_state(state);
        self.store.store_session(address, &record).await?;
        debug!(%address, one_time = bundle.pre_key.is_some(), "Session opened from pre-key bundle");
        Ok(())
    }

    pub async fn encrypt_to_device(&self, address: &SignalAddress, plaintext: &[u8]) -> Result<Envelope> {
        let mut record = self
            .store
            .load_session(address)
            .await?
            .ok_or_else(|| WamdError::no_session(address))?;
        let state = record
            .session_state_mut()
            .ok_or_else(|| WamdError::no_session(address))?;
        let envelope = state.encrypt(plaintext)?;
        self.store.store_session(address, &record).await?;
        Ok(envelope)
    }

    /// Route on envelope kind: ratchet message or session-initiating message
    pub async fn decrypt_from_device(&self, address: &SignalAddress, envelope: &Envelope) -> Result<Vec<u8>> {
        match envelope.kind {
            EnvelopeKind::Msg => self.decrypt_message(address, &envelope.ciphertext).await,
            EnvelopeKind::PkMsg => self.decrypt_pre_key_message(address, &envelope.ciphertext).await,
            EnvelopeKind::SkMsg => Err(CryptographicError::invalid_message(
                "sender-key ciphertext on a pairwise session",
            )
            .into()),
        }
    }

    async fn decrypt_message(&self, address: &SignalAddress, bytes: &[u8]) -> Result<Vec<u8>> {
        let message = SignalMessage::deserialize(bytes)?;
        let mut record = self
            .store
            .load_session(address)
            .await?
            .ok_or_else(|| WamdError::no_session(address))?;
        let plaintext = record.decrypt(&message, &self.limits)?;
        self.store.store_session(address, &record).await?;
        Ok(plaintext)
    }

    async fn decrypt_pre_key_message(&self, address: &SignalAddress, bytes: &[u8]) -> Result<Vec<u8>> {
        let message = PreKeySignalMessage::deserialize(bytes)?;
        let mut record = self.store.load_session(address).await?.unwrap_or_default();

        let mut consumed_pre_key = None;
        if !record.has_base_key(&message.base_key) {
            let identity = self.store.identity_key_pair().await?;
            let registration_id = self.store.local_registration_id().await?;
            let signed = self
                .store
                .load_signed_pre_key(message.signed_pre_key_id)
                .await?
                .ok_or(SessionError::InvalidSignedPreKeyId {
                    id: message.signed_pre_key_id,
                })?;
            let one_time = match message.pre_key_id {
                Some(id) => Some(
                    self.store
                        .load_pre_key(id)
                        .await?
                        .ok_or(SessionError::InvalidPreKeyId { id })?,
                ),
                None => None,
            };
            let state = SessionState::initialize_as_responder(
                &identity,
                &signed.key_pair,
                one_time.as_ref().map(|record| &record.key_pair),
                registration_id,
                &message,
            )?;
            record.promote_state(state);
            consumed_pre_key = message.pre_key_id;
        }

        let plaintext = record.decrypt(&message.message, &self.limits)?;
        if self.store.save_identity(address, &message.identity_key).await? {
            warn!(%address, "Identity key changed");
        }
        self.store.store_session(address, &record).await?;
        if let Some(id) = consumed_pre_key {
            self.store.remove_pre_key(id).await?;
            debug!(%address, pre_key = id, "Consumed one-time pre-key");
        }
        Ok(plaintext)
    }

    // ------------------------------------------------------------------------
    // Group Sessions
    // ------------------------------------------------------------------------

    /// Our distribution message for the group, creating the chain on first use
    pub async fn create_group_session(&self, name: &SenderKeyName) -> Result<SenderKeyDistributionMessage> {
        let mut record = self.store.load_sender_key(name).await?.unwrap_or_default();
        if record.distribution_message().is_none() {
            let key_id = OsRng.next_u32() >> 1;
            let mut seed = [0u8; 32];
            OsRng.fill_bytes(&mut seed);
            record.create_own_state(key_id, seed);
            self.store.store_sender_key(name, &record).await?;
            debug!(group = name.group_id(), key_id, "Created sender key");
        }
        record.distribution_message().ok_or_else(|| {
            SessionError::SenderKeyNotOwned {
                group: name.group_id().to_string(),
            }
            .into()
        })
    }

    pub async fn group_encrypt(&self, name: &SenderKeyName, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut record = self
            .store
            .load_sender_key(name)
            .await?
            .ok_or_else(|| no_sender_key(name))?;
        let ciphertext = record.encrypt(plaintext).ok_or_else(|| {
            WamdError::from(SessionError::SenderKeyNotOwned {
                group: name.group_id().to_string(),
            })
        })??;
        self.store.store_sender_key(name, &record).await?;
        Ok(ciphertext)
    }

    pub async fn group_decrypt(&self, name: &SenderKeyName, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut record = self
            .store
            .load_sender_key(name)
            .await?
            .ok_or_else(|| no_sender_key(name))?;
        let plaintext = record
            .decrypt(bytes, &self.limits)?
            .ok_or_else(|| no_sender_key(name))?;
        self.store.store_sender_key(name, &record).await?;
        Ok(plaintext)
    }

    pub async fn process_incoming_distribution(&self, name: &SenderKeyName, bytes: &[u8]) -> Result<()> {
        let message = SenderKeyDistributionMessage::deserialize(bytes)?;
        let mut record = self.store.load_sender_key(name).await?.unwrap_or_default();
        record.process_distribution(&message);
        self.store.store_sender_key(name, &record).await?;
        debug!(
            group = name.group_id(),
            sender = %name.sender(),
            key_id = message.key_id,
            "Stored sender key"
        );
        Ok(())
    }
}
