//! Sender keys for group messages
//!
//! Each group member keeps one outgoing chain per group and, for every other
//! member, the chains learned from their distribution messages. Up to five
//! states are kept per sender so a rotated key can still read stragglers.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::keys::{KeyPair, PrivateKey, PublicKey};
use super::protocol::{SenderKeyDistributionMessage, SenderKeyMessage};
use crate::config::SessionConfig;
use crate::crypto::{aes_cbc_decrypt, aes_cbc_encrypt, hkdf_sha256, hmac_sha256};
use crate::errors::CryptographicError;

pub const MAX_SENDER_KEY_STATES: usize = 5;

#[derive(Clone, Serialize, Deserialize)]
pub struct SenderChainKey {
    iteration: u32,
    seed: [u8; 32],
}

impl SenderChainKey {
    pub fn new(iteration: u32, seed: [u8; 32]) -> Self {
        Self { iteration, seed }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }

    fn next(&self) -> Result<Self, CryptographicError> {
        Ok(Self {
            iteration: self.iteration + 1,
            seed: hmac_sha256(&self.seed, &[&[0x02]])?,
        })
    }

    fn message_key(&self) -> Result<SenderMessageKey, CryptographicError> {
        let seed = hmac_sha256(&self.seed, &[&[0x01]])?;
        let okm = hkdf_sha256(None, &seed, b"WhisperGroup", 48)?;
        let mut key = SenderMessageKey {
            iteration: self.iteration,
            iv: [0u8; 16],
            cipher_key: [0u8; 32],
        };
        key.iv.copy_from_slice(&okm[..16]);
        key.cipher_key.copy_from_slice(&okm[16..48]);
        Ok(key)
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct SenderMessageKey {
    iteration: u32,
    iv: [u8; 16],
    cipher_key: [u8; 32],
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SenderKeyState {
    key_id: u32,
    chain_key: SenderChainKey,
    signing_public: PublicKey,
    signing_private: Option<PrivateKey>,
    message_keys: VecDeque<SenderMessageKey>,
}

impl SenderKeyState {
    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    pub fn iteration(&self) -> u32 {
        self.chain_key.iteration
    }

    pub fn is_owned(&self) -> bool {
        self.signing_private.is_some()
    }

    fn message_key_for(
        &mut self,
        iteration: u32,
        limits: &SessionConfig,
    ) -> Result<SenderMessageKey, CryptographicError> {
        if self.chain_key.iteration > iteration {
            let position = self
                .message_keys
                .iter()
                .position(|key| key.iteration == iteration)
                .ok_or(CryptographicError::DuplicateMessage { counter: iteration })?;
            return self
                .message_keys
                .remove(position)
                .ok_or(CryptographicError::DuplicateMessage { counter: iteration });
        }

        let jump = iteration - self.chain_key.iteration;
        if jump > limits.max_forward_jumps {
            return Err(CryptographicError::TooFarInFuture { jump });
        }

        let mut chain = self.chain_key.clone();
        while chain.iteration < iteration {
            self.message_keys.push_back(chain.message_key()?);
            if self.message_keys.len() > limits.max_sender_key_message_keys {
                self.message_keys.pop_front();
            }
            chain = chain.next()?;
        }
        let key = chain.message_key()?;
        self.chain_key = chain.next()?;
        Ok(key)
    }
}

// ----------------------------------------------------------------------------
// Sender Key Record
// ----------------------------------------------------------------------------

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SenderKeyRecord {
    states: VecDeque<SenderKeyState>,
}

impl SenderKeyRecord {
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn current_state(&self) -> Option<&SenderKeyState> {
        self.states.front()
    }

    fn state_mut(&mut self, key_id: u32) -> Option<&mut SenderKeyState> {
        self.states.iter_mut().find(|state| state.key_id == key_id)
    }

    /// Add a state unless one with the same key id is already known
    pub fn add_state(
        &mut self,
        key_id: u32,
        chain_key: SenderChainKey,
        signing_public: PublicKey,
        signing_private: Option<PrivateKey>,
    ) {
        if self.states.iter().any(|state| state.key_id == key_id) {
            return;
        }
        self.states.push_front(SenderKeyState {
            key_id,
            chain_key,
            signing_public,
            signing_private,
            message_keys: VecDeque::new(),
        });
        self.states.truncate(MAX_SENDER_KEY_STATES);
    }

    /// Start a fresh outgoing chain
    pub fn create_own_state(&mut self, key_id: u32, seed: [u8; 32]) {
        let signing = KeyPair::generate();
        self.states.clear();
        self.add_state(
            key_id,
            SenderChainKey::new(0, seed),
            signing.public_key,
            Some(signing.private_key),
        );
    }

    /// Distribution message for the current outgoing chain position
    pub fn distribution_message(&self) -> Option<SenderKeyDistributionMessage> {
        let state = self.states.front().filter(|state| state.is_owned())?;
        Some(SenderKeyDistributionMessage::new(
            state.key_id,
            state.chain_key.iteration,
            state.chain_key.seed,
            state.signing_public,
        ))
    }

    pub fn process_distribution(&mut self, message: &SenderKeyDistributionMessage) {
        self.add_state(
            message.key_id,
            SenderChainKey::new(message.iteration, message.chain_key),
            message.signing_key,
            None,
        );
    }

    /// Encrypt on the owned chain. `None` when this record cannot sign.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Option<Result<Vec<u8>, CryptographicError>> {
        let state = self.states.front_mut().filter(|state| state.is_owned())?;
        Some(Self::encrypt_with(state, plaintext))
    }

    fn encrypt_with(state: &mut SenderKeyState, plaintext: &[u8]) -> Result<Vec<u8>, CryptographicError> {
        let signing = state
            .signing_private
            .as_ref()
            .ok_or_else(|| CryptographicError::invalid_key("sender key has no signing key"))?;
        let key = state.chain_key.message_key()?;
        let ciphertext = aes_cbc_encrypt(&key.cipher_key, &key.iv, plaintext)?;
        let message = SenderKeyMessage::new(state.key_id, key.iteration, ciphertext, signing);
        state.chain_key = state.chain_key.next()?;
        Ok(message.serialized().to_vec())
    }

    /// Decrypt a sender-key message. `None` when no state matches its key id.
    pub fn decrypt(
        &mut self,
        bytes: &[u8],
        limits: &SessionConfig,
    ) -> Result<Option<Vec<u8>>, CryptographicError> {
        let message = SenderKeyMessage::deserialize(bytes)?;
        let Some(state) = self.state_mut(message.key_id) else {
            return Ok(None);
        };
        message.verify_signature(&state.signing_public)?;
        let key = state.message_key_for(message.iteration, limits)?;
        aes_cbc_decrypt(&key.cipher_key, &key.iv, &message.ciphertext).map(Some)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (SenderKeyRecord, SenderKeyRecord) {
        let mut sender = SenderKeyRecord::default();
        sender.create_own_state(77, [3u8; 32]);
        let distribution = sender.distribution_message().unwrap();
        let parsed = SenderKeyDistributionMessage::deserialize(distribution.serialized()).unwrap();
        let mut receiver = SenderKeyRecord::default();
        receiver.process_distribution(&parsed);
        (sender, receiver)
    }

    #[test]
    fn test_group_round_trip_and_out_of_order() {
        let (mut sender, mut receiver) = pair();
        let limits = SessionConfig::default();
        let first = sender.encrypt(b"one").unwrap().unwrap();
        let second = sender.encrypt(b"two").unwrap().unwrap();

        assert_eq!(receiver.decrypt(&second, &limits).unwrap().unwrap(), b"two");
        assert_eq!(receiver.decrypt(&first, &limits).unwrap().unwrap(), b"one");
        assert_eq!(
            receiver.decrypt(&first, &limits).unwrap_err(),
            CryptographicError::DuplicateMessage { counter: 0 }
        );
    }

    #[test]
    fn test_receiver_cannot_encrypt() {
        let (_, mut receiver) = pair();
        assert!(receiver.encrypt(b"nope").is_none());
        assert!(receiver.distribution_message().is_none());
    }

    #[test]
    fn test_unknown_key_id_and_bad_signature() {
        let (mut sender, mut receiver) = pair();
        let limits = SessionConfig::default();

        let mut other = SenderKeyRecord::default();
        other.create_own_state(78, [3u8; 32]);
        let foreign = other.encrypt(b"x").unwrap().unwrap();
        assert!(receiver.decrypt(&foreign, &limits).unwrap().is_none());

        let mut forged = sender.encrypt(b"y").unwrap().unwrap();
        forged[10] ^= 0x40;
        assert!(receiver.decrypt(&forged, &limits).is_err());
    }

    #[test]
    fn test_state_limit() {
        let mut record = SenderKeyRecord::default();
        for key_id in 0..8 {
            let signing = KeyPair::generate();
            record.add_state(key_id, SenderChainKey::new(0, [0u8; 32]), signing.public_key, None);
        }
        assert_eq!(record.states.len(), MAX_SENDER_KEY_STATES);
        assert_eq!(record.current_state().unwrap().key_id(), 7);
    }
}
