//! Pairwise double-ratchet sessions
//!
//! A [`SessionRecord`] holds the live [`SessionState`] for one remote device
//! plus a bounded list of archived states, so that messages encrypted under a
//! session the peer has since replaced can still be read. Each state tracks a
//! root key, one sending chain and a small number of receiving chains keyed
//! by the peer's ratchet public key.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::keys::{KeyPair, PublicKey};
use super::protocol::{Envelope, EnvelopeKind, PreKeySignalMessage, SignalMessage};
use super::records::PreKeyBundle;
use crate::config::SessionConfig;
use crate::crypto::{aes_cbc_decrypt, aes_cbc_encrypt, hkdf_sha256, hmac_sha256};
use crate::errors::CryptographicError;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

pub const SESSION_VERSION: u8 = 3;

/// Archived states kept per record
pub const MAX_ARCHIVED_STATES: usize = 40;

const MESSAGE_KEY_SEED: u8 = 0x01;
const CHAIN_KEY_SEED: u8 = 0x02;

// ----------------------------------------------------------------------------
// Chain and Message Keys
// ----------------------------------------------------------------------------

/// Symmetric ratchet position within one chain
#[derive(Clone, Serialize, Deserialize)]
pub struct ChainKey {
    key: [u8; 32],
    index: u32,
}

impl ChainKey {
    pub fn new(key: [u8; 32], index: u32) -> Self {
        Self { key, index }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn next(&self) -> Result<Self, CryptographicError> {
        Ok(Self {
            key: hmac_sha256(&self.key, &[&[CHAIN_KEY_SEED]])?,
            index: self.index + 1,
        })
    }

    pub fn message_keys(&self) -> Result<MessageKeys, CryptographicError> {
        let seed = hmac_sha256(&self.key, &[&[MESSAGE_KEY_SEED]])?;
        MessageKeys::derive(&seed, self.index)
    }
}

/// Keys for exactly one message
#[derive(Clone, Serialize, Deserialize)]
pub struct MessageKeys {
    cipher_key: [u8; 32],
    mac_key: [u8; 32],
    iv: [u8; 16],
    counter: u32,
}

impl MessageKeys {
    fn derive(seed: &[u8], counter: u32) -> Result<Self, CryptographicError> {
        let okm = hkdf_sha256(None, seed, b"WhisperMessageKeys", 80)?;
        let mut keys = Self {
            cipher_key: [0u8; 32],
            mac_key: [0u8; 32],
            iv: [0u8; 16],
            counter,
        };
        keys.cipher_key.copy_from_slice(&okm[..32]);
        keys.mac_key.copy_from_slice(&okm[32..64]);
        keys.iv.copy_from_slice(&okm[64..80]);
        Ok(keys)
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }
}

fn split_64(okm: &[u8]) -> ([u8; 32], [u8; 32]) {
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&okm[..32]);
    second.copy_from_slice(&okm[32..64]);
    (first, second)
}

/// DH ratchet step: mixes a fresh agreement into the root key
fn create_chain(
    root_key: &[u8; 32],
    their_ratchet: &PublicKey,
    our_ratchet: &KeyPair,
) -> Result<([u8; 32], ChainKey), CryptographicError> {
    let shared = our_ratchet.agree(their_ratchet);
    let okm = hkdf_sha256(Some(root_key), &shared, b"WhisperRatchet", 64)?;
    let (root, chain) = split_64(&okm);
    Ok((root, ChainKey::new(chain, 0)))
}

fn derive_initial_keys(secrets: &[u8]) -> Result<([u8; 32], ChainKey), CryptographicError> {
    let okm = hkdf_sha256(None, secrets, b"WhisperText", 64)?;
    let (root, chain) = split_64(&okm);
    Ok((root, ChainKey::new(chain, 0)))
}

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

#[derive(Clone, Serialize, Deserialize)]
struct SenderChain {
    ratchet_key: KeyPair,
    chain_key: ChainKey,
}

#[derive(Clone, Serialize, Deserialize)]
struct ReceiverChain {
    ratchet_key: PublicKey,
    chain_key: ChainKey,
    skipped: VecDeque<MessageKeys>,
}

/// Pre-key ids echoed in every outgoing message until the peer answers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPreKey {
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    pub base_key: PublicKey,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SessionState {
    version: u8,
    local_identity: PublicKey,
    remote_identity: PublicKey,
    root_key: [u8; 32],
    previous_counter: u32,
    sender_chain: Option<SenderChain>,
    receiver_chains: VecDeque<ReceiverChain>,
    pending_pre_key: Option<PendingPreKey>,
    local_registration_id: u32,
    remote_registration_id: u32,
    base_key: PublicKey,
}

impl SessionState {
    /// Session opened by us from a fetched pre-key bundle
    pub fn initialize_as_initiator(
        our_identity: &KeyPair,
        our_base_key: &KeyPair,
        local_registration_id: u32,
        bundle: &PreKeyBundle,
    ) -> Result<Self, CryptographicError> {
        let mut secrets = vec![0xFFu8; 32];
        secrets.extend_from_slice(&our_identity.agree(&bundle.signed_pre_key));
        secrets.extend_from_slice(&our_base_key.agree(&bundle.identity_key));
        secrets.extend_from_slice(&our_base_key.agree(&bundle.signed_pre_key));
        if let Some((_, one_time)) = &bundle.pre_key {
            secrets.extend_from_slice(&our_base_key.agree(one_time));
        }
        let (root_key, receiving) = derive_initial_keys(&secrets)?;

        let sending_ratchet = KeyPair::generate();
        let (root_key, sending) = create_chain(&root_key, &bundle.signed_pre_key, &sending_ratchet)?;

        let mut receiver_chains = VecDeque::new();
        receiver_chains.push_front(ReceiverChain {
            ratchet_key: bundle.signed_pre_key,
            chain_key: receiving,
            skipped: VecDeque::new(),
        });

        Ok(Self {
            version: SESSION_VERSION,
            local_identity: our_identity.public_key,
            remote_identity: bundle.identity_key,
            root_key,
            previous_counter: 0,
            sender_chain: Some(SenderChain {
                ratchet_key: sending_ratchet,
                chain_key: sending,
            }),
            receiver_chains,
            pending_pre_key: Some(PendingPreKey {
                pre_key_id: bundle.pre_key.map(|(id, _)| id),
                signed_pre_key_id: bundle.signed_pre_key_id,
                base_key: our_base_key.public_key,
            }),
            local_registration_id,
            remote_registration_id: bundle.registration_id,
            base_key: our_base_key.public_key,
        })
    }

    /// Session opened by the peer through a pre-key message
    pub fn initialize_as_responder(
        our_identity: &KeyPair,
        our_signed_pre_key: &KeyPair,
        our_one_time_pre_key: Option<&KeyPair>,
        local_registration_id: u32,
        message: &PreKeySignalMessage,
    ) -> Result<Self, CryptographicError> {
        let their_base = message.base_key;
        let mut secrets = vec![0xFFu8; 32];
        secrets.extend_from_slice(&our_signed_pre_key.agree(&message.identity_key));
        secrets.extend_from_slice(&our_identity.agree(&their_base));
        secrets.extend_from_slice(&our_signed_pre_key.agree(&their_base));
        if let Some(one_time) = our_one_time_pre_key {
            secrets.extend_from_slice(&one_time.agree(&their_base));
        }
        let (root_key, sending) = derive_initial_keys(&secrets)?;

        Ok(Self {
            version: SESSION_VERSION,
            local_identity: our_identity.public_key,
            remote_identity: message.identity_key,
            root_key,
            previous_counter: 0,
            sender_chain: Some(SenderChain {
                ratchet_key: our_signed_pre_key.clone(),
                chain_key: sending,
            }),
            receiver_chains: VecDeque::new(),
            pending_pre_key: None,
            local_registration_id,
            remote_registration_id: message.registration_id,
            base_key: their_base,
        })
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn local_identity(&self) -> &PublicKey {
        &self.local_identity
    }

    pub fn remote_identity(&self) -> &PublicKey {
        &self.remote_identity
    }

    pub fn remote_registration_id(&self) -> u32 {
        self.remote_registration_id
    }

    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    pub fn pending_pre_key(&self) -> Option<&PendingPreKey> {
        self.pending_pre_key.as_ref()
    }

    pub fn receiver_chain_count(&self) -> usize {
        self.receiver_chains.len()
    }

    /// Encrypt under the sending chain and advance it
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Envelope, CryptographicError> {
        let chain = self
            .sender_chain
            .as_mut()
            .ok_or_else(|| CryptographicError::invalid_message("session has no sending chain"))?;
        let keys = chain.chain_key.message_keys()?;
        let ciphertext = aes_cbc_encrypt(&keys.cipher_key, &keys.iv, plaintext)?;
        let message = SignalMessage::new(
            &keys.mac_key,
            chain.ratchet_key.public_key,
            keys.counter,
            self.previous_counter,
            ciphertext,
            &self.local_identity,
            &self.remote_identity,
        )?;
        chain.chain_key = chain.chain_key.next()?;

        match &self.pending_pre_key {
            Some(pending) => {
                let wrapped = PreKeySignalMessage::new(
                    self.local_registration_id,
                    pending.pre_key_id,
                    pending.signed_pre_key_id,
                    pending.base_key,
                    self.local_identity,
                    message,
                );
                Ok(Envelope::new(EnvelopeKind::PkMsg, wrapped.serialized().to_vec()))
            }
            None => Ok(Envelope::new(EnvelopeKind::Msg, message.serialized().to_vec())),
        }
    }

    /// Decrypt in place. Callers work on a copy and keep it only on success.
    pub fn decrypt(
        &mut self,
        message: &SignalMessage,
        limits: &SessionConfig,
    ) -> Result<Vec<u8>, CryptographicError> {
        let chain_key = self.receiver_chain_key(&message.ratchet_key, limits)?;
        let keys = self.message_keys_for(&message.ratchet_key, chain_key, message.counter, limits)?;
        message.verify_mac(&self.remote_identity, &self.local_identity, &keys.mac_key)?;
        let plaintext = aes_cbc_decrypt(&keys.cipher_key, &keys.iv, &message.ciphertext)?;
        self.pending_pre_key = None;
        Ok(plaintext)
    }

    fn receiver_chain(&self, ratchet_key: &PublicKey) -> Option<&ReceiverChain> {
        self.receiver_chains
            .iter()
            .find(|chain| &chain.ratchet_key == ratchet_key)
    }

    fn receiver_chain_mut(&mut self, ratchet_key: &PublicKey) -> Option<&mut ReceiverChain> {
        self.receiver_chains
            .iter_mut()
            .find(|chain| &chain.ratchet_key == ratchet_key)
    }

    /// Chain for `their_ratchet`, stepping the DH ratchet when it is new
    fn receiver_chain_key(
        &mut self,
        their_ratchet: &PublicKey,
        limits: &SessionConfig,
    ) -> Result<ChainKey, CryptographicError> {
        if let Some(chain) = self.receiver_chain(their_ratchet) {
            return Ok(chain.chain_key.clone());
        }

        let current = self
            .sender_chain
            .as_ref()
            .ok_or_else(|| CryptographicError::invalid_message("session has no sending chain"))?;
        let (root_key, receiving) = create_chain(&self.root_key, their_ratchet, &current.ratchet_key)?;
        let next_ratchet = KeyPair::generate();
        let (root_key, sending) = create_chain(&root_key, their_ratchet, &next_ratchet)?;
        let sent_on_previous = current.chain_key.index();

        self.root_key = root_key;
        self.receiver_chains.push_front(ReceiverChain {
            ratchet_key: *their_ratchet,
            chain_key: receiving.clone(),
            skipped: VecDeque::new(),
        });
        self.receiver_chains.truncate(limits.max_receiver_chains.max(1));
        self.previous_counter = sent_on_previous.max(1) - 1;
        self.sender_chain = Some(SenderChain {
            ratchet_key: next_ratchet,
            chain_key: sending,
        });
        Ok(receiving)
    }

    fn message_keys_for(
        &mut self,
        their_ratchet: &PublicKey,
        chain_key: ChainKey,
        counter: u32,
        limits: &SessionConfig,
    ) -> Result<MessageKeys, CryptographicError> {
        let chain = self
            .receiver_chain_mut(their_ratchet)
            .ok_or_else(|| CryptographicError::invalid_message("receiver chain vanished"))?;

        if chain_key.index() > counter {
            let position = chain
                .skipped
                .iter()
                .position(|keys| keys.counter == counter)
                .ok_or(CryptographicError::DuplicateMessage { counter })?;
            return chain
                .skipped
                .remove(position)
                .ok_or(CryptographicError::DuplicateMessage { counter });
        }

        let jump = counter - chain_key.index();
        if jump > limits.max_forward_jumps {
            return Err(CryptographicError::TooFarInFuture { jump });
        }

        let mut current = chain_key;
        while current.index() < counter {
            chain.skipped.push_back(current.message_keys()?);
            if chain.skipped.len() > limits.max_skipped_message_keys {
                chain.skipped.pop_front();
            }
            current = current.next()?;
        }
        let keys = current.message_keys()?;
        chain.chain_key = current.next()?;
        Ok(keys)
    }
}

// ----------------------------------------------------------------------------
// Session Record
// ----------------------------------------------------------------------------

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SessionRecord {
    current: Option<SessionState>,
    previous: VecDeque<SessionState>,
}

impl SessionRecord {
    pub fn new(state: SessionState) -> Self {
        Self {
            current: Some(state),
            previous: VecDeque::new(),
        }
    }

    pub fn session_state(&self) -> Option<&SessionState> {
        self.current.as_ref()
    }

    pub fn session_state_mut(&mut self) -> Option<&mut SessionState> {
        self.current.as_mut()
    }

    pub fn has_current_state(&self) -> bool {
        self.current.is_some()
    }

    pub fn archived_states(&self) -> usize {
        self.previous.len()
    }

    /// Make `state` current, archiving the old one
    pub fn promote_state(&mut self, state: SessionState) {
        if let Some(old) = self.current.replace(state) {
            self.previous.push_front(old);
            self.previous.truncate(MAX_ARCHIVED_STATES);
        }
    }

    /// Whether a session built from this base key already exists
    pub fn has_base_key(&self, base_key: &PublicKey) -> bool {
        self.current
            .iter()
            .chain(self.previous.iter())
            .any(|state| &state.base_key == base_key)
    }

    /// Try the current state, then archived ones; the first that decrypts wins
    pub fn decrypt(
        &mut self,
        message: &SignalMessage,
        limits: &SessionConfig,
    ) -> Result<Vec<u8>, CryptographicError> {
        let mut last_error = CryptographicError::invalid_message("no session state");

        if let Some(current) = &self.current {
            let mut candidate = current.clone();
            match candidate.decrypt(message, limits) {
                Ok(plaintext) => {
                    self.current = Some(candidate);
                    return Ok(plaintext);
                }
                Err(err) => last_error = err,
            }
        }

        for index in 0..self.previous.len() {
            let mut candidate = self.previous[index].clone();
            if let Ok(plaintext) = candidate.decrypt(message, limits) {
                self.previous.remove(index);
                self.promote_state(candidate);
                return Ok(plaintext);
            }
        }

        Err(last_error)
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
    use crate::signal::records::SignedPreKeyRecord;
    use crate::types::Timestamp;

    struct Pair {
        alice: SessionState,
        bob: SessionState,
    }

    fn establish(with_one_time: bool) -> Pair {
        let alice_identity = KeyPair::generate();
        let bob_identity = KeyPair::generate();
        let signed = SignedPreKeyRecord::generate(1, &bob_identity, Timestamp::new(0));
        let one_time = KeyPair::generate();
        let bundle = PreKeyBundle {
            registration_id: 99,
            device_id: 0,
            pre_key: with_one_time.then_some((5, one_time.public_key)),
            signed_pre_key_id: signed.id,
            signed_pre_key: signed.key_pair.public_key,
            signed_pre_key_signature: signed.signature.clone(),
            identity_key: bob_identity.public_key,
        };
        let base = KeyPair::generate();
        let mut alice =
            SessionState::initialize_as_initiator(&alice_identity, &base, 7, &bundle).unwrap();

        let envelope = alice.encrypt(b"first").unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::PkMsg);
        let pre_key_message = PreKeySignalMessage::deserialize(&envelope.ciphertext).unwrap();
        assert_eq!(pre_key_message.pre_key_id, with_one_time.then_some(5));

        let mut bob = SessionState::initialize_as_responder(
            &bob_identity,
            &signed.key_pair,
            with_one_time.then_some(&one_time),
            99,
            &pre_key_message,
        )
        .unwrap();
        let limits = SessionConfig::default();
        assert_eq!(bob.decrypt(&pre_key_message.message, &limits).unwrap(), b"first");
        Pair { alice, bob }
    }

    fn decrypt(state: &mut SessionState, envelope: &Envelope) -> Result<Vec<u8>, CryptographicError> {
        let message = match envelope.kind {
            EnvelopeKind::PkMsg => PreKeySignalMessage::deserialize(&envelope.ciphertext)?.message,
            _ => SignalMessage::deserialize(&envelope.ciphertext)?,
        };
        state.decrypt(&message, &SessionConfig::default())
    }

    #[test]
    fn test_ping_pong_ratchets() {
        for with_one_time in [true, false] {
            let Pair { mut alice, mut bob } = establish(with_one_time);

            let reply = bob.encrypt(b"reply").unwrap();
            assert_eq!(reply.kind, EnvelopeKind::Msg);
            assert_eq!(decrypt(&mut alice, &reply).unwrap(), b"reply");
            assert!(alice.pending_pre_key().is_none());

            let next = alice.encrypt(b"after reply").unwrap();
            assert_eq!(next.kind, EnvelopeKind::Msg);
            assert_eq!(decrypt(&mut bob, &next).unwrap(), b"after reply");
        }
    }

    #[test]
    fn test_out_of_order_uses_skipped_keys() {
        let Pair { mut alice, mut bob } = establish(true);
        let first = bob.encrypt(b"one").unwrap();
        let second = bob.encrypt(b"two").unwrap();
        let third = bob.encrypt(b"three").unwrap();

        assert_eq!(decrypt(&mut alice, &third).unwrap(), b"three");
        assert_eq!(decrypt(&mut alice, &first).unwrap(), b"one");
        assert_eq!(decrypt(&mut alice, &second).unwrap(), b"two");
        assert!(matches!(
            decrypt(&mut alice, &second),
            Err(CryptographicError::DuplicateMessage { counter: 1 })
        ));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let Pair { mut alice, mut bob } = establish(false);
        let mut reply = bob.encrypt(b"reply").unwrap();
        let last = reply.ciphertext.len() - 1;
        reply.ciphertext[last] ^= 0x01;
        assert_eq!(decrypt(&mut alice, &reply), Err(CryptographicError::BadMac));
    }

    #[test]
    fn test_record_tries_archived_states() {
        let Pair { alice, mut bob } = establish(true);
        let late = bob.encrypt(b"late").unwrap();

        let mut record = SessionRecord::new(alice.clone());
        let Pair { alice: fresh, .. } = establish(true);
        record.promote_state(fresh);
        assert_eq!(record.archived_states(), 1);

        let message = SignalMessage::deserialize(&late.ciphertext).unwrap();
        assert_eq!(
            record.decrypt(&message, &SessionConfig::default()).unwrap(),
            b"late"
        );
        assert_eq!(record.archived_states(), 1);
        assert!(record.has_base_key(alice.base_key()));

        let bytes = record.serialize().unwrap();
        let restored = SessionRecord::deserialize(&bytes).unwrap();
        assert!(restored.has_current_state());
    }
}
