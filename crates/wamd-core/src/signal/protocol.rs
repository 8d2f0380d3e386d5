//! Ciphertext message framing
//!
//! Every message starts with a version byte (current version in both
//! nibbles) followed by a protobuf body. Ratchet messages end with an 8-byte
//! truncated MAC, sender-key messages with a 64-byte XEdDSA signature.

use std::str::FromStr;

use prost::Message as _;

use super::keys::{PrivateKey, PublicKey, SIGNATURE_LENGTH};
use crate::crypto::{hmac_sha256, verify_hmac_sha256};
use crate::errors::CryptographicError;
use crate::proto::wire;

pub const CURRENT_VERSION: u8 = 3;

pub const MAC_LENGTH: usize = 8;

const VERSION_BYTE: u8 = (CURRENT_VERSION << 4) | CURRENT_VERSION;

fn check_version(bytes: &[u8], minimum_len: usize) -> Result<(), CryptographicError> {
    if bytes.len() < minimum_len {
        return Err(CryptographicError::invalid_message(format!(
            "ciphertext of {} bytes is too short",
            bytes.len()
        )));
    }
    let version = bytes[0] >> 4;
    if version != CURRENT_VERSION {
        return Err(CryptographicError::UnsupportedVersion { version });
    }
    Ok(())
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, CryptographicError> {
    value.ok_or_else(|| CryptographicError::invalid_message(format!("missing {field}")))
}

fn decode_body<M: prost::Message + Default>(body: &[u8]) -> Result<M, CryptographicError> {
    M::decode(body).map_err(|err| CryptographicError::invalid_message(err.to_string()))
}

// ----------------------------------------------------------------------------
// Envelope
// ----------------------------------------------------------------------------

/// Ciphertext kind carried in the `type` attribute of an `enc` node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Msg,
    PkMsg,
    SkMsg,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Msg => "msg",
            EnvelopeKind::PkMsg => "pkmsg",
            EnvelopeKind::SkMsg => "skmsg",
        }
    }
}

impl FromStr for EnvelopeKind {
    type Err = CryptographicError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "msg" => Ok(EnvelopeKind::Msg),
            "pkmsg" => Ok(EnvelopeKind::PkMsg),
            "skmsg" => Ok(EnvelopeKind::SkMsg),
            other => Err(CryptographicError::invalid_message(format!(
                "unknown envelope type {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, ciphertext: Vec<u8>) -> Self {
        Self { kind, ciphertext }
    }
}

// ----------------------------------------------------------------------------
// Ratchet Message
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SignalMessage {
    pub ratchet_key: PublicKey,
    pub counter: u32,
    pub previous_counter: u32,
    pub ciphertext: Vec<u8>,
    serialized: Vec<u8>,
}

impl SignalMessage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mac_key: &[u8],
        ratchet_key: PublicKey,
        counter: u32,
        previous_counter: u32,
        ciphertext: Vec<u8>,
        sender_identity: &PublicKey,
        receiver_identity: &PublicKey,
    ) -> Result<Self, CryptographicError> {
        let body = wire::SignalMessage {
            ratchet_key: Some(ratchet_key.serialize()),
            counter: Some(counter),
            previous_counter: Some(previous_counter),
            ciphertext: Some(ciphertext.clone()),
        }
        .encode_to_vec();

        let mut serialized = Vec::with_capacity(1 + body.len() + MAC_LENGTH);
        serialized.push(VERSION_BYTE);
        serialized.extend_from_slice(&body);
        let mac = hmac_sha256(
            mac_key,
            &[
                &sender_identity.serialize(),
                &receiver_identity.serialize(),
                &serialized,
            ],
        )?;
        serialized.extend_from_slice(&mac[..MAC_LENGTH]);

        Ok(Self {
            ratchet_key,
            counter,
            previous_counter,
            ciphertext,
            serialized,
        })
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptographicError> {
        check_version(bytes, 1 + MAC_LENGTH)?;
        let body: wire::SignalMessage = decode_body(&bytes[1..bytes.len() - MAC_LENGTH])?;
        Ok(Self {
            ratchet_key: PublicKey::deserialize(&required(body.ratchet_key, "ratchet key")?)?,
            counter: required(body.counter, "counter")?,
            previous_counter: body.previous_counter.unwrap_or_default(),
            ciphertext: required(body.ciphertext, "ciphertext")?,
            serialized: bytes.to_vec(),
        })
    }

    pub fn verify_mac(
        &self,
        sender_identity: &PublicKey,
        receiver_identity: &PublicKey,
        mac_key: &[u8],
    ) -> Result<(), CryptographicError> {
        let (body, mac) = self.serialized.split_at(self.serialized.len() - MAC_LENGTH);
        let valid = verify_hmac_sha256(
            mac_key,
            &[&sender_identity.serialize(), &receiver_identity.serialize(), body],
            mac,
        );
        if valid {
            Ok(())
        } else {
            Err(CryptographicError::BadMac)
        }
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

// ----------------------------------------------------------------------------
// Pre-Key Message
// ----------------------------------------------------------------------------

/// Session-initiating wrapper around the first ratchet messages
#[derive(Debug, Clone)]
pub struct PreKeySignalMessage {
    pub registration_id: u32,
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    pub base_key: PublicKey,
    pub identity_key: PublicKey,
    pub message: SignalMessage,
    serialized: Vec<u8>,
}

impl PreKeySignalMessage {
    pub fn new(
        registration_id: u32,
        pre_key_id: Option<u32>,
        signed_pre_key_id: u32,
        base_key: PublicKey,
        identity_key: PublicKey,
        message: SignalMessage,
    ) -> Self {
        let body = wire::PreKeySignalMessage {
            registration_id: Some(registration_id),
            pre_key_id,
            signed_pre_key_id: Some(signed_pre_key_id),
            base_key: Some(base_key.serialize()),
            identity_key: Some(identity_key.serialize()),
            message: Some(message.serialized().to_vec()),
        }
        .encode_to_vec();
        let mut serialized = Vec::with_capacity(1 + body.len());
        serialized.push(VERSION_BYTE);
        serialized.extend_from_slice(&body);

        Self {
            registration_id,
            pre_key_id,
            signed_pre_key_id,
            base_key,
            identity_key,
            message,
            serialized,
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptographicError> {
        check_version(bytes, 2)?;
        let body: wire::PreKeySignalMessage = decode_body(&bytes[1..])?;
        Ok(Self {
            registration_id: body.registration_id.unwrap_or_default(),
            pre_key_id: body.pre_key_id,
            signed_pre_key_id: required(body.signed_pre_key_id, "signed pre-key id")?,
            base_key: PublicKey::deserialize(&required(body.base_key, "base key")?)?,
            identity_key: PublicKey::deserialize(&required(body.identity_key, "identity key")?)?,
            message: SignalMessage::deserialize(&required(body.message, "inner message")?)?,
            serialized: bytes.to_vec(),
        })
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

// ----------------------------------------------------------------------------
// Sender-Key Messages
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SenderKeyMessage {
    pub key_id: u32,
    pub iteration: u32,
    pub ciphertext: Vec<u8>,
    serialized: Vec<u8>,
}

impl SenderKeyMessage {
    pub fn new(key_id: u32, iteration: u32, ciphertext: Vec<u8>, signing_key: &PrivateKey) -> Self {
        let body = wire::SenderKeyMessage {
            id: Some(key_id),
            iteration: Some(iteration),
            ciphertext: Some(ciphertext.clone()),
        }
        .encode_to_vec();
        let mut serialized = Vec::with_capacity(1 + body.len() + SIGNATURE_LENGTH);
        serialized.push(VERSION_BYTE);
        serialized.extend_from_slice(&body);
        let signature = signing_key.sign(&serialized);
        serialized.extend_from_slice(&signature);

        Self {
            key_id,
            iteration,
            ciphertext,
            serialized,
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptographicError> {
        check_version(bytes, 1 + SIGNATURE_LENGTH)?;
        let body: wire::SenderKeyMessage =
            decode_body(&bytes[1..bytes.len() - SIGNATURE_LENGTH])?;
        Ok(Self {
            key_id: required(body.id, "sender key id")?,
            iteration: required(body.iteration, "iteration")?,
            ciphertext: required(body.ciphertext, "ciphertext")?,
            serialized: bytes.to_vec(),
        })
    }

    pub fn verify_signature(&self, signing_key: &PublicKey) -> Result<(), CryptographicError> {
        let (signed, signature) = self
            .serialized
            .split_at(self.serialized.len() - SIGNATURE_LENGTH);
        if signing_key.verify_signature(signed, signature) {
            Ok(())
        } else {
            Err(CryptographicError::SignatureVerificationFailed)
        }
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

/// Hands a sender's chain key and signing key to group members
#[derive(Debug, Clone)]
pub struct SenderKeyDistributionMessage {
    pub key_id: u32,
    pub iteration: u32,
    pub chain_key: [u8; 32],
    pub signing_key: PublicKey,
    serialized: Vec<u8>,
}

impl SenderKeyDistributionMessage {
    pub fn new(key_id: u32, iteration: u32, chain_key: [u8; 32], signing_key: PublicKey) -> Self {
        let body = wire::SenderKeyDistributionMessage {
            id: Some(key_id),
            iteration: Some(iteration),
            chain_key: Some(chain_key.to_vec()),
            signing_key: Some(signing_key.serialize()),
        }
        .encode_to_vec();
        let mut serialized = Vec::with_capacity(1 + body.len());
        serialized.push(VERSION_BYTE);
        serialized.extend_from_slice(&body);

        Self {
            key_id,
            iteration,
            chain_key,
            signing_key,
            serialized,
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptographicError> {
        check_version(bytes, 2)?;
        let body: wire::SenderKeyDistributionMessage = decode_body(&bytes[1..])?;
        let chain = required(body.chain_key, "chain key")?;
        let chain_key: [u8; 32] = chain
            .as_slice()
            .try_into()
            .map_err(|_| CryptographicError::invalid_key("sender chain key must be 32 bytes"))?;
        Ok(Self {
            key_id: required(body.id, "sender key id")?,
            iteration: required(body.iteration, "iteration")?,
            chain_key,
            signing_key: PublicKey::deserialize(&required(body.signing_key, "signing key")?)?,
            serialized: bytes.to_vec(),
        })
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::keys::KeyPair;

    #[test]
    fn test_version_byte_checked() {
        let identity = KeyPair::generate().public_key;
        let message = SignalMessage::new(&[1u8; 32], identity, 3, 0, vec![9; 16], &identity, &identity)
            .unwrap();
        let mut bytes = message.serialized().to_vec();
        assert_eq!(bytes[0], 0x33);
        assert!(SignalMessage::deserialize(&bytes).is_ok());

        bytes[0] = 0x22;
        assert_eq!(
            SignalMessage::deserialize(&bytes).unwrap_err(),
            CryptographicError::UnsupportedVersion { version: 2 }
        );
        assert!(SignalMessage::deserialize(&[0x33]).is_err());
    }

    #[test]
    fn test_mac_binds_identities() {
        let alice = KeyPair::generate().public_key;
        let bob = KeyPair::generate().public_key;
        let message = SignalMessage::new(&[1u8; 32], alice, 0, 0, vec![1; 16], &alice, &bob).unwrap();
        let parsed = SignalMessage::deserialize(message.serialized()).unwrap();
        assert!(parsed.verify_mac(&alice, &bob, &[1u8; 32]).is_ok());
        assert_eq!(
            parsed.verify_mac(&bob, &alice, &[1u8; 32]),
            Err(CryptographicError::BadMac)
        );
    }

    #[test]
    fn test_sender_key_message_signature() {
        let signing = KeyPair::generate();
        let message = SenderKeyMessage::new(17, 4, vec![5; 32], &signing.private_key);
        let parsed = SenderKeyMessage::deserialize(message.serialized()).unwrap();
        assert_eq!((parsed.key_id, parsed.iteration), (17, 4));
        assert!(parsed.verify_signature(&signing.public_key).is_ok());
        assert!(parsed
            .verify_signature(&KeyPair::generate().public_key)
            .is_err());
    }

    #[test]
    fn test_envelope_kind_strings() {
        for kind in [EnvelopeKind::Msg, EnvelopeKind::PkMsg, EnvelopeKind::SkMsg] {
            assert_eq!(kind.as_str().parse::<EnvelopeKind>().unwrap(), kind);
        }
        assert!("frskmsg".parse::<EnvelopeKind>().is_err());
    }
}
