//! Pre-key material published to the server

use serde::{Deserialize, Serialize};

use super::keys::{KeyPair, PublicKey};
use crate::errors::CryptographicError;
use crate::types::Timestamp;

/// One-time pre-key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKeyRecord {
    pub id: u32,
    pub key_pair: KeyPair,
}

impl PreKeyRecord {
    pub fn new(id: u32, key_pair: KeyPair) -> Self {
        Self { id, key_pair }
    }
}

/// Medium-term pre-key signed by the identity key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPreKeyRecord {
    pub id: u32,
    pub key_pair: KeyPair,
    pub signature: Vec<u8>,
    pub timestamp: Timestamp,
}

impl SignedPreKeyRecord {
    pub fn generate(id: u32, identity: &KeyPair, timestamp: Timestamp) -> Self {
        let key_pair = KeyPair::generate();
        let signature = identity.sign(&key_pair.public_key.serialize()).to_vec();
        Self {
            id,
            key_pair,
            signature,
            timestamp,
        }
    }
}

/// Everything needed to open a session with a device that is offline
#[derive(Debug, Clone)]
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub device_id: u32,
    pub pre_key: Option<(u32, PublicKey)>,
    pub signed_pre_key_id: u32,
    pub signed_pre_key: PublicKey,
    pub signed_pre_key_signature: Vec<u8>,
    pub identity_key: PublicKey,
}

impl PreKeyBundle {
    pub fn verify(&self) -> Result<(), CryptographicError> {
        if self
            .identity_key
            .verify_signature(&self.signed_pre_key.serialize(), &self.signed_pre_key_signature)
        {
            Ok(())
        } else {
            Err(CryptographicError::SignatureVerificationFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_signature_checked() {
        let identity = KeyPair::generate();
        let signed = SignedPreKeyRecord::generate(1, &identity, Timestamp::new(0));
        let mut bundle = PreKeyBundle {
            registration_id: 42,
            device_id: 0,
            pre_key: None,
            signed_pre_key_id: signed.id,
            signed_pre_key: signed.key_pair.public_key,
            signed_pre_key_signature: signed.signature.clone(),
            identity_key: identity.public_key,
        };
        assert!(bundle.verify().is_ok());

        bundle.identity_key = KeyPair::generate().public_key;
        assert_eq!(
            bundle.verify(),
            Err(CryptographicError::SignatureVerificationFailed)
        );
    }
}
