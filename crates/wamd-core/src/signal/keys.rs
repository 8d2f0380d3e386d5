//! Curve25519 keys for Signal sessions
//!
//! One key type serves both Diffie-Hellman agreement (X25519) and signatures.
//! Signatures are XEdDSA: the Montgomery private scalar is reused on the
//! Edwards form of the curve, and the sign bit of the derived Edwards public
//! key travels in the top bit of the signature so that a verifier holding only
//! the Montgomery u-coordinate can recover the point.

use core::fmt;

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use x25519_dalek::StaticSecret;

use crate::crypto::constant_time_eq;
use crate::errors::CryptographicError;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Type byte prefixed to serialized public keys
pub const DJB_TYPE: u8 = 0x05;

pub const KEY_LENGTH: usize = 32;

pub const SIGNATURE_LENGTH: usize = 64;

// ----------------------------------------------------------------------------
// Public Key
// ----------------------------------------------------------------------------

/// Montgomery u-coordinate of a Curve25519 public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; KEY_LENGTH]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse either the 33-byte typed form or the raw 32-byte form
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptographicError> {
        let raw = match bytes.len() {
            33 if bytes[0] == DJB_TYPE => &bytes[1..],
            33 => {
                return Err(CryptographicError::invalid_key(format!(
                    "unknown key type {:#x}",
                    bytes[0]
                )))
            }
            32 => bytes,
            other => {
                return Err(CryptographicError::invalid_key(format!(
                    "public key has {other} bytes"
                )))
            }
        };
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(raw);
        Ok(Self(key))
    }

    /// Typed 33-byte form used on the wire and in MAC inputs
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(KEY_LENGTH + 1);
        out.push(DJB_TYPE);
        out.extend_from_slice(&self.0);
        out
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Verify an XEdDSA signature made by the matching private key
    pub fn verify_signature(&self, message: &[u8], signature: &[u8]) -> bool {
        if signature.len() != SIGNATURE_LENGTH {
            return false;
        }
        let sign_bit = (signature[SIGNATURE_LENGTH - 1] & 0x80) >> 7;
        let Some(edwards) = MontgomeryPoint(self.0).to_edwards(sign_bit) else {
            return false;
        };
        let compressed_public = edwards.compress();

        let mut r_bytes = [0u8; 32];
        r_bytes.copy_from_slice(&signature[..32]);
        let mut s_bytes = [0u8; 32];
        s_bytes.copy_from_slice(&signature[32..]);
        s_bytes[31] &= 0x7F;
        if s_bytes[31] & 0xE0 != 0 {
            return false;
        }

        let h = Scalar::from_hash(
            Sha512::new()
                .chain_update(r_bytes)
                .chain_update(compressed_public.as_bytes())
                .chain_update(message),
        );
        let check = EdwardsPoint::vartime_double_scalar_mul_basepoint(
            &h,
            &(-edwards),
            &Scalar::from_bytes_mod_order(s_bytes),
        );
        constant_time_eq(check.compress().as_bytes(), &r_bytes)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[..8]))
    }
}

// ----------------------------------------------------------------------------
// Private Key
// ----------------------------------------------------------------------------

/// Clamped Curve25519 private scalar
#[derive(Clone, Serialize, Deserialize)]
pub struct PrivateKey([u8; KEY_LENGTH]);

impl PrivateKey {
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut OsRng)
    }

    pub fn generate_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; KEY_LENGTH];
        rng.fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(mut bytes: [u8; KEY_LENGTH]) -> Self {
        bytes[0] &= 248;
        bytes[31] &= 127;
        bytes[31] |= 64;
        Self(bytes)
    }

    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes())
    }

    /// X25519 shared secret with `their_key`
    pub fn agree(&self, their_key: &PublicKey) -> [u8; 32] {
        let secret = StaticSecret::from(self.0);
        secret
            .diffie_hellman(&x25519_dalek::PublicKey::from(their_key.0))
            .to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        let mut nonce = [0u8; 64];
        OsRng.fill_bytes(&mut nonce);
        self.sign_with_nonce(message, &nonce)
    }

    fn sign_with_nonce(&self, message: &[u8], nonce: &[u8; 64]) -> [u8; SIGNATURE_LENGTH] {
        let a = Scalar::from_bytes_mod_order(self.0);
        let public = EdwardsPoint::mul_base(&a).compress();
        let sign_bit = public.as_bytes()[31] & 0x80;

        let r = Scalar::from_hash(
            Sha512::new()
                .chain_update([0xFFu8; 32])
                .chain_update(self.0)
                .chain_update(message)
                .chain_update(nonce),
        );
        let cap_r = EdwardsPoint::mul_base(&r).compress();
        let h = Scalar::from_hash(
            Sha512::new()
                .chain_update(cap_r.as_bytes())
                .chain_update(public.as_bytes())
                .chain_update(message),
        );
        let s = h * a + r;

        let mut signature = [0u8; SIGNATURE_LENGTH];
        signature[..32].copy_from_slice(cap_r.as_bytes());
        signature[32..].copy_from_slice(s.as_bytes());
        signature[SIGNATURE_LENGTH - 1] &= 0x7F;
        signature[SIGNATURE_LENGTH - 1] |= sign_bit;
        signature
    }

    pub fn to_bytes(&self) -> [u8; KEY_LENGTH] {
        self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

// ----------------------------------------------------------------------------
// Key Pair
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

/// Long-term identity of a device
pub type IdentityKeyPair = KeyPair;

impl KeyPair {
    pub fn generate() -> Self {
        Self::from_private(PrivateKey::generate())
    }

    pub fn generate_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_private(PrivateKey::generate_with_rng(rng))
    }

    pub fn from_private(private_key: PrivateKey) -> Self {
        Self {
            public_key: private_key.public_key(),
            private_key,
        }
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        self.private_key.sign(message)
    }

    pub fn agree(&self, their_key: &PublicKey) -> [u8; 32] {
        self.private_key.agree(their_key)
    }
}

/// Verify `signature` over `message` with a (possibly typed) serialized key
pub fn verify_signature(
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptographicError> {
    let key = PublicKey::deserialize(public_key)?;
    if key.verify_signature(message, signature) {
        Ok(())
    } else {
        Err(CryptographicError::SignatureVerificationFailed)
    }
}
