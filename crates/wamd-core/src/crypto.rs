//! Symmetric primitives shared by sessions, app state, media and polls

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

use crate::errors::CryptographicError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
pub(crate) type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// HMAC-SHA256 over the concatenation of `parts`
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], CryptographicError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| CryptographicError::KeyDerivationFailed)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// HMAC-SHA512 over the concatenation of `parts`
pub fn hmac_sha512(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 64], CryptographicError> {
    let mut mac = <HmacSha512 as Mac>::new_from_slice(key)
        .map_err(|_| CryptographicError::KeyDerivationFailed)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time check of a (possibly truncated) HMAC-SHA256 tag
pub fn verify_hmac_sha256(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> bool {
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(key) else {
        return false;
    };
    for part in parts {
        mac.update(part);
    }
    !tag.is_empty() && mac.verify_truncated_left(tag).is_ok()
}

/// Constant-time equality for MACs computed by other means
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// HKDF-SHA256 expanding to `len` bytes
pub fn hkdf_sha256(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
    len: usize,
) -> Result<Vec<u8>, CryptographicError> {
    let mut okm = vec![0u8; len];
    Hkdf::<Sha256>::new(salt, ikm)
        .expand(info, &mut okm)
        .map_err(|_| CryptographicError::KeyDerivationFailed)?;
    Ok(okm)
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// AES-256-CBC with PKCS#7 padding
pub fn aes_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptographicError> {
    let cipher = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|_| CryptographicError::invalid_key("AES-CBC key or IV length"))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

pub fn aes_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptographicError> {
    let cipher = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|_| CryptographicError::invalid_key("AES-CBC key or IV length"))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptographicError::DecryptionFailed)
}

/// AES-256-GCM with additional authenticated data
pub fn aes_gcm_encrypt(
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptographicError> {
    if iv.len() != 12 {
        return Err(CryptographicError::invalid_key("AES-GCM nonce must be 12 bytes"));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| CryptographicError::invalid_key("AES-GCM key length"))?;
    cipher
        .encrypt(Nonce::from_slice(iv), Payload { msg: plaintext, aad })
        .map_err(|_| CryptographicError::EncryptionFailed)
}

pub fn aes_gcm_decrypt(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptographicError> {
    if iv.len() != 12 {
        return Err(CryptographicError::invalid_key("AES-GCM nonce must be 12 bytes"));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| CryptographicError::invalid_key("AES-GCM key length"))?;
    cipher
        .decrypt(Nonce::from_slice(iv), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptographicError::DecryptionFailed)
}
