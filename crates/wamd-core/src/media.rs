//! Media blob encryption
//!
//! History payloads and externally stored app-state mutations are fetched as
//! encrypted media. A 32-byte media key expands through HKDF into an IV, an
//! AES-256-CBC key and a MAC key; the blob is `ciphertext ‖ mac[..10]`.

use rand_core::{OsRng, RngCore};

use crate::crypto::{aes_cbc_decrypt, aes_cbc_encrypt, constant_time_eq, hkdf_sha256, hmac_sha256, sha256};
use crate::errors::CryptographicError;

pub const MEDIA_MAC_LENGTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    History,
    AppState,
}

impl MediaKind {
    /// HKDF info for this kind
    pub fn key_info(&self) -> &'static [u8] {
        match self {
            MediaKind::Image => b"WhatsApp Image Keys",
            MediaKind::Video => b"WhatsApp Video Keys",
            MediaKind::Audio => b"WhatsApp Audio Keys",
            MediaKind::Document => b"WhatsApp Document Keys",
            MediaKind::History => b"WhatsApp History Keys",
            MediaKind::AppState => b"WhatsApp App State Keys",
        }
    }
}

struct MediaKeys {
    iv: [u8; 16],
    cipher_key: [u8; 32],
    mac_key: [u8; 32],
}

impl MediaKeys {
    fn expand(kind: MediaKind, media_key: &[u8]) -> Result<Self, CryptographicError> {
        let okm = hkdf_sha256(None, media_key, kind.key_info(), 112)?;
        let mut keys = Self {
            iv: [0u8; 16],
            cipher_key: [0u8; 32],
            mac_key: [0u8; 32],
        };
        keys.iv.copy_from_slice(&okm[..16]);
        keys.cipher_key.copy_from_slice(&okm[16..48]);
        keys.mac_key.copy_from_slice(&okm[48..80]);
        Ok(keys)
    }
}

/// Result of encrypting a blob, with the hashes a reference carries
#[derive(Debug, Clone)]
pub struct EncryptedMedia {
    pub media_key: [u8; 32],
    pub data: Vec<u8>,
    pub file_sha256: [u8; 32],
    pub file_enc_sha256: [u8; 32],
}

pub fn encrypt_media(kind: MediaKind, plaintext: &[u8]) -> Result<EncryptedMedia, CryptographicError> {
    let mut media_key = [0u8; 32];
    OsRng.fill_bytes(&mut media_key);
    encrypt_media_with_key(kind, media_key, plaintext)
}

pub fn encrypt_media_with_key(
    kind: MediaKind,
    media_key: [u8; 32],
    plaintext: &[u8],
) -> Result<EncryptedMedia, CryptographicError> {
    let keys = MediaKeys::expand(kind, &media_key)?;
    let mut data = aes_cbc_encrypt(&keys.cipher_key, &keys.iv, plaintext)?;
    let mac = hmac_sha256(&keys.mac_key, &[&keys.iv, &data])?;
    data.extend_from_slice(&mac[..MEDIA_MAC_LENGTH]);
    Ok(EncryptedMedia {
        media_key,
        file_enc_sha256: sha256(&data),
        file_sha256: sha256(plaintext),
        data,
    })
}

/// Verify and decrypt a downloaded blob; hash checks are skipped when the
/// reference did not carry them
pub fn decrypt_media(
    kind: MediaKind,
    media_key: &[u8],
    encrypted: &[u8],
    file_sha256: Option<&[u8]>,
    file_enc_sha256: Option<&[u8]>,
) -> Result<Vec<u8>, CryptographicError> {
    if encrypted.len() <= MEDIA_MAC_LENGTH {
        return Err(CryptographicError::invalid_message("media blob too short"));
    }
    if let Some(expected) = file_enc_sha256 {
        if !constant_time_eq(&sha256(encrypted), expected) {
            return Err(CryptographicError::IntegrityMismatch {
                reason: "encrypted file hash".into(),
            });
        }
    }

    let keys = MediaKeys::expand(kind, media_key)?;
    let (ciphertext, mac) = encrypted.split_at(encrypted.len() - MEDIA_MAC_LENGTH);
    let expected_mac = hmac_sha256(&keys.mac_key, &[&keys.iv, ciphertext])?;
    if !constant_time_eq(&expected_mac[..MEDIA_MAC_LENGTH], mac) {
        return Err(CryptographicError::BadMac);
    }

    let plaintext = aes_cbc_decrypt(&keys.cipher_key, &keys.iv, ciphertext)?;
    if let Some(expected) = file_sha256 {
        if !constant_time_eq(&sha256(&plaintext), expected) {
            return Err(CryptographicError::IntegrityMismatch {
                reason: "plaintext file hash".into(),
            });
        }
    }
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_round_trip_with_hashes() {
        let blob = encrypt_media(MediaKind::History, b"history payload").unwrap();
        let plaintext = decrypt_media(
            MediaKind::History,
            &blob.media_key,
            &blob.data,
            Some(&blob.file_sha256),
            Some(&blob.file_enc_sha256),
        )
        .unwrap();
        assert_eq!(plaintext, b"history payload");
    }

    #[test]
    fn test_kind_changes_keys() {
        let blob = encrypt_media(MediaKind::History, b"payload").unwrap();
        assert_eq!(
            decrypt_media(MediaKind::AppState, &blob.media_key, &blob.data, None, None),
            Err(CryptographicError::BadMac)
        );
    }

    #[test]
    fn test_hash_mismatch() {
        let blob = encrypt_media(MediaKind::Image, b"payload").unwrap();
        let result = decrypt_media(
            MediaKind::Image,
            &blob.media_key,
            &blob.data,
            Some(&[0u8; 32]),
            None,
        );
        assert!(matches!(result, Err(CryptographicError::IntegrityMismatch { .. })));

        let mut tampered = blob.data.clone();
        tampered[0] ^= 1;
        assert!(decrypt_media(MediaKind::Image, &blob.media_key, &tampered, None, None).is_err());
    }
}
