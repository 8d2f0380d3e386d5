//! The MAC layers protecting app-state sync
//!
//! - content MAC: per mutation, over the encrypted value
//! - index MAC: per mutation, over the JSON index
//! - snapshot MAC: over the LT-hash, version and collection name
//! - patch MAC: over the snapshot MAC, every value MAC, version and name

use super::keys::PatchName;
use crate::crypto::{hmac_sha256, hmac_sha512};
use crate::errors::{CryptographicError, SyncError};
use crate::proto::{SyncdOperation, SyncdRecord};

pub const VALUE_MAC_LENGTH: usize = 32;

pub fn generate_content_mac(
    operation: SyncdOperation,
    data: &[u8],
    key_id: &[u8],
    key: &[u8],
) -> Result<[u8; 32], CryptographicError> {
    let operation_byte = [operation as u8 + 1];
    let mut key_id_length = [0u8; 8];
    key_id_length[7] = (key_id.len() + 1) as u8;
    let full = hmac_sha512(key, &[&operation_byte, key_id, data, &key_id_length])?;
    let mut mac = [0u8; 32];
    mac.copy_from_slice(&full[..32]);
    Ok(mac)
}

pub fn generate_snapshot_mac(
    lt_hash: &[u8],
    version: u64,
    name: PatchName,
    key: &[u8],
) -> Result<[u8; 32], CryptographicError> {
    hmac_sha256(key, &[lt_hash, &version.to_be_bytes(), name.as_str().as_bytes()])
}

pub fn generate_patch_mac<M: AsRef<[u8]>>(
    snapshot_mac: &[u8],
    value_macs: &[M],
    version: u64,
    name: PatchName,
    key: &[u8],
) -> Result<[u8; 32], CryptographicError> {
    let version_bytes = version.to_be_bytes();
    let mut parts: Vec<&[u8]> = Vec::with_capacity(value_macs.len() + 3);
    parts.push(snapshot_mac);
    parts.extend(value_macs.iter().map(AsRef::as_ref));
    parts.push(&version_bytes);
    parts.push(name.as_str().as_bytes());
    hmac_sha256(key, &parts)
}

pub fn generate_index_mac(index_json: &[u8], key: &[u8]) -> Result<[u8; 32], CryptographicError> {
    hmac_sha256(key, &[index_json])
}

/// Trailing value MAC of a record's value blob
pub fn value_mac_of(record: &SyncdRecord) -> Result<&[u8], SyncError> {
    let blob = record
        .value
        .as_ref()
        .and_then(|value| value.blob.as_deref())
        .ok_or_else(|| SyncError::malformed("record without value blob"))?;
    if blob.len() < VALUE_MAC_LENGTH {
        return Err(SyncError::malformed("value blob shorter than its MAC"));
    }
    Ok(&blob[blob.len() - VALUE_MAC_LENGTH..])
}

pub fn index_mac_of(record: &SyncdRecord) -> Result<&[u8], SyncError> {
    record
        .index
        .as_ref()
        .and_then(|index| index.blob.as_deref())
        .ok_or_else(|| SyncError::malformed("record without index blob"))
}

pub fn key_id_of(record: &SyncdRecord) -> Result<&[u8], SyncError> {
    record
        .key_id
        .as_ref()
        .and_then(|key_id| key_id.id.as_deref())
        .ok_or_else(|| SyncError::malformed("record without key id"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_mac_depends_on_operation() {
        let set = generate_content_mac(SyncdOperation::Set, b"data", b"key-id", &[1u8; 32]).unwrap();
        let remove =
            generate_content_mac(SyncdOperation::Remove, b"data", b"key-id", &[1u8; 32]).unwrap();
        assert_ne!(set, remove);
    }

    #[test]
    fn test_snapshot_mac_binds_version_and_name() {
        let hash = [0u8; 128];
        let base = generate_snapshot_mac(&hash, 1, PatchName::Regular, &[2u8; 32]).unwrap();
        assert_ne!(
            base,
            generate_snapshot_mac(&hash, 2, PatchName::Regular, &[2u8; 32]).unwrap()
        );
        assert_ne!(
            base,
            generate_snapshot_mac(&hash, 1, PatchName::RegularLow, &[2u8; 32]).unwrap()
        );
    }
}
