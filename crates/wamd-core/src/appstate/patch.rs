//! Patch and snapshot decoding, patch encoding
//!
//! Decoding never mutates the caller's state. A patch is applied to a copy
//! of the hash state and the copy is returned only when the snapshot MAC and
//! the patch MAC both match, so a rejected patch leaves the known hash as it
//! was.

use prost::Message as _;
use rand_core::{OsRng, RngCore};
use tracing::debug;

use super::action::{Mutation, SyncAction};
use super::keys::{KeyRing, PatchName};
use super::mac::{
    generate_content_mac, generate_index_mac, generate_patch_mac, index_mac_of, key_id_of,
    value_mac_of, VALUE_MAC_LENGTH,
};
use super::state::{operation_of, LtHashState};
use crate::crypto::{aes_cbc_decrypt, aes_cbc_encrypt, constant_time_eq};
use crate::errors::{Result, SyncError, WamdError};
use crate::proto::{
    KeyId, SyncActionData, SyncdIndex, SyncdMutation, SyncdOperation, SyncdPatch, SyncdRecord,
    SyncdSnapshot, SyncdValue, SyncdVersion,
};
use crate::types::Timestamp;

const IV_LENGTH: usize = 16;

// ----------------------------------------------------------------------------
// Decoding
// ----------------------------------------------------------------------------

pub struct PatchDecoder<'a> {
    keys: &'a KeyRing,
    validate_macs: bool,
}

impl<'a> PatchDecoder<'a> {
    pub fn new(keys: &'a KeyRing, validate_macs: bool) -> Self {
        Self {
            keys,
            validate_macs,
        }
    }

    /// Decrypt one mutation, checking its value and index MACs
    pub fn decode_mutation(&self, name: PatchName, mutation: &SyncdMutation) -> Result<Mutation> {
        let record = mutation
            .record
            .as_ref()
            .ok_or_else(|| SyncError::malformed("mutation without record"))?;
        self.decode_record(name, operation_of(mutation)?, record)
    }

    fn decode_record(
        &self,
        name: PatchName,
        operation: SyncdOperation,
        record: &SyncdRecord,
    ) -> Result<Mutation> {
        let key_id = key_id_of(record)?;
        let keys = self.keys.get(key_id)?;
        let value_mac = value_mac_of(record)?;
        let index_mac = index_mac_of(record)?;

        let blob = record
            .value
            .as_ref()
            .and_then(|value| value.blob.as_deref())
            .unwrap_or_default();
        let content = &blob[..blob.len() - VALUE_MAC_LENGTH];
        let expected = generate_content_mac(operation, content, key_id, &keys.value_mac)?;
        if !constant_time_eq(&expected, value_mac) {
            return Err(SyncError::InvalidValueMac {
                collection: name.to_string(),
            }
            .into());
        }

        if content.len() < IV_LENGTH {
            return Err(SyncError::malformed("value content shorter than its iv").into());
        }
        let (iv, ciphertext) = content.split_at(IV_LENGTH);
        let plaintext = aes_cbc_decrypt(&keys.value_encryption, iv, ciphertext)?;
        let data = SyncActionData::decode(plaintext.as_slice())?;

        let index_json = data
            .index
            .as_deref()
            .ok_or_else(|| SyncError::malformed("action data without index"))?;
        let expected = generate_index_mac(index_json, &keys.index)?;
        if !constant_time_eq(&expected, index_mac) {
            return Err(SyncError::InvalidIndexMac {
                collection: name.to_string(),
            }
            .into());
        }
        let index: Vec<String> = serde_json::from_slice(index_json)
            .map_err(|err| SyncError::malformed(format!("index is not a JSON string array: {err}")))?;

        let value = data.value.unwrap_or_default();
        Ok(Mutation {
            operation,
            action: SyncAction::from_sync_data(&index, &value),
            timestamp: value
                .timestamp
                .and_then(|millis| u64::try_from(millis).ok())
                .map(Timestamp::new),
            index,
            index_mac: index_mac.to_vec(),
            value_mac: value_mac.to_vec(),
            version: data.version.unwrap_or_default(),
            collection: name,
        })
    }

    /// Rebuild a collection's state from a full snapshot
    pub fn decode_snapshot(
        &self,
        name: PatchName,
        snapshot: &SyncdSnapshot,
    ) -> Result<(LtHashState, Vec<Mutation>)> {
        let mut state = LtHashState {
            version: version_of(snapshot.version.as_ref()),
            ..LtHashState::default()
        };
        let as_sets: Vec<SyncdMutation> = snapshot
            .records
            .iter()
            .map(|record| SyncdMutation {
                operation: Some(SyncdOperation::Set as i32),
                record: Some(record.clone()),
            })
            .collect();
        state.update_hash(&as_sets)?;

        if self.validate_macs {
            let key_id = snapshot
                .key_id
                .as_ref()
                .and_then(|key_id| key_id.id.as_deref())
                .ok_or_else(|| SyncError::malformed("snapshot without key id"))?;
            let keys = self.keys.get(key_id)?;
            let expected = state.snapshot_mac(name, &keys.snapshot_mac)?;
            let declared = snapshot.mac.as_deref().unwrap_or_default();
            if !constant_time_eq(&expected, declared) {
                return Err(SyncError::InvalidSnapshotMac {
                    collection: name.to_string(),
                    version: state.version,
                }
                .into());
            }
        }

        let mutations = snapshot
            .records
            .iter()
            .map(|record| self.decode_record(name, SyncdOperation::Set, record))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            collection = %name,
            version = state.version,
            records = mutations.len(),
            "Decoded snapshot"
        );
        Ok((state, mutations))
    }

    /// Apply one patch on top of `state`, returning the advanced state
    ///
    /// External mutations must already be resolved into `patch.mutations`.
    pub fn decode_patch(
        &self,
        name: PatchName,
        state: &LtHashState,
        patch: &SyncdPatch,
    ) -> Result<(LtHashState, Vec<Mutation>)> {
        let mutations = patch
            .mutations
            .iter()
            .map(|mutation| self.decode_mutation(name, mutation))
            .collect::<Result<Vec<_>>>()?;

        let mut next = state.clone();
        next.update_hash(&patch.mutations)?;
        next.version = version_of(patch.version.as_ref());

        if self.validate_macs {
            let key_id = patch
                .key_id
                .as_ref()
                .and_then(|key_id| key_id.id.as_deref())
                .ok_or_else(|| SyncError::malformed("patch without key id"))?;
            let keys = self.keys.get(key_id)?;

            let snapshot_mac = next.snapshot_mac(name, &keys.snapshot_mac)?;
            if !constant_time_eq(&snapshot_mac, patch.snapshot_mac.as_deref().unwrap_or_default()) {
                return Err(SyncError::InvalidSnapshotMac {
                    collection: name.to_string(),
                    version: next.version,
                }
                .into());
            }

            let value_macs: Vec<&[u8]> = mutations
                .iter()
                .map(|mutation| mutation.value_mac.as_slice())
                .collect();
            let patch_mac =
                generate_patch_mac(&snapshot_mac, &value_macs, next.version, name, &keys.patch_mac)?;
            if !constant_time_eq(&patch_mac, patch.patch_mac.as_deref().unwrap_or_default()) {
                return Err(SyncError::InvalidPatchMac {
                    collection: name.to_string(),
                    version: next.version,
                }
                .into());
            }
        }

        Ok((next, mutations))
    }

    /// Apply patches in order, skipping any already covered by the state's
    /// version
    pub fn decode_patches(
        &self,
        name: PatchName,
        state: &LtHashState,
        patches: &[SyncdPatch],
    ) -> Result<(LtHashState, Vec<Mutation>)> {
        let mut current = state.clone();
        let mut decoded = Vec::new();
        for patch in patches {
            let version = version_of(patch.version.as_ref());
            if version != 0 && version <= current.version {
                debug!(
                    collection = %name,
                    version,
                    known = current.version,
                    "Skipping already applied patch"
                );
                continue;
            }
            let (next, mutations) = self.decode_patch(name, &current, patch)?;
            current = next;
            decoded.extend(mutations);
        }
        Ok((current, decoded))
    }
}

fn version_of(version: Option<&SyncdVersion>) -> u64 {
    version.and_then(|version| version.version).unwrap_or_default()
}

/// Key ids referenced by a snapshot and a list of patches
pub fn required_key_ids(snapshot: Option<&SyncdSnapshot>, patches: &[SyncdPatch]) -> Vec<Vec<u8>> {
    let mut ids: Vec<Vec<u8>> = Vec::new();
    let mut push = |id: Option<&[u8]>| {
        if let Some(id) = id {
            if !ids.iter().any(|known| known.as_slice() == id) {
                ids.push(id.to_vec());
            }
        }
    };
    if let Some(snapshot) = snapshot {
        push(snapshot.key_id.as_ref().and_then(|key_id| key_id.id.as_deref()));
        for record in &snapshot.records {
            push(key_id_of(record).ok());
        }
    }
    for patch in patches {
        push(patch.key_id.as_ref().and_then(|key_id| key_id.id.as_deref()));
        for mutation in &patch.mutations {
            push(mutation.record.as_ref().and_then(|record| key_id_of(record).ok()));
        }
    }
    ids
}

// ----------------------------------------------------------------------------
// Encoding
// ----------------------------------------------------------------------------

pub struct PatchEncoder<'a> {
    keys: &'a KeyRing,
}

impl<'a> PatchEncoder<'a> {
    pub fn new(keys: &'a KeyRing) -> Self {
        Self { keys }
    }

    fn encode_record(
        &self,
        operation: SyncdOperation,
        action: &SyncAction,
        key_id: &[u8],
        timestamp: Timestamp,
    ) -> Result<SyncdRecord> {
        let keys = self.keys.get(key_id)?;
        let (index, value, version) = action.to_sync_data(timestamp).ok_or_else(|| {
            WamdError::from(SyncError::malformed("unknown actions cannot be encoded"))
        })?;
        let index_json = serde_json::to_vec(&index)
            .map_err(|err| SyncError::malformed(format!("index encoding failed: {err}")))?;
        let plaintext = SyncActionData {
            index: Some(index_json.clone()),
            value: Some(value),
            padding: Some(Vec::new()),
            version: Some(version),
        }
        .encode_to_vec();

        let mut iv = [0u8; IV_LENGTH];
        OsRng.fill_bytes(&mut iv);
        let mut content = iv.to_vec();
        content.extend(aes_cbc_encrypt(&keys.value_encryption, &iv, &plaintext)?);
        let value_mac = generate_content_mac(operation, &content, key_id, &keys.value_mac)?;
        content.extend_from_slice(&value_mac);

        Ok(SyncdRecord {
            index: Some(SyncdIndex {
                blob: Some(generate_index_mac(&index_json, &keys.index)?.to_vec()),
            }),
            value: Some(SyncdValue {
                blob: Some(content),
            }),
            key_id: Some(KeyId {
                id: Some(key_id.to_vec()),
            }),
        })
    }

    /// Build the next patch for a collection and the state it leads to
    ///
    /// The returned state must only be persisted once the server accepts
    /// the patch.
    pub fn encode_patch(
        &self,
        state: &LtHashState,
        key_id: &[u8],
        name: PatchName,
        actions: &[(SyncdOperation, SyncAction)],
        timestamp: Timestamp,
    ) -> Result<(SyncdPatch, LtHashState)> {
        let keys = self.keys.get(key_id)?;
        let mutations = actions
            .iter()
            .map(|(operation, action)| {
                Ok(SyncdMutation {
                    operation: Some(*operation as i32),
                    record: Some(self.encode_record(*operation, action, key_id, timestamp)?),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut next = state.clone();
        next.update_hash(&mutations)?;
        next.version = state.version + 1;

        let snapshot_mac = next.snapshot_mac(name, &keys.snapshot_mac)?;
        let value_macs = mutations
            .iter()
            .filter_map(|mutation| mutation.record.as_ref())
            .map(value_mac_of)
            .collect::<std::result::Result<Vec<_>, SyncError>>()?;
        let patch_mac =
            generate_patch_mac(&snapshot_mac, &value_macs, next.version, name, &keys.patch_mac)?;

        let patch = SyncdPatch {
            version: Some(SyncdVersion {
                version: Some(next.version),
            }),
            mutations,
            external_mutations: None,
            snapshot_mac: Some(snapshot_mac.to_vec()),
            patch_mac: Some(patch_mac.to_vec()),
            key_id: Some(KeyId {
                id: Some(key_id.to_vec()),
            }),
        };
        Ok((patch, next))
    }

    /// Full snapshot of a collection holding `actions`
    pub fn encode_snapshot(
        &self,
        key_id: &[u8],
        name: PatchName,
        version: u64,
        actions: &[SyncAction],
        timestamp: Timestamp,
    ) -> Result<SyncdSnapshot> {
        let keys = self.keys.get(key_id)?;
        let records = actions
            .iter()
            .map(|action| self.encode_record(SyncdOperation::Set, action, key_id, timestamp))
            .collect::<Result<Vec<_>>>()?;
        let mut state = LtHashState {
            version,
            ..LtHashState::default()
        };
        let as_sets: Vec<SyncdMutation> = records
            .iter()
            .map(|record| SyncdMutation {
                operation: Some(SyncdOperation::Set as i32),
                record: Some(record.clone()),
            })
            .collect();
        state.update_hash(&as_sets)?;
        Ok(SyncdSnapshot {
            version: Some(SyncdVersion {
                version: Some(version),
            }),
            records,
            mac: Some(state.snapshot_mac(name, &keys.snapshot_mac)?.to_vec()),
            key_id: Some(KeyId {
                id: Some(key_id.to_vec()),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jid::Jid;

    const KEY_ID: &[u8] = b"\x00\x00\x00\x01";

    fn ring() -> KeyRing {
        let mut ring = KeyRing::new();
        ring.insert(KEY_ID, &[5u8; 32]).unwrap();
        ring
    }

    fn pin(user: &str, pinned: bool) -> (SyncdOperation, SyncAction) {
        (
            SyncdOperation::Set,
            SyncAction::Pin {
                chat: Jid::parse(&format!("{user}@s.whatsapp.net")).unwrap(),
                pinned,
            },
        )
    }

    #[test]
    fn test_encoded_patch_decodes_to_same_state() {
        let ring = ring();
        let base = LtHashState::new();
        let (patch, pushed) = PatchEncoder::new(&ring)
            .encode_patch(
                &base,
                KEY_ID,
                PatchName::RegularLow,
                &[pin("1555", true), pin("1666", false)],
                Timestamp::new(1_000),
            )
            .unwrap();

        let (pulled, mutations) = PatchDecoder::new(&ring, true)
            .decode_patch(PatchName::RegularLow, &base, &patch)
            .unwrap();
        assert_eq!(pulled, pushed);
        assert_eq!(pulled.version, 1);
        assert_eq!(mutations.len(), 2);
        assert_eq!(mutations[0].action, pin("1555", true).1);
        assert_eq!(mutations[0].timestamp, Some(Timestamp::new(1_000)));
    }

    #[test]
    fn test_tampered_patch_mac_rejected() {
        let ring = ring();
        let base = LtHashState::new();
        let (mut patch, _) = PatchEncoder::new(&ring)
            .encode_patch(&base, KEY_ID, PatchName::Regular, &[pin("1555", true)], Timestamp::new(1))
            .unwrap();
        if let Some(mac) = patch.patch_mac.as_mut() {
            mac[0] ^= 0xFF;
        }
        let before = base.clone();
        let err = PatchDecoder::new(&ring, true)
            .decode_patch(PatchName::Regular, &base, &patch)
            .unwrap_err();
        assert!(err.is_sync_integrity_failure());
        assert_eq!(base, before);
    }

    #[test]
    fn test_tampered_value_rejected() {
        let ring = ring();
        let (mut patch, _) = PatchEncoder::new(&ring)
            .encode_patch(
                &LtHashState::new(),
                KEY_ID,
                PatchName::Regular,
                &[pin("1555", true)],
                Timestamp::new(1),
            )
            .unwrap();
        let blob = patch.mutations[0]
            .record
            .as_mut()
            .and_then(|record| record.value.as_mut())
            .and_then(|value| value.blob.as_mut())
            .unwrap();
        blob[20] ^= 1;
        let err = PatchDecoder::new(&ring, false)
            .decode_patch(PatchName::Regular, &LtHashState::new(), &patch)
            .unwrap_err();
        assert!(matches!(err, WamdError::Sync(SyncError::InvalidValueMac { .. })));
    }

    #[test]
    fn test_stale_patch_skipped() {
        let ring = ring();
        let encoder = PatchEncoder::new(&ring);
        let base = LtHashState::new();
        let (first, after_first) = encoder
            .encode_patch(&base, KEY_ID, PatchName::Regular, &[pin("1555", true)], Timestamp::new(1))
            .unwrap();
        // built from the same base, so it declares version 1 again
        let (replay, _) = encoder
            .encode_patch(&base, KEY_ID, PatchName::Regular, &[pin("1666", true)], Timestamp::new(2))
            .unwrap();

        let (state, mutations) = PatchDecoder::new(&ring, true)
            .decode_patches(PatchName::Regular, &base, &[first, replay])
            .unwrap();
        assert_eq!(state, after_first);
        assert_eq!(mutations.len(), 1);
        assert_eq!(mutations[0].action, pin("1555", true).1);
    }

    #[test]
    fn test_snapshot_then_patch() {
        let ring = ring();
        let encoder = PatchEncoder::new(&ring);
        let snapshot = encoder
            .encode_snapshot(
                KEY_ID,
                PatchName::RegularHigh,
                7,
                &[pin("1555", true).1, pin("1666", true).1],
                Timestamp::new(1),
            )
            .unwrap();
        let decoder = PatchDecoder::new(&ring, true);
        let (state, records) = decoder
            .decode_snapshot(PatchName::RegularHigh, &snapshot)
            .unwrap();
        assert_eq!(state.version, 7);
        assert_eq!(records.len(), 2);
        assert_eq!(state.index_value_map.len(), 2);

        // unpinning overwrites the same index
        let (patch, _) = encoder
            .encode_patch(
                &state,
                KEY_ID,
                PatchName::RegularHigh,
                &[pin("1555", false)],
                Timestamp::new(2),
            )
            .unwrap();
        let (next, _) = decoder
            .decode_patch(PatchName::RegularHigh, &state, &patch)
            .unwrap();
        assert_eq!(next.version, 8);
        assert_eq!(next.index_value_map.len(), 2);

        let mut forged = snapshot.clone();
        forged.mac = Some(vec![0u8; 32]);
        assert!(decoder
            .decode_snapshot(PatchName::RegularHigh, &forged)
            .unwrap_err()
            .is_sync_integrity_failure());
    }

    #[test]
    fn test_missing_key_is_reported() {
        let ring = ring();
        let (patch, _) = PatchEncoder::new(&ring)
            .encode_patch(
                &LtHashState::new(),
                KEY_ID,
                PatchName::Regular,
                &[pin("1555", true)],
                Timestamp::new(1),
            )
            .unwrap();
        assert_eq!(required_key_ids(None, &[patch.clone()]), vec![KEY_ID.to_vec()]);
        let empty = KeyRing::new();
        let err = PatchDecoder::new(&empty, true)
            .decode_patch(PatchName::Regular, &LtHashState::new(), &patch)
            .unwrap_err();
        assert!(matches!(err, WamdError::Sync(SyncError::MissingKey { .. })));
    }
}
