//! Per-collection hash state

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::keys::PatchName;
use super::lthash::{LT_HASH_SIZE, WA_PATCH_INTEGRITY};
use super::mac::{generate_snapshot_mac, index_mac_of, value_mac_of};
use crate::errors::{CryptographicError, SyncError, WamdError};
use crate::proto::{SyncdMutation, SyncdOperation};

/// Version, LT-hash and index-to-value-MAC map of one collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LtHashState {
    pub version: u64,
    pub hash: Vec<u8>,
    pub index_value_map: HashMap<String, Vec<u8>>,
}

impl Default for LtHashState {
    fn default() -> Self {
        Self {
            version: 0,
            hash: vec![0u8; LT_HASH_SIZE],
            index_value_map: HashMap::new(),
        }
    }
}

impl LtHashState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value MAC currently stored for an index MAC
    pub fn value_mac(&self, index_mac: &[u8]) -> Option<&[u8]> {
        self.index_value_map
            .get(&STANDARD.encode(index_mac))
            .map(Vec::as_slice)
    }

    /// Mix a batch of mutations into the hash and the index map
    ///
    /// A mutation's previous value is looked up first among earlier mutations
    /// of the same batch, then in the map as it stood before the batch.
    pub fn update_hash(&mut self, mutations: &[SyncdMutation]) -> Result<(), WamdError> {
        let mut added: Vec<Vec<u8>> = Vec::new();
        let mut removed: Vec<Vec<u8>> = Vec::new();
        let mut changes: Vec<(String, Option<Vec<u8>>)> = Vec::with_capacity(mutations.len());

        for (position, mutation) in mutations.iter().enumerate() {
            let record = mutation
                .record
                .as_ref()
                .ok_or_else(|| SyncError::malformed("mutation without record"))?;
            let operation = operation_of(mutation)?;
            let index_mac = index_mac_of(record)?;
            let value_mac = value_mac_of(record)?;

            if operation == SyncdOperation::Set {
                added.push(value_mac.to_vec());
            }

            match self.previous_value_mac(mutations, position, index_mac)? {
                Some(previous) => removed.push(previous),
                None if operation == SyncdOperation::Remove => {
                    warn!(
                        index_mac = %STANDARD.encode(index_mac),
                        "Removal of an index with no known value"
                    );
                }
                None => {}
            }

            let key = STANDARD.encode(index_mac);
            match operation {
                SyncdOperation::Set => changes.push((key, Some(value_mac.to_vec()))),
                SyncdOperation::Remove => changes.push((key, None)),
            }
        }

        WA_PATCH_INTEGRITY
            .subtract_then_add(&mut self.hash, &removed, &added)
            .map_err(WamdError::from)?;
        for (key, value) in changes {
            match value {
                Some(value_mac) => self.index_value_map.insert(key, value_mac),
                None => self.index_value_map.remove(&key),
            };
        }
        Ok(())
    }

    fn previous_value_mac(
        &self,
        mutations: &[SyncdMutation],
        position: usize,
        index_mac: &[u8],
    ) -> Result<Option<Vec<u8>>, SyncError> {
        for earlier in mutations[..position].iter().rev() {
            let Some(record) = earlier.record.as_ref() else {
                continue;
            };
            if index_mac_of(record)? == index_mac {
                return Ok(Some(value_mac_of(record)?.to_vec()));
            }
        }
        Ok(self.value_mac(index_mac).map(<[u8]>::to_vec))
    }

    pub fn snapshot_mac(&self, name: PatchName, key: &[u8]) -> Result<[u8; 32], CryptographicError> {
        generate_snapshot_mac(&self.hash, self.version, name, key)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

pub(crate) fn operation_of(mutation: &SyncdMutation) -> Result<SyncdOperation, SyncError> {
    let value = mutation.operation.unwrap_or_default();
    SyncdOperation::try_from(value)
        .map_err(|_| SyncError::malformed(format!("unknown mutation operation {value}")))
}
