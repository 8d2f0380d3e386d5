//! App-state key expansion

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::hkdf_sha256;
use crate::errors::{CryptographicError, SyncError};

// ----------------------------------------------------------------------------
// Collections
// ----------------------------------------------------------------------------

/// App-state collections, each with its own version and LT-hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PatchName {
    CriticalBlock,
    CriticalUnblockLow,
    RegularHigh,
    RegularLow,
    Regular,
}

impl PatchName {
    pub const ALL: [PatchName; 5] = [
        PatchName::CriticalBlock,
        PatchName::CriticalUnblockLow,
        PatchName::RegularHigh,
        PatchName::RegularLow,
        PatchName::Regular,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatchName::CriticalBlock => "critical_block",
            PatchName::CriticalUnblockLow => "critical_unblock_low",
            PatchName::RegularHigh => "regular_high",
            PatchName::RegularLow => "regular_low",
            PatchName::Regular => "regular",
        }
    }
}

impl fmt::Display for PatchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatchName {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        PatchName::ALL
            .into_iter()
            .find(|name| name.as_str() == value)
            .ok_or_else(|| SyncError::malformed(format!("unknown collection {value}")))
    }
}

// ----------------------------------------------------------------------------
// Expanded Keys
// ----------------------------------------------------------------------------

/// The five sub-keys derived from one app-state sync key
#[derive(Clone)]
pub struct ExpandedAppStateKeys {
    pub index: [u8; 32],
    pub value_encryption: [u8; 32],
    pub value_mac: [u8; 32],
    pub snapshot_mac: [u8; 32],
    pub patch_mac: [u8; 32],
}

impl ExpandedAppStateKeys {
    pub fn expand(key_data: &[u8]) -> Result<Self, CryptographicError> {
        let okm = hkdf_sha256(None, key_data, b"WhatsApp Mutation Keys", 160)?;
        let slice = |index: usize| {
            let mut key = [0u8; 32];
            key.copy_from_slice(&okm[index * 32..(index + 1) * 32]);
            key
        };
        Ok(Self {
            index: slice(0),
            value_encryption: slice(1),
            value_mac: slice(2),
            snapshot_mac: slice(3),
            patch_mac: slice(4),
        })
    }
}

impl fmt::Debug for ExpandedAppStateKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExpandedAppStateKeys(..)")
    }
}

/// Expanded keys by key id, loaded before a batch is decoded
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: HashMap<Vec<u8>, ExpandedAppStateKeys>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key_id: &[u8], key_data: &[u8]) -> Result<(), CryptographicError> {
        self.keys
            .insert(key_id.to_vec(), ExpandedAppStateKeys::expand(key_data)?);
        Ok(())
    }

    pub fn contains(&self, key_id: &[u8]) -> bool {
        self.keys.contains_key(key_id)
    }

    pub fn get(&self, key_id: &[u8]) -> Result<&ExpandedAppStateKeys, SyncError> {
        self.keys.get(key_id).ok_or_else(|| SyncError::MissingKey {
            key_id: hex::encode(key_id),
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
