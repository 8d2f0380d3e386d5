//! Addresses that key sessions and sender-key states in the store

use core::fmt;
use serde::{Deserialize, Serialize};

/// A pairwise session address: `user[_agent]` plus device id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalAddress {
    name: String,
    device_id: u32,
}

impl SignalAddress {
    pub fn new<N: Into<String>>(name: N, device_id: u32) -> Self {
        Self {
            name: name.into(),
            device_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }
}

impl fmt::Display for SignalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.device_id)
    }
}

/// Sender-key state key: one per (group, sending device)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SenderKeyName {
    group_id: String,
    sender: SignalAddress,
}

impl SenderKeyName {
    pub fn new<G: Into<String>>(group_id: G, sender: SignalAddress) -> Self {
        Self {
            group_id: group_id.into(),
            sender,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn sender(&self) -> &SignalAddress {
        &self.sender
    }
}

impl fmt::Display for SenderKeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.group_id, self.sender)
    }
}
