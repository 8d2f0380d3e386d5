//! Message pipeline
//!
//! Decodes inbound `message` stanzas into store updates and events, and
//! encodes outbound messages into per-device envelopes. Ratchet-sensitive
//! work (decrypt plus attribution, and the encryption phase of a send) runs
//! under a single lock per pipeline so session state never advances out of
//! order; network queries and listener dispatch stay outside it.

mod devices;
mod inbound;
mod outbound;
mod poll;
mod protocol;
pub(crate) mod receipts;

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use wamd_core::config::MessageConfig;
use wamd_core::signal::{SessionCipher, SignalStore};
use wamd_core::Jid;

use crate::appstate::AppStateEngine;
use crate::history::HistorySyncEngine;
use crate::services::RuntimeServices;

pub use devices::DeviceCache;
pub use poll::poll_creation;
pub use receipts::ReceiptKind;

/// Who a decoded message belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    /// User or group JID the message is filed under
    pub chat: Jid,
    /// Sending device
    pub sender: Jid,
    pub from_me: bool,
}

pub struct MessagePipeline {
    config: MessageConfig,
    services: RuntimeServices,
    cipher: SessionCipher<dyn SignalStore>,
    history: Arc<HistorySyncEngine>,
    app_state: Arc<AppStateEngine>,
    devices: DeviceCache,
    group_participants: DashMap<Jid, Vec<Jid>>,
    /// Devices that already hold our sender key, per group
    sender_key_recipients: DashMap<Jid, HashSet<Jid>>,
    ratchet_lock: Mutex<()>,
}

impl MessagePipeline {
    pub fn new(
        config: MessageConfig,
        services: RuntimeServices,
        cipher: SessionCipher<dyn SignalStore>,
        history: Arc<HistorySyncEngine>,
        app_state: Arc<AppStateEngine>,
    ) -> Self {
        let devices = DeviceCache::new(config.max_devices_per_user);
        Self {
            config,
            services,
            cipher,
            history,
            app_state,
            devices,
            group_participants: DashMap::new(),
            sender_key_recipients: DashMap::new(),
            ratchet_lock: Mutex::new(()),
        }
    }

    pub fn cipher(&self) -> &SessionCipher<dyn SignalStore> {
        &self.cipher
    }

    pub fn devices(&self) -> &DeviceCache {
        &self.devices
    }

    /// Forget who holds our sender key for `group`, forcing redistribution
    pub fn reset_sender_key_recipients(&self, group: &Jid) {
        self.sender_key_recipients.remove(group);
        self.group_participants.remove(group);
    }

    fn self_jid(&self) -> &Jid {
        self.services.self_jid()
    }
}
