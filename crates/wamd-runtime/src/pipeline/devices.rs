//! Device lists and session establishment
//!
//! Before fanning a message out, every recipient user is expanded into its
//! device JIDs (usync query, cached) and every device without a Signal
//! session gets one from a fetched pre-key bundle.

use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;
use wamd_core::errors::CryptographicError;
use wamd_core::signal::{PreKeyBundle, PublicKey};
use wamd_core::{Jid, JidServer, Node, Result, WamdError};

use super::MessagePipeline;
use crate::services::response_error;

/// Known device ids per user
#[derive(Debug)]
pub struct DeviceCache {
    devices: DashMap<Jid, Vec<u8>>,
    max_per_user: usize,
}

impl DeviceCache {
    pub fn new(max_per_user: usize) -> Self {
        Self {
            devices: DashMap::new(),
            max_per_user,
        }
    }

    pub fn get(&self, user: &Jid) -> Option<Vec<u8>> {
        self.devices.get(&user.to_user_jid()).map(|ids| ids.clone())
    }

    pub fn insert(&self, user: &Jid, mut ids: Vec<u8>) {
        ids.sort_unstable();
        ids.dedup();
        ids.truncate(self.max_per_user);
        self.devices.insert(user.to_user_jid(), ids);
    }

    pub fn invalidate(&self, user: &Jid) {
        self.devices.remove(&user.to_user_jid());
    }

    /// Device JIDs of `user`, if its list is cached
    pub fn device_jids(&self, user: &Jid) -> Option<Vec<Jid>> {
        let user = user.to_user_jid();
        self.get(&user)
            .map(|ids| ids.into_iter().map(|id| user.with_device(id)).collect())
    }
}

fn read_u32(node: Option<&Node>, field: &str) -> Result<u32> {
    let bytes = node
        .and_then(Node::content_bytes)
        .ok_or_else(|| WamdError::protocol(format!("key bundle without {field}")))?;
    if bytes.is_empty() || bytes.len() > 4 {
        return Err(WamdError::protocol(format!("{field} has {} bytes", bytes.len())));
    }
    Ok(bytes.iter().fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte)))
}

fn read_key(node: Option<&Node>, field: &str) -> Result<PublicKey> {
    let bytes = node
        .and_then(Node::content_bytes)
        .ok_or_else(|| WamdError::protocol(format!("key bundle without {field}")))?;
    Ok(PublicKey::deserialize(bytes)?)
}

/// Parse one `<user>` entry of an `encrypt` key response
pub(crate) fn parse_bundle(user: &Node) -> Result<(Jid, PreKeyBundle)> {
    let jid = user
        .attr_jid("jid")?
        .ok_or_else(|| WamdError::protocol("key bundle without jid"))?;
    let signed = user
        .child("skey")
        .ok_or_else(|| WamdError::protocol("key bundle without signed pre-key"))?;
    let signature = signed
        .child("signature")
        .and_then(Node::content_bytes)
        .ok_or_else(|| CryptographicError::invalid_key("signed pre-key without signature"))?;
    let pre_key = match user.child("key") {
        Some(key) => Some((
            read_u32(key.child("id"), "pre-key id")?,
            read_key(key.child("value"), "pre-key")?,
        )),
        None => None,
    };
    let bundle = PreKeyBundle {
        registration_id: read_u32(user.child("registration"), "registration id")?,
        device_id: u32::from(jid.device()),
        pre_key,
        signed_pre_key_id: read_u32(signed.child("id"), "signed pre-key id")?,
        signed_pre_key: read_key(signed.child("value"), "signed pre-key")?,
        signed_pre_key_signature: signature.to_vec(),
        identity_key: read_key(user.child("identity"), "identity")?,
    };
    Ok((jid, bundle))
}

impl MessagePipeline {
    /// Every device of `users`, querying lists that are not cached; our own
    /// sending device is left out
    pub(crate) async fn device_jids(&self, users: &[Jid]) -> Result<Vec<Jid>> {
        let missing: Vec<Jid> = users
            .iter()
            .map(Jid::to_user_jid)
            .filter(|user| self.devices.get(user).is_none())
            .collect();
        if !missing.is_empty() {
            self.query_devices(&missing).await?;
        }

        let own_device = self.self_jid();
        let mut devices = Vec::new();
        for user in users {
            let jids = self.devices.device_jids(user).unwrap_or_default();
            devices.extend(jids.into_iter().filter(|jid| jid != own_device));
        }
        devices.dedup();
        Ok(devices)
    }

    async fn query_devices(&self, users: &[Jid]) -> Result<()> {
        let request = Node::builder("iq")
            .attr("id", self.services.request_id())
            .attr("xmlns", "usync")
            .attr("type", "get")
            .attr("to", Jid::server_only(JidServer::USER))
            .child(
                Node::builder("usync")
                    .attr("sid", Uuid::new_v4().to_string())
                    .attr("mode", "query")
                    .attr("last", "true")
                    .attr("index", "0")
                    .attr("context", "message")
                    .child(
                        Node::builder("query")
                            .child(Node::builder("devices").attr("version", "2").build())
                            .build(),
                    )
                    .child(
                        Node::builder("list")
                            .children(
                                users
                                    .iter()
                                    .map(|user| Node::builder("user").attr("jid", user).build()),
                            )
                            .build(),
                    )
                    .build(),
            )
            .build();

        let response = self.services.query("device list query", request).await?;
        if let Some(reason) = response_error(&response) {
            return Err(WamdError::protocol(format!("device list query failed: {reason}")));
        }
        let list = response
            .child_path(&["usync", "list"])
            .ok_or_else(|| WamdError::protocol("device list response without list"))?;
        for user in list.children_by_tag("user") {
            let Some(jid) = user.attr_jid("jid")? else {
                continue;
            };
            let ids: Vec<u8> = user
                .child_path(&["devices", "device-list"])
                .into_iter()
                .flat_map(|list| list.children_by_tag("device"))
                .filter_map(|device| device.attr_u64("id"))
                .filter_map(|id| u8::try_from(id).ok())
                .collect();
            debug!(user = %jid, devices = ids.len(), "Fetched device list");
            self.devices.insert(&jid, ids);
        }
        // Users the server did not list have only their primary device
        for user in users {
            if self.devices.get(user).is_none() {
                self.devices.insert(user, vec![0]);
            }
        }
        Ok(())
    }

    /// Open sessions with every device in `devices` that lacks one
    pub(crate) async fn ensure_sessions(&self, devices: &[Jid]) -> Result<()> {
        let mut missing = Vec::new();
        for device in devices {
            if !self.cipher.has_session(&device.signal_address()).await? {
                missing.push(device.clone());
            }
        }
        if missing.is_empty() {
            return Ok(());
        }

        let request = Node::builder("iq")
            .attr("id", self.services.request_id())
            .attr("xmlns", "encrypt")
            .attr("type", "get")
            .attr("to", Jid::server_only(JidServer::USER))
            .child(
                Node::builder("key")
                    .children(
                        missing
                            .iter()
                            .map(|device| Node::builder("user").attr("jid", device).build()),
                    )
                    .build(),
            )
            .build();
        let response = self.services.query("pre-key query", request).await?;
        if let Some(reason) = response_error(&response) {
            return Err(WamdError::protocol(format!("pre-key query failed: {reason}")));
        }
        let list = response
            .child("list")
            .ok_or_else(|| WamdError::protocol("pre-key response without list"))?;
        let mut established = 0usize;
        for user in list.children_by_tag("user") {
            if let Some(reason) = user.child("error").and_then(|error| error.attr_str("text")) {
                warn!(user = ?user.attr_str("jid"), %reason, "Server has no keys for device");
                continue;
            }
            let (jid, bundle) = match parse_bundle(user) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(user = ?user.attr_str("jid"), error = %err, "Skipping malformed key bundle");
                    continue;
                }
            };
            match self.cipher.process_bundle(&jid.signal_address(), &bundle).await {
                Ok(()) => established += 1,
                Err(err) => warn!(device = %jid, error = %err, "Skipping device with unusable key bundle"),
            }
        }
        debug!(requested = missing.len(), established, "Established sessions");
        Ok(())
    }
}
