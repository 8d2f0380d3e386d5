//! Outbound messages
//!
//! Peer chats fan out one envelope per device, with our own devices getting
//! a device-sent copy naming the real destination. Groups encrypt once with
//! our sender key and hand the key itself only to devices that do not hold
//! it yet.

use std::collections::HashSet;

use prost::Message as _;
use tracing::{debug, info, warn};
use wamd_core::proto::{self, DeviceSentMessage, Message};
use wamd_core::signal::{pad_message, Envelope, SenderKeyName};
use wamd_core::{Jid, MessageId, Node, Result, WamdError};

use super::inbound::is_storable;
use super::MessagePipeline;
use crate::events::Event;
use crate::services::response_error;
use crate::store::MessageRecord;

/// A message stanza ready to send plus the devices that receive our sender
/// key with it
struct Outgoing {
    stanza: Node,
    new_key_holders: HashSet<Jid>,
}

fn enc_node(envelope: &Envelope) -> Node {
    Node::builder("enc")
        .attr("v", "2")
        .attr("type", envelope.kind.as_str())
        .bytes(envelope.ciphertext.clone())
        .build()
}

fn message_stanza(
    id: &MessageId,
    to: &Jid,
    message: &Message,
    participants: Vec<Node>,
    group_payload: Option<Node>,
) -> Node {
    let mut builder = Node::builder("message")
        .attr("id", id.as_str())
        .attr("to", to)
        .attr("type", message.kind());
    if !participants.is_empty() {
        builder = builder.child(Node::builder("participants").children(participants).build());
    }
    if let Some(payload) = group_payload {
        builder = builder.child(payload);
    }
    builder.build()
}

impl MessagePipeline {
    /// Encrypt `message` for every device in `chat` and send it
    pub async fn send(&self, chat: &Jid, message: Message) -> Result<MessageId> {
        let id = MessageId::generate();
        let chat = chat.to_user_jid();
        let outgoing = if chat.is_group() {
            self.group_stanza(&id, &chat, &message).await?
        } else {
            self.peer_stanza(&id, &chat, &message).await?
        };

        let response = self.services.query("message send", outgoing.stanza).await?;
        if let Some(reason) = response_error(&response) {
            return Err(WamdError::protocol(format!("message {} rejected: {reason}", id.as_str())));
        }
        if !outgoing.new_key_holders.is_empty() {
            self.sender_key_recipients
                .entry(chat.clone())
                .or_default()
                .extend(outgoing.new_key_holders);
        }
        info!(id = id.as_str(), %chat, kind = message.kind(), "Message sent");

        if is_storable(&message) {
            self.record_outgoing(&id, &chat, message);
        }
        Ok(id)
    }

    fn record_outgoing(&self, id: &MessageId, chat: &Jid, message: Message) {
        let store = &self.services.store;
        if store.ensure_chat(chat) {
            self.services.emit(Event::ChatCreated { chat: chat.clone() });
        }
        let record = MessageRecord {
            id: id.as_str().to_owned(),
            chat: chat.clone(),
            sender: self.self_jid().clone(),
            from_me: true,
            timestamp: self.services.clock.now(),
            message: Some(message),
            push_name: store.push_name(),
            starred: false,
        };
        if store.add_message(record.clone()) {
            self.services.emit(Event::NewMessage { record });
        }
    }

    async fn peer_stanza(&self, id: &MessageId, chat: &Jid, message: &Message) -> Result<Outgoing> {
        let own_user = self.self_jid().to_user_jid();
        let devices = self.device_jids(&[chat.clone(), own_user.clone()]).await?;
        self.ensure_sessions(&devices).await?;

        let plaintext = message.encode_to_vec();
        let device_sent = Message {
            device_sent_message: Some(DeviceSentMessage {
                destination_jid: Some(chat.to_string()),
                message: Some(plaintext.clone()),
                phash: None,
            }),
            message_context_info: message.message_context_info.clone(),
            ..Default::default()
        }
        .encode_to_vec();

        let mut participants = Vec::with_capacity(devices.len());
        let mut reached_peer = false;
        {
            let _ratchet = self.ratchet_lock.lock().await;
            for device in &devices {
                let own = device.same_user(&own_user);
                let payload = if own { &device_sent } else { &plaintext };
                let padded = pad_message(payload, self.config.max_padding);
                match self.cipher.encrypt_to_device(&device.signal_address(), &padded).await {
                    Ok(envelope) => {
                        reached_peer |= !own;
                        participants.push(Node::builder("to").attr("jid", device).child(enc_node(&envelope)).build());
                    }
                    Err(err) => warn!(%device, error = %err, "Skipping device without session"),
                }
            }
        }
        if !reached_peer {
            return Err(WamdError::no_session(chat));
        }
        debug!(id = id.as_str(), devices = participants.len(), "Encrypted for peer devices");

        Ok(Outgoing {
            stanza: message_stanza(id, chat, message, participants, None),
            new_key_holders: HashSet::new(),
        })
    }

    async fn group_stanza(&self, id: &MessageId, group: &Jid, message: &Message) -> Result<Outgoing> {
        let members = self.group_participants(group).await?;
        let devices = self.device_jids(&members).await?;
        let holders = self
            .sender_key_recipients
            .get(group)
            .map(|holders| holders.clone())
            .unwrap_or_default();
        let missing: Vec<Jid> = devices
            .into_iter()
            .filter(|device| !holders.contains(device))
            .collect();
        self.ensure_sessions(&missing).await?;

        let name = SenderKeyName::new(group.to_string(), self.self_jid().signal_address());
        let mut participants = Vec::with_capacity(missing.len());
        let mut new_key_holders = HashSet::new();
        let ciphertext = {
            let _ratchet = self.ratchet_lock.lock().await;
            let distribution = self.cipher.create_group_session(&name).await?;
            if !missing.is_empty() {
                let key_message = Message {
                    sender_key_distribution_message: Some(proto::SenderKeyDistributionMessage {
                        group_id: Some(group.to_string()),
                        axolotl_sender_key_distribution_message: Some(distribution.serialized().to_vec()),
                    }),
                    ..Default::default()
                }
                .encode_to_vec();
                for device in &missing {
                    let padded = pad_message(&key_message, self.config.max_padding);
                    match self.cipher.encrypt_to_device(&device.signal_address(), &padded).await {
                        Ok(envelope) => {
                            participants
                                .push(Node::builder("to").attr("jid", device).child(enc_node(&envelope)).build());
                            new_key_holders.insert(device.clone());
                        }
                        Err(err) => warn!(%device, error = %err, "Sender key not distributed to device"),
                    }
                }
            }
            let padded = pad_message(&message.encode_to_vec(), self.config.max_padding);
            self.cipher.group_encrypt(&name, &padded).await?
        };
        debug!(
            id = id.as_str(),
            %group,
            distributed = new_key_holders.len(),
            "Encrypted group message"
        );

        let payload = Node::builder("enc")
            .attr("v", "2")
            .attr("type", "skmsg")
            .bytes(ciphertext)
            .build();
        let stanza = message_stanza(id, group, message, participants, Some(payload));
        Ok(Outgoing {
            stanza,
            new_key_holders,
        })
    }

    /// Members of `group`, queried once and then cached
    async fn group_participants(&self, group: &Jid) -> Result<Vec<Jid>> {
        if let Some(members) = self.group_participants.get(group) {
            return Ok(members.clone());
        }
        let request = Node::builder("iq")
            .attr("id", self.services.request_id())
            .attr("xmlns", "w:g2")
            .attr("type", "get")
            .attr("to", group)
            .child(Node::builder("query").attr("request", "interactive").build())
            .build();
        let response = self.services.query("group metadata query", request).await?;
        if let Some(reason) = response_error(&response) {
            return Err(WamdError::protocol(format!("group {group} metadata failed: {reason}")));
        }
        let metadata = response
            .child("group")
            .ok_or_else(|| WamdError::protocol(format!("group {group} metadata without group")))?;
        let mut members = Vec::new();
        for participant in metadata.children_by_tag("participant") {
            if let Some(jid) = participant.attr_jid("jid")? {
                members.push(jid.to_user_jid());
            }
        }
        self.group_participants.insert(group.clone(), members.clone());
        Ok(members)
    }
}
