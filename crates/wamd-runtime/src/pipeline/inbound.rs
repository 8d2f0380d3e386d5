//! Inbound `message` stanzas
//!
//! Every stanza is acknowledged, and chat messages get a receipt, whether or
//! not decoding succeeded. Decryption and attribution of one stanza happen
//! under the pipeline's ratchet lock; listener dispatch and follow-up work
//! (protocol messages, poll votes) happen after it is released.

use prost::Message as _;
use tracing::{debug, warn};
use wamd_core::proto::{DeviceSentMessage, Message, SenderKeyDistributionMessage};
use wamd_core::signal::{unpad_message, Envelope, EnvelopeKind, SenderKeyName};
use wamd_core::{Jid, Node, Result, Timestamp, WamdError};

use super::receipts::{ack, receipt, ReceiptKind};
use super::{Attribution, MessagePipeline};
use crate::events::Event;
use crate::failure::FailureLocation;
use crate::store::MessageRecord;

/// Attributes shared by every message stanza
#[derive(Debug, Clone)]
pub(crate) struct StanzaHeader {
    pub id: String,
    pub from: Jid,
    pub participant: Option<Jid>,
    pub recipient: Option<Jid>,
    pub timestamp: Timestamp,
    pub push_name: Option<String>,
}

impl StanzaHeader {
    pub fn parse(node: &Node, received_at: Timestamp) -> Result<Self> {
        let id = node
            .attr_str("id")
            .ok_or_else(|| WamdError::protocol("message without id"))?
            .into_owned();
        let from = node
            .attr_jid("from")?
            .ok_or_else(|| WamdError::protocol(format!("message {id} without sender")))?;
        Ok(Self {
            participant: node.attr_jid("participant")?,
            recipient: node.attr_jid("recipient")?,
            timestamp: node
                .attr_u64("t")
                .map_or(received_at, Timestamp::from_secs),
            push_name: node.attr_str("notify").map(|name| name.into_owned()),
            id,
            from,
        })
    }
}

/// Resolve chat, sending device and direction from the stanza addressing
pub(crate) fn attribute(node: &Node, header: &StanzaHeader, self_jid: &Jid) -> Result<Attribution> {
    let from = &header.from;
    let (chat, sender) = if from.is_bot() {
        let meta = node.child("meta");
        let target = |key: &str| -> Result<Option<Jid>> {
            Ok(match meta {
                Some(meta) => meta.attr_jid(key)?,
                None => None,
            })
        };
        let chat = target("target_chat_jid")?.unwrap_or_else(|| from.to_user_jid());
        let sender = target("target_sender_jid")?.unwrap_or_else(|| from.clone());
        (chat, sender)
    } else if from.is_group() || from.is_broadcast() {
        let participant = header.participant.clone().ok_or_else(|| {
            WamdError::protocol(format!("message {} from {from} without participant", header.id))
        })?;
        (from.clone(), participant)
    } else if from.is_newsletter() {
        (from.clone(), from.clone())
    } else {
        let chat = header.recipient.as_ref().unwrap_or(from).to_user_jid();
        (chat, from.clone())
    };
    let from_me = sender.same_user(self_jid);
    Ok(Attribution {
        chat,
        sender,
        from_me,
    })
}

/// Protocol messages and poll votes change other records; they are never
/// filed as chat messages themselves
pub(super) fn is_storable(message: &Message) -> bool {
    message.protocol_message.is_none() && message.poll_update_message.is_none()
}

impl MessagePipeline {
    /// Decode one inbound `message` stanza
    pub async fn decode(&self, node: &Node) -> Result<()> {
        let parsed = StanzaHeader::parse(node, self.services.clock.now()).and_then(|header| {
            let attribution = attribute(node, &header, self.self_jid())?;
            Ok((header, attribution))
        });
        let (header, attribution) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                self.send_ack(node).await;
                return Err(err);
            }
        };

        if header.from.is_newsletter() && node.child("reaction").is_some() {
            self.newsletter_reaction(node, &header);
            self.send_ack(node).await;
            return Ok(());
        }

        let receipt_kind = match self.decode_chat_message(node, &header, attribution.clone()).await {
            Ok(decoded) if decoded.from_me => ReceiptKind::Sender,
            Ok(_) => ReceiptKind::Delivery,
            Err(err) => self.undecryptable(&header, &attribution, &err).await,
        };

        self.send_ack(node).await;
        if !header.from.is_newsletter() {
            self.send_receipt(&header, &attribution, receipt_kind).await;
        }
        Ok(())
    }

    async fn decode_chat_message(
        &self,
        node: &Node,
        header: &StanzaHeader,
        mut attribution: Attribution,
    ) -> Result<Attribution> {
        let mut events = Vec::new();
        let content = {
            let _ratchet = self.ratchet_lock.lock().await;
            let content = if node.child("unavailable").is_some() {
                None
            } else if let Some(plaintext) = node.child("plaintext") {
                Some(Message::decode(plaintext.content_bytes().unwrap_or_default())?)
            } else {
                self.decrypt_envelopes(node, &mut attribution).await?
            };
            self.save(header, &attribution, content.as_ref(), &mut events);
            content
        };
        for event in events {
            self.services.emit(event);
        }

        if let Some(message) = content {
            self.follow_up(header, &attribution, &message).await;
        }
        Ok(attribution)
    }

    /// Decrypt every `enc` child in order; the last one with real content
    /// wins
    async fn decrypt_envelopes(&self, node: &Node, attribution: &mut Attribution) -> Result<Option<Message>> {
        let mut content = None;
        for enc in node.children_by_tag("enc") {
            let kind: EnvelopeKind = enc
                .attr_str("type")
                .ok_or_else(|| WamdError::protocol("enc without type"))?
                .parse()?;
            let ciphertext = enc
                .content_bytes()
                .ok_or_else(|| WamdError::protocol("enc without payload"))?;
            let padded = match kind {
                EnvelopeKind::SkMsg => {
                    let name = SenderKeyName::new(
                        attribution.chat.to_string(),
                        attribution.sender.signal_address(),
                    );
                    self.cipher.group_decrypt(&name, ciphertext).await?
                }
                EnvelopeKind::Msg | EnvelopeKind::PkMsg => {
                    let envelope = Envelope::new(kind, ciphertext.to_vec());
                    self.cipher
                        .decrypt_from_device(&attribution.sender.signal_address(), &envelope)
                        .await?
                }
            };
            let mut message = Message::decode(unpad_message(&padded)?)?;

            if let Some(distribution) = &message.sender_key_distribution_message {
                self.process_distribution(distribution, attribution).await?;
            }
            if attribution.from_me {
                if let Some(sent) = message.device_sent_message.take() {
                    message = unwrap_device_sent(sent, attribution)?;
                }
            }
            if !message.is_key_distribution_only() {
                content = Some(message);
            }
        }
        Ok(content)
    }

    async fn process_distribution(
        &self,
        distribution: &SenderKeyDistributionMessage,
        attribution: &Attribution,
    ) -> Result<()> {
        let Some(bytes) = distribution.axolotl_sender_key_distribution_message.as_deref() else {
            return Err(WamdError::protocol("sender key distribution without key"));
        };
        let group = distribution
            .group_id
            .clone()
            .unwrap_or_else(|| attribution.chat.to_string());
        let name = SenderKeyName::new(group, attribution.sender.signal_address());
        self.cipher.process_incoming_distribution(&name, bytes).await
    }

    /// File the message into the store; runs under the ratchet lock
    fn save(
        &self,
        header: &StanzaHeader,
        attribution: &Attribution,
        content: Option<&Message>,
        events: &mut Vec<Event>,
    ) {
        if content.is_some_and(|message| !is_storable(message)) {
            return;
        }
        let store = &self.services.store;
        if !attribution.from_me && attribution.sender.is_user() {
            if store.ensure_contact(&attribution.sender) {
                events.push(Event::ContactCreated {
                    jid: attribution.sender.to_user_jid(),
                });
            }
            if let Some(name) = &header.push_name {
                store.update_contact(&attribution.sender, |contact| {
                    contact.push_name = Some(name.clone());
                });
            }
        }
        if store.ensure_chat(&attribution.chat) {
            events.push(Event::ChatCreated {
                chat: attribution.chat.to_user_jid(),
            });
        }

        let record = MessageRecord {
            id: header.id.clone(),
            chat: attribution.chat.to_user_jid(),
            sender: attribution.sender.clone(),
            from_me: attribution.from_me,
            timestamp: header.timestamp,
            message: content.cloned(),
            push_name: header.push_name.clone(),
            starred: false,
        };
        if store.add_message(record.clone()) {
            if !attribution.from_me {
                store.update_chat(&attribution.chat, |chat| chat.unread_count += 1);
            }
            events.push(Event::NewMessage { record });
        } else {
            debug!(id = %header.id, "Duplicate message ignored");
        }
    }

    async fn follow_up(&self, header: &StanzaHeader, attribution: &Attribution, message: &Message) {
        let result = if let Some(protocol) = &message.protocol_message {
            self.handle_protocol_message(attribution, protocol).await
        } else if let Some(update) = &message.poll_update_message {
            self.handle_poll_update(attribution, update).await
        } else {
            Ok(())
        };
        if let Err(err) = result {
            warn!(id = %header.id, error = %err, "Follow-up of message failed");
            self.services.failures.report(FailureLocation::Message, &err).await;
        }
    }

    /// Report a stanza that could not be decoded and pick the receipt to send
    async fn undecryptable(&self, header: &StanzaHeader, attribution: &Attribution, err: &WamdError) -> ReceiptKind {
        warn!(id = %header.id, from = %header.from, error = %err, "Could not decode message");
        self.services.failures.report(FailureLocation::Message, err).await;
        self.services.emit(Event::UndecryptableMessage {
            chat: attribution.chat.to_user_jid(),
            sender: attribution.sender.clone(),
            id: header.id.clone(),
            reason: err.to_string(),
        });

        if !self.config.send_retry_receipts || !err.is_crypto_failure() {
            return ReceiptKind::Delivery;
        }
        match self.cipher.store().local_registration_id().await {
            Ok(registration_id) => ReceiptKind::Retry {
                registration_id,
                count: 1,
            },
            Err(err) => {
                warn!(error = %err, "No registration id for retry receipt");
                ReceiptKind::Delivery
            }
        }
    }

    fn newsletter_reaction(&self, node: &Node, header: &StanzaHeader) {
        let Some(reaction) = node.child("reaction") else {
            return;
        };
        let message_id = node
            .attr_str("server_id")
            .map_or_else(|| header.id.clone(), |id| id.into_owned());
        self.services.emit(Event::NewsletterReaction {
            newsletter: header.from.clone(),
            message_id,
            reaction: reaction.attr_str("code").unwrap_or_default().into_owned(),
            count: reaction.attr_u64("count").unwrap_or(1),
        });
    }

    async fn send_ack(&self, node: &Node) {
        if let Err(err) = self.services.send_no_response("message ack", ack(node)).await {
            warn!(error = %err, "Could not acknowledge message");
        }
    }

    async fn send_receipt(&self, header: &StanzaHeader, attribution: &Attribution, kind: ReceiptKind) {
        let participant = header.participant.as_ref();
        let node = receipt(&header.id, &header.from, participant, header.timestamp, kind);
        if let Err(err) = self.services.send_no_response("message receipt", node).await {
            warn!(id = %header.id, chat = %attribution.chat, error = %err, "Could not send receipt");
        }
    }
}

/// Open a copy of our own outgoing message relayed to this device
fn unwrap_device_sent(sent: DeviceSentMessage, attribution: &mut Attribution) -> Result<Message> {
    if let Some(destination) = sent.destination_jid.as_deref() {
        attribution.chat = Jid::parse(destination)?.to_user_jid();
    }
    let bytes = sent
        .message
        .ok_or_else(|| WamdError::protocol("device sent message without content"))?;
    Ok(Message::decode(bytes.as_slice())?)
}
