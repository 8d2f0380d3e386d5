//! Polls: creation, casting votes and opening received votes

use rand_core::{OsRng, RngCore};
use tracing::debug;
use wamd_core::poll::{decrypt_vote, encrypt_vote, option_hash, selected_option_names, VoteContext};
use wamd_core::proto::{
    Message, MessageContextInfo, MessageKey, PollCreationMessage, PollOption, PollUpdateMessage,
};
use wamd_core::{Jid, Result, WamdError};

use super::{Attribution, MessagePipeline};
use crate::events::Event;
use crate::store::MessageRecord;

const POLL_SECRET_LENGTH: usize = 32;

/// A new poll carrying a fresh vote secret
pub fn poll_creation(name: &str, options: &[&str], selectable_options_count: u32) -> Message {
    let mut secret = vec![0u8; POLL_SECRET_LENGTH];
    OsRng.fill_bytes(&mut secret);
    Message {
        poll_creation_message: Some(PollCreationMessage {
            enc_key: Some(secret.clone()),
            name: Some(name.to_owned()),
            options: options
                .iter()
                .map(|option| PollOption {
                    option_name: Some((*option).to_owned()),
                })
                .collect(),
            selectable_options_count: Some(selectable_options_count),
        }),
        message_context_info: Some(MessageContextInfo {
            device_list_metadata_version: None,
            message_secret: Some(secret),
        }),
        ..Default::default()
    }
}

/// The poll and its vote secret, if `message` is a poll
fn poll_parts(message: &Message) -> Option<(&PollCreationMessage, &[u8])> {
    let creation = message.poll_creation_message.as_ref()?;
    let secret = creation.enc_key.as_deref().or_else(|| {
        message
            .message_context_info
            .as_ref()
            .and_then(|info| info.message_secret.as_deref())
    })?;
    Some((creation, secret))
}

impl MessagePipeline {
    fn poll_creator(&self, poll: &MessageRecord) -> Jid {
        if poll.from_me {
            self.self_jid().to_user_jid()
        } else {
            poll.sender.to_user_jid()
        }
    }

    /// Encrypt our vote for `poll`; `selected` names options of the poll
    pub fn attribute_poll_update_message(&self, poll: &MessageRecord, selected: &[&str]) -> Result<Message> {
        let (creation, secret) = poll
            .message
            .as_ref()
            .and_then(poll_parts)
            .ok_or_else(|| WamdError::protocol(format!("message {} is not a poll", poll.id)))?;
        let known: Vec<&str> = creation
            .options
            .iter()
            .filter_map(|option| option.option_name.as_deref())
            .collect();
        if let Some(unknown) = selected.iter().find(|name| !known.contains(*name)) {
            return Err(WamdError::protocol(format!("poll {} has no option {unknown:?}", poll.id)));
        }

        let creator = self.poll_creator(poll);
        let context = VoteContext {
            poll_id: &poll.id,
            poll_creator: &creator,
            voter: self.self_jid(),
        };
        let hashes: Vec<Vec<u8>> = selected.iter().map(|name| option_hash(name).to_vec()).collect();
        let vote = encrypt_vote(&hashes, secret, &context)?;

        let participant = (poll.chat.is_group() && !poll.from_me).then(|| poll.sender.to_user_jid().to_string());
        Ok(Message {
            poll_update_message: Some(PollUpdateMessage {
                poll_creation_message_key: Some(MessageKey {
                    remote_jid: Some(poll.chat.to_string()),
                    from_me: Some(poll.from_me),
                    id: Some(poll.id.clone()),
                    participant,
                }),
                vote: Some(vote),
                sender_timestamp_ms: i64::try_from(self.services.clock.now().as_millis()).ok(),
            }),
            ..Default::default()
        })
    }

    /// Open a received vote and report the voter's current selection
    pub(crate) async fn handle_poll_update(&self, attribution: &Attribution, update: &PollUpdateMessage) -> Result<()> {
        let Some(poll_id) = update
            .poll_creation_message_key
            .as_ref()
            .and_then(|key| key.id.as_deref())
        else {
            debug!(chat = %attribution.chat, "Poll vote without poll reference dropped");
            return Ok(());
        };
        let Some(poll) = self.services.store.find_message(&attribution.chat, poll_id) else {
            debug!(chat = %attribution.chat, poll_id, "Vote for unknown poll dropped");
            return Ok(());
        };
        let Some((creation, secret)) = poll.message.as_ref().and_then(poll_parts) else {
            debug!(chat = %attribution.chat, poll_id, "Vote references a message that is not a poll");
            return Ok(());
        };
        let vote = update
            .vote
            .as_ref()
            .ok_or_else(|| WamdError::protocol(format!("vote for poll {poll_id} without payload")))?;

        let creator = self.poll_creator(&poll);
        let voter = if attribution.from_me {
            self.self_jid().to_user_jid()
        } else {
            attribution.sender.to_user_jid()
        };
        let context = VoteContext {
            poll_id,
            poll_creator: &creator,
            voter: &voter,
        };
        let decrypted = decrypt_vote(vote, secret, &context)?;
        let selected = selected_option_names(creation, &decrypted);
        debug!(poll_id, voter = %voter, options = selected.len(), "Poll vote");

        self.services.emit(Event::PollVote {
            chat: attribution.chat.to_user_jid(),
            poll_id: poll_id.to_owned(),
            voter,
            selected,
        });
        Ok(())
    }
}
