//! Events fanned out to listeners

use wamd_core::appstate::{Mutation, PatchName, SyncAction};
use wamd_core::history::SyncTrack;
use wamd_core::Jid;

use crate::store::MessageRecord;

/// Everything a listener can observe
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    NewMessage {
        record: MessageRecord,
    },
    MessageDeleted {
        chat: Jid,
        id: String,
        /// Revoked for everyone rather than deleted locally
        everyone: bool,
    },
    ChatCreated {
        chat: Jid,
    },
    ContactCreated {
        jid: Jid,
    },
    HistorySyncProgress {
        track: SyncTrack,
        chunk: u32,
        progress: u32,
    },
    HistorySyncTrackComplete {
        track: SyncTrack,
        /// Completed by the inactivity timer rather than the last chunk
        forced: bool,
    },
    ChatHistoryComplete {
        chat: Jid,
    },
    AppStateAction {
        mutation: Mutation,
    },
    Setting {
        action: SyncAction,
    },
    FeatureFlags {
        flags: Vec<String>,
    },
    UndecryptableMessage {
        chat: Jid,
        sender: Jid,
        id: String,
        reason: String,
    },
    NewsletterReaction {
        newsletter: Jid,
        message_id: String,
        reaction: String,
        count: u64,
    },
    PollVote {
        chat: Jid,
        poll_id: String,
        voter: Jid,
        selected: Vec<String>,
    },
    AppStateSyncComplete {
        collections: Vec<PatchName>,
    },
    EphemeralSettingChanged {
        chat: Jid,
        expiration: u32,
    },
}

impl Event {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Event::NewMessage { .. } => "new_message",
            Event::MessageDeleted { .. } => "message_deleted",
            Event::ChatCreated { .. } => "chat_created",
            Event::ContactCreated { .. } => "contact_created",
            Event::HistorySyncProgress { .. } => "history_sync_progress",
            Event::HistorySyncTrackComplete { .. } => "history_sync_track_complete",
            Event::ChatHistoryComplete { .. } => "chat_history_complete",
            Event::AppStateAction { .. } => "app_state_action",
            Event::Setting { .. } => "setting",
            Event::FeatureFlags { .. } => "feature_flags",
            Event::UndecryptableMessage { .. } => "undecryptable_message",
            Event::NewsletterReaction { .. } => "newsletter_reaction",
            Event::PollVote { .. } => "poll_vote",
            Event::AppStateSyncComplete { .. } => "app_state_sync_complete",
            Event::EphemeralSettingChanged { .. } => "ephemeral_setting_changed",
        }
    }
}
