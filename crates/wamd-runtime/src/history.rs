//! History sync engine
//!
//! Each history-sync notification refers to one compressed chunk, delivered
//! inline or as an encrypted media blob. Chunks of the recent and full tracks
//! are committed to their progress trackers; the inactivity timer force-completes
//! whatever is still pending when the primary device stops sending.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use dashmap::DashSet;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wamd_core::config::HistorySyncConfig;
use wamd_core::errors::HistoryError;
use wamd_core::history::{
    check_chunk_order, decode_history_payload, sync_type_of, HistorySyncProgressTracker, SyncTrack,
};
use wamd_core::media::decrypt_media;
use wamd_core::proto::{Conversation, HistorySync, HistorySyncNotification, HistorySyncType, WebMessageInfo};
use wamd_core::{Jid, Result, Timestamp};

use crate::events::Event;
use crate::services::{MediaReference, RuntimeServices};
use crate::store::MessageRecord;

// ----------------------------------------------------------------------------
// Tracks
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Track {
    progress: HistorySyncProgressTracker,
    completed: AtomicBool,
}

impl Track {
    fn reset(&self) {
        self.progress.clear();
        self.completed.store(false, Ordering::SeqCst);
    }

    fn has_started(&self) -> bool {
        self.progress.chunk_end() > 0 || !self.progress.committed_chunks().is_empty()
    }
}

// ----------------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------------

pub struct HistorySyncEngine {
    config: HistorySyncConfig,
    services: RuntimeServices,
    recent: Track,
    full: Track,
    pending_chats: DashSet<Jid>,
    /// Chats whose stored history a full sync already replaced in this run
    replaced_chats: DashSet<Jid>,
    timer: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on every arm and cancel; a timer only fires for its own generation
    timer_generation: AtomicU64,
    this: Weak<HistorySyncEngine>,
}

impl HistorySyncEngine {
    pub fn new(config: HistorySyncConfig, services: RuntimeServices) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            services,
            recent: Track::default(),
            full: Track::default(),
            pending_chats: DashSet::new(),
            replaced_chats: DashSet::new(),
            timer: Mutex::new(None),
            timer_generation: AtomicU64::new(0),
            this: this.clone(),
        })
    }

    fn track(&self, track: SyncTrack) -> &Track {
        match track {
            SyncTrack::Recent => &self.recent,
            SyncTrack::Full => &self.full,
        }
    }

    pub fn is_track_done(&self, track: SyncTrack) -> bool {
        self.track(track).progress.is_done()
    }

    /// Chats imported whose history has not been reported complete
    pub fn pending_chats(&self) -> Vec<Jid> {
        self.pending_chats.iter().map(|jid| jid.clone()).collect()
    }

    /// Process one history-sync notification
    pub async fn handle_notification(&self, notification: &HistorySyncNotification) -> Result<()> {
        let declared = notification.sync_type.unwrap_or_default();
        let sync_type = HistorySyncType::try_from(declared)
            .map_err(|_| HistoryError::UnknownSyncType { value: declared })?;
        if !self.config.policy.accepts(sync_type) {
            debug!(?sync_type, policy = ?self.config.policy, "History sync type not imported");
            return Ok(());
        }

        self.schedule_forced_completion();

        let payload = self.fetch_payload(notification).await?;
        let history = decode_history_payload(&payload)?;
        let sync_type = match history.sync_type {
            Some(_) => sync_type_of(&history)?,
            None => sync_type,
        };
        let chunk = notification.chunk_order.or(history.chunk_order).unwrap_or_default();
        let progress = notification.progress.or(history.progress).unwrap_or_default();
        let track = SyncTrack::for_sync_type(sync_type);
        if track.is_some() {
            check_chunk_order(chunk)?;
        }
        debug!(
            ?sync_type,
            chunk,
            progress,
            conversations = history.conversations.len(),
            "Importing history chunk"
        );

        self.import(sync_type, &history);
        if let Some(track) = track {
            self.commit(track, chunk, progress)?;
        }
        Ok(())
    }

    async fn fetch_payload(&self, notification: &HistorySyncNotification) -> Result<Vec<u8>> {
        if let Some(inline) = &notification.initial_hist_bootstrap_inline_payload {
            return Ok(inline.clone());
        }
        let reference = MediaReference::from_history_notification(notification)
            .ok_or(HistoryError::MissingPayload)?;
        let encrypted = self.services.download("history download", &reference).await?;
        Ok(decrypt_media(
            reference.kind,
            &reference.media_key,
            &encrypted,
            reference.file_sha256.as_deref(),
            reference.file_enc_sha256.as_deref(),
        )?)
    }

    // ------------------------------------------------------------------------
    // Import
    // ------------------------------------------------------------------------

    fn import(&self, sync_type: HistorySyncType, history: &HistorySync) {
        match sync_type {
            HistorySyncType::InitialStatusV3 => self.import_status(&history.status_v3_messages),
            HistorySyncType::PushName => self.import_push_names(history),
            HistorySyncType::NonBlockingData => self.import_past_participants(history),
            HistorySyncType::InitialBootstrap | HistorySyncType::Full => {
                for conversation in &history.conversations {
                    self.import_conversation(conversation, true);
                }
            }
            HistorySyncType::Recent | HistorySyncType::OnDemand => {
                for conversation in &history.conversations {
                    self.import_conversation(conversation, false);
                }
            }
        }
    }

    fn import_conversation(&self, conversation: &Conversation, replace: bool) {
        let Some(jid) = conversation.id.as_deref().and_then(|id| Jid::parse(id).ok()) else {
            warn!(id = ?conversation.id, "Skipping conversation with invalid id");
            return;
        };
        let store = &self.services.store;
        if store.ensure_chat(&jid) {
            self.services.emit(Event::ChatCreated { chat: jid.clone() });
        }
        if jid.is_user() && store.ensure_contact(&jid) {
            self.services.emit(Event::ContactCreated { jid: jid.to_user_jid() });
        }

        let self_jid = self.services.self_jid().clone();
        let records: Vec<MessageRecord> = conversation
            .messages
            .iter()
            .filter_map(|entry| entry.message.as_ref())
            .filter_map(|info| web_message_record(info, &jid, &self_jid))
            .collect();
        let finished = conversation.end_of_history_transfer.unwrap_or(false);
        // later chunks of the same run merge into what the first one laid down
        let replace = replace && self.replaced_chats.insert(jid.clone());
        let newest = records.iter().map(|record| record.timestamp).max();

        store.update_chat(&jid, |chat| {
            if replace {
                // messages newer than the backfill arrived live and are kept
                match newest {
                    Some(newest) => chat.messages.retain(|message| message.timestamp > newest),
                    None => chat.messages.clear(),
                }
            }
            if let Some(name) = &conversation.name {
                chat.name = Some(name.clone());
            }
            chat.archived = conversation.archived.unwrap_or(chat.archived);
            chat.pinned = conversation.pinned.map_or(chat.pinned, |pinned| pinned > 0);
            if let Some(end) = conversation.mute_end_time.filter(|end| *end > 0) {
                chat.muted_until = i64::try_from(end).ok();
            }
            chat.read_only = conversation.read_only.unwrap_or(chat.read_only);
            if let Some(expiration) = conversation.ephemeral_expiration {
                chat.ephemeral_expiration = expiration;
                chat.ephemeral_setting_timestamp = conversation
                    .ephemeral_setting_timestamp
                    .unwrap_or(chat.ephemeral_setting_timestamp);
            }
            if let Some(unread) = conversation.unread_count {
                chat.unread_count = unread;
            }
            for record in records {
                chat.insert_message(record);
            }
            chat.history_complete |= finished;
        });

        if finished {
            self.pending_chats.remove(&jid);
            self.services.emit(Event::ChatHistoryComplete { chat: jid });
        } else {
            self.pending_chats.insert(jid);
        }
    }

    fn import_status(&self, messages: &[WebMessageInfo]) {
        let status = Jid::Status;
        if self.services.store.ensure_chat(&status) {
            self.services.emit(Event::ChatCreated { chat: status.clone() });
        }
        let self_jid = self.services.self_jid().clone();
        let mut imported = 0usize;
        for info in messages {
            if let Some(record) = web_message_record(info, &status, &self_jid) {
                imported += usize::from(self.services.store.add_message(record));
            }
        }
        debug!(imported, "Imported status updates");
    }

    fn import_push_names(&self, history: &HistorySync) {
        for entry in &history.pushnames {
            let (Some(id), Some(name)) = (&entry.id, &entry.pushname) else {
                continue;
            };
            let Ok(jid) = Jid::parse(id) else {
                warn!(%id, "Skipping push name with invalid jid");
                continue;
            };
            let created = self.services.store.update_contact(&jid, |contact| {
                contact.push_name = Some(name.clone());
            });
            if created {
                self.services.emit(Event::ContactCreated { jid: jid.to_user_jid() });
            }
        }
        debug!(names = history.pushnames.len(), "Imported push names");
    }

    fn import_past_participants(&self, history: &HistorySync) {
        for group in &history.past_participants {
            let Some(group_jid) = group.group_jid.as_deref().and_then(|id| Jid::parse(id).ok()) else {
                continue;
            };
            let participants: Vec<(Jid, Option<u64>)> = group
                .past_participants
                .iter()
                .filter_map(|participant| {
                    let jid = Jid::parse(participant.user_jid.as_deref()?).ok()?;
                    Some((jid, participant.leave_ts))
                })
                .collect();
            if self.services.store.ensure_chat(&group_jid) {
                self.services.emit(Event::ChatCreated { chat: group_jid.clone() });
            }
            self.services.store.update_chat(&group_jid, |chat| {
                chat.past_participants = participants;
            });
        }
    }

    // ------------------------------------------------------------------------
    // Progress
    // ------------------------------------------------------------------------

    fn commit(&self, track: SyncTrack, chunk: u32, progress: u32) -> Result<()> {
        let state = self.track(track);
        state.progress.commit(chunk, progress == 100)?;
        self.services.emit(Event::HistorySyncProgress { track, chunk, progress });

        if state.progress.is_done() && !state.completed.swap(true, Ordering::SeqCst) {
            info!(?track, chunks = state.progress.chunk_end(), "History sync track complete");
            self.services.emit(Event::HistorySyncTrackComplete { track, forced: false });
            let other = match track {
                SyncTrack::Recent => &self.full,
                SyncTrack::Full => &self.recent,
            };
            if !other.has_started() || other.completed.load(Ordering::SeqCst) {
                self.cancel_timer();
                self.complete_pending_chats();
            }
        }
        Ok(())
    }

    fn complete_pending_chats(&self) {
        let mut chats = self.pending_chats();
        chats.sort_by_key(|jid| jid.to_string());
        for chat in chats {
            self.pending_chats.remove(&chat);
            self.services.store.update_chat(&chat, |chat| chat.history_complete = true);
            self.services.emit(Event::ChatHistoryComplete { chat });
        }
        self.replaced_chats.clear();
    }

    /// Restart the inactivity timer; a pending timer is cancelled
    fn schedule_forced_completion(&self) {
        let mut slot = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = self.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = self.this.clone();
        let timeout = self.config.completion_timeout();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(engine) = this.upgrade() else {
                return;
            };
            {
                let mut slot = engine.timer.lock().unwrap_or_else(PoisonError::into_inner);
                if engine.timer_generation.load(Ordering::SeqCst) != generation {
                    debug!(generation, "Superseded history timer expired");
                    return;
                }
                slot.take();
            }
            engine.force_complete();
        });
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    fn cancel_timer(&self) {
        let mut slot = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        self.timer_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(timer) = slot.take() {
            timer.abort();
        }
    }

    /// Report everything still pending as complete and clear the trackers
    pub fn force_complete(&self) {
        let pending = self.pending_chats.len();
        info!(pending, "Forcing history sync completion");
        self.complete_pending_chats();
        for (track, state) in [(SyncTrack::Recent, &self.recent), (SyncTrack::Full, &self.full)] {
            if state.has_started() && !state.completed.load(Ordering::SeqCst) {
                self.services.emit(Event::HistorySyncTrackComplete { track, forced: true });
            }
            state.reset();
        }
    }

    /// Drop all tracking state, e.g. after logout
    pub fn reset(&self) {
        self.cancel_timer();
        self.pending_chats.clear();
        self.replaced_chats.clear();
        self.recent.reset();
        self.full.reset();
    }
}

impl Drop for HistorySyncEngine {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            timer.abort();
        }
    }
}

/// Project a stored message from a history payload
fn web_message_record(info: &WebMessageInfo, chat: &Jid, self_jid: &Jid) -> Option<MessageRecord> {
    let key = info.key.as_ref()?;
    let id = key.id.clone()?;
    let from_me = key.from_me.unwrap_or(false);
    let participant = key
        .participant
        .as_deref()
        .or(info.participant.as_deref())
        .and_then(|participant| Jid::parse(participant).ok());
    let sender = match (from_me, participant) {
        (true, _) => self_jid.to_user_jid(),
        (false, Some(participant)) => participant,
        (false, None) => chat.clone(),
    };
    Some(MessageRecord {
        id,
        chat: chat.to_user_jid(),
        sender,
        from_me,
        timestamp: Timestamp::from_secs(info.message_timestamp.unwrap_or_default()),
        message: info.message.clone(),
        push_name: info.push_name.clone(),
        starred: info.starred.unwrap_or(false),
    })
}
