//! Protocol control messages
//!
//! History sync notifications and app-state key shares are only honoured
//! when they come from one of our own devices; the work they trigger runs
//! on spawned tasks so the pipeline keeps draining stanzas.

use tracing::{debug, info, warn};
use wamd_core::appstate::{PatchName, SyncKey};
use wamd_core::proto::{AppStateSyncKeyShare, ProtocolMessage, ProtocolMessageType};
use wamd_core::{Result, Timestamp};

use super::{Attribution, MessagePipeline};
use crate::events::Event;
use crate::failure::FailureLocation;

impl MessagePipeline {
    pub(crate) async fn handle_protocol_message(
        &self,
        attribution: &Attribution,
        protocol: &ProtocolMessage,
    ) -> Result<()> {
        match protocol.message_type() {
            Some(ProtocolMessageType::HistorySyncNotification) if attribution.from_me => {
                if let Some(notification) = protocol.history_sync_notification.clone() {
                    let history = self.history.clone();
                    let failures = self.services.failures.clone();
                    tokio::spawn(async move {
                        if let Err(err) = history.handle_notification(&notification).await {
                            warn!(error = %err, "History sync chunk failed");
                            failures.report(FailureLocation::HistorySync, &err).await;
                        }
                    });
                }
                Ok(())
            }
            Some(ProtocolMessageType::AppStateSyncKeyShare) if attribution.from_me => {
                match &protocol.app_state_sync_key_share {
                    Some(share) => self.store_key_share(share).await,
                    None => Ok(()),
                }
            }
            Some(ProtocolMessageType::Revoke) => {
                self.revoke(attribution, protocol);
                Ok(())
            }
            Some(ProtocolMessageType::EphemeralSetting) => {
                let expiration = protocol.ephemeral_expiration.unwrap_or(0);
                let changed_at = protocol.ephemeral_setting_timestamp.unwrap_or(0);
                let chat = attribution.chat.to_user_jid();
                if self.services.store.ensure_chat(&chat) {
                    self.services.emit(Event::ChatCreated { chat: chat.clone() });
                }
                self.services.store.update_chat(&chat, |chat| {
                    chat.ephemeral_expiration = expiration;
                    chat.ephemeral_setting_timestamp = changed_at;
                });
                self.services
                    .emit(Event::EphemeralSettingChanged { chat, expiration });
                Ok(())
            }
            other => {
                debug!(kind = ?other, from_me = attribution.from_me, "Protocol message ignored");
                Ok(())
            }
        }
    }

    async fn store_key_share(&self, share: &AppStateSyncKeyShare) -> Result<()> {
        let store = self.app_state.store();
        let mut stored = 0;
        for key in &share.keys {
            let key_id = key.key_id.as_ref().and_then(|id| id.key_id.clone());
            let data = key.key_data.as_ref();
            let (Some(key_id), Some(key_data)) = (key_id, data.and_then(|data| data.key_data.clone())) else {
                warn!("Skipping incomplete app state key");
                continue;
            };
            let timestamp = data
                .and_then(|data| data.timestamp)
                .and_then(|millis| u64::try_from(millis).ok())
                .map_or_else(|| self.services.clock.now(), Timestamp::new);
            let key_hex = hex::encode(&key_id);
            store
                .put_sync_key(SyncKey {
                    key_id,
                    key_data,
                    timestamp,
                })
                .await?;
            debug!(key_id = %key_hex, "Stored app state key");
            stored += 1;
        }
        info!(keys = stored, "Stored app state keys");

        if stored > 0 && self.config.pull_on_key_share {
            let app_state = self.app_state.clone();
            let failures = self.services.failures.clone();
            tokio::spawn(async move {
                if let Err(err) = app_state.pull(&PatchName::ALL).await {
                    warn!(error = %err, "App state pull after key share failed");
                    failures.report(FailureLocation::AppStateSync, &err).await;
                }
            });
        }
        Ok(())
    }

    fn revoke(&self, attribution: &Attribution, protocol: &ProtocolMessage) {
        let Some(key) = &protocol.key else {
            return;
        };
        let Some(id) = key.id.clone() else {
            return;
        };
        // The revoke travels in the chat of the message it removes
        let chat = attribution.chat.to_user_jid();
        self.services.store.delete_message(&chat, &id);
        self.services.emit(Event::MessageDeleted {
            chat,
            id,
            everyone: true,
        });
    }
}
