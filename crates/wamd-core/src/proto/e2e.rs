//! End-to-end message container and its payloads

use super::history::HistorySyncType;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageKey {
    #[prost(string, optional, tag = "1")]
    pub remote_jid: Option<String>,
    #[prost(bool, optional, tag = "2")]
    pub from_me: Option<bool>,
    #[prost(string, optional, tag = "3")]
    pub id: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub participant: Option<String>,
}

/// The decrypted message container. At most a handful of fields are set on
/// any one message.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    #[prost(string, optional, tag = "1")]
    pub conversation: Option<String>,
    #[prost(message, optional, tag = "2")]
    pub sender_key_distribution_message: Option<SenderKeyDistributionMessage>,
    #[prost(message, optional, tag = "6")]
    pub extended_text_message: Option<ExtendedTextMessage>,
    #[prost(message, optional, tag = "12")]
    pub protocol_message: Option<ProtocolMessage>,
    #[prost(message, optional, tag = "31")]
    pub device_sent_message: Option<DeviceSentMessage>,
    #[prost(message, optional, tag = "35")]
    pub message_context_info: Option<MessageContextInfo>,
    #[prost(message, optional, tag = "46")]
    pub reaction_message: Option<ReactionMessage>,
    #[prost(message, optional, tag = "49")]
    pub poll_creation_message: Option<PollCreationMessage>,
    #[prost(message, optional, tag = "50")]
    pub poll_update_message: Option<PollUpdateMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SenderKeyDistributionMessage {
    #[prost(string, optional, tag = "1")]
    pub group_id: Option<String>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub axolotl_sender_key_distribution_message: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExtendedTextMessage {
    #[prost(string, optional, tag = "1")]
    pub text: Option<String>,
    #[prost(message, optional, tag = "17")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContextInfo {
    #[prost(string, optional, tag = "1")]
    pub stanza_id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub participant: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub remote_jid: Option<String>,
    #[prost(string, repeated, tag = "15")]
    pub mentioned_jid: Vec<String>,
    #[prost(uint32, optional, tag = "25")]
    pub expiration: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ProtocolMessageType {
    Revoke = 0,
    EphemeralSetting = 3,
    EphemeralSyncResponse = 4,
    HistorySyncNotification = 5,
    AppStateSyncKeyShare = 6,
    AppStateSyncKeyRequest = 7,
    MsgFanoutBackfillRequest = 8,
    InitialSecurityNotificationSettingSync = 9,
    AppStateFatalExceptionNotification = 10,
    SharePhoneNumber = 11,
    MessageEdit = 14,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtocolMessage {
    #[prost(message, optional, tag = "1")]
    pub key: Option<MessageKey>,
    #[prost(enumeration = "ProtocolMessageType", optional, tag = "2")]
    pub r#type: Option<i32>,
    #[prost(uint32, optional, tag = "4")]
    pub ephemeral_expiration: Option<u32>,
    #[prost(int64, optional, tag = "5")]
    pub ephemeral_setting_timestamp: Option<i64>,
    #[prost(message, optional, tag = "6")]
    pub history_sync_notification: Option<HistorySyncNotification>,
    #[prost(message, optional, tag = "7")]
    pub app_state_sync_key_share: Option<AppStateSyncKeyShare>,
    /// Encoded [`Message`]; kept as bytes to avoid a recursive type
    #[prost(bytes = "vec", optional, tag = "14")]
    pub edited_message: Option<Vec<u8>>,
    #[prost(int64, optional, tag = "15")]
    pub timestamp_ms: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceSentMessage {
    #[prost(string, optional, tag = "1")]
    pub destination_jid: Option<String>,
    /// Encoded [`Message`]; kept as bytes to avoid a recursive type
    #[prost(bytes = "vec", optional, tag = "2")]
    pub message: Option<Vec<u8>>,
    #[prost(string, optional, tag = "3")]
    pub phash: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageContextInfo {
    #[prost(int32, optional, tag = "2")]
    pub device_list_metadata_version: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub message_secret: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReactionMessage {
    #[prost(message, optional, tag = "1")]
    pub key: Option<MessageKey>,
    #[prost(string, optional, tag = "2")]
    pub text: Option<String>,
    #[prost(int64, optional, tag = "4")]
    pub sender_timestamp_ms: Option<i64>,
}

// ----------------------------------------------------------------------------
// Polls
// ----------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PollOption {
    #[prost(string, optional, tag = "1")]
    pub option_name: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PollCreationMessage {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub enc_key: Option<Vec<u8>>,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(message, repeated, tag = "3")]
    pub options: Vec<PollOption>,
    #[prost(uint32, optional, tag = "4")]
    pub selectable_options_count: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PollEncValue {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub enc_payload: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub enc_iv: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PollUpdateMessage {
    #[prost(message, optional, tag = "1")]
    pub poll_creation_message_key: Option<MessageKey>,
    #[prost(message, optional, tag = "2")]
    pub vote: Option<PollEncValue>,
    #[prost(int64, optional, tag = "4")]
    pub sender_timestamp_ms: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PollVoteMessage {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub selected_options: Vec<Vec<u8>>,
}

// ----------------------------------------------------------------------------
// Sync Notifications
// ----------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HistorySyncNotification {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub file_sha256: Option<Vec<u8>>,
    #[prost(uint64, optional, tag = "2")]
    pub file_length: Option<u64>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub media_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub file_enc_sha256: Option<Vec<u8>>,
    #[prost(string, optional, tag = "5")]
    pub direct_path: Option<String>,
    #[prost(enumeration = "HistorySyncType", optional, tag = "6")]
    pub sync_type: Option<i32>,
    #[prost(uint32, optional, tag = "7")]
    pub chunk_order: Option<u32>,
    #[prost(string, optional, tag = "8")]
    pub original_message_id: Option<String>,
    #[prost(uint32, optional, tag = "9")]
    pub progress: Option<u32>,
    #[prost(int64, optional, tag = "10")]
    pub oldest_msg_in_chunk_timestamp_sec: Option<i64>,
    #[prost(bytes = "vec", optional, tag = "11")]
    pub initial_hist_bootstrap_inline_payload: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppStateSyncKeyShare {
    #[prost(message, repeated, tag = "1")]
    pub keys: Vec<AppStateSyncKey>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppStateSyncKey {
    #[prost(message, optional, tag = "1")]
    pub key_id: Option<AppStateSyncKeyId>,
    #[prost(message, optional, tag = "2")]
    pub key_data: Option<AppStateSyncKeyData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppStateSyncKeyId {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub key_id: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppStateSyncKeyFingerprint {
    #[prost(uint32, optional, tag = "1")]
    pub raw_id: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub current_index: Option<u32>,
    #[prost(uint32, repeated, packed = "true", tag = "3")]
    pub device_indexes: Vec<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppStateSyncKeyData {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub key_data: Option<Vec<u8>>,
    #[prost(message, optional, tag = "2")]
    pub fingerprint: Option<AppStateSyncKeyFingerprint>,
    #[prost(int64, optional, tag = "3")]
    pub timestamp: Option<i64>,
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

impl Message {
    /// Plain text carried by either the conversation or extended text field
    pub fn text(&self) -> Option<&str> {
        self.conversation.as_deref().or_else(|| {
            self.extended_text_message
                .as_ref()
                .and_then(|m| m.text.as_deref())
        })
    }

    /// A message that only distributes a sender key carries nothing to show
    pub fn is_key_distribution_only(&self) -> bool {
        let stripped = Message {
            sender_key_distribution_message: None,
            message_context_info: None,
            ..self.clone()
        };
        self.sender_key_distribution_message.is_some() && stripped == Message::default()
    }

    /// Short label of the content kind, used in logs and the stanza `type`
    pub fn kind(&self) -> &'static str {
        if self.poll_creation_message.is_some() || self.poll_update_message.is_some() {
            "poll"
        } else if self.reaction_message.is_some() {
            "reaction"
        } else if self.protocol_message.is_some() {
            "protocol"
        } else {
            "text"
        }
    }
}

impl ProtocolMessage {
    pub fn message_type(&self) -> Option<ProtocolMessageType> {
        self.r#type
            .and_then(|value| ProtocolMessageType::try_from(value).ok())
    }
}
