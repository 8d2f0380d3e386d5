//! App-state sync schema: patches, snapshots and action payloads

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SyncdOperation {
    Set = 0,
    Remove = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdVersion {
    #[prost(uint64, optional, tag = "1")]
    pub version: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyId {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub id: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdIndex {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub blob: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdValue {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub blob: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdRecord {
    #[prost(message, optional, tag = "1")]
    pub index: Option<SyncdIndex>,
    #[prost(message, optional, tag = "2")]
    pub value: Option<SyncdValue>,
    #[prost(message, optional, tag = "3")]
    pub key_id: Option<KeyId>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdMutation {
    #[prost(enumeration = "SyncdOperation", optional, tag = "1")]
    pub operation: Option<i32>,
    #[prost(message, optional, tag = "2")]
    pub record: Option<SyncdRecord>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdMutations {
    #[prost(message, repeated, tag = "1")]
    pub mutations: Vec<SyncdMutation>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExternalBlobReference {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub media_key: Option<Vec<u8>>,
    #[prost(string, optional, tag = "2")]
    pub direct_path: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub handle: Option<String>,
    #[prost(uint64, optional, tag = "4")]
    pub file_size_bytes: Option<u64>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub file_sha256: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "6")]
    pub file_enc_sha256: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdPatch {
    #[prost(message, optional, tag = "1")]
    pub version: Option<SyncdVersion>,
    #[prost(message, repeated, tag = "2")]
    pub mutations: Vec<SyncdMutation>,
    #[prost(message, optional, tag = "3")]
    pub external_mutations: Option<ExternalBlobReference>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub snapshot_mac: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub patch_mac: Option<Vec<u8>>,
    #[prost(message, optional, tag = "6")]
    pub key_id: Option<KeyId>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdSnapshot {
    #[prost(message, optional, tag = "1")]
    pub version: Option<SyncdVersion>,
    #[prost(message, repeated, tag = "2")]
    pub records: Vec<SyncdRecord>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub mac: Option<Vec<u8>>,
    #[prost(message, optional, tag = "4")]
    pub key_id: Option<KeyId>,
}

// ----------------------------------------------------------------------------
// Action Payloads
// ----------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncActionData {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub index: Option<Vec<u8>>,
    #[prost(message, optional, tag = "2")]
    pub value: Option<SyncActionValue>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub padding: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "4")]
    pub version: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncActionValue {
    #[prost(int64, optional, tag = "1")]
    pub timestamp: Option<i64>,
    #[prost(message, optional, tag = "2")]
    pub star_action: Option<StarAction>,
    #[prost(message, optional, tag = "3")]
    pub contact_action: Option<ContactAction>,
    #[prost(message, optional, tag = "4")]
    pub mute_action: Option<MuteAction>,
    #[prost(message, optional, tag = "5")]
    pub pin_action: Option<PinAction>,
    #[prost(message, optional, tag = "6")]
    pub security_notification_setting: Option<SecurityNotificationSetting>,
    #[prost(message, optional, tag = "7")]
    pub push_name_setting: Option<PushNameSetting>,
    #[prost(message, optional, tag = "14")]
    pub label_edit_action: Option<LabelEditAction>,
    #[prost(message, optional, tag = "15")]
    pub label_association_action: Option<LabelAssociationAction>,
    #[prost(message, optional, tag = "16")]
    pub locale_setting: Option<LocaleSetting>,
    #[prost(message, optional, tag = "17")]
    pub archive_chat_action: Option<ArchiveChatAction>,
    #[prost(message, optional, tag = "18")]
    pub delete_message_for_me_action: Option<DeleteMessageForMeAction>,
    #[prost(message, optional, tag = "19")]
    pub key_expiration: Option<KeyExpiration>,
    #[prost(message, optional, tag = "20")]
    pub mark_chat_as_read_action: Option<MarkChatAsReadAction>,
    #[prost(message, optional, tag = "21")]
    pub clear_chat_action: Option<ClearChatAction>,
    #[prost(message, optional, tag = "22")]
    pub delete_chat_action: Option<DeleteChatAction>,
    #[prost(message, optional, tag = "23")]
    pub unarchive_chats_setting: Option<UnarchiveChatsSetting>,
    #[prost(message, optional, tag = "24")]
    pub primary_feature: Option<PrimaryFeature>,
    #[prost(message, optional, tag = "30")]
    pub time_format_action: Option<TimeFormatAction>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StarAction {
    #[prost(bool, optional, tag = "1")]
    pub starred: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContactAction {
    #[prost(string, optional, tag = "1")]
    pub full_name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub first_name: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub lid_jid: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MuteAction {
    #[prost(bool, optional, tag = "1")]
    pub muted: Option<bool>,
    #[prost(int64, optional, tag = "2")]
    pub mute_end_timestamp: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PinAction {
    #[prost(bool, optional, tag = "1")]
    pub pinned: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SecurityNotificationSetting {
    #[prost(bool, optional, tag = "1")]
    pub show_notification: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PushNameSetting {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LabelEditAction {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(int32, optional, tag = "2")]
    pub color: Option<i32>,
    #[prost(bool, optional, tag = "4")]
    pub deleted: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LabelAssociationAction {
    #[prost(bool, optional, tag = "1")]
    pub labeled: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LocaleSetting {
    #[prost(string, optional, tag = "1")]
    pub locale: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ArchiveChatAction {
    #[prost(bool, optional, tag = "1")]
    pub archived: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteMessageForMeAction {
    #[prost(bool, optional, tag = "1")]
    pub delete_media: Option<bool>,
    #[prost(int64, optional, tag = "2")]
    pub message_timestamp: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyExpiration {
    #[prost(int32, optional, tag = "1")]
    pub expired_key_epoch: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MarkChatAsReadAction {
    #[prost(bool, optional, tag = "1")]
    pub read: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClearChatAction {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteChatAction {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UnarchiveChatsSetting {
    #[prost(bool, optional, tag = "1")]
    pub unarchive_chats: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PrimaryFeature {
    #[prost(string, repeated, tag = "1")]
    pub flags: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimeFormatAction {
    #[prost(bool, optional, tag = "1")]
    pub is_twenty_four_hour_format_enabled: Option<bool>,
}
