//! History sync payload

use super::e2e::{Message, MessageKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum HistorySyncType {
    InitialBootstrap = 0,
    InitialStatusV3 = 1,
    Full = 2,
    Recent = 3,
    PushName = 4,
    NonBlockingData = 5,
    OnDemand = 6,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HistorySync {
    #[prost(enumeration = "HistorySyncType", optional, tag = "1")]
    pub sync_type: Option<i32>,
    #[prost(message, repeated, tag = "2")]
    pub conversations: Vec<Conversation>,
    #[prost(message, repeated, tag = "3")]
    pub status_v3_messages: Vec<WebMessageInfo>,
    #[prost(uint32, optional, tag = "5")]
    pub chunk_order: Option<u32>,
    #[prost(uint32, optional, tag = "6")]
    pub progress: Option<u32>,
    #[prost(message, repeated, tag = "7")]
    pub pushnames: Vec<Pushname>,
    #[prost(message, repeated, tag = "12")]
    pub past_participants: Vec<PastParticipants>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Conversation {
    #[prost(string, optional, tag = "1")]
    pub id: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub messages: Vec<HistorySyncMsg>,
    #[prost(uint64, optional, tag = "5")]
    pub last_msg_timestamp: Option<u64>,
    #[prost(uint32, optional, tag = "6")]
    pub unread_count: Option<u32>,
    #[prost(bool, optional, tag = "7")]
    pub read_only: Option<bool>,
    #[prost(bool, optional, tag = "8")]
    pub end_of_history_transfer: Option<bool>,
    #[prost(uint32, optional, tag = "9")]
    pub ephemeral_expiration: Option<u32>,
    #[prost(int64, optional, tag = "10")]
    pub ephemeral_setting_timestamp: Option<i64>,
    #[prost(uint64, optional, tag = "12")]
    pub conversation_timestamp: Option<u64>,
    #[prost(string, optional, tag = "13")]
    pub name: Option<String>,
    #[prost(bool, optional, tag = "16")]
    pub archived: Option<bool>,
    #[prost(bool, optional, tag = "19")]
    pub marked_as_unread: Option<bool>,
    #[prost(uint32, optional, tag = "24")]
    pub pinned: Option<u32>,
    #[prost(uint64, optional, tag = "25")]
    pub mute_end_time: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HistorySyncMsg {
    #[prost(message, optional, tag = "1")]
    pub message: Option<WebMessageInfo>,
    #[prost(uint64, optional, tag = "2")]
    pub msg_order_id: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WebMessageInfo {
    #[prost(message, optional, tag = "1")]
    pub key: Option<MessageKey>,
    #[prost(message, optional, tag = "2")]
    pub message: Option<Message>,
    #[prost(uint64, optional, tag = "3")]
    pub message_timestamp: Option<u64>,
    #[prost(string, optional, tag = "5")]
    pub participant: Option<String>,
    #[prost(bool, optional, tag = "17")]
    pub starred: Option<bool>,
    #[prost(string, optional, tag = "19")]
    pub push_name: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Pushname {
    #[prost(string, optional, tag = "1")]
    pub id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub pushname: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PastParticipant {
    #[prost(string, optional, tag = "1")]
    pub user_jid: Option<String>,
    #[prost(uint64, optional, tag = "3")]
    pub leave_ts: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PastParticipants {
    #[prost(string, optional, tag = "1")]
    pub group_jid: Option<String>,
    #[prost(message, repeated, tag = "2")]
    pub past_participants: Vec<PastParticipant>,
}
