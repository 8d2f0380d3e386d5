//! Typed projection of decoded app-state actions
//!
//! Every mutation carries a JSON index array whose first element names the
//! action, followed by the chat JID and action-specific keys. The value is a
//! `SyncActionValue` with at most one action payload set.

use serde::{Deserialize, Serialize};

use super::keys::PatchName;
use crate::jid::Jid;
use crate::proto::{
    ArchiveChatAction, ClearChatAction, ContactAction, DeleteChatAction, DeleteMessageForMeAction,
    KeyExpiration, LabelAssociationAction, LabelEditAction, LocaleSetting, MarkChatAsReadAction,
    MuteAction, PinAction, PrimaryFeature, PushNameSetting, SecurityNotificationSetting, StarAction,
    SyncActionValue, SyncdOperation, TimeFormatAction, UnarchiveChatsSetting,
};
use crate::types::Timestamp;

/// Reference to one message inside a chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat: Jid,
    pub id: String,
    pub from_me: bool,
    pub participant: Option<Jid>,
}

impl MessageRef {
    fn from_index(index: &[String]) -> Option<Self> {
        let [_, chat, id, from_me, participant, ..] = index else {
            return None;
        };
        Some(Self {
            chat: Jid::parse(chat).ok()?,
            id: id.clone(),
            from_me: from_me == "1",
            participant: match participant.as_str() {
                "0" | "" => None,
                text => Some(Jid::parse(text).ok()?),
            },
        })
    }

    fn index(&self, action: &str) -> Vec<String> {
        vec![
            action.to_owned(),
            self.chat.to_string(),
            self.id.clone(),
            if self.from_me { "1" } else { "0" }.to_owned(),
            self.participant
                .as_ref()
                .map_or_else(|| "0".to_owned(), Jid::to_string),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncAction {
    Contact {
        jid: Jid,
        full_name: Option<String>,
        first_name: Option<String>,
    },
    Mute {
        chat: Jid,
        muted: bool,
        end_timestamp: Option<i64>,
    },
    Pin {
        chat: Jid,
        pinned: bool,
    },
    Archive {
        chat: Jid,
        archived: bool,
    },
    Star {
        message: MessageRef,
        starred: bool,
    },
    ClearChat {
        chat: Jid,
    },
    DeleteChat {
        chat: Jid,
    },
    MarkChatAsRead {
        chat: Jid,
        read: bool,
    },
    DeleteMessageForMe {
        message: MessageRef,
        delete_media: bool,
    },
    PushName {
        name: String,
    },
    Locale {
        locale: String,
    },
    SecurityNotification {
        show: bool,
    },
    UnarchiveChatsSetting {
        unarchive: bool,
    },
    PrimaryFeature {
        flags: Vec<String>,
    },
    TimeFormat {
        twenty_four_hour: bool,
    },
    LabelEdit {
        label_id: String,
        name: Option<String>,
        color: Option<i32>,
        deleted: bool,
    },
    LabelAssociation {
        label_id: String,
        chat: Jid,
        labeled: bool,
    },
    KeyExpiration {
        expired_key_epoch: i32,
    },
    /// Index or payload this client does not model
    Unknown {
        index: Vec<String>,
    },
}

impl SyncAction {
    /// Project a decoded index and value; anything unrecognised or
    /// inconsistent becomes `Unknown`
    pub fn from_sync_data(index: &[String], value: &SyncActionValue) -> SyncAction {
        Self::project(index, value).unwrap_or_else(|| SyncAction::Unknown {
            index: index.to_vec(),
        })
    }

    fn project(index: &[String], value: &SyncActionValue) -> Option<SyncAction> {
        let kind = index.first()?.as_str();
        let chat = || index.get(1).and_then(|text| Jid::parse(text).ok());

        let action = match kind {
            "contact" => {
                let contact = value.contact_action.as_ref()?;
                SyncAction::Contact {
                    jid: chat()?,
                    full_name: contact.full_name.clone(),
                    first_name: contact.first_name.clone(),
                }
            }
            "mute" => {
                let mute = value.mute_action.as_ref()?;
                SyncAction::Mute {
                    chat: chat()?,
                    muted: mute.muted.unwrap_or_default(),
                    end_timestamp: mute.mute_end_timestamp,
                }
            }
            "pin_v1" => SyncAction::Pin {
                chat: chat()?,
                pinned: value.pin_action.as_ref()?.pinned.unwrap_or_default(),
            },
            "archive" => SyncAction::Archive {
                chat: chat()?,
                archived: value.archive_chat_action.as_ref()?.archived.unwrap_or_default(),
            },
            "star" => SyncAction::Star {
                message: MessageRef::from_index(index)?,
                starred: value.star_action.as_ref()?.starred.unwrap_or_default(),
            },
            "clearChat" => {
                value.clear_chat_action.as_ref()?;
                SyncAction::ClearChat { chat: chat()? }
            }
            "deleteChat" => {
                value.delete_chat_action.as_ref()?;
                SyncAction::DeleteChat { chat: chat()? }
            }
            "markChatAsRead" => SyncAction::MarkChatAsRead {
                chat: chat()?,
                read: value.mark_chat_as_read_action.as_ref()?.read.unwrap_or_default(),
            },
            "deleteMessageForMe" => SyncAction::DeleteMessageForMe {
                message: MessageRef::from_index(index)?,
                delete_media: value
                    .delete_message_for_me_action
                    .as_ref()?
                    .delete_media
                    .unwrap_or_default(),
            },
            "setting_pushName" => SyncAction::PushName {
                name: value.push_name_setting.as_ref()?.name.clone()?,
            },
            "setting_locale" => SyncAction::Locale {
                locale: value.locale_setting.as_ref()?.locale.clone()?,
            },
            "setting_securityNotification" => SyncAction::SecurityNotification {
                show: value
                    .security_notification_setting
                    .as_ref()?
                    .show_notification
                    .unwrap_or_default(),
            },
            "setting_unarchiveChats" => SyncAction::UnarchiveChatsSetting {
                unarchive: value
                    .unarchive_chats_setting
                    .as_ref()?
                    .unarchive_chats
                    .unwrap_or_default(),
            },
            "primary_feature" => SyncAction::PrimaryFeature {
                flags: value.primary_feature.as_ref()?.flags.clone(),
            },
            "time_format" => SyncAction::TimeFormat {
                twenty_four_hour: value
                    .time_format_action
                    .as_ref()?
                    .is_twenty_four_hour_format_enabled
                    .unwrap_or_default(),
            },
            "label_edit" => {
                let edit = value.label_edit_action.as_ref()?;
                SyncAction::LabelEdit {
                    label_id: index.get(1)?.clone(),
                    name: edit.name.clone(),
                    color: edit.color,
                    deleted: edit.deleted.unwrap_or_default(),
                }
            }
            "label_jid" => SyncAction::LabelAssociation {
                label_id: index.get(1)?.clone(),
                chat: Jid::parse(index.get(2)?).ok()?,
                labeled: value
                    .label_association_action
                    .as_ref()?
                    .labeled
                    .unwrap_or_default(),
            },
            "key_expiration" => SyncAction::KeyExpiration {
                expired_key_epoch: value.key_expiration.as_ref()?.expired_key_epoch?,
            },
            _ => return None,
        };
        Some(action)
    }

    /// Index, value and action version for encoding this action
    pub fn to_sync_data(&self, timestamp: Timestamp) -> Option<(Vec<String>, SyncActionValue, i32)> {
        let mut value = SyncActionValue {
            timestamp: Some(timestamp.as_millis() as i64),
            ..Default::default()
        };
        let index = match self {
            SyncAction::Contact {
                jid,
                full_name,
                first_name,
            } => {
                value.contact_action = Some(ContactAction {
                    full_name: full_name.clone(),
                    first_name: first_name.clone(),
                    lid_jid: None,
                });
                chat_index("contact", jid)
            }
            SyncAction::Mute {
                chat,
                muted,
                end_timestamp,
            } => {
                value.mute_action = Some(MuteAction {
                    muted: Some(*muted),
                    mute_end_timestamp: *end_timestamp,
                });
                chat_index("mute", chat)
            }
            SyncAction::Pin { chat, pinned } => {
                value.pin_action = Some(PinAction {
                    pinned: Some(*pinned),
                });
                chat_index("pin_v1", chat)
            }
            SyncAction::Archive { chat, archived } => {
                value.archive_chat_action = Some(ArchiveChatAction {
                    archived: Some(*archived),
                });
                chat_index("archive", chat)
            }
            SyncAction::Star { message, starred } => {
                value.star_action = Some(StarAction {
                    starred: Some(*starred),
                });
                message.index("star")
            }
            SyncAction::ClearChat { chat } => {
                value.clear_chat_action = Some(ClearChatAction {});
                chat_index("clearChat", chat)
            }
            SyncAction::DeleteChat { chat } => {
                value.delete_chat_action = Some(DeleteChatAction {});
                chat_index("deleteChat", chat)
            }
            SyncAction::MarkChatAsRead { chat, read } => {
                value.mark_chat_as_read_action = Some(MarkChatAsReadAction { read: Some(*read) });
                chat_index("markChatAsRead", chat)
            }
            SyncAction::DeleteMessageForMe {
                message,
                delete_media,
            } => {
                value.delete_message_for_me_action = Some(DeleteMessageForMeAction {
                    delete_media: Some(*delete_media),
                    message_timestamp: None,
                });
                message.index("deleteMessageForMe")
            }
            SyncAction::PushName { name } => {
                value.push_name_setting = Some(PushNameSetting {
                    name: Some(name.clone()),
                });
                vec!["setting_pushName".to_owned()]
            }
            SyncAction::Locale { locale } => {
                value.locale_setting = Some(LocaleSetting {
                    locale: Some(locale.clone()),
                });
                vec!["setting_locale".to_owned()]
            }
            SyncAction::SecurityNotification { show } => {
                value.security_notification_setting = Some(SecurityNotificationSetting {
                    show_notification: Some(*show),
                });
                vec!["setting_securityNotification".to_owned()]
            }
            SyncAction::UnarchiveChatsSetting { unarchive } => {
                value.unarchive_chats_setting = Some(UnarchiveChatsSetting {
                    unarchive_chats: Some(*unarchive),
                });
                vec!["setting_unarchiveChats".to_owned()]
            }
            SyncAction::PrimaryFeature { flags } => {
                value.primary_feature = Some(PrimaryFeature {
                    flags: flags.clone(),
                });
                vec!["primary_feature".to_owned()]
            }
            SyncAction::TimeFormat { twenty_four_hour } => {
                value.time_format_action = Some(TimeFormatAction {
                    is_twenty_four_hour_format_enabled: Some(*twenty_four_hour),
                });
                vec!["time_format".to_owned()]
            }
            SyncAction::LabelEdit {
                label_id,
                name,
                color,
                deleted,
            } => {
                value.label_edit_action = Some(LabelEditAction {
                    name: name.clone(),
                    color: *color,
                    deleted: Some(*deleted),
                });
                vec!["label_edit".to_owned(), label_id.clone()]
            }
            SyncAction::LabelAssociation {
                label_id,
                chat,
                labeled,
            } => {
                value.label_association_action = Some(LabelAssociationAction {
                    labeled: Some(*labeled),
                });
                vec!["label_jid".to_owned(), label_id.clone(), chat.to_string()]
            }
            SyncAction::KeyExpiration { expired_key_epoch } => {
                value.key_expiration = Some(KeyExpiration {
                    expired_key_epoch: Some(*expired_key_epoch),
                });
                vec!["key_expiration".to_owned()]
            }
            SyncAction::Unknown { .. } => return None,
        };
        Some((index, value, self.version()))
    }

    /// Name of the action as it appears first in the index
    pub fn kind(&self) -> &'static str {
        match self {
            SyncAction::Contact { .. } => "contact",
            SyncAction::Mute { .. } => "mute",
            SyncAction::Pin { .. } => "pin_v1",
            SyncAction::Archive { .. } => "archive",
            SyncAction::Star { .. } => "star",
            SyncAction::ClearChat { .. } => "clearChat",
            SyncAction::DeleteChat { .. } => "deleteChat",
            SyncAction::MarkChatAsRead { .. } => "markChatAsRead",
            SyncAction::DeleteMessageForMe { .. } => "deleteMessageForMe",
            SyncAction::PushName { .. } => "setting_pushName",
            SyncAction::Locale { .. } => "setting_locale",
            SyncAction::SecurityNotification { .. } => "setting_securityNotification",
            SyncAction::UnarchiveChatsSetting { .. } => "setting_unarchiveChats",
            SyncAction::PrimaryFeature { .. } => "primary_feature",
            SyncAction::TimeFormat { .. } => "time_format",
            SyncAction::LabelEdit { .. } => "label_edit",
            SyncAction::LabelAssociation { .. } => "label_jid",
            SyncAction::KeyExpiration { .. } => "key_expiration",
            SyncAction::Unknown { .. } => "unknown",
        }
    }

    /// Collection the action is pushed to
    pub fn collection(&self) -> PatchName {
        match self {
            SyncAction::Contact { .. } => PatchName::CriticalUnblockLow,
            SyncAction::PushName { .. }
            | SyncAction::Locale { .. }
            | SyncAction::SecurityNotification { .. }
            | SyncAction::KeyExpiration { .. } => PatchName::CriticalBlock,
            SyncAction::Star { .. } | SyncAction::DeleteMessageForMe { .. } => {
                PatchName::RegularHigh
            }
            SyncAction::Mute { .. }
            | SyncAction::Pin { .. }
            | SyncAction::Archive { .. }
            | SyncAction::ClearChat { .. }
            | SyncAction::DeleteChat { .. }
            | SyncAction::MarkChatAsRead { .. } => PatchName::RegularLow,
            SyncAction::UnarchiveChatsSetting { .. }
            | SyncAction::PrimaryFeature { .. }
            | SyncAction::TimeFormat { .. }
            | SyncAction::LabelEdit { .. }
            | SyncAction::LabelAssociation { .. }
            | SyncAction::Unknown { .. } => PatchName::Regular,
        }
    }

    pub fn version(&self) -> i32 {
        match self {
            SyncAction::Contact { .. } | SyncAction::Mute { .. } | SyncAction::Star { .. } => 2,
            SyncAction::Pin { .. } => 5,
            SyncAction::Archive { .. }
            | SyncAction::MarkChatAsRead { .. }
            | SyncAction::DeleteMessageForMe { .. }
            | SyncAction::LabelEdit { .. }
            | SyncAction::LabelAssociation { .. } => 3,
            SyncAction::ClearChat { .. } | SyncAction::DeleteChat { .. } => 6,
            _ => 1,
        }
    }

    /// Chat the action targets, if any
    pub fn chat(&self) -> Option<&Jid> {
        match self {
            SyncAction::Contact { jid: chat, .. }
            | SyncAction::Mute { chat, .. }
            | SyncAction::Pin { chat, .. }
            | SyncAction::Archive { chat, .. }
            | SyncAction::ClearChat { chat }
            | SyncAction::DeleteChat { chat }
            | SyncAction::MarkChatAsRead { chat, .. }
            | SyncAction::LabelAssociation { chat, .. } => Some(chat),
            SyncAction::Star { message, .. } | SyncAction::DeleteMessageForMe { message, .. } => {
                Some(&message.chat)
            }
            _ => None,
        }
    }
}

fn chat_index(action: &str, chat: &Jid) -> Vec<String> {
    vec![action.to_owned(), chat.to_string()]
}

/// One decoded app-state mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub operation: SyncdOperation,
    pub action: SyncAction,
    pub index: Vec<String>,
    pub index_mac: Vec<u8>,
    pub value_mac: Vec<u8>,
    pub version: i32,
    pub timestamp: Option<Timestamp>,
    pub collection: PatchName,
}
