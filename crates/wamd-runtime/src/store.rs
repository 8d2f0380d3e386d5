//! Local chat and contact state
//!
//! The pipeline and the sync engines project everything they learn into this
//! store. Entries are keyed by user or group JID (never a device JID).

use std::sync::RwLock;
use std::sync::PoisonError;

use dashmap::DashMap;
use wamd_core::proto::Message;
use wamd_core::{Jid, Timestamp};

// ----------------------------------------------------------------------------
// Records
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub id: String,
    pub chat: Jid,
    pub sender: Jid,
    pub from_me: bool,
    pub timestamp: Timestamp,
    /// `None` when the content could not be decrypted or was withheld
    pub message: Option<Message>,
    pub push_name: Option<String>,
    pub starred: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chat {
    pub jid: Jid,
    pub name: Option<String>,
    pub unread_count: u32,
    pub messages: Vec<MessageRecord>,
    pub archived: bool,
    pub pinned: bool,
    /// Mute end in seconds; `Some(-1)` mutes forever
    pub muted_until: Option<i64>,
    pub read_only: bool,
    pub ephemeral_expiration: u32,
    pub ephemeral_setting_timestamp: i64,
    pub past_participants: Vec<(Jid, Option<u64>)>,
    pub labels: Vec<String>,
    pub history_complete: bool,
}

impl Chat {
    pub fn new(jid: Jid) -> Self {
        Self {
            jid,
            name: None,
            unread_count: 0,
            messages: Vec::new(),
            archived: false,
            pinned: false,
            muted_until: None,
            read_only: false,
            ephemeral_expiration: 0,
            ephemeral_setting_timestamp: 0,
            past_participants: Vec::new(),
            labels: Vec::new(),
            history_complete: false,
        }
    }

    pub fn message(&self, id: &str) -> Option<&MessageRecord> {
        self.messages.iter().find(|record| record.id == id)
    }

    /// Insert keeping timestamp order; returns false for a known id
    pub fn insert_message(&mut self, record: MessageRecord) -> bool {
        if self.message(&record.id).is_some() {
            return false;
        }
        let position = self
            .messages
            .partition_point(|existing| existing.timestamp <= record.timestamp);
        self.messages.insert(position, record);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub jid: Jid,
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub push_name: Option<String>,
}

impl Contact {
    pub fn new(jid: Jid) -> Self {
        Self {
            jid,
            full_name: None,
            first_name: None,
            push_name: None,
        }
    }
}

// ----------------------------------------------------------------------------
// Store
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct Store {
    self_jid: Jid,
    push_name: RwLock<Option<String>>,
    chats: DashMap<Jid, Chat>,
    contacts: DashMap<Jid, Contact>,
}

impl Store {
    pub fn new(self_jid: Jid) -> Self {
        Self {
            self_jid,
            push_name: RwLock::new(None),
            chats: DashMap::new(),
            contacts: DashMap::new(),
        }
    }

    /// This device's JID
    pub fn self_jid(&self) -> &Jid {
        &self.self_jid
    }

    pub fn push_name(&self) -> Option<String> {
        self.push_name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_push_name(&self, name: Option<String>) {
        *self.push_name.write().unwrap_or_else(PoisonError::into_inner) = name;
    }

    // ------------------------------------------------------------------------
    // Chats
    // ------------------------------------------------------------------------

    pub fn chat(&self, jid: &Jid) -> Option<Chat> {
        self.chats.get(&jid.to_user_jid()).map(|chat| chat.clone())
    }

    pub fn chats(&self) -> Vec<Chat> {
        self.chats.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn chat_count(&self) -> usize {
        self.chats.len()
    }

    /// Create the chat if missing; returns whether it was created
    pub fn ensure_chat(&self, jid: &Jid) -> bool {
        let key = jid.to_user_jid();
        if self.chats.contains_key(&key) {
            return false;
        }
        let mut created = false;
        self.chats.entry(key.clone()).or_insert_with(|| {
            created = true;
            Chat::new(key)
        });
        created
    }

    /// Run `update` on the chat if it exists
    pub fn update_chat<R>(&self, jid: &Jid, update: impl FnOnce(&mut Chat) -> R) -> Option<R> {
        self.chats
            .get_mut(&jid.to_user_jid())
            .map(|mut chat| update(&mut chat))
    }

    pub fn remove_chat(&self, jid: &Jid) -> Option<Chat> {
        self.chats.remove(&jid.to_user_jid()).map(|(_, chat)| chat)
    }

    pub fn add_message(&self, record: MessageRecord) -> bool {
        let key = record.chat.to_user_jid();
        self.chats
            .entry(key.clone())
            .or_insert_with(|| Chat::new(key))
            .insert_message(record)
    }

    pub fn find_message(&self, chat: &Jid, id: &str) -> Option<MessageRecord> {
        self.chats
            .get(&chat.to_user_jid())
            .and_then(|chat| chat.message(id).cloned())
    }

    pub fn delete_message(&self, chat: &Jid, id: &str) -> Option<MessageRecord> {
        self.update_chat(chat, |chat| {
            let position = chat.messages.iter().position(|record| record.id == id)?;
            Some(chat.messages.remove(position))
        })
        .flatten()
    }

    // ------------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------------

    pub fn contact(&self, jid: &Jid) -> Option<Contact> {
        self.contacts
            .get(&jid.to_user_jid())
            .map(|contact| contact.clone())
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.contacts
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn ensure_contact(&self, jid: &Jid) -> bool {
        let key = jid.to_user_jid();
        if self.contacts.contains_key(&key) {
            return false;
        }
        let mut created = false;
        self.contacts.entry(key.clone()).or_insert_with(|| {
            created = true;
            Contact::new(key)
        });
        created
    }

    /// Upsert a contact; returns whether it was created
    pub fn update_contact(&self, jid: &Jid, update: impl FnOnce(&mut Contact)) -> bool {
        let key = jid.to_user_jid();
        let mut created = false;
        let mut entry = self.contacts.entry(key.clone()).or_insert_with(|| {
            created = true;
            Contact::new(key)
        });
        update(&mut entry);
        created
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(chat: &Jid, id: &str, at: u64) -> MessageRecord {
        MessageRecord {
            id: id.into(),
            chat: chat.clone(),
            sender: chat.clone(),
            from_me: false,
            timestamp: Timestamp::new(at),
            message: None,
            push_name: None,
            starred: false,
        }
    }

    #[test]
    fn test_messages_ordered_and_deduplicated() {
        let store = Store::new(Jid::parse("15550000000:1@s.whatsapp.net").unwrap());
        let chat = Jid::parse("15551234567@s.whatsapp.net").unwrap();
        assert!(store.add_message(record(&chat, "b", 20)));
        assert!(store.add_message(record(&chat, "a", 10)));
        assert!(!store.add_message(record(&chat, "a", 10)));

        let ids: Vec<String> = store
            .chat(&chat)
            .unwrap()
            .messages
            .into_iter()
            .map(|record| record.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(store.delete_message(&chat, "a").is_some());
        assert!(store.find_message(&chat, "a").is_none());
    }

    #[test]
    fn test_device_jids_share_user_entries() {
        let store = Store::new(Jid::parse("15550000000:1@s.whatsapp.net").unwrap());
        let device = Jid::parse("15551234567:4@s.whatsapp.net").unwrap();
        assert!(store.ensure_contact(&device));
        assert!(!store.ensure_contact(&device.to_user_jid()));
        assert!(store.ensure_chat(&device));
        assert_eq!(store.chat_count(), 1);
    }

    proptest::proptest! {
        #[test]
        fn prop_messages_stay_sorted(stamps in proptest::collection::vec(0u64..50, 1..40)) {
            let chat_jid = Jid::parse("15551234567@s.whatsapp.net").unwrap();
            let mut chat = Chat::new(chat_jid.clone());
            for (index, at) in stamps.iter().enumerate() {
                proptest::prop_assert!(chat.insert_message(record(&chat_jid, &index.to_string(), *at)));
            }
            proptest::prop_assert_eq!(chat.messages.len(), stamps.len());
            proptest::prop_assert!(chat.messages.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
        }
    }
}
