//! JID servers
//!
//! Known servers are recognised without allocation; any other address is
//! interned in a [`ServerRegistry`] so that equal addresses share one
//! allocation.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock, RwLock};

use serde::{Deserialize, Serialize};

/// Classification of a JID server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerType {
    User,
    LegacyUser,
    Group,
    Broadcast,
    Call,
    Lid,
    Newsletter,
    Bot,
    Hosted,
    HostedLid,
    Messenger,
    Interop,
    Unknown,
}

impl ServerType {
    /// Wire address of a known server type
    pub fn address(self) -> Option<&'static str> {
        Some(match self {
            ServerType::User => "s.whatsapp.net",
            ServerType::LegacyUser => "c.us",
            ServerType::Group => "g.us",
            ServerType::Broadcast => "broadcast",
            ServerType::Call => "call",
            ServerType::Lid => "lid",
            ServerType::Newsletter => "newsletter",
            ServerType::Bot => "bot",
            ServerType::Hosted => "hosted",
            ServerType::HostedLid => "hosted.lid",
            ServerType::Messenger => "msgr",
            ServerType::Interop => "interop",
            ServerType::Unknown => return None,
        })
    }

    /// Recognise a known server from its address.
    ///
    /// Dispatches on length and first byte before the final comparison so the
    /// hot path never hashes.
    pub fn from_address(address: &str) -> Option<ServerType> {
        let bytes = address.as_bytes();
        let candidate = match (bytes.len(), bytes.first()?) {
            (3, b'l') => ServerType::Lid,
            (3, b'b') => ServerType::Bot,
            (4, b'c') if bytes[1] == b'.' => ServerType::LegacyUser,
            (4, b'c') => ServerType::Call,
            (4, b'g') => ServerType::Group,
            (4, b'm') => ServerType::Messenger,
            (6, b'h') => ServerType::Hosted,
            (7, b'i') => ServerType::Interop,
            (9, b'b') => ServerType::Broadcast,
            (10, b'n') => ServerType::Newsletter,
            (10, b'h') => ServerType::HostedLid,
            (14, b's') => ServerType::User,
            _ => return None,
        };
        (candidate.address() == Some(address)).then_some(candidate)
    }

    /// Servers whose JIDs identify a person (and may carry a device id)
    pub fn is_user_like(self) -> bool {
        matches!(
            self,
            ServerType::User
                | ServerType::LegacyUser
                | ServerType::Lid
                | ServerType::Messenger
                | ServerType::Interop
                | ServerType::Hosted
                | ServerType::HostedLid
                | ServerType::Bot
        )
    }
}

// ----------------------------------------------------------------------------
// Server Address
// ----------------------------------------------------------------------------

/// The server half of a JID
#[derive(Clone)]
pub enum JidServer {
    Known(ServerType),
    Interned(Arc<str>),
}

impl JidServer {
    pub const USER: JidServer = JidServer::Known(ServerType::User);
    pub const LEGACY_USER: JidServer = JidServer::Known(ServerType::LegacyUser);
    pub const GROUP: JidServer = JidServer::Known(ServerType::Group);
    pub const BROADCAST: JidServer = JidServer::Known(ServerType::Broadcast);
    pub const CALL: JidServer = JidServer::Known(ServerType::Call);
    pub const LID: JidServer = JidServer::Known(ServerType::Lid);
    pub const NEWSLETTER: JidServer = JidServer::Known(ServerType::Newsletter);
    pub const BOT: JidServer = JidServer::Known(ServerType::Bot);
    pub const HOSTED: JidServer = JidServer::Known(ServerType::Hosted);
    pub const HOSTED_LID: JidServer = JidServer::Known(ServerType::HostedLid);
    pub const MESSENGER: JidServer = JidServer::Known(ServerType::Messenger);
    pub const INTEROP: JidServer = JidServer::Known(ServerType::Interop);

    /// Resolve an address through the process-wide registry
    pub fn of(address: &str) -> JidServer {
        ServerRegistry::global().resolve(address)
    }

    pub fn address(&self) -> &str {
        match self {
            JidServer::Known(kind) => kind.address().unwrap_or_default(),
            JidServer::Interned(address) => address,
        }
    }

    pub fn kind(&self) -> ServerType {
        match self {
            JidServer::Known(kind) => *kind,
            JidServer::Interned(_) => ServerType::Unknown,
        }
    }
}

impl PartialEq for JidServer {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for JidServer {}

impl Hash for JidServer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl fmt::Debug for JidServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JidServer({})", self.address())
    }
}

impl fmt::Display for JidServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.address())
    }
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

/// Interning table for server addresses outside the known set
#[derive(Debug, Default)]
pub struct ServerRegistry {
    interned: RwLock<HashMap<Box<str>, Arc<str>>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by [`crate::jid::Jid::parse`]
    pub fn global() -> &'static ServerRegistry {
        static GLOBAL: OnceLock<ServerRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ServerRegistry::new)
    }

    pub fn resolve(&self, address: &str) -> JidServer {
        if let Some(kind) = ServerType::from_address(address) {
            return JidServer::Known(kind);
        }

        // A poisoned lock only means another thread panicked mid-insert; the
        // map itself is still consistent.
        if let Some(existing) = self
            .interned
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(address)
        {
            return JidServer::Interned(existing.clone());
        }

        let mut interned = self
            .interned
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = interned
            .entry(address.into())
            .or_insert_with(|| Arc::from(address));
        JidServer::Interned(entry.clone())
    }

    /// Number of interned unknown addresses
    pub fn len(&self) -> usize {
        self.interned
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_servers_round_trip() {
        for kind in [
            ServerType::User,
            ServerType::LegacyUser,
            ServerType::Group,
            ServerType::Broadcast,
            ServerType::Call,
            ServerType::Lid,
            ServerType::Newsletter,
            ServerType::Bot,
            ServerType::Hosted,
            ServerType::HostedLid,
            ServerType::Messenger,
            ServerType::Interop,
        ] {
            let address = kind.address().unwrap();
            assert_eq!(ServerType::from_address(address), Some(kind));
        }
    }

    #[test]
    fn test_unknown_addresses_are_interned() {
        let registry = ServerRegistry::new();
        let a = registry.resolve("example.net");
        let b = registry.resolve("example.net");
        assert_eq!(a, b);
        assert_eq!(a.kind(), ServerType::Unknown);
        assert_eq!(registry.len(), 1);

        match (a, b) {
            (JidServer::Interned(a), JidServer::Interned(b)) => assert!(Arc::ptr_eq(&a, &b)),
            _ => panic!("expected interned servers"),
        }
    }

    #[test]
    fn test_near_misses_are_not_known() {
        assert_eq!(ServerType::from_address("c.uz"), None);
        assert_eq!(ServerType::from_address("lids"), None);
        assert_eq!(ServerType::from_address(""), None);
    }
}
