//! JID addressing
//!
//! A JID names a user, device, group, broadcast list, call, newsletter or
//! server. Textual form is `[user][_agent][:device]@server`; agent and device
//! only appear when non-zero.

mod grammar;
mod server;

pub use server::{JidServer, ServerRegistry, ServerType};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::AddressError;
use crate::signal::SignalAddress;

const STATUS_USER: &str = "status";

// ----------------------------------------------------------------------------
// Address Payloads
// ----------------------------------------------------------------------------

/// A user without a device component
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserAddress {
    pub user: String,
    pub agent: u8,
    pub server: JidServer,
}

/// A specific device of a user
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub user: String,
    pub agent: u8,
    pub device: u8,
    pub server: JidServer,
}

/// Anything addressed at a server outside the known set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnknownAddress {
    pub user: Option<String>,
    pub agent: u8,
    pub device: u8,
    pub server: JidServer,
}

/// A parsed, validated JID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Jid {
    PhoneUser(UserAddress),
    PhoneDevice(DeviceAddress),
    LidUser(UserAddress),
    LidDevice(DeviceAddress),
    MsgrUser(UserAddress),
    MsgrDevice(DeviceAddress),
    InteropUser(UserAddress),
    InteropDevice(DeviceAddress),
    Group(String),
    Broadcast(String),
    Status,
    Call(String),
    Newsletter(String),
    Bot(DeviceAddress),
    Hosted(DeviceAddress),
    HostedLid(DeviceAddress),
    Server(JidServer),
    Unknown(UnknownAddress),
}

// ----------------------------------------------------------------------------
// Construction
// ----------------------------------------------------------------------------

/// Fields split out of the user part of a textual JID
#[derive(Default)]
struct UserPart<'a> {
    user: &'a str,
    device: Option<u32>,
    agent: Option<u32>,
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    User,
    Device,
    Agent,
}

impl Jid {
    /// Parse a textual JID, interning unknown servers in the global registry
    pub fn parse(text: &str) -> Result<Jid, AddressError> {
        Self::parse_with(text, ServerRegistry::global())
    }

    /// Parse a JID from raw bytes (UTF-8)
    pub fn parse_bytes(bytes: &[u8]) -> Result<Jid, AddressError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| AddressError::malformed(String::from_utf8_lossy(bytes), "not UTF-8"))?;
        Self::parse(text)
    }

    /// Parse a textual JID against an explicit server registry
    pub fn parse_with(text: &str, registry: &ServerRegistry) -> Result<Jid, AddressError> {
        let trimmed = text.strip_prefix('+').unwrap_or(text);
        if trimmed.is_empty() {
            return Err(AddressError::malformed(text, "empty JID"));
        }

        let Some(at) = last_unescaped_at(trimmed) else {
            return Ok(Jid::Server(registry.resolve(trimmed)));
        };

        let (user_part, server) = (&trimmed[..at], &trimmed[at + 1..]);
        if server.is_empty() {
            return Err(AddressError::malformed(text, "empty server"));
        }

        let parts = split_user_part(text, user_part)?;
        let user = (!parts.user.is_empty()).then_some(parts.user);
        Self::create(
            user,
            registry.resolve(server),
            parts.device.unwrap_or(0),
            parts.agent.unwrap_or(0),
        )
    }

    /// Build a JID from its components, validating the user grammar of the server
    pub fn create(
        user: Option<&str>,
        server: JidServer,
        device: u32,
        agent: u32,
    ) -> Result<Jid, AddressError> {
        let device = u8::try_from(device).map_err(|_| AddressError::DeviceOutOfRange { value: device })?;
        let agent = u8::try_from(agent).map_err(|_| AddressError::AgentOutOfRange { value: agent })?;
        let user = user
            .map(|u| u.strip_prefix('+').unwrap_or(u))
            .filter(|u| !u.is_empty());

        let kind = server.kind();
        if kind == ServerType::Unknown {
            if let Some(user) = user {
                grammar::opaque(user)?;
            }
            return Ok(Jid::Unknown(UnknownAddress {
                user: user.map(str::to_owned),
                agent,
                device,
                server,
            }));
        }

        let Some(user) = user else {
            if device > 0 || agent > 0 {
                return Err(AddressError::malformed(
                    server.address(),
                    "server JID cannot carry a device or agent",
                ));
            }
            return Ok(Jid::Server(server));
        };

        if !kind.is_user_like() && device > 0 {
            return Err(AddressError::DevicesUnsupported {
                server: server.address().to_owned(),
            });
        }
        if !kind.is_user_like() && agent > 0 {
            return Err(AddressError::AgentsUnsupported {
                server: server.address().to_owned(),
            });
        }

        let user_address = |server: JidServer| UserAddress {
            user: user.to_owned(),
            agent,
            server,
        };
        let device_address = |server: JidServer| DeviceAddress {
            user: user.to_owned(),
            agent,
            device,
            server,
        };

        let jid = match kind {
            ServerType::User | ServerType::LegacyUser => {
                grammar::phone(user)?;
                if device > 0 {
                    Jid::PhoneDevice(device_address(server))
                } else {
                    Jid::PhoneUser(user_address(server))
                }
            }
            ServerType::Lid => {
                grammar::lid(user)?;
                if device > 0 {
                    Jid::LidDevice(device_address(server))
                } else {
                    Jid::LidUser(user_address(server))
                }
            }
            ServerType::Messenger => {
                grammar::numeric(user)?;
                if device > 0 {
                    Jid::MsgrDevice(device_address(server))
                } else {
                    Jid::MsgrUser(user_address(server))
                }
            }
            ServerType::Interop => {
                grammar::interop(user)?;
                if device > 0 {
                    Jid::InteropDevice(device_address(server))
                } else {
                    Jid::InteropUser(user_address(server))
                }
            }
            ServerType::Bot => {
                grammar::numeric(user)?;
                Jid::Bot(device_address(server))
            }
            ServerType::Hosted => {
                grammar::numeric(user)?;
                Jid::Hosted(device_address(server))
            }
            ServerType::HostedLid => {
                grammar::numeric(user)?;
                Jid::HostedLid(device_address(server))
            }
            ServerType::Group => {
                grammar::group(user)?;
                Jid::Group(user.to_owned())
            }
            ServerType::Broadcast if user == STATUS_USER => Jid::Status,
            ServerType::Broadcast => {
                grammar::broadcast(user)?;
                Jid::Broadcast(user.to_owned())
            }
            ServerType::Call => {
                grammar::call(user)?;
                Jid::Call(user.to_owned())
            }
            ServerType::Newsletter => {
                grammar::numeric(user)?;
                Jid::Newsletter(user.to_owned())
            }
            ServerType::Unknown => Jid::Unknown(UnknownAddress {
                user: Some(user.to_owned()),
                agent,
                device,
                server,
            }),
        };
        Ok(jid)
    }

    /// A bare server JID such as `s.whatsapp.net`
    pub fn server_only(server: JidServer) -> Jid {
        Jid::Server(server)
    }

    /// Shorthand for a phone-number user on `s.whatsapp.net`
    pub fn phone(user: &str) -> Result<Jid, AddressError> {
        Self::create(Some(user), JidServer::USER, 0, 0)
    }

    /// Shorthand for a group JID on `g.us`
    pub fn group(id: &str) -> Result<Jid, AddressError> {
        Self::create(Some(id), JidServer::GROUP, 0, 0)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn user(&self) -> Option<&str> {
        match self {
            Jid::PhoneUser(a) | Jid::LidUser(a) | Jid::MsgrUser(a) | Jid::InteropUser(a) => {
                Some(&a.user)
            }
            Jid::PhoneDevice(a)
            | Jid::LidDevice(a)
            | Jid::MsgrDevice(a)
            | Jid::InteropDevice(a)
            | Jid::Bot(a)
            | Jid::Hosted(a)
            | Jid::HostedLid(a) => Some(&a.user),
            Jid::Group(id) | Jid::Broadcast(id) | Jid::Call(id) | Jid::Newsletter(id) => Some(id),
            Jid::Status => Some(STATUS_USER),
            Jid::Server(_) => None,
            Jid::Unknown(a) => a.user.as_deref(),
        }
    }

    pub fn server(&self) -> JidServer {
        match self {
            Jid::PhoneUser(a) | Jid::LidUser(a) | Jid::MsgrUser(a) | Jid::InteropUser(a) => {
                a.server.clone()
            }
            Jid::PhoneDevice(a)
            | Jid::LidDevice(a)
            | Jid::MsgrDevice(a)
            | Jid::InteropDevice(a)
            | Jid::Bot(a)
            | Jid::Hosted(a)
            | Jid::HostedLid(a) => a.server.clone(),
            Jid::Group(_) => JidServer::GROUP,
            Jid::Broadcast(_) | Jid::Status => JidServer::BROADCAST,
            Jid::Call(_) => JidServer::CALL,
            Jid::Newsletter(_) => JidServer::NEWSLETTER,
            Jid::Server(server) => server.clone(),
            Jid::Unknown(a) => a.server.clone(),
        }
    }

    pub fn server_type(&self) -> ServerType {
        self.server().kind()
    }

    pub fn device(&self) -> u8 {
        match self {
            Jid::PhoneDevice(a)
            | Jid::LidDevice(a)
            | Jid::MsgrDevice(a)
            | Jid::InteropDevice(a)
            | Jid::Bot(a)
            | Jid::Hosted(a)
            | Jid::HostedLid(a) => a.device,
            Jid::Unknown(a) => a.device,
            _ => 0,
        }
    }

    pub fn agent(&self) -> u8 {
        match self {
            Jid::PhoneUser(a) | Jid::LidUser(a) | Jid::MsgrUser(a) | Jid::InteropUser(a) => a.agent,
            Jid::PhoneDevice(a)
            | Jid::LidDevice(a)
            | Jid::MsgrDevice(a)
            | Jid::InteropDevice(a)
            | Jid::Bot(a)
            | Jid::Hosted(a)
            | Jid::HostedLid(a) => a.agent,
            Jid::Unknown(a) => a.agent,
            _ => 0,
        }
    }

    /// The same JID with device and agent stripped
    pub fn to_user_jid(&self) -> Jid {
        self.with_device(0)
    }

    /// The same user at another device with the agent dropped; non-user JIDs
    /// are returned unchanged
    pub fn with_device(&self, device: u8) -> Jid {
        let rebuild = |user: &str, server: JidServer| {
            Jid::create(Some(user), server, u32::from(device), 0).unwrap_or_else(|_| self.clone())
        };
        match self {
            Jid::PhoneUser(a) | Jid::LidUser(a) | Jid::MsgrUser(a) | Jid::InteropUser(a) => {
                rebuild(&a.user, a.server.clone())
            }
            Jid::PhoneDevice(a)
            | Jid::LidDevice(a)
            | Jid::MsgrDevice(a)
            | Jid::InteropDevice(a)
            | Jid::Bot(a)
            | Jid::Hosted(a)
            | Jid::HostedLid(a) => rebuild(&a.user, a.server.clone()),
            Jid::Unknown(a) => Jid::Unknown(UnknownAddress {
                device,
                agent: 0,
                ..a.clone()
            }),
            other => other.clone(),
        }
    }

    /// Address used to key Signal sessions for this device
    pub fn signal_address(&self) -> SignalAddress {
        let user = self.user().unwrap_or_default();
        let name = match self.agent() {
            0 => user.to_owned(),
            agent => format!("{user}_{agent}"),
        };
        SignalAddress::new(name, u32::from(self.device()))
    }

    /// Whether both JIDs name the same user regardless of device
    pub fn same_user(&self, other: &Jid) -> bool {
        self.user() == other.user() && self.server() == other.server()
    }

    // ------------------------------------------------------------------------
    // Predicates
    // ------------------------------------------------------------------------

    pub fn is_group(&self) -> bool {
        matches!(self, Jid::Group(_))
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Jid::Broadcast(_) | Jid::Status)
    }

    pub fn is_status(&self) -> bool {
        matches!(self, Jid::Status)
    }

    pub fn is_newsletter(&self) -> bool {
        matches!(self, Jid::Newsletter(_))
    }

    pub fn is_bot(&self) -> bool {
        matches!(self, Jid::Bot(_))
    }

    pub fn is_lid(&self) -> bool {
        matches!(self, Jid::LidUser(_) | Jid::LidDevice(_) | Jid::HostedLid(_))
    }

    /// Whether the JID identifies a person or one of their devices
    pub fn is_user(&self) -> bool {
        matches!(
            self,
            Jid::PhoneUser(_)
                | Jid::PhoneDevice(_)
                | Jid::LidUser(_)
                | Jid::LidDevice(_)
                | Jid::MsgrUser(_)
                | Jid::MsgrDevice(_)
                | Jid::InteropUser(_)
                | Jid::InteropDevice(_)
                | Jid::Hosted(_)
                | Jid::HostedLid(_)
        )
    }
}

/// Index of the last `@` that is not preceded by a backslash
fn last_unescaped_at(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    (0..bytes.len())
        .rev()
        .find(|&i| bytes[i] == b'@' && (i == 0 || bytes[i - 1] != b'\\'))
}

/// Split `user[:device][_agent]` (either suffix order, no repeats)
fn split_user_part<'a>(input: &str, user_part: &'a str) -> Result<UserPart<'a>, AddressError> {
    let mut parts = UserPart::default();
    let mut field = Field::User;
    let mut start = 0;

    for (i, byte) in user_part.bytes().enumerate() {
        let next = match byte {
            b':' => Field::Device,
            b'_' => Field::Agent,
            _ => continue,
        };
        let repeated = match next {
            Field::Device => parts.device.is_some() || field == Field::Device,
            Field::Agent => parts.agent.is_some() || field == Field::Agent,
            Field::User => false,
        };
        if repeated {
            return Err(AddressError::malformed(input, "repeated device or agent separator"));
        }
        assign(input, field, &user_part[start..i], &mut parts)?;
        field = next;
        start = i + 1;
    }
    assign(input, field, &user_part[start..], &mut parts)?;
    Ok(parts)
}

fn assign<'a>(
    input: &str,
    field: Field,
    value: &'a str,
    parts: &mut UserPart<'a>,
) -> Result<(), AddressError> {
    if field == Field::User {
        parts.user = value;
        return Ok(());
    }
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AddressError::malformed(input, "device and agent must be numeric"));
    }
    let parsed: u32 = value
        .parse()
        .map_err(|_| AddressError::malformed(input, "numeric component too large"))?;
    match field {
        Field::Device if parsed > 255 => Err(AddressError::DeviceOutOfRange { value: parsed }),
        Field::Agent if parsed > 255 => Err(AddressError::AgentOutOfRange { value: parsed }),
        Field::Device => {
            parts.device = Some(parsed);
            Ok(())
        }
        _ => {
            parts.agent = Some(parsed);
            Ok(())
        }
    }
}

// ----------------------------------------------------------------------------
// Text Conversions
// ----------------------------------------------------------------------------

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let server = self.server();
        let Some(user) = self.user() else {
            return f.write_str(server.address());
        };
        f.write_str(user)?;
        let agent = self.agent();
        if agent > 0 {
            write!(f, "_{agent}")?;
        }
        let device = self.device();
        if device > 0 {
            write!(f, ":{device}")?;
        }
        write!(f, "@{}", server.address())
    }
}

impl FromStr for Jid {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Jid::parse(s)
    }
}

impl Serialize for Jid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Jid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Jid::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_phone_device() {
        let jid = Jid::parse("15551234567:3@s.whatsapp.net").unwrap();
        assert!(matches!(jid, Jid::PhoneDevice(_)));
        assert_eq!(jid.user(), Some("15551234567"));
        assert_eq!(jid.device(), 3);
        assert_eq!(jid.to_string(), "15551234567:3@s.whatsapp.net");
        assert_eq!(jid.to_user_jid().to_string(), "15551234567@s.whatsapp.net");
    }

    #[test]
    fn test_parse_agent_and_device_in_either_order() {
        let a = Jid::parse("15551234567_1:2@s.whatsapp.net").unwrap();
        let b = Jid::parse("15551234567:2_1@s.whatsapp.net").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.agent(), 1);
        assert_eq!(a.device(), 2);
        assert_eq!(a.to_string(), "15551234567_1:2@s.whatsapp.net");
    }

    #[test]
    fn test_repeated_separator_rejected() {
        assert!(Jid::parse("1555:1:2@s.whatsapp.net").is_err());
        assert!(Jid::parse("1555_1_2@s.whatsapp.net").is_err());
    }

    #[test]
    fn test_device_out_of_range() {
        assert_eq!(
            Jid::parse("1555:256@s.whatsapp.net"),
            Err(AddressError::DeviceOutOfRange { value: 256 })
        );
        assert_eq!(
            Jid::create(Some("1555"), JidServer::USER, 0, 300),
            Err(AddressError::AgentOutOfRange { value: 300 })
        );
    }

    #[test]
    fn test_leading_plus_stripped() {
        let jid = Jid::parse("+15551234567@s.whatsapp.net").unwrap();
        assert_eq!(jid.user(), Some("15551234567"));
    }

    #[test]
    fn test_special_jids() {
        assert_eq!(Jid::parse("status@broadcast").unwrap(), Jid::Status);
        assert!(Jid::parse("120363025246125486@g.us").unwrap().is_group());
        assert!(Jid::parse("120363025246125486@newsletter")
            .unwrap()
            .is_newsletter());
        assert_eq!(
            Jid::parse("s.whatsapp.net").unwrap(),
            Jid::Server(JidServer::USER)
        );
        assert_eq!(Jid::parse("@g.us").unwrap(), Jid::Server(JidServer::GROUP));
    }

    #[test]
    fn test_unknown_server_is_interned() {
        let registry = ServerRegistry::new();
        let jid = Jid::parse_with("alice:4@example.org", &registry).unwrap();
        match &jid {
            Jid::Unknown(address) => {
                assert_eq!(address.user.as_deref(), Some("alice"));
                assert_eq!(address.device, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(jid.to_string(), "alice:4@example.org");
    }

    #[test]
    fn test_grammar_violations() {
        assert!(Jid::parse("abc@s.whatsapp.net").is_err());
        assert!(Jid::parse("123@call").is_err());
        assert!(Jid::parse("1555:2@g.us").is_err());
        assert!(Jid::parse("1555@").is_err());
    }

    #[test]
    fn test_agent_rejected_where_it_cannot_print() {
        assert_eq!(
            Jid::create(Some("120363025246125486"), JidServer::GROUP, 0, 1),
            Err(AddressError::AgentsUnsupported {
                server: "g.us".to_owned()
            })
        );
        assert!(Jid::parse("120363025246125486_1@g.us").is_err());
        assert!(Jid::parse("status_2@broadcast").is_err());
        assert!(Jid::create(None, JidServer::USER, 3, 0).is_err());
        assert!(Jid::create(None, JidServer::USER, 0, 1).is_err());

        let device = Jid::create(Some("15551234567"), JidServer::USER, 2, 1).unwrap();
        assert_eq!(device.agent(), 1);
        assert_eq!(Jid::parse(&device.to_string()).unwrap(), device);
    }

    #[test]
    fn test_unknown_server_user_must_print_back() {
        let registry = ServerRegistry::new();
        let server = registry.resolve("example.org");
        for user in ["alice:4", "alice_1", "al ice", "al\nice"] {
            assert!(Jid::create(Some(user), server.clone(), 0, 0).is_err(), "{user:?}");
        }
        let jid = Jid::create(Some("alice"), server, 4, 0).unwrap();
        assert_eq!(Jid::parse_with(&jid.to_string(), &registry).unwrap(), jid);
    }

    #[test]
    fn test_signal_address() {
        let jid = Jid::parse("15551234567_1:2@s.whatsapp.net").unwrap();
        let address = jid.signal_address();
        assert_eq!(address.name(), "15551234567_1");
        assert_eq!(address.device_id(), 2);
    }

    #[test]
    fn test_serde_as_string() {
        let jid = Jid::parse("123456789@lid").unwrap();
        let json = serde_json::to_string(&jid).unwrap();
        assert_eq!(json, "\"123456789@lid\"");
        let back: Jid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, jid);
    }
}
