//! WAMD Core Protocol Implementation
//!
//! This crate provides the pure protocol logic of the multi-device messaging
//! client: JID addressing, the binary node codec, the protobuf schema, Signal
//! sessions and sender keys, app-state sync primitives, history sync
//! accounting, media and poll-vote cryptography. It performs no network I/O;
//! the engines in `wamd-runtime` drive it.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod appstate;
pub mod binary;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod history;
pub mod jid;
pub mod media;
pub mod poll;
pub mod proto;
pub mod signal;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use binary::{AttributeValue, Attributes, Node, NodeBuilder, NodeContent};
pub use config::WamdConfig;
pub use errors::{Result, WamdError};
pub use jid::{Jid, JidServer, ServerType};
pub use types::{MessageId, SystemTimeSource, TimeSource, Timestamp};
