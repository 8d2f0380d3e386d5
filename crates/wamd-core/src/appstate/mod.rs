//! App-state sync primitives
//!
//! Collections of user settings and chat metadata are synchronized as a log
//! of encrypted, MAC-authenticated patches. Each collection keeps a version
//! and a 128-byte LT-hash over the value MACs of its live entries; decoding a
//! patch advances both and checks them against the MACs the sender computed.

pub mod action;
pub mod keys;
pub mod lthash;
pub mod mac;
pub mod patch;
pub mod state;
pub mod store;

pub use action::{MessageRef, Mutation, SyncAction};
pub use keys::{ExpandedAppStateKeys, KeyRing, PatchName};
pub use lthash::{LtHash, LT_HASH_SIZE, WA_PATCH_INTEGRITY};
pub use mac::{generate_content_mac, generate_index_mac, generate_patch_mac, generate_snapshot_mac};
pub use patch::{required_key_ids, PatchDecoder, PatchEncoder};
pub use state::LtHashState;
pub use store::{AppStateStore, InMemoryAppStateStore, SyncKey};
