//! Signal-style end-to-end encryption
//!
//! Pairwise sessions use X3DH to agree on a root key and the double ratchet
//! to derive per-message keys. Group messages use sender keys: a symmetric
//! hash chain per sending device, distributed to members over pairwise
//! sessions and authenticated with an XEdDSA signature on every message.

pub mod address;
pub mod cipher;
pub mod keys;
pub mod padding;
pub mod protocol;
pub mod records;
pub mod sender_key;
pub mod session;
pub mod store;

pub use address::{SenderKeyName, SignalAddress};
pub use cipher::SessionCipher;
pub use keys::{verify_signature, IdentityKeyPair, KeyPair, PrivateKey, PublicKey};
pub use padding::{pad_message, unpad_message};
pub use protocol::{
    Envelope, EnvelopeKind, PreKeySignalMessage, SenderKeyDistributionMessage, SenderKeyMessage,
    SignalMessage,
};
pub use records::{PreKeyBundle, PreKeyRecord, SignedPreKeyRecord};
pub use sender_key::SenderKeyRecord;
pub use session::{SessionRecord, SessionState};
pub use store::{InMemorySignalStore, SignalStore};
