//! Error types for the WAMD protocol core
//!
//! This module contains every error type raised by the core crate: addressing,
//! binary codec, cryptographic, session, app-state sync and history errors, plus
//! the `WamdError` type that unifies them all.

use std::error::Error as StdError;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors raised while parsing or constructing a JID
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Malformed JID {input:?}: {reason}")]
    Malformed { input: String, reason: String },
    #[error("Device id {value} out of range (0-255)")]
    DeviceOutOfRange { value: u32 },
    #[error("Agent id {value} out of range (0-255)")]
    AgentOutOfRange { value: u32 },
    #[error("Server {server} does not carry device ids")]
    DevicesUnsupported { server: String },
    #[error("Server {server} does not carry agent ids")]
    AgentsUnsupported { server: String },
}

impl AddressError {
    pub(crate) fn malformed<I: Into<String>, R: Into<String>>(input: I, reason: R) -> Self {
        AddressError::Malformed {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the binary node codec and frame layer
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },
    #[error("Invalid tag {tag} in {context}")]
    InvalidTag { tag: u8, context: &'static str },
    #[error("Unknown token index {index} in dictionary {dictionary:?}")]
    InvalidToken { dictionary: Option<u8>, index: u8 },
    #[error("Node list cannot be empty")]
    EmptyList,
    #[error("Nodes nested deeper than {limit} levels")]
    NestingTooDeep { limit: usize },
    #[error("Invalid packed character {value:#x}")]
    InvalidPackedChar { value: u8 },
    #[error("String payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("{remaining} trailing bytes after node")]
    TrailingData { remaining: usize },
    #[error("Payload of {size} bytes exceeds the wire limit")]
    PayloadTooLarge { size: usize },
    #[error("Invalid JID on the wire: {0}")]
    InvalidJid(#[from] AddressError),
    #[error("Empty frame")]
    EmptyFrame,
    #[error("Compression failed: {reason}")]
    Compression { reason: String },
    #[error("Decompression failed: {reason}")]
    Decompression { reason: String },
}

/// Low-level cryptographic failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptographicError {
    #[error("Invalid key: {reason}")]
    InvalidKey { reason: String },
    #[error("Signature verification failed")]
    SignatureVerificationFailed,
    #[error("Message authentication failed")]
    BadMac,
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Key derivation failed")]
    KeyDerivationFailed,
    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },
    #[error("Unsupported message version {version}")]
    UnsupportedVersion { version: u8 },
    #[error("Message counter {counter} already used")]
    DuplicateMessage { counter: u32 },
    #[error("Message counter jumped {jump} steps ahead")]
    TooFarInFuture { jump: u32 },
    #[error("Invalid message padding")]
    InvalidPadding,
    #[error("Integrity check failed: {reason}")]
    IntegrityMismatch { reason: String },
}

impl CryptographicError {
    pub fn invalid_message<T: Into<String>>(reason: T) -> Self {
        CryptographicError::InvalidMessage {
            reason: reason.into(),
        }
    }

    pub fn invalid_key<T: Into<String>>(reason: T) -> Self {
        CryptographicError::InvalidKey {
            reason: reason.into(),
        }
    }
}

/// Signal session and sender-key errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("No session for {address}")]
    NoSession { address: String },
    #[error("Untrusted identity for {address}")]
    UntrustedIdentity { address: String },
    #[error("Unknown pre-key id {id}")]
    InvalidPreKeyId { id: u32 },
    #[error("Unknown signed pre-key id {id}")]
    InvalidSignedPreKeyId { id: u32 },
    #[error("No sender key state for {sender} in {group}")]
    NoSenderKey { group: String, sender: String },
    #[error("Sender key state for {group} cannot sign")]
    SenderKeyNotOwned { group: String },
}

/// App-state sync failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Missing app state key {key_id}")]
    MissingKey { key_id: String },
    #[error("Value MAC mismatch in {collection}")]
    InvalidValueMac { collection: String },
    #[error("Index MAC mismatch in {collection}")]
    InvalidIndexMac { collection: String },
    #[error("Snapshot MAC mismatch in {collection} at version {version}")]
    InvalidSnapshotMac { collection: String, version: u64 },
    #[error("Patch MAC mismatch in {collection} at version {version}")]
    InvalidPatchMac { collection: String, version: u64 },
    #[error("Malformed sync data: {reason}")]
    Malformed { reason: String },
    #[error("Server rejected {collection}: {reason}")]
    Rejected { collection: String, reason: String },
    #[error("Giving up on {collection} after {attempts} attempts")]
    AttemptsExhausted { collection: String, attempts: u32 },
}

impl SyncError {
    pub fn malformed<T: Into<String>>(reason: T) -> Self {
        SyncError::Malformed {
            reason: reason.into(),
        }
    }

    /// Failures that mean local state has diverged from the server
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            SyncError::MissingKey { .. }
                | SyncError::InvalidValueMac { .. }
                | SyncError::InvalidIndexMac { .. }
                | SyncError::InvalidSnapshotMac { .. }
                | SyncError::InvalidPatchMac { .. }
        )
    }
}

/// History sync payload failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("Notification carries neither an inline payload nor a media reference")]
    MissingPayload,
    #[error("Unknown history sync type {value}")]
    UnknownSyncType { value: i32 },
    #[error("Chunk {chunk} is beyond the last trackable chunk {limit}")]
    ChunkOutOfRange { chunk: u32, limit: u32 },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error type for the WAMD protocol
#[derive(Debug, thiserror::Error)]
pub enum WamdError {
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptographicError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("App state sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("History sync error: {0}")]
    History(#[from] HistoryError),

    #[error("Protobuf decode error: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A node did not have the shape the protocol requires
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// Failure reported by an injected collaborator (transport, downloader, store)
    #[error("{operation} failed: {source}")]
    Service {
        operation: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl WamdError {
    /// Create a protocol error for a malformed or unexpected node
    pub fn protocol<T: Into<String>>(reason: T) -> Self {
        WamdError::Protocol {
            reason: reason.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        WamdError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a codec error for a malformed frame
    pub fn codec_error(err: CodecError) -> Self {
        WamdError::Codec(err)
    }

    /// Wrap a collaborator failure
    pub fn service_error<E>(operation: &'static str, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        WamdError::Service {
            operation,
            source: source.into(),
        }
    }

    /// Create a session not found error
    pub fn no_session<A: ToString>(address: A) -> Self {
        WamdError::Session(SessionError::NoSession {
            address: address.to_string(),
        })
    }

    /// Whether the error came from a cryptographic or session check
    pub fn is_crypto_failure(&self) -> bool {
        matches!(self, WamdError::Crypto(_) | WamdError::Session(_))
    }

    /// Whether the failure is confined to a single unit of work (one message,
    /// one patch, one chunk) rather than the connection as a whole
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            WamdError::Configuration { .. } | WamdError::Service { .. }
        )
    }

    /// Whether the app-state engine should reset and retry
    pub fn is_sync_integrity_failure(&self) -> bool {
        matches!(self, WamdError::Sync(err) if err.is_integrity_failure())
    }
}

/// Result type for WAMD operations
pub type Result<T> = std::result::Result<T, WamdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_classification() {
        let err: WamdError = SyncError::InvalidPatchMac {
            collection: "regular".into(),
            version: 3,
        }
        .into();
        assert!(err.is_sync_integrity_failure());

        let err: WamdError = SyncError::malformed("short blob").into();
        assert!(!err.is_sync_integrity_failure());
    }

    #[test]
    fn test_service_error_keeps_source() {
        let err = WamdError::service_error("transport send", std::io::Error::other("socket closed"));
        assert!(err.to_string().contains("socket closed"));
        assert!(StdError::source(&err).is_some());
    }
}
