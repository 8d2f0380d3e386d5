//! Core types shared across the protocol
//!
//! Timestamps, the time source abstraction and message identifiers.

use std::fmt;
use std::ops::{Add, Sub};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0 + other)
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Timestamp from the seconds resolution used by node attributes
    pub fn from_secs(seconds: u64) -> Self {
        Self(seconds.saturating_mul(1000))
    }

    /// Get current wall-clock timestamp
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Whole seconds, as carried in `t` attributes and protobuf timestamps
    pub fn as_secs(&self) -> u64 {
        self.0 / 1000
    }

    /// Add seconds to this timestamp
    pub fn add_seconds(&self, seconds: u64) -> Self {
        Self(self.0 + (seconds * 1000))
    }

    /// Get duration since another timestamp
    pub fn duration_since(&self, other: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Source of timestamps, injectable so engines can be driven by a fixed clock
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Wall-clock implementation of TimeSource
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

// ----------------------------------------------------------------------------
// Message Identifier
// ----------------------------------------------------------------------------

/// Identifier of an outgoing message or request stanza
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    const PREFIX: &'static str = "3EB0";

    /// Generate a fresh id in the `3EB0` + 16 upper-case hex form used by companions
    pub fn generate() -> Self {
        let random = uuid::Uuid::new_v4();
        let tail = hex::encode_upper(&random.as_bytes()[..8]);
        Self(format!("{}{}", Self::PREFIX, tail))
    }

    pub fn new<T: Into<String>>(id: T) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
