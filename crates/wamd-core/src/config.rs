//! Centralized Configuration Management
//!
//! All tunables of the core primitives and the runtime engines live here so a
//! client can be configured from a single serde-deserializable structure.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, WamdError};
use crate::history::HistoryPolicy;

// ----------------------------------------------------------------------------
// Message Pipeline Configuration
// ----------------------------------------------------------------------------

/// Configuration for the inbound/outbound message pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageConfig {
    /// Maximum random padding appended to plaintexts before encryption
    pub max_padding: u8,
    /// Maximum device ids remembered per user
    pub max_devices_per_user: usize,
    /// Send a retry receipt when a message cannot be decrypted
    pub send_retry_receipts: bool,
    /// Pull app state as soon as new sync keys arrive
    pub pull_on_key_share: bool,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            max_padding: 16,
            max_devices_per_user: 64,
            send_retry_receipts: true,
            pull_on_key_share: true,
        }
    }
}

// ----------------------------------------------------------------------------
// History Sync Configuration
// ----------------------------------------------------------------------------

/// Configuration for history synchronization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySyncConfig {
    /// Which history sync types are imported
    pub policy: HistoryPolicy,
    /// Inactivity window after which pending tracks are force-completed
    pub completion_timeout_secs: u64,
}

impl Default for HistorySyncConfig {
    fn default() -> Self {
        Self {
            policy: HistoryPolicy::Full,
            completion_timeout_secs: 25,
        }
    }
}

impl HistorySyncConfig {
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }
}

// ----------------------------------------------------------------------------
// App State Configuration
// ----------------------------------------------------------------------------

/// Configuration for app-state synchronization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStateConfig {
    /// Attempts per collection before giving up on a pull
    pub max_attempts: u32,
    /// Verify snapshot and patch MACs while decoding
    pub validate_macs: bool,
}

impl Default for AppStateConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            validate_macs: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Limits applied to Signal session and sender-key state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Skipped message keys kept per receiver chain
    pub max_skipped_message_keys: usize,
    /// Receiver chains kept per session
    pub max_receiver_chains: usize,
    /// Cached message keys kept per sender-key state
    pub max_sender_key_message_keys: usize,
    /// Largest forward jump accepted in a chain counter
    pub max_forward_jumps: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_skipped_message_keys: 2000,
            max_receiver_chains: 5,
            max_sender_key_message_keys: 2000,
            max_forward_jumps: 25_000,
        }
    }
}

// ----------------------------------------------------------------------------
// Top Level Configuration
// ----------------------------------------------------------------------------

/// Complete client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WamdConfig {
    pub message: MessageConfig,
    pub history: HistorySyncConfig,
    pub app_state: AppStateConfig,
    pub session: SessionConfig,
}

impl WamdConfig {
    /// Configuration for tests: short timers, no retry receipts
    pub fn testing() -> Self {
        Self {
            message: MessageConfig {
                send_retry_receipts: false,
                pull_on_key_share: false,
                ..MessageConfig::default()
            },
            history: HistorySyncConfig {
                policy: HistoryPolicy::Full,
                completion_timeout_secs: 1,
            },
            app_state: AppStateConfig::default(),
            session: SessionConfig::default(),
        }
    }

    /// Configuration for clients that only want recent history quickly
    pub fn low_latency() -> Self {
        Self {
            history: HistorySyncConfig {
                policy: HistoryPolicy::Recent,
                completion_timeout_secs: 10,
            },
            app_state: AppStateConfig {
                max_attempts: 2,
                validate_macs: true,
            },
            ..Self::default()
        }
    }

    /// Reject configurations the engines cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.message.max_padding == 0 || self.message.max_padding > 16 {
            return Err(WamdError::config_error(
                "max_padding must be between 1 and 16",
            ));
        }
        if self.message.max_devices_per_user == 0 {
            return Err(WamdError::config_error(
                "max_devices_per_user must be positive",
            ));
        }
        if self.history.completion_timeout_secs == 0 {
            return Err(WamdError::config_error(
                "completion_timeout_secs must be positive",
            ));
        }
        if self.app_state.max_attempts == 0 {
            return Err(WamdError::config_error("max_attempts must be positive"));
        }
        if self.session.max_receiver_chains == 0 {
            return Err(WamdError::config_error(
                "max_receiver_chains must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = WamdConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.history.completion_timeout(), Duration::from_secs(25));
        assert_eq!(config.app_state.max_attempts, 3);
        assert_eq!(config.session.max_receiver_chains, 5);
    }

    #[test]
    fn test_presets_validate() {
        assert!(WamdConfig::testing().validate().is_ok());
        assert!(WamdConfig::low_latency().validate().is_ok());
    }

    #[test]
    fn test_invalid_padding_rejected() {
        let mut config = WamdConfig::default();
        config.message.max_padding = 17;
        assert!(matches!(
            config.validate(),
            Err(WamdError::Configuration { .. })
        ));
    }

    #[test]
    fn test_config_serde() {
        let config = WamdConfig::low_latency();
        let json = serde_json::to_string(&config).unwrap();
        let back: WamdConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.history.policy, HistoryPolicy::Recent);
    }
}
