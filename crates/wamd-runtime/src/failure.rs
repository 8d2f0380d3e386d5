//! Failure classification and the default failure policy

use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn};
use wamd_core::errors::WamdError;

use crate::services::{FailureHandler, Transport};

/// Where a caught failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureLocation {
    Message,
    HistorySync,
    AppStateSync,
    Stream,
    Login,
}

impl fmt::Display for FailureLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureLocation::Message => "message",
            FailureLocation::HistorySync => "history_sync",
            FailureLocation::AppStateSync => "app_state_sync",
            FailureLocation::Stream => "stream",
            FailureLocation::Login => "login",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    Ignore,
    Reconnect,
    ResetKeysAndReconnect,
}

/// Logs every failure; reconnects only when the stream itself broke
#[derive(Debug, Default)]
pub struct LoggingFailureHandler;

impl FailureHandler for LoggingFailureHandler {
    fn on_failure(&self, location: FailureLocation, error: &WamdError) -> FailureAction {
        match location {
            FailureLocation::Stream | FailureLocation::Login => {
                error!(%location, %error, "Connection-level failure");
                FailureAction::Reconnect
            }
            _ if !error.is_recoverable() => {
                error!(%location, %error, "Unrecoverable failure");
                FailureAction::Reconnect
            }
            _ => {
                warn!(%location, %error, "Recovered from failure");
                FailureAction::Ignore
            }
        }
    }
}

/// Routes caught failures to the handler and carries out its decision
#[derive(Clone)]
pub struct FailureReporter {
    handler: Arc<dyn FailureHandler>,
    transport: Arc<dyn Transport>,
}

impl FailureReporter {
    pub fn new(handler: Arc<dyn FailureHandler>, transport: Arc<dyn Transport>) -> Self {
        Self { handler, transport }
    }

    pub async fn report(&self, location: FailureLocation, error: &WamdError) -> FailureAction {
        let action = self.handler.on_failure(location, error);
        let reconnect = match action {
            FailureAction::Ignore => return action,
            FailureAction::Reconnect => true,
            FailureAction::ResetKeysAndReconnect => {
                warn!(%location, "Failure handler requested a key reset");
                true
            }
        };
        info!(%location, ?action, "Disconnecting after failure");
        if let Err(err) = self.transport.disconnect(reconnect).await {
            error!(error = %err, "Disconnect failed");
        }
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wamd_core::errors::CryptographicError;

    #[test]
    fn test_default_policy() {
        let handler = LoggingFailureHandler;
        let bad_mac = WamdError::from(CryptographicError::BadMac);
        assert_eq!(
            handler.on_failure(FailureLocation::Message, &bad_mac),
            FailureAction::Ignore
        );
        assert_eq!(
            handler.on_failure(FailureLocation::Stream, &bad_mac),
            FailureAction::Reconnect
        );
        let config = WamdError::config_error("bad");
        assert_eq!(
            handler.on_failure(FailureLocation::AppStateSync, &config),
            FailureAction::Reconnect
        );
    }
}
