//! Client Builder API
//!
//! Wires configuration, persisted stores and the host's collaborators into a
//! [`Client`]. Only the transport is mandatory; every other collaborator has
//! an in-memory or no-op default.

use std::sync::Arc;

use tracing::info;
use wamd_core::appstate::{AppStateStore, InMemoryAppStateStore};
use wamd_core::signal::{InMemorySignalStore, SessionCipher, SignalStore};
use wamd_core::{Jid, Result, SystemTimeSource, TimeSource, WamdConfig, WamdError};

use crate::appstate::AppStateEngine;
use crate::client::Client;
use crate::failure::{FailureReporter, LoggingFailureHandler};
use crate::history::HistorySyncEngine;
use crate::listeners::ListenerRegistry;
use crate::pipeline::MessagePipeline;
use crate::services::{FailureHandler, Listener, MediaDownloader, NoMediaDownloader, RuntimeServices, Transport};
use crate::store::Store;

// ----------------------------------------------------------------------------
// Client Builder
// ----------------------------------------------------------------------------

/// Builder for a client bound to one logged-in device
pub struct ClientBuilder {
    self_jid: Jid,
    config: WamdConfig,
    transport: Option<Arc<dyn Transport>>,
    downloader: Arc<dyn MediaDownloader>,
    signal_store: Option<Arc<dyn SignalStore>>,
    app_state_store: Option<Arc<dyn AppStateStore>>,
    failure_handler: Arc<dyn FailureHandler>,
    clock: Arc<dyn TimeSource>,
    listeners: Vec<Arc<dyn Listener>>,
}

impl ClientBuilder {
    /// Create a builder for the device `self_jid`
    pub fn new(self_jid: Jid) -> Self {
        Self {
            self_jid,
            config: WamdConfig::default(),
            transport: None,
            downloader: Arc::new(NoMediaDownloader),
            signal_store: None,
            app_state_store: None,
            failure_handler: Arc::new(LoggingFailureHandler),
            clock: Arc::new(SystemTimeSource::new()),
            listeners: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: WamdConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the authenticated connection nodes are sent through
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_media_downloader(mut self, downloader: Arc<dyn MediaDownloader>) -> Self {
        self.downloader = downloader;
        self
    }

    /// Persisted identity, sessions and sender keys
    pub fn with_signal_store(mut self, store: Arc<dyn SignalStore>) -> Self {
        self.signal_store = Some(store);
        self
    }

    /// Persisted app-state keys and collection hash states
    pub fn with_app_state_store(mut self, store: Arc<dyn AppStateStore>) -> Self {
        self.app_state_store = Some(store);
        self
    }

    pub fn with_failure_handler(mut self, handler: Arc<dyn FailureHandler>) -> Self {
        self.failure_handler = handler;
        self
    }

    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a listener before the first event can be emitted
    pub fn with_listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Build the client; listeners are attached to the current tokio runtime
    pub fn build(self) -> Result<Client> {
        self.config.validate()?;
        let transport = self
            .transport
            .ok_or_else(|| WamdError::config_error("a transport is required"))?;

        let listeners = Arc::new(ListenerRegistry::new());
        for listener in self.listeners {
            listeners.register(listener);
        }
        let services = RuntimeServices {
            transport: transport.clone(),
            downloader: self.downloader,
            store: Arc::new(Store::new(self.self_jid.clone())),
            listeners,
            failures: FailureReporter::new(self.failure_handler, transport),
            clock: self.clock,
        };

        let signal_store = self
            .signal_store
            .unwrap_or_else(|| Arc::new(InMemorySignalStore::new()));
        let app_state_store = self
            .app_state_store
            .unwrap_or_else(|| Arc::new(InMemoryAppStateStore::new()));

        let cipher = SessionCipher::new(signal_store, self.config.session.clone());
        let history = HistorySyncEngine::new(self.config.history.clone(), services.clone());
        let app_state = Arc::new(AppStateEngine::new(
            self.config.app_state.clone(),
            services.clone(),
            app_state_store,
        ));
        let pipeline = MessagePipeline::new(
            self.config.message.clone(),
            services.clone(),
            cipher,
            history.clone(),
            app_state.clone(),
        );

        info!(device = %self.self_jid, "Client ready");
        Ok(Client::new(services, Arc::new(pipeline), history, app_state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use wamd_core::Node;

    struct Silent;

    #[async_trait]
    impl Transport for Silent {
        async fn send(&self, node: Node) -> anyhow::Result<Node> {
            Ok(node)
        }

        async fn send_no_response(&self, _node: Node) -> anyhow::Result<()> {
            Ok(())
        }

        async fn disconnect(&self, _reconnect: bool) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn device() -> Jid {
        Jid::parse("15550000000:2@s.whatsapp.net").unwrap()
    }

    #[test]
    fn test_transport_required() {
        let err = ClientBuilder::new(device()).build().err().unwrap();
        assert!(matches!(err, WamdError::Configuration { .. }));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = WamdConfig::testing();
        config.app_state.max_attempts = 0;
        let result = ClientBuilder::new(device())
            .with_config(config)
            .with_transport(Arc::new(Silent))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_build_with_defaults() {
        let client = ClientBuilder::new(device())
            .with_config(WamdConfig::testing())
            .with_transport(Arc::new(Silent))
            .build()
            .unwrap();
        assert_eq!(client.store().self_jid(), &device());
        assert_eq!(client.store().chat_count(), 0);
    }
}
