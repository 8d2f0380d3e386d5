//! Client facade
//!
//! Routes inbound nodes to the engine that owns them and exposes the
//! operations a host application drives: sending, polls, app-state pulls and
//! pushes, listener registration.

use std::sync::Arc;

use tracing::{debug, warn};
use wamd_core::appstate::{PatchName, SyncAction};
use wamd_core::binary::unpack_frame;
use wamd_core::proto::{Message, SyncdOperation};
use wamd_core::{Jid, MessageId, Node, Result, WamdError};

use crate::appstate::AppStateEngine;
use crate::failure::FailureLocation;
use crate::history::HistorySyncEngine;
use crate::listeners::ListenerId;
use crate::pipeline::{poll_creation, receipts, MessagePipeline};
use crate::services::{Listener, RuntimeServices};
use crate::store::Store;

/// A logged-in device's view of the protocol
pub struct Client {
    services: RuntimeServices,
    pipeline: Arc<MessagePipeline>,
    history: Arc<HistorySyncEngine>,
    app_state: Arc<AppStateEngine>,
}

impl Client {
    pub(crate) fn new(
        services: RuntimeServices,
        pipeline: Arc<MessagePipeline>,
        history: Arc<HistorySyncEngine>,
        app_state: Arc<AppStateEngine>,
    ) -> Self {
        Self {
            services,
            pipeline,
            history,
            app_state,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.services.store
    }

    pub fn pipeline(&self) -> &Arc<MessagePipeline> {
        &self.pipeline
    }

    pub fn history(&self) -> &Arc<HistorySyncEngine> {
        &self.history
    }

    pub fn app_state(&self) -> &Arc<AppStateEngine> {
        &self.app_state
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener>) -> ListenerId {
        self.services.listeners.register(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.services.listeners.unregister(id)
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Decode a wire frame and handle the node it carries
    pub async fn handle_frame(&self, frame: &[u8]) -> Result<()> {
        let node = match unpack_frame(frame) {
            Ok(node) => node,
            Err(err) => {
                let err = WamdError::codec_error(err);
                warn!(error = %err, bytes = frame.len(), "Dropping malformed frame");
                self.services.failures.report(FailureLocation::Stream, &err).await;
                return Err(err);
            }
        };
        self.handle_node(&node).await
    }

    pub async fn handle_node(&self, node: &Node) -> Result<()> {
        let (location, result) = match node.tag() {
            "message" => (FailureLocation::Message, self.pipeline.decode(node).await),
            "notification" => (FailureLocation::AppStateSync, self.handle_notification(node).await),
            "failure" => {
                let reason = node
                    .attr_str("reason")
                    .map_or_else(|| "unspecified".to_owned(), |reason| reason.into_owned());
                (
                    FailureLocation::Login,
                    Err(WamdError::protocol(format!("login failed: {reason}"))),
                )
            }
            other => {
                debug!(tag = other, "Node not handled by the client core");
                return Ok(());
            }
        };
        if let Err(err) = &result {
            self.services.failures.report(location, err).await;
        }
        result
    }

    async fn handle_notification(&self, node: &Node) -> Result<()> {
        if let Err(err) = self
            .services
            .send_no_response("notification ack", receipts::ack(node))
            .await
        {
            warn!(error = %err, "Could not acknowledge notification");
        }
        if node.attr_str("type").as_deref() == Some("server_sync") {
            self.app_state.handle_server_sync(node).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    pub async fn send_message(&self, chat: &Jid, message: Message) -> Result<MessageId> {
        self.pipeline.send(chat, message).await
    }

    pub async fn send_text(&self, chat: &Jid, text: &str) -> Result<MessageId> {
        let message = Message {
            conversation: Some(text.to_owned()),
            ..Default::default()
        };
        self.send_message(chat, message).await
    }

    /// Create a poll in `chat`
    pub async fn send_poll(
        &self,
        chat: &Jid,
        name: &str,
        options: &[&str],
        selectable_options_count: u32,
    ) -> Result<MessageId> {
        self.send_message(chat, poll_creation(name, options, selectable_options_count))
            .await
    }

    /// Vote on a poll we have stored; an empty selection withdraws the vote
    pub async fn vote(&self, chat: &Jid, poll_id: &str, selected: &[&str]) -> Result<MessageId> {
        let poll = self
            .store()
            .find_message(chat, poll_id)
            .ok_or_else(|| WamdError::protocol(format!("unknown poll {poll_id} in {chat}")))?;
        let vote = self.pipeline.attribute_poll_update_message(&poll, selected)?;
        self.send_message(chat, vote).await
    }

    pub async fn pull_app_state(&self, collections: &[PatchName]) -> Result<()> {
        self.app_state.pull(collections).await.map(|_| ())
    }

    pub async fn push_app_state(&self, collection: PatchName, actions: Vec<(SyncdOperation, SyncAction)>) -> Result<()> {
        self.app_state.push(collection, actions).await
    }

    /// Forget in-flight sync progress, e.g. after a reconnect with a new
    /// session
    pub fn reset(&self) {
        self.history.reset();
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.services
            .transport
            .disconnect(false)
            .await
            .map_err(|err| WamdError::service_error("disconnect", err))
    }
}
