//! Collaborator interfaces the engines are driven through
//!
//! The socket, the media CDN, event consumers and the failure policy are all
//! owned by the host application and injected behind these traits.

use std::sync::Arc;

use async_trait::async_trait;
use wamd_core::errors::WamdError;
use wamd_core::media::MediaKind;
use wamd_core::proto::{ExternalBlobReference, HistorySyncNotification};
use wamd_core::{Jid, MessageId, Node, Result, TimeSource};

use crate::events::Event;
use crate::failure::{FailureAction, FailureLocation, FailureReporter};
use crate::listeners::ListenerRegistry;
use crate::store::Store;

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

/// Authenticated connection to the server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a node and wait for the response carrying the same id
    async fn send(&self, node: Node) -> anyhow::Result<Node>;

    /// Send a node without waiting for a response
    async fn send_no_response(&self, node: Node) -> anyhow::Result<()>;

    async fn disconnect(&self, reconnect: bool) -> anyhow::Result<()>;
}

// ----------------------------------------------------------------------------
// Media
// ----------------------------------------------------------------------------

/// Where an encrypted blob lives and how to check it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaReference {
    pub kind: MediaKind,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_sha256: Option<Vec<u8>>,
    pub file_enc_sha256: Option<Vec<u8>>,
    pub file_length: Option<u64>,
}

impl MediaReference {
    pub fn from_history_notification(notification: &HistorySyncNotification) -> Option<Self> {
        Some(Self {
            kind: MediaKind::History,
            direct_path: notification.direct_path.clone()?,
            media_key: notification.media_key.clone()?,
            file_sha256: notification.file_sha256.clone(),
            file_enc_sha256: notification.file_enc_sha256.clone(),
            file_length: notification.file_length,
        })
    }

    pub fn from_blob_reference(reference: &ExternalBlobReference) -> Option<Self> {
        Some(Self {
            kind: MediaKind::AppState,
            direct_path: reference.direct_path.clone()?,
            media_key: reference.media_key.clone()?,
            file_sha256: reference.file_sha256.clone(),
            file_enc_sha256: reference.file_enc_sha256.clone(),
            file_length: reference.file_size_bytes,
        })
    }
}

/// Fetches encrypted blobs; decryption happens in the engines
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn download(&self, reference: &MediaReference) -> anyhow::Result<Vec<u8>>;
}

/// Downloader for clients that never fetch media
pub struct NoMediaDownloader;

#[async_trait]
impl MediaDownloader for NoMediaDownloader {
    async fn download(&self, reference: &MediaReference) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("no media downloader configured for {}", reference.direct_path)
    }
}

// ----------------------------------------------------------------------------
// Listeners and Failures
// ----------------------------------------------------------------------------

/// Receives events on its own task, in arrival order
#[async_trait]
pub trait Listener: Send + Sync {
    async fn on_event(&self, event: Arc<Event>);
}

/// Decides what happens after a failure was caught
pub trait FailureHandler: Send + Sync {
    fn on_failure(&self, location: FailureLocation, error: &WamdError) -> FailureAction;
}

// ----------------------------------------------------------------------------
// Shared Handles
// ----------------------------------------------------------------------------

/// Handles every engine works through
#[derive(Clone)]
pub struct RuntimeServices {
    pub transport: Arc<dyn Transport>,
    pub downloader: Arc<dyn MediaDownloader>,
    pub store: Arc<Store>,
    pub listeners: Arc<ListenerRegistry>,
    pub failures: FailureReporter,
    pub clock: Arc<dyn TimeSource>,
}

impl RuntimeServices {
    pub fn self_jid(&self) -> &Jid {
        self.store.self_jid()
    }

    pub fn emit(&self, event: Event) {
        self.listeners.dispatch(event);
    }

    /// Send a request and wait for its response
    pub async fn query(&self, operation: &'static str, node: Node) -> Result<Node> {
        self.transport
            .send(node)
            .await
            .map_err(|err| WamdError::service_error(operation, err))
    }

    pub async fn send_no_response(&self, operation: &'static str, node: Node) -> Result<()> {
        self.transport
            .send_no_response(node)
            .await
            .map_err(|err| WamdError::service_error(operation, err))
    }

    pub async fn download(&self, operation: &'static str, reference: &MediaReference) -> Result<Vec<u8>> {
        self.downloader
            .download(reference)
            .await
            .map_err(|err| WamdError::service_error(operation, err))
    }

    /// Fresh id for an outgoing request
    pub fn request_id(&self) -> String {
        MessageId::generate().into_string()
    }
}

/// Reason carried by an `type="error"` response, if it is one
pub fn response_error(node: &Node) -> Option<String> {
    if node.attr_str("type").as_deref() != Some("error") {
        return None;
    }
    let reason = node.child("error").map_or_else(
        || "unspecified".to_owned(),
        |error| {
            let code = error.attr_str("code").unwrap_or_default();
            let text = error.attr_str("text").unwrap_or_default();
            format!("{code} {text}").trim().to_owned()
        },
    );
    Some(reason)
}
