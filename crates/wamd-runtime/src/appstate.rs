//! App-state sync engine
//!
//! Pulls and pushes patches for the app-state collections and projects the
//! decoded actions into the local store. Pulls and pushes share one permit:
//! both read-modify-write the per-collection hash state.

use std::sync::Arc;

use prost::Message as _;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use wamd_core::appstate::{
    required_key_ids, AppStateStore, LtHashState, Mutation, PatchDecoder, PatchEncoder, PatchName,
    SyncAction,
};
use wamd_core::config::AppStateConfig;
use wamd_core::errors::SyncError;
use wamd_core::media::decrypt_media;
use wamd_core::proto::{ExternalBlobReference, SyncdMutations, SyncdOperation, SyncdPatch, SyncdSnapshot};
use wamd_core::{Jid, JidServer, Node, Result, WamdError};

use crate::events::Event;
use crate::services::{response_error, MediaReference, RuntimeServices};

const SYNC_XMLNS: &str = "w:sync:app:state";

/// One collection's slice of a sync response
struct CollectionResponse {
    snapshot: Option<SyncdSnapshot>,
    patches: Vec<SyncdPatch>,
    has_more: bool,
}

pub struct AppStateEngine {
    config: AppStateConfig,
    services: RuntimeServices,
    keys: Arc<dyn AppStateStore>,
    permit: Semaphore,
}

impl AppStateEngine {
    pub fn new(config: AppStateConfig, services: RuntimeServices, keys: Arc<dyn AppStateStore>) -> Self {
        Self {
            config,
            services,
            keys,
            permit: Semaphore::new(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn AppStateStore> {
        &self.keys
    }

    // ------------------------------------------------------------------------
    // Pull
    // ------------------------------------------------------------------------

    /// Bring `collections` up to date with the server
    ///
    /// A failing collection does not stop the others; the first failure is
    /// returned once all were attempted.
    pub async fn pull(&self, collections: &[PatchName]) -> Result<Vec<Mutation>> {
        let _permit = self
            .permit
            .acquire()
            .await
            .map_err(|_| WamdError::protocol("app state engine closed"))?;

        let mut applied = Vec::new();
        let mut synced = Vec::new();
        let mut first_error = None;
        for &name in collections {
            match self.pull_collection(name).await {
                Ok(mutations) => {
                    synced.push(name);
                    applied.extend(mutations);
                }
                Err(err) => {
                    warn!(collection = %name, error = %err, "App state pull failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        if !synced.is_empty() {
            info!(collections = ?synced, mutations = applied.len(), "App state synced");
            self.services.emit(Event::AppStateSyncComplete { collections: synced });
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(applied),
        }
    }

    /// Sync one collection, resetting to a snapshot when integrity checks fail
    async fn pull_collection(&self, name: PatchName) -> Result<Vec<Mutation>> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sync_collection(name).await {
                Ok(mutations) => return Ok(mutations),
                Err(err) if err.is_sync_integrity_failure() => {
                    warn!(
                        collection = %name,
                        attempt,
                        error = %err,
                        "Resetting collection after integrity failure"
                    );
                    self.keys.delete_hash_state(name).await?;
                    if attempt >= max_attempts {
                        return Err(SyncError::AttemptsExhausted {
                            collection: name.to_string(),
                            attempts: attempt,
                        }
                        .into());
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn sync_collection(&self, name: PatchName) -> Result<Vec<Mutation>> {
        let mut state = self.keys.hash_state(name).await?.unwrap_or_default();
        let mut applied = Vec::new();
        loop {
            let request = self.sync_request(name, &state);
            let response = self.services.query("app state sync", request).await?;
            let collection = self.parse_response(name, &response).await?;

            let key_ids = required_key_ids(collection.snapshot.as_ref(), &collection.patches);
            let ring = self.keys.key_ring(&key_ids).await?;
            let decoder = PatchDecoder::new(&ring, self.config.validate_macs);

            let mut mutations = Vec::new();
            if let Some(snapshot) = &collection.snapshot {
                let (next, decoded) = decoder.decode_snapshot(name, snapshot)?;
                state = next;
                mutations.extend(decoded);
            }
            let (next, decoded) = decoder.decode_patches(name, &state, &collection.patches)?;
            state = next;
            mutations.extend(decoded);

            self.keys.save_hash_state(name, &state).await?;
            debug!(
                collection = %name,
                version = state.version,
                mutations = mutations.len(),
                has_more = collection.has_more,
                "Applied sync response"
            );
            self.apply(&mutations);
            applied.extend(mutations);

            if !collection.has_more {
                return Ok(applied);
            }
        }
    }

    fn sync_request(&self, name: PatchName, state: &LtHashState) -> Node {
        let collection = Node::builder("collection")
            .attr("name", name.as_str())
            .attr("version", state.version)
            .attr("return_snapshot", if state.version == 0 { "true" } else { "false" })
            .build();
        self.sync_iq(collection)
    }

    fn sync_iq(&self, collection: Node) -> Node {
        Node::builder("iq")
            .attr("id", self.services.request_id())
            .attr("xmlns", SYNC_XMLNS)
            .attr("type", "set")
            .attr("to", Jid::server_only(JidServer::USER))
            .child(Node::builder("sync").child(collection).build())
            .build()
    }

    async fn parse_response(&self, name: PatchName, response: &Node) -> Result<CollectionResponse> {
        if let Some(reason) = response_error(response) {
            return Err(SyncError::Rejected {
                collection: name.to_string(),
                reason,
            }
            .into());
        }
        let collection = response
            .child("sync")
            .into_iter()
            .flat_map(|sync| sync.children_by_tag("collection"))
            .find(|node| node.attr_str("name").as_deref() == Some(name.as_str()))
            .ok_or_else(|| WamdError::protocol(format!("sync response without {name}")))?;
        if let Some(reason) = response_error(collection) {
            return Err(SyncError::Rejected {
                collection: name.to_string(),
                reason,
            }
            .into());
        }

        let snapshot = match collection.child("snapshot").and_then(Node::content_bytes) {
            Some(bytes) => Some(self.download_snapshot(bytes).await?),
            None => None,
        };
        let mut patches = Vec::new();
        for node in collection
            .child("patches")
            .into_iter()
            .flat_map(|patches| patches.children_by_tag("patch"))
        {
            let bytes = node
                .content_bytes()
                .ok_or_else(|| SyncError::malformed("patch node without content"))?;
            let mut patch = SyncdPatch::decode(bytes)?;
            self.resolve_external_mutations(&mut patch).await?;
            patches.push(patch);
        }

        Ok(CollectionResponse {
            snapshot,
            patches,
            has_more: collection.attr_str("has_more_patches").as_deref() == Some("true"),
        })
    }

    async fn download_blob(&self, operation: &'static str, blob: &ExternalBlobReference) -> Result<Vec<u8>> {
        let reference = MediaReference::from_blob_reference(blob)
            .ok_or_else(|| SyncError::malformed("external blob without media key or path"))?;
        let encrypted = self.services.download(operation, &reference).await?;
        Ok(decrypt_media(
            reference.kind,
            &reference.media_key,
            &encrypted,
            reference.file_sha256.as_deref(),
            reference.file_enc_sha256.as_deref(),
        )?)
    }

    async fn download_snapshot(&self, reference: &[u8]) -> Result<SyncdSnapshot> {
        let blob = ExternalBlobReference::decode(reference)?;
        let bytes = self.download_blob("app state snapshot download", &blob).await?;
        Ok(SyncdSnapshot::decode(bytes.as_slice())?)
    }

    async fn resolve_external_mutations(&self, patch: &mut SyncdPatch) -> Result<()> {
        let Some(blob) = patch.external_mutations.take() else {
            return Ok(());
        };
        let bytes = self.download_blob("app state mutations download", &blob).await?;
        let external = SyncdMutations::decode(bytes.as_slice())?;
        debug!(count = external.mutations.len(), "Resolved external mutations");
        patch.mutations.extend(external.mutations);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Push
    // ------------------------------------------------------------------------

    /// Encode `actions` as one patch and submit it
    ///
    /// The advanced hash state is saved only after the server accepts it.
    pub async fn push(&self, name: PatchName, actions: Vec<(SyncdOperation, SyncAction)>) -> Result<()> {
        let _permit = self
            .permit
            .acquire()
            .await
            .map_err(|_| WamdError::protocol("app state engine closed"))?;

        let key = self
            .keys
            .latest_sync_key()
            .await?
            .ok_or_else(|| SyncError::MissingKey {
                key_id: "latest".to_owned(),
            })?;
        let ring = self.keys.key_ring(std::slice::from_ref(&key.key_id)).await?;
        let state = self.keys.hash_state(name).await?.unwrap_or_default();
        let (patch, next) = PatchEncoder::new(&ring).encode_patch(
            &state,
            &key.key_id,
            name,
            &actions,
            self.services.clock.now(),
        )?;

        let collection = Node::builder("collection")
            .attr("name", name.as_str())
            .attr("version", state.version)
            .attr("return_snapshot", "false")
            .child(Node::builder("patch").bytes(patch.encode_to_vec()).build())
            .build();
        let response = self
            .services
            .query("app state push", self.sync_iq(collection))
            .await?;
        let collection_error = response
            .child("sync")
            .and_then(|sync| sync.child("collection"))
            .and_then(response_error);
        if let Some(reason) = response_error(&response).or(collection_error) {
            return Err(SyncError::Rejected {
                collection: name.to_string(),
                reason,
            }
            .into());
        }

        self.keys.save_hash_state(name, &next).await?;
        info!(collection = %name, version = next.version, actions = actions.len(), "Pushed app state patch");

        let decoder = PatchDecoder::new(&ring, false);
        let mutations = patch
            .mutations
            .iter()
            .map(|mutation| decoder.decode_mutation(name, mutation))
            .collect::<Result<Vec<_>>>()?;
        self.apply(&mutations);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Apply
    // ------------------------------------------------------------------------

    /// Project decoded mutations into the store and notify listeners
    pub fn apply(&self, mutations: &[Mutation]) {
        for mutation in mutations {
            if mutation.operation == SyncdOperation::Set {
                self.apply_action(&mutation.action);
            }
            self.services.emit(Event::AppStateAction {
                mutation: mutation.clone(),
            });
            match &mutation.action {
                SyncAction::PrimaryFeature { flags } => self.services.emit(Event::FeatureFlags {
                    flags: flags.clone(),
                }),
                action @ (SyncAction::PushName { .. }
                | SyncAction::Locale { .. }
                | SyncAction::SecurityNotification { .. }
                | SyncAction::UnarchiveChatsSetting { .. }
                | SyncAction::TimeFormat { .. }) => self.services.emit(Event::Setting {
                    action: action.clone(),
                }),
                _ => {}
            }
        }
    }

    fn apply_action(&self, action: &SyncAction) {
        let store = &self.services.store;
        match action {
            SyncAction::Contact {
                jid,
                full_name,
                first_name,
            } => {
                let created = store.update_contact(jid, |contact| {
                    contact.full_name = full_name.clone();
                    contact.first_name = first_name.clone();
                });
                if created {
                    self.services.emit(Event::ContactCreated { jid: jid.to_user_jid() });
                }
            }
            SyncAction::Mute {
                chat,
                muted,
                end_timestamp,
            } => {
                store.update_chat(chat, |chat| {
                    chat.muted_until = muted.then(|| end_timestamp.unwrap_or(-1));
                });
            }
            SyncAction::Pin { chat, pinned } => {
                store.update_chat(chat, |chat| chat.pinned = *pinned);
            }
            SyncAction::Archive { chat, archived } => {
                store.update_chat(chat, |chat| chat.archived = *archived);
            }
            SyncAction::Star { message, starred } => {
                store.update_chat(&message.chat, |chat| {
                    if let Some(record) = chat.messages.iter_mut().find(|record| record.id == message.id) {
                        record.starred = *starred;
                    }
                });
            }
            SyncAction::ClearChat { chat } => {
                store.update_chat(chat, |chat| {
                    chat.messages.clear();
                    chat.unread_count = 0;
                });
            }
            SyncAction::DeleteChat { chat } => {
                store.remove_chat(chat);
            }
            SyncAction::MarkChatAsRead { chat, read } => {
                store.update_chat(chat, |chat| {
                    chat.unread_count = if *read { 0 } else { chat.unread_count.max(1) };
                });
            }
            SyncAction::DeleteMessageForMe { message, .. } => {
                if store.delete_message(&message.chat, &message.id).is_some() {
                    self.services.emit(Event::MessageDeleted {
                        chat: message.chat.clone(),
                        id: message.id.clone(),
                        everyone: false,
                    });
                }
            }
            SyncAction::PushName { name } => store.set_push_name(Some(name.clone())),
            SyncAction::LabelAssociation {
                label_id,
                chat,
                labeled,
            } => {
                store.update_chat(chat, |chat| {
                    chat.labels.retain(|label| label != label_id);
                    if *labeled {
                        chat.labels.push(label_id.clone());
                    }
                });
            }
            SyncAction::Unknown { index } => {
                debug!(?index, "Unhandled app state action");
            }
            SyncAction::Locale { .. }
            | SyncAction::SecurityNotification { .. }
            | SyncAction::UnarchiveChatsSetting { .. }
            | SyncAction::PrimaryFeature { .. }
            | SyncAction::TimeFormat { .. }
            | SyncAction::LabelEdit { .. }
            | SyncAction::KeyExpiration { .. } => {}
        }
    }

    // ------------------------------------------------------------------------
    // Server Notifications
    // ------------------------------------------------------------------------

    /// Pull the collections named by a `server_sync` notification
    pub async fn handle_server_sync(&self, notification: &Node) -> Result<Vec<Mutation>> {
        let collections: Vec<PatchName> = notification
            .children_by_tag("collection")
            .filter_map(|node| node.attr_str("name")?.parse().ok())
            .collect();
        if collections.is_empty() {
            return Ok(Vec::new());
        }
        self.pull(&collections).await
    }
}
