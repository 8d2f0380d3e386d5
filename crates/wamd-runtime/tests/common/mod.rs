//! Shared fixtures: a scripted transport, a canned downloader, an event
//! collector and remote devices with their own Signal stores

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use prost::Message as _;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use wamd_core::appstate::InMemoryAppStateStore;
use wamd_core::config::SessionConfig;
use wamd_core::proto::Message;
use wamd_core::signal::{pad_message, unpad_message, Envelope, InMemorySignalStore, PreKeyBundle, SessionCipher};
use wamd_core::{Jid, Node, WamdConfig};
use wamd_runtime::{Client, ClientBuilder, Event, Listener, MediaDownloader, MediaReference, Transport};

pub const SELF_JID: &str = "15550000000:2@s.whatsapp.net";

pub fn jid(text: &str) -> Jid {
    Jid::parse(text).unwrap()
}

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

type Responder = Arc<dyn Fn(&Node) -> Option<Node> + Send + Sync>;

/// Records every node and answers requests from registered responders;
/// unmatched requests get an empty success
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<Node>>,
    responders: Mutex<Vec<Responder>>,
    disconnects: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// First responder returning `Some` answers the request
    pub fn respond(&self, responder: impl Fn(&Node) -> Option<Node> + Send + Sync + 'static) {
        self.responders.lock().unwrap().push(Arc::new(responder));
    }

    /// Answer `iq` requests of one namespace
    pub fn respond_to(&self, xmlns: &'static str, responder: impl Fn(&Node) -> Node + Send + Sync + 'static) {
        self.respond(move |node| (node.attr_str("xmlns").as_deref() == Some(xmlns)).then(|| responder(node)));
    }

    pub fn sent(&self) -> Vec<Node> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_with_tag(&self, tag: &str) -> Vec<Node> {
        self.sent().into_iter().filter(|node| node.tag() == tag).collect()
    }

    pub fn requests(&self, xmlns: &str) -> Vec<Node> {
        self.sent()
            .into_iter()
            .filter(|node| node.tag() == "iq" && node.attr_str("xmlns").as_deref() == Some(xmlns))
            .collect()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

pub fn iq_result(request: &Node) -> Node {
    Node::builder("iq")
        .opt_attr("id", request.attr_str("id").map(|id| id.into_owned()))
        .attr("type", "result")
        .build()
}

pub fn iq_error(request: &Node, code: &str, text: &str) -> Node {
    Node::builder("iq")
        .opt_attr("id", request.attr_str("id").map(|id| id.into_owned()))
        .attr("type", "error")
        .child(Node::builder("error").attr("code", code).attr("text", text).build())
        .build()
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, node: Node) -> anyhow::Result<Node> {
        self.sent.lock().unwrap().push(node.clone());
        let responders = self.responders.lock().unwrap().clone();
        if let Some(response) = responders.iter().find_map(|responder| responder(&node)) {
            return Ok(response);
        }
        Ok(match node.tag() {
            "iq" => iq_result(&node),
            _ => Node::builder("ack")
                .opt_attr("id", node.attr_str("id").map(|id| id.into_owned()))
                .attr("class", node.tag().to_owned())
                .build(),
        })
    }

    async fn send_no_response(&self, node: Node) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(node);
        Ok(())
    }

    async fn disconnect(&self, _reconnect: bool) -> anyhow::Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Media
// ----------------------------------------------------------------------------

/// Serves blobs by direct path
#[derive(Default)]
pub struct MockDownloader {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockDownloader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, direct_path: &str, bytes: Vec<u8>) {
        self.blobs.lock().unwrap().insert(direct_path.to_owned(), bytes);
    }
}

#[async_trait]
impl MediaDownloader for MockDownloader {
    async fn download(&self, reference: &MediaReference) -> anyhow::Result<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(&reference.direct_path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no blob at {}", reference.direct_path))
    }
}

// ----------------------------------------------------------------------------
// Listener
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct CollectingListener {
    events: Mutex<Vec<Event>>,
}

impl CollectingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|event| matches(event)).count()
    }

    /// Wait until `matches` holds for at least `count` events
    pub async fn wait_for(&self, count: usize, matches: impl Fn(&Event) -> bool) -> Vec<Event> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let found: Vec<Event> = self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|event| matches(event))
                .cloned()
                .collect();
            if found.len() >= count {
                return found;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {count} events, saw {:?}",
                self.events()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl Listener for CollectingListener {
    async fn on_event(&self, event: Arc<Event>) {
        self.events.lock().unwrap().push((*event).clone());
    }
}

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

/// A client for `SELF_JID` wired to mocks
pub struct Harness {
    pub client: Client,
    pub transport: Arc<MockTransport>,
    pub downloader: Arc<MockDownloader>,
    pub listener: Arc<CollectingListener>,
    pub signal_store: Arc<InMemorySignalStore>,
    pub app_state_store: Arc<InMemoryAppStateStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(WamdConfig::testing())
    }

    pub fn with_config(config: WamdConfig) -> Self {
        wamd_runtime::logging::try_init_test_logging();
        let transport = MockTransport::new();
        let downloader = MockDownloader::new();
        let listener = CollectingListener::new();
        let signal_store = Arc::new(InMemorySignalStore::with_rng(&mut ChaCha20Rng::seed_from_u64(7)));
        let app_state_store = Arc::new(InMemoryAppStateStore::new());
        let client = ClientBuilder::new(jid(SELF_JID))
            .with_config(config)
            .with_transport(transport.clone())
            .with_media_downloader(downloader.clone())
            .with_signal_store(signal_store.clone())
            .with_app_state_store(app_state_store.clone())
            .with_listener(listener.clone())
            .build()
            .unwrap();
        Self {
            client,
            transport,
            downloader,
            listener,
            signal_store,
            app_state_store,
        }
    }

    pub fn self_jid(&self) -> Jid {
        jid(SELF_JID)
    }

    /// Answer usync queries with fixed device lists
    pub fn serve_devices(&self, lists: Vec<(Jid, Vec<u8>)>) {
        self.transport.respond_to("usync", move |request| {
            let users = lists.iter().map(|(user, ids)| {
                Node::builder("user")
                    .attr("jid", user)
                    .child(
                        Node::builder("devices")
                            .child(
                                Node::builder("device-list")
                                    .children(ids.iter().map(|id| Node::builder("device").attr("id", u32::from(*id)).build()))
                                    .build(),
                            )
                            .build(),
                    )
                    .build()
            });
            Node::builder("iq")
                .opt_attr("id", request.attr_str("id").map(|id| id.into_owned()))
                .attr("type", "result")
                .child(
                    Node::builder("usync")
                        .child(Node::builder("list").children(users).build())
                        .build(),
                )
                .build()
        });
    }

    /// Answer pre-key queries with the bundles of `devices`
    pub fn serve_bundles(&self, devices: Vec<(Jid, PreKeyBundle)>) {
        self.transport.respond_to("encrypt", move |request| {
            let requested: Vec<String> = request
                .child("key")
                .into_iter()
                .flat_map(|key| key.children_by_tag("user"))
                .filter_map(|user| user.attr_str("jid").map(|jid| jid.into_owned()))
                .collect();
            let users = devices
                .iter()
                .filter(|(device, _)| requested.contains(&device.to_string()))
                .map(|(device, bundle)| bundle_node(device, bundle));
            Node::builder("iq")
                .opt_attr("id", request.attr_str("id").map(|id| id.into_owned()))
                .attr("type", "result")
                .child(Node::builder("list").children(users).build())
                .build()
        });
    }
}

/// One `<user>` entry of a pre-key response
pub fn bundle_node(device: &Jid, bundle: &PreKeyBundle) -> Node {
    let mut builder = Node::builder("user")
        .attr("jid", device)
        .child(
            Node::builder("registration")
                .bytes(bundle.registration_id.to_be_bytes().to_vec())
                .build(),
        )
        .child(Node::builder("identity").bytes(bundle.identity_key.serialize()).build())
        .child(
            Node::builder("skey")
                .child(Node::builder("id").bytes(bundle.signed_pre_key_id.to_be_bytes()[1..].to_vec()).build())
                .child(Node::builder("value").bytes(bundle.signed_pre_key.serialize()).build())
                .child(Node::builder("signature").bytes(bundle.signed_pre_key_signature.clone()).build())
                .build(),
        );
    if let Some((id, key)) = bundle.pre_key {
        builder = builder.child(
            Node::builder("key")
                .child(Node::builder("id").bytes(id.to_be_bytes()[1..].to_vec()).build())
                .child(Node::builder("value").bytes(key.serialize()).build())
                .build(),
        );
    }
    builder.build()
}

// ----------------------------------------------------------------------------
// Remote Devices
// ----------------------------------------------------------------------------

/// A device on the other end, with its own Signal state
pub struct Peer {
    pub jid: Jid,
    pub store: Arc<InMemorySignalStore>,
    pub cipher: SessionCipher<InMemorySignalStore>,
}

impl Peer {
    pub fn new(address: &str, seed: u64) -> Self {
        let store = Arc::new(InMemorySignalStore::with_rng(&mut ChaCha20Rng::seed_from_u64(seed)));
        Self {
            jid: jid(address),
            cipher: SessionCipher::new(Arc::clone(&store), SessionConfig::default()),
            store,
        }
    }

    pub async fn bundle(&self) -> PreKeyBundle {
        self.store.pre_key_bundle(u32::from(self.jid.device()), true).await
    }

    /// Open a session towards `device` from its published bundle
    pub async fn connect(&self, device: &Jid, bundle: &PreKeyBundle) {
        self.cipher
            .process_bundle(&device.signal_address(), bundle)
            .await
            .unwrap();
    }

    /// Encrypt `message` for `device` as an `<enc>` node
    pub async fn seal(&self, device: &Jid, message: &Message) -> Node {
        let envelope = self
            .cipher
            .encrypt_to_device(&device.signal_address(), &pad_message(&message.encode_to_vec(), 16))
            .await
            .unwrap();
        Node::builder("enc")
            .attr("v", "2")
            .attr("type", envelope.kind.as_str())
            .bytes(envelope.ciphertext)
            .build()
    }

    /// Decrypt an `<enc>` node `sender` addressed to this device
    pub async fn open(&self, sender: &Jid, enc: &Node) -> Message {
        let envelope = Envelope::new(
            enc.attr_str("type").unwrap().parse().unwrap(),
            enc.content_bytes().unwrap().to_vec(),
        );
        let padded = self
            .cipher
            .decrypt_from_device(&sender.signal_address(), &envelope)
            .await
            .unwrap();
        Message::decode(unpad_message(&padded).unwrap()).unwrap()
    }
}

pub fn text(body: &str) -> Message {
    Message {
        conversation: Some(body.to_owned()),
        ..Default::default()
    }
}

/// `<enc>` addressed to `device` inside an outgoing stanza's participants
pub fn enc_for<'a>(stanza: &'a Node, device: &Jid) -> Option<&'a Node> {
    let device = device.to_string();
    stanza
        .child("participants")?
        .children_by_tag("to")
        .find(|to| to.attr_str("jid").as_deref() == Some(device.as_str()))?
        .child("enc")
}
