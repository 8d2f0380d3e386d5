//! Frame decoding and node routing at the client boundary

mod common;

use std::sync::Arc;

use common::{jid, Harness, Peer};
use wamd_core::binary::pack_frame;
use wamd_core::Node;
use wamd_runtime::Event;

#[tokio::test]
async fn test_frame_carrying_message_is_routed_to_pipeline() {
    let harness = Harness::new();
    let bob = Peer::new("5551234@s.whatsapp.net", 41);
    let bundle = harness.signal_store.pre_key_bundle(2, true).await;
    bob.connect(&harness.self_jid(), &bundle).await;

    for (id, compress) in [("F1", false), ("F2", true)] {
        let node = Node::builder("message")
            .attr("id", id)
            .attr("from", &bob.jid)
            .attr("t", "1700000000")
            .child(bob.seal(&harness.self_jid(), &common::text("framed")).await)
            .build();
        let frame = pack_frame(&node, compress).unwrap();
        harness.client.handle_frame(&frame).await.unwrap();
    }

    let chat = harness.client.store().chat(&jid("5551234@s.whatsapp.net")).unwrap();
    assert_eq!(chat.messages.len(), 2);
    assert_eq!(harness.transport.sent_with_tag("ack").len(), 2);
}

#[tokio::test]
async fn test_malformed_frame_reconnects() {
    let harness = Harness::new();
    assert!(harness.client.handle_frame(&[0x00]).await.is_err());
    assert!(harness.client.handle_frame(&[]).await.is_err());
    assert_eq!(harness.transport.disconnects(), 2);
}

#[tokio::test]
async fn test_login_failure_is_reported() {
    let harness = Harness::new();
    let failure = Node::builder("failure").attr("reason", "401").build();
    let err = harness.client.handle_node(&failure).await.unwrap_err();
    assert!(err.to_string().contains("401"));
    assert_eq!(harness.transport.disconnects(), 1);
}

#[tokio::test]
async fn test_unhandled_nodes_are_ignored() {
    let harness = Harness::new();
    harness
        .client
        .handle_node(&Node::builder("presence").attr("from", "5551234@s.whatsapp.net").build())
        .await
        .unwrap();
    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn test_removed_listener_stops_receiving() {
    let harness = Harness::new();
    let extra = common::CollectingListener::new();
    let id = harness.client.add_listener(extra.clone() as Arc<dyn wamd_runtime::Listener>);
    assert!(harness.client.remove_listener(id));

    harness.client.store().ensure_chat(&jid("5551234@s.whatsapp.net"));
    harness
        .client
        .handle_node(
            &Node::builder("message")
                .attr("id", "P1")
                .attr("from", "5551234@s.whatsapp.net")
                .child(Node::builder("unavailable").build())
                .build(),
        )
        .await
        .unwrap();

    harness
        .listener
        .wait_for(1, |event| matches!(event, Event::NewMessage { .. }))
        .await;
    assert!(extra.events().is_empty());
}
