//! Message pipeline against scripted server responses and remote devices

mod common;

use common::{bundle_node, enc_for, jid, text, Harness, Peer};
use prost::Message as _;
use wamd_core::poll::{encrypt_vote, option_hash, VoteContext};
use wamd_core::proto::{Message, MessageKey, PollUpdateMessage, ProtocolMessage, ProtocolMessageType, SenderKeyDistributionMessage};
use wamd_core::signal::{pad_message, unpad_message, SenderKeyName};
use wamd_core::{Jid, Node};
use wamd_runtime::Event;

const BOB: &str = "5551234@s.whatsapp.net";
const GROUP: &str = "120363021234567890@g.us";

fn stanza(id: &str, from: &Jid, attrs: &[(&str, String)], children: Vec<Node>) -> Node {
    attrs
        .iter()
        .fold(
            Node::builder("message").attr("id", id).attr("from", from).attr("t", "1700000000"),
            |builder, (key, value)| builder.attr(*key, value.clone()),
        )
        .children(children)
        .build()
}

/// Bob opens a session with our device from its published bundle
async fn bob_connected(harness: &Harness) -> Peer {
    let bob = Peer::new(BOB, 11);
    let bundle = harness.signal_store.pre_key_bundle(2, true).await;
    bob.connect(&harness.self_jid(), &bundle).await;
    bob
}

// ----------------------------------------------------------------------------
// Inbound
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_inbound_message_files_chat_and_acknowledges() {
    let harness = Harness::new();
    let bob = bob_connected(&harness).await;

    let enc = bob.seal(&harness.self_jid(), &text("hi there")).await;
    let node = stanza("M1", &bob.jid, &[("notify", "Bob".into()), ("type", "text".into())], vec![enc]);
    harness.client.handle_node(&node).await.unwrap();

    let chat = harness.client.store().chat(&bob.jid).unwrap();
    assert_eq!(chat.unread_count, 1);
    assert_eq!(chat.messages.len(), 1);
    let record = &chat.messages[0];
    assert!(!record.from_me);
    assert_eq!(record.message.as_ref().and_then(Message::text), Some("hi there"));
    let contact = harness.client.store().contact(&bob.jid).unwrap();
    assert_eq!(contact.push_name.as_deref(), Some("Bob"));

    harness
        .listener
        .wait_for(1, |event| matches!(event, Event::NewMessage { .. }))
        .await;
    harness
        .listener
        .wait_for(1, |event| matches!(event, Event::ChatCreated { .. }))
        .await;

    let acks = harness.transport.sent_with_tag("ack");
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].attr_str("id").as_deref(), Some("M1"));
    let receipts = harness.transport.sent_with_tag("receipt");
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].attr_str("type"), None);
}

#[tokio::test]
async fn test_duplicate_stanza_is_not_counted_twice() {
    let harness = Harness::new();
    let bob = bob_connected(&harness).await;

    let first = bob.seal(&harness.self_jid(), &text("once")).await;
    let second = bob.seal(&harness.self_jid(), &text("once")).await;
    harness
        .client
        .handle_node(&stanza("M1", &bob.jid, &[], vec![first]))
        .await
        .unwrap();
    harness
        .client
        .handle_node(&stanza("M1", &bob.jid, &[], vec![second]))
        .await
        .unwrap();

    let chat = harness.client.store().chat(&bob.jid).unwrap();
    assert_eq!(chat.messages.len(), 1);
    assert_eq!(chat.unread_count, 1);
    assert_eq!(harness.transport.sent_with_tag("ack").len(), 2);
}

#[tokio::test]
async fn test_undecryptable_message_requests_retry() {
    let mut config = wamd_core::WamdConfig::testing();
    config.message.send_retry_receipts = true;
    let harness = Harness::with_config(config);
    let bob = jid(BOB);

    let garbage = Node::builder("enc").attr("v", "2").attr("type", "msg").bytes(vec![3u8; 48]).build();
    harness
        .client
        .handle_node(&stanza("BAD1", &bob, &[], vec![garbage]))
        .await
        .unwrap();

    let events = harness
        .listener
        .wait_for(1, |event| matches!(event, Event::UndecryptableMessage { .. }))
        .await;
    let Event::UndecryptableMessage { chat, id, .. } = &events[0] else {
        unreachable!()
    };
    assert_eq!(chat, &bob);
    assert_eq!(id, "BAD1");
    assert!(harness.client.store().chat(&bob).is_none());

    let receipts = harness.transport.sent_with_tag("receipt");
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].attr_str("type").as_deref(), Some("retry"));
    let retry = receipts[0].child("retry").unwrap();
    assert_eq!(retry.attr_str("id").as_deref(), Some("BAD1"));
    assert_eq!(receipts[0].child("registration").and_then(Node::content_bytes).map(<[u8]>::len), Some(4));
    assert_eq!(harness.transport.sent_with_tag("ack").len(), 1);
}

#[tokio::test]
async fn test_retry_receipts_can_be_disabled() {
    let harness = Harness::new();
    let garbage = Node::builder("enc").attr("v", "2").attr("type", "msg").bytes(vec![3u8; 48]).build();
    harness
        .client
        .handle_node(&stanza("BAD2", &jid(BOB), &[], vec![garbage]))
        .await
        .unwrap();

    let receipts = harness.transport.sent_with_tag("receipt");
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].attr_str("type"), None);
}

#[tokio::test]
async fn test_group_message_after_sender_key_distribution() {
    let harness = Harness::new();
    let bob = bob_connected(&harness).await;
    let group = jid(GROUP);

    let name = SenderKeyName::new(group.to_string(), bob.jid.signal_address());
    let distribution = bob.cipher.create_group_session(&name).await.unwrap();
    let key_message = Message {
        sender_key_distribution_message: Some(SenderKeyDistributionMessage {
            group_id: Some(group.to_string()),
            axolotl_sender_key_distribution_message: Some(distribution.serialized().to_vec()),
        }),
        ..Default::default()
    };
    let pairwise = bob.seal(&harness.self_jid(), &key_message).await;
    let group_enc = |ciphertext: Vec<u8>| Node::builder("enc").attr("v", "2").attr("type", "skmsg").bytes(ciphertext).build();
    let first = bob
        .cipher
        .group_encrypt(&name, &pad_message(&text("hello group").encode_to_vec(), 16))
        .await
        .unwrap();
    let participant = [("participant", BOB.to_owned())];
    harness
        .client
        .handle_node(&stanza("G1", &group, &participant, vec![pairwise, group_enc(first)]))
        .await
        .unwrap();

    let second = bob
        .cipher
        .group_encrypt(&name, &pad_message(&text("still here").encode_to_vec(), 16))
        .await
        .unwrap();
    harness
        .client
        .handle_node(&stanza("G2", &group, &participant, vec![group_enc(second)]))
        .await
        .unwrap();

    let chat = harness.client.store().chat(&group).unwrap();
    let texts: Vec<&str> = chat
        .messages
        .iter()
        .filter_map(|record| record.message.as_ref().and_then(Message::text))
        .collect();
    assert_eq!(texts, ["hello group", "still here"]);
    assert!(chat.messages.iter().all(|record| record.sender == bob.jid));

    let receipts = harness.transport.sent_with_tag("receipt");
    assert_eq!(receipts.len(), 2);
    assert_eq!(receipts[0].attr_str("participant").as_deref(), Some(BOB));
}

#[tokio::test]
async fn test_revoke_deletes_message_for_everyone() {
    let harness = Harness::new();
    let bob = bob_connected(&harness).await;

    let enc = bob.seal(&harness.self_jid(), &text("oops")).await;
    harness
        .client
        .handle_node(&stanza("R1", &bob.jid, &[], vec![enc]))
        .await
        .unwrap();
    assert!(harness.client.store().find_message(&bob.jid, "R1").is_some());

    let revoke = Message {
        protocol_message: Some(ProtocolMessage {
            key: Some(MessageKey {
                remote_jid: Some(BOB.to_owned()),
                from_me: Some(false),
                id: Some("R1".to_owned()),
                participant: None,
            }),
            r#type: Some(ProtocolMessageType::Revoke as i32),
            ..Default::default()
        }),
        ..Default::default()
    };
    let enc = bob.seal(&harness.self_jid(), &revoke).await;
    harness
        .client
        .handle_node(&stanza("R2", &bob.jid, &[], vec![enc]))
        .await
        .unwrap();

    assert!(harness.client.store().find_message(&bob.jid, "R1").is_none());
    assert!(harness.client.store().find_message(&bob.jid, "R2").is_none());
    harness
        .listener
        .wait_for(1, |event| matches!(event, Event::MessageDeleted { everyone: true, .. }))
        .await;
}

#[tokio::test]
async fn test_ephemeral_setting_updates_chat() {
    let harness = Harness::new();
    let bob = bob_connected(&harness).await;

    let setting = Message {
        protocol_message: Some(ProtocolMessage {
            r#type: Some(ProtocolMessageType::EphemeralSetting as i32),
            ephemeral_expiration: Some(86_400),
            ephemeral_setting_timestamp: Some(1_700_000_000),
            ..Default::default()
        }),
        ..Default::default()
    };
    let enc = bob.seal(&harness.self_jid(), &setting).await;
    harness
        .client
        .handle_node(&stanza("E1", &bob.jid, &[], vec![enc]))
        .await
        .unwrap();

    let chat = harness.client.store().chat(&bob.jid).unwrap();
    assert_eq!(chat.ephemeral_expiration, 86_400);
    assert!(chat.messages.is_empty());
    harness
        .listener
        .wait_for(1, |event| {
            matches!(event, Event::EphemeralSettingChanged { expiration: 86_400, .. })
        })
        .await;
}

#[tokio::test]
async fn test_newsletter_reaction_is_acked_without_receipt() {
    let harness = Harness::new();
    let newsletter = jid("120363123456789012@newsletter");
    let node = Node::builder("message")
        .attr("id", "N1")
        .attr("from", &newsletter)
        .attr("server_id", "99")
        .child(Node::builder("reaction").attr("code", "+1").attr("count", 3u32).build())
        .build();
    harness.client.handle_node(&node).await.unwrap();

    let events = harness
        .listener
        .wait_for(1, |event| matches!(event, Event::NewsletterReaction { .. }))
        .await;
    assert_eq!(
        events[0],
        Event::NewsletterReaction {
            newsletter,
            message_id: "99".into(),
            reaction: "+1".into(),
            count: 3,
        }
    );
    assert_eq!(harness.transport.sent_with_tag("ack").len(), 1);
    assert!(harness.transport.sent_with_tag("receipt").is_empty());
}

// ----------------------------------------------------------------------------
// Outbound
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_peer_send_fans_out_to_every_device() {
    let harness = Harness::new();
    let bob_user = jid(BOB);
    let bob_phone = Peer::new(BOB, 11);
    let bob_laptop = Peer::new("5551234:1@s.whatsapp.net", 12);
    let primary = Peer::new("15550000000@s.whatsapp.net", 13);
    let own_user = harness.self_jid().to_user_jid();

    harness.serve_devices(vec![(bob_user.clone(), vec![0, 1]), (own_user.clone(), vec![0, 2])]);
    harness.serve_bundles(vec![
        (bob_phone.jid.clone(), bob_phone.bundle().await),
        (bob_laptop.jid.clone(), bob_laptop.bundle().await),
        (primary.jid.clone(), primary.bundle().await),
    ]);

    let id = harness.client.send_text(&bob_user, "hello").await.unwrap();

    let stanzas = harness.transport.sent_with_tag("message");
    assert_eq!(stanzas.len(), 1);
    let stanza = &stanzas[0];
    assert_eq!(stanza.attr_str("id").as_deref(), Some(id.as_str()));
    assert_eq!(stanza.attr_str("to").as_deref(), Some(BOB));
    assert_eq!(stanza.child("participants").unwrap().children().len(), 3);

    let self_jid = harness.self_jid();
    for bob in [&bob_phone, &bob_laptop] {
        let message = bob.open(&self_jid, enc_for(stanza, &bob.jid).unwrap()).await;
        assert_eq!(message.text(), Some("hello"));
    }
    let copy = primary.open(&self_jid, enc_for(stanza, &primary.jid).unwrap()).await;
    let sent = copy.device_sent_message.unwrap();
    assert_eq!(sent.destination_jid.as_deref(), Some(BOB));
    let inner = Message::decode(sent.message.unwrap().as_slice()).unwrap();
    assert_eq!(inner.text(), Some("hello"));

    let record = harness.client.store().find_message(&bob_user, id.as_str()).unwrap();
    assert!(record.from_me);
    assert_eq!(harness.client.store().chat(&bob_user).unwrap().unread_count, 0);

    // device lists and sessions are reused
    harness.client.send_text(&bob_user, "again").await.unwrap();
    assert_eq!(harness.transport.requests("usync").len(), 1);
    assert_eq!(harness.transport.requests("encrypt").len(), 1);
}

#[tokio::test]
async fn test_bad_bundles_skip_only_their_devices() {
    let harness = Harness::new();
    let bob_user = jid(BOB);
    let bob_phone = Peer::new(BOB, 11);
    let forged = Peer::new("5551234:1@s.whatsapp.net", 12);
    let broken = Peer::new("5551234:3@s.whatsapp.net", 14);
    harness.serve_devices(vec![(bob_user.clone(), vec![0, 1, 3])]);

    let mut forged_bundle = forged.bundle().await;
    forged_bundle.signed_pre_key_signature[0] ^= 0xff;
    let users = vec![
        bundle_node(&bob_phone.jid, &bob_phone.bundle().await),
        bundle_node(&forged.jid, &forged_bundle),
        Node::builder("user").attr("jid", &broken.jid).build(),
    ];
    harness.transport.respond_to("encrypt", move |_| {
        Node::builder("iq")
            .attr("type", "result")
            .child(Node::builder("list").children(users.clone()).build())
            .build()
    });

    harness.client.send_text(&bob_user, "still delivered").await.unwrap();

    let stanzas = harness.transport.sent_with_tag("message");
    assert_eq!(stanzas.len(), 1);
    let stanza = &stanzas[0];
    assert_eq!(stanza.child("participants").unwrap().children().len(), 1);
    assert!(enc_for(stanza, &forged.jid).is_none());
    assert!(enc_for(stanza, &broken.jid).is_none());
    let message = bob_phone.open(&harness.self_jid(), enc_for(stanza, &bob_phone.jid).unwrap()).await;
    assert_eq!(message.text(), Some("still delivered"));
}

#[tokio::test]
async fn test_peer_send_without_reachable_device_fails() {
    let harness = Harness::new();
    let bob_user = jid(BOB);
    harness.serve_devices(vec![(bob_user.clone(), vec![0])]);
    harness.transport.respond_to("encrypt", |request| {
        let users = request
            .child("key")
            .into_iter()
            .flat_map(|key| key.children_by_tag("user"))
            .map(|user| {
                Node::builder("user")
                    .opt_attr("jid", user.attr_str("jid").map(|jid| jid.into_owned()))
                    .child(Node::builder("error").attr("code", "404").attr("text", "item-not-found").build())
                    .build()
            })
            .collect::<Vec<_>>();
        Node::builder("iq")
            .attr("type", "result")
            .child(Node::builder("list").children(users).build())
            .build()
    });

    let err = harness.client.send_text(&bob_user, "anyone?").await.unwrap_err();
    assert!(err.is_crypto_failure());
    assert!(harness.transport.sent_with_tag("message").is_empty());
    assert!(harness.client.store().chat(&bob_user).is_none());
}

#[tokio::test]
async fn test_group_send_distributes_sender_key_once() {
    let harness = Harness::new();
    let group = jid(GROUP);
    let bob = Peer::new(BOB, 11);
    let primary = Peer::new("15550000000@s.whatsapp.net", 13);
    let self_jid = harness.self_jid();
    let own_user = self_jid.to_user_jid();

    let members = vec![bob.jid.clone(), own_user.clone()];
    harness.transport.respond_to("w:g2", move |request| {
        Node::builder("iq")
            .opt_attr("id", request.attr_str("id").map(|id| id.into_owned()))
            .attr("type", "result")
            .child(
                Node::builder("group")
                    .children(members.iter().map(|member| Node::builder("participant").attr("jid", member).build()))
                    .build(),
            )
            .build()
    });
    harness.serve_devices(vec![(bob.jid.clone(), vec![0]), (own_user, vec![0, 2])]);
    harness.serve_bundles(vec![
        (bob.jid.clone(), bob.bundle().await),
        (primary.jid.clone(), primary.bundle().await),
    ]);

    harness.client.send_text(&group, "hi all").await.unwrap();
    harness.client.send_text(&group, "second").await.unwrap();

    let stanzas = harness.transport.sent_with_tag("message");
    assert_eq!(stanzas.len(), 2);
    let first = &stanzas[0];
    assert_eq!(first.child("participants").unwrap().children().len(), 2);
    assert!(stanzas[1].child("participants").is_none());

    let key_message = bob.open(&self_jid, enc_for(first, &bob.jid).unwrap()).await;
    let distribution = key_message.sender_key_distribution_message.unwrap();
    assert_eq!(distribution.group_id.as_deref(), Some(GROUP));
    let name = SenderKeyName::new(group.to_string(), self_jid.signal_address());
    bob.cipher
        .process_incoming_distribution(&name, &distribution.axolotl_sender_key_distribution_message.unwrap())
        .await
        .unwrap();

    let mut texts = Vec::new();
    for stanza in &stanzas {
        let enc = stanza.children_by_tag("enc").next().unwrap();
        assert_eq!(enc.attr_str("type").as_deref(), Some("skmsg"));
        let padded = bob.cipher.group_decrypt(&name, enc.content_bytes().unwrap()).await.unwrap();
        let message = Message::decode(unpad_message(&padded).unwrap()).unwrap();
        texts.push(message.text().unwrap().to_owned());
    }
    assert_eq!(texts, ["hi all", "second"]);
    assert_eq!(harness.transport.requests("w:g2").len(), 1);
}

// ----------------------------------------------------------------------------
// Polls
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_poll_vote_round_trip() {
    let harness = Harness::new();
    let bob_user = jid(BOB);
    let bob = Peer::new(BOB, 11);
    let own_user = harness.self_jid().to_user_jid();
    harness.serve_devices(vec![(bob_user.clone(), vec![0]), (own_user.clone(), vec![2])]);
    harness.serve_bundles(vec![(bob.jid.clone(), bob.bundle().await)]);

    let poll_id = harness
        .client
        .send_poll(&bob_user, "Lunch?", &["Pizza", "Sushi"], 1)
        .await
        .unwrap();
    let poll_stanza = harness.transport.sent_with_tag("message").remove(0);
    assert_eq!(poll_stanza.attr_str("type").as_deref(), Some("poll"));

    // Bob reads the poll and votes with its secret
    let poll = bob.open(&harness.self_jid(), enc_for(&poll_stanza, &bob.jid).unwrap()).await;
    let secret = poll.poll_creation_message.unwrap().enc_key.unwrap();
    let context = VoteContext {
        poll_id: poll_id.as_str(),
        poll_creator: &own_user,
        voter: &bob.jid,
    };
    let vote = encrypt_vote(&[option_hash("Sushi").to_vec()], &secret, &context).unwrap();
    let update = Message {
        poll_update_message: Some(PollUpdateMessage {
            poll_creation_message_key: Some(MessageKey {
                remote_jid: Some(own_user.to_string()),
                from_me: Some(false),
                id: Some(poll_id.as_str().to_owned()),
                participant: None,
            }),
            vote: Some(vote),
            sender_timestamp_ms: Some(1_700_000_000_000),
        }),
        ..Default::default()
    };
    let enc = bob.seal(&harness.self_jid(), &update).await;
    harness
        .client
        .handle_node(&stanza("V1", &bob.jid, &[("type", "poll".into())], vec![enc]))
        .await
        .unwrap();

    let events = harness
        .listener
        .wait_for(1, |event| matches!(event, Event::PollVote { .. }))
        .await;
    assert_eq!(
        events[0],
        Event::PollVote {
            chat: bob_user.clone(),
            poll_id: poll_id.as_str().to_owned(),
            voter: bob_user.clone(),
            selected: vec!["Sushi".to_owned()],
        }
    );
    // the vote itself is not filed as a message
    assert_eq!(harness.client.store().chat(&bob_user).unwrap().messages.len(), 1);
}

#[tokio::test]
async fn test_vote_rejects_unknown_option() {
    let harness = Harness::new();
    let bob_user = jid(BOB);
    let bob = Peer::new(BOB, 11);
    harness.serve_devices(vec![(bob_user.clone(), vec![0])]);
    harness.serve_bundles(vec![(bob.jid.clone(), bob.bundle().await)]);

    let poll_id = harness
        .client
        .send_poll(&bob_user, "Lunch?", &["Pizza", "Sushi"], 1)
        .await
        .unwrap();
    let poll_stanza = harness.transport.sent_with_tag("message").remove(0);
    bob.open(&harness.self_jid(), enc_for(&poll_stanza, &bob.jid).unwrap()).await;

    assert!(harness.client.vote(&bob_user, poll_id.as_str(), &["Tacos"]).await.is_err());
    assert!(harness.client.vote(&bob_user, "missing", &["Pizza"]).await.is_err());

    harness.client.vote(&bob_user, poll_id.as_str(), &["Pizza"]).await.unwrap();
    let vote_stanza = harness.transport.sent_with_tag("message").pop().unwrap();
    let vote = bob.open(&harness.self_jid(), enc_for(&vote_stanza, &bob.jid).unwrap()).await;
    let key = vote.poll_update_message.unwrap().poll_creation_message_key.unwrap();
    assert_eq!(key.id.as_deref(), Some(poll_id.as_str()));
    assert_eq!(key.from_me, Some(true));
}
