//! Acknowledgements and receipts for inbound stanzas

use wamd_core::{Jid, Node, Timestamp};

/// Receipt sent back for a decoded (or undecodable) message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptKind {
    /// Implicit delivery receipt, no `type` attribute
    Delivery,
    /// The message came from one of our own devices
    Sender,
    /// Decryption failed; ask the sender to re-encrypt
    Retry { registration_id: u32, count: u32 },
}

/// `<ack>` echoing the stanza's id, sender and participant
pub(crate) fn ack(stanza: &Node) -> Node {
    Node::builder("ack")
        .opt_attr("id", stanza.attr_str("id").map(|id| id.into_owned()))
        .attr("class", stanza.tag().to_owned())
        .opt_attr("to", stanza.attr_str("from").map(|from| from.into_owned()))
        .opt_attr(
            "participant",
            stanza.attr_str("participant").map(|participant| participant.into_owned()),
        )
        .opt_attr("type", stanza.attr_str("type").map(|kind| kind.into_owned()))
        .build()
}

pub(crate) fn receipt(
    id: &str,
    to: &Jid,
    participant: Option<&Jid>,
    timestamp: Timestamp,
    kind: ReceiptKind,
) -> Node {
    let builder = Node::builder("receipt")
        .attr("id", id)
        .attr("to", to)
        .opt_attr("participant", participant);
    match kind {
        ReceiptKind::Delivery => builder.build(),
        ReceiptKind::Sender => builder.attr("type", "sender").build(),
        ReceiptKind::Retry {
            registration_id,
            count,
        } => builder
            .attr("type", "retry")
            .child(
                Node::builder("retry")
                    .attr("count", count)
                    .attr("id", id)
                    .attr("t", timestamp.as_secs())
                    .attr("v", "1")
                    .build(),
            )
            .child(
                Node::builder("registration")
                    .bytes(registration_id.to_be_bytes().to_vec())
                    .build(),
            )
            .build(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_echoes_stanza() {
        let stanza = Node::builder("message")
            .attr("id", "ABC")
            .attr("from", "120363025246125486@g.us")
            .attr("participant", "15551234567:2@s.whatsapp.net")
            .attr("type", "text")
            .build();
        let ack = ack(&stanza);
        assert_eq!(ack.tag(), "ack");
        assert_eq!(ack.attr_str("class").as_deref(), Some("message"));
        assert_eq!(ack.attr_str("to").as_deref(), Some("120363025246125486@g.us"));
        assert_eq!(
            ack.attr_str("participant").as_deref(),
            Some("15551234567:2@s.whatsapp.net")
        );
    }

    #[test]
    fn test_retry_receipt_layout() {
        let to = Jid::parse("15551234567:2@s.whatsapp.net").unwrap();
        let node = receipt(
            "ABC",
            &to,
            None,
            Timestamp::from_secs(1_700_000_000),
            ReceiptKind::Retry {
                registration_id: 0x0102_0304,
                count: 1,
            },
        );
        assert_eq!(node.attr_str("type").as_deref(), Some("retry"));
        assert_eq!(
            node.child("retry").and_then(|retry| retry.attr_u64("t")),
            Some(1_700_000_000)
        );
        assert_eq!(
            node.child("registration").and_then(Node::content_bytes),
            Some(&[1u8, 2, 3, 4][..])
        );
        assert!(receipt("ABC", &to, None, Timestamp::new(0), ReceiptKind::Delivery)
            .attr("type")
            .is_none());
    }
}
