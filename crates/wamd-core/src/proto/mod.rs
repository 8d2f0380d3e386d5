//! Protobuf schema
//!
//! Message types are declared by hand with `prost` derives; field numbers
//! match the wire schema so payloads interoperate with other clients.

pub mod e2e;
pub mod history;
pub mod syncd;
pub mod wire;

pub use e2e::*;
pub use history::*;
pub use syncd::*;

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;

    #[test]
    fn test_device_sent_wraps_encoded_message() {
        let inner = Message {
            conversation: Some("hello".into()),
            ..Default::default()
        };
        let outer = Message {
            device_sent_message: Some(DeviceSentMessage {
                destination_jid: Some("15551234567@s.whatsapp.net".into()),
                message: Some(inner.encode_to_vec()),
                phash: None,
            }),
            ..Default::default()
        };
        let decoded = Message::decode(outer.encode_to_vec().as_slice()).unwrap();
        let wrapped = decoded.device_sent_message.unwrap();
        let unwrapped = Message::decode(wrapped.message.unwrap().as_slice()).unwrap();
        assert_eq!(unwrapped.text(), Some("hello"));
    }

    #[test]
    fn test_protocol_message_type() {
        let protocol = ProtocolMessage {
            r#type: Some(ProtocolMessageType::HistorySyncNotification as i32),
            ..Default::default()
        };
        assert_eq!(
            protocol.message_type(),
            Some(ProtocolMessageType::HistorySyncNotification)
        );
        let unknown = ProtocolMessage {
            r#type: Some(99),
            ..Default::default()
        };
        assert_eq!(unknown.message_type(), None);
    }

    #[test]
    fn test_key_distribution_only() {
        let skdm = Message {
            sender_key_distribution_message: Some(SenderKeyDistributionMessage {
                group_id: Some("120363025246125486@g.us".into()),
                axolotl_sender_key_distribution_message: Some(vec![1, 2, 3]),
            }),
            ..Default::default()
        };
        assert!(skdm.is_key_distribution_only());

        let with_text = Message {
            conversation: Some("hi".into()),
            ..skdm
        };
        assert!(!with_text.is_key_distribution_only());
    }
}
