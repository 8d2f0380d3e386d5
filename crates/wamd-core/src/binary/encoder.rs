//! Binary node encoding

use super::node::{AttributeValue, Node, NodeContent};
use super::token::{self, *};
use crate::errors::CodecError;
use crate::jid::{Jid, ServerType};

/// Growable output buffer for one node tree
#[derive(Debug, Default)]
pub struct Encoder {
    buffer: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a node tree into its wire bytes
    pub fn encode(node: &Node) -> Result<Vec<u8>, CodecError> {
        let mut encoder = Encoder::new();
        encoder.write_node(node)?;
        Ok(encoder.buffer)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_node(&mut self, node: &Node) -> Result<(), CodecError> {
        let size = 1 + 2 * node.attributes.len() + usize::from(node.content.is_some());
        self.write_list_start(size)?;
        self.write_string(&node.description)?;
        for (key, value) in node.attributes.iter() {
            self.write_string(key)?;
            self.write_attribute_value(value)?;
        }
        match &node.content {
            None => {}
            Some(NodeContent::Bytes(bytes)) => self.write_binary(bytes)?,
            Some(NodeContent::Nodes(nodes)) => self.write_list(nodes)?,
        }
        Ok(())
    }

    fn write_list(&mut self, nodes: &[Node]) -> Result<(), CodecError> {
        self.write_list_start(nodes.len())?;
        nodes.iter().try_for_each(|node| self.write_node(node))
    }

    fn write_list_start(&mut self, size: usize) -> Result<(), CodecError> {
        match size {
            0 => self.buffer.push(LIST_EMPTY),
            1..=0xFF => {
                self.buffer.push(LIST_8);
                self.buffer.push(size as u8);
            }
            0x100..=0xFFFF => {
                self.buffer.push(LIST_16);
                self.buffer.extend_from_slice(&(size as u16).to_be_bytes());
            }
            _ => return Err(CodecError::PayloadTooLarge { size }),
        }
        Ok(())
    }

    fn write_attribute_value(&mut self, value: &AttributeValue) -> Result<(), CodecError> {
        match value {
            AttributeValue::String(s) => self.write_string(s)?,
            AttributeValue::Number(n) => self.write_string(&n.to_string())?,
            AttributeValue::Jid(jid) => self.write_jid(jid)?,
            AttributeValue::Bytes(bytes) => self.write_binary(bytes)?,
            AttributeValue::Nodes(nodes) => self.write_list(nodes)?,
        }
        Ok(())
    }

    fn write_binary(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let len = bytes.len();
        if len < 0x100 {
            self.buffer.push(BINARY_8);
            self.buffer.push(len as u8);
        } else if len < 0x10_0000 {
            self.buffer.push(BINARY_20);
            self.buffer.push(((len >> 16) & 0x0F) as u8);
            self.buffer.push(((len >> 8) & 0xFF) as u8);
            self.buffer.push((len & 0xFF) as u8);
        } else {
            let len32 = u32::try_from(len).map_err(|_| CodecError::PayloadTooLarge { size: len })?;
            self.buffer.push(BINARY_32);
            self.buffer.extend_from_slice(&len32.to_be_bytes());
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    fn write_string(&mut self, value: &str) -> Result<(), CodecError> {
        match token::index_of(value) {
            Some(TokenIndex::Single(index)) => self.buffer.push(index),
            Some(TokenIndex::Double { dictionary, index }) => {
                self.buffer.push(DICTIONARY_0 + dictionary);
                self.buffer.push(index);
            }
            None if packable(value, NIBBLE_ALPHABET) => self.write_packed(value, NIBBLE_8),
            None if packable(value, HEX_ALPHABET) => self.write_packed(value, HEX_8),
            None => self.write_binary(value.as_bytes())?,
        }
        Ok(())
    }

    fn write_packed(&mut self, value: &str, tag: u8) {
        let bytes = value.as_bytes();
        let odd = bytes.len() % 2 == 1;
        let packed_len = bytes.len().div_ceil(2);
        self.buffer.push(tag);
        self.buffer.push(((odd as u8) << 7) | packed_len as u8);

        for pair in bytes.chunks(2) {
            let high = pack_char(tag, pair[0]);
            let low = pair.get(1).map_or(15, |c| pack_char(tag, *c));
            self.buffer.push((high << 4) | low);
        }
    }

    fn write_jid(&mut self, jid: &Jid) -> Result<(), CodecError> {
        let domain = match jid.server_type() {
            ServerType::User => Some(DOMAIN_USER),
            ServerType::Lid => Some(DOMAIN_LID),
            ServerType::Hosted => Some(DOMAIN_HOSTED),
            ServerType::HostedLid => Some(DOMAIN_HOSTED_LID),
            _ => None,
        };

        match (domain, jid.user()) {
            (Some(domain), Some(user)) if jid.agent() == 0 && jid.device() > 0 => {
                self.buffer.push(COMPANION_JID);
                self.buffer.push(domain);
                self.buffer.push(jid.device());
                self.write_string(user)?;
            }
            (_, user) => {
                self.buffer.push(JID_PAIR);
                match user {
                    Some(_) => {
                        let text = jid.to_string();
                        let user_part = text.rsplit_once('@').map_or(text.as_str(), |(u, _)| u);
                        self.write_string(user_part)?;
                    }
                    None => self.buffer.push(LIST_EMPTY),
                }
                self.write_string(jid.server().address())?;
            }
        }
        Ok(())
    }
}

fn packable(value: &str, alphabet: &[u8]) -> bool {
    !value.is_empty()
        && value.len() <= PACKED_MAX
        && value.bytes().all(|b| alphabet.contains(&b))
}

fn pack_char(tag: u8, c: u8) -> u8 {
    let alphabet: &[u8] = if tag == NIBBLE_8 {
        NIBBLE_ALPHABET
    } else {
        HEX_ALPHABET
    };
    alphabet.iter().position(|a| *a == c).unwrap_or(15) as u8
}
