//! Binary node decoding

use super::node::{AttributeValue, Attributes, Node, NodeContent};
use super::token::{self, *};
use crate::errors::CodecError;
use crate::jid::{Jid, JidServer};

/// Deepest node nesting accepted from the wire
pub const MAX_NESTING_DEPTH: usize = 256;

/// Cursor over an encoded node
pub struct Decoder<'a> {
    data: &'a [u8],
    position: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            depth: 0,
        }
    }

    /// Decode exactly one node spanning the whole input
    pub fn decode(data: &[u8]) -> Result<Node, CodecError> {
        let mut decoder = Decoder::new(data);
        let node = decoder.read_node()?;
        match decoder.remaining() {
            0 => Ok(node),
            remaining => Err(CodecError::TrailingData { remaining }),
        }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    // ------------------------------------------------------------------------
    // Primitive reads
    // ------------------------------------------------------------------------

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::UnexpectedEof {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u20(&mut self) -> Result<u32, CodecError> {
        let bytes = self.read_bytes(3)?;
        Ok((u32::from(bytes[0] & 0x0F) << 16) | (u32::from(bytes[1]) << 8) | u32::from(bytes[2]))
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_binary(&mut self, tag: u8) -> Result<Option<&'a [u8]>, CodecError> {
        let len = match tag {
            BINARY_8 => usize::from(self.read_u8()?),
            BINARY_20 => self.read_u20()? as usize,
            BINARY_32 => self.read_u32()? as usize,
            _ => return Ok(None),
        };
        self.read_bytes(len).map(Some)
    }

    fn read_list_size(&mut self, tag: u8) -> Result<usize, CodecError> {
        match tag {
            LIST_EMPTY => Ok(0),
            LIST_8 => Ok(usize::from(self.read_u8()?)),
            LIST_16 => Ok(usize::from(self.read_u16()?)),
            _ => Err(CodecError::InvalidTag {
                tag,
                context: "list size",
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------------

    pub fn read_node(&mut self) -> Result<Node, CodecError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(CodecError::NestingTooDeep {
                limit: MAX_NESTING_DEPTH,
            });
        }
        self.depth += 1;
        let node = self.read_node_body();
        self.depth -= 1;
        node
    }

    fn read_node_body(&mut self) -> Result<Node, CodecError> {
        let list_tag = self.read_u8()?;
        let size = self.read_list_size(list_tag)?;
        if size == 0 {
            return Err(CodecError::EmptyList);
        }

        let description_tag = self.read_u8()?;
        let description = self.read_string(description_tag)?;

        let mut attributes = Attributes::new();
        for _ in 0..(size - 1) / 2 {
            let key_tag = self.read_u8()?;
            let key = self.read_string(key_tag)?;
            let value_tag = self.read_u8()?;
            let value = self.read_attribute_value(value_tag)?;
            attributes.insert(key, value);
        }

        let content = if size % 2 == 0 {
            let content_tag = self.read_u8()?;
            Some(self.read_content(content_tag)?)
        } else {
            None
        };

        Ok(Node {
            description,
            attributes,
            content,
        })
    }

    fn read_list(&mut self, tag: u8) -> Result<Vec<Node>, CodecError> {
        let size = self.read_list_size(tag)?;
        (0..size).map(|_| self.read_node()).collect()
    }

    fn read_attribute_value(&mut self, tag: u8) -> Result<AttributeValue, CodecError> {
        match tag {
            JID_PAIR => Ok(AttributeValue::Jid(self.read_jid_pair()?)),
            COMPANION_JID => Ok(AttributeValue::Jid(self.read_companion_jid()?)),
            LIST_8 | LIST_16 => Ok(AttributeValue::Nodes(self.read_list(tag)?)),
            BINARY_8 | BINARY_20 | BINARY_32 => {
                let bytes = self.read_binary(tag)?.unwrap_or_default();
                Ok(match std::str::from_utf8(bytes) {
                    Ok(text) => AttributeValue::String(text.to_owned()),
                    Err(_) => AttributeValue::Bytes(bytes.to_vec()),
                })
            }
            _ => Ok(AttributeValue::String(self.read_string(tag)?)),
        }
    }

    fn read_content(&mut self, tag: u8) -> Result<NodeContent, CodecError> {
        match tag {
            LIST_EMPTY | LIST_8 | LIST_16 => Ok(NodeContent::Nodes(self.read_list(tag)?)),
            BINARY_8 | BINARY_20 | BINARY_32 => Ok(NodeContent::Bytes(
                self.read_binary(tag)?.unwrap_or_default().to_vec(),
            )),
            _ => Ok(NodeContent::Bytes(self.read_string(tag)?.into_bytes())),
        }
    }

    // ------------------------------------------------------------------------
    // Strings
    // ------------------------------------------------------------------------

    fn read_string(&mut self, tag: u8) -> Result<String, CodecError> {
        match tag {
            LIST_EMPTY => Ok(String::new()),
            DICTIONARY_0..=DICTIONARY_3 => {
                let dictionary = tag - DICTIONARY_0;
                let index = self.read_u8()?;
                token::double_byte(dictionary, index)
                    .map(str::to_owned)
                    .ok_or(CodecError::InvalidToken {
                        dictionary: Some(dictionary),
                        index,
                    })
            }
            BINARY_8 | BINARY_20 | BINARY_32 => {
                let bytes = self.read_binary(tag)?.unwrap_or_default();
                String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
            }
            NIBBLE_8 | HEX_8 => self.read_packed(tag),
            JID_PAIR => Ok(self.read_jid_pair()?.to_string()),
            COMPANION_JID => Ok(self.read_companion_jid()?.to_string()),
            1..=235 => token::single_byte(tag)
                .map(str::to_owned)
                .ok_or(CodecError::InvalidToken {
                    dictionary: None,
                    index: tag,
                }),
            _ => Err(CodecError::InvalidTag {
                tag,
                context: "string",
            }),
        }
    }

    fn read_packed(&mut self, tag: u8) -> Result<String, CodecError> {
        let header = self.read_u8()?;
        let odd = header & 0x80 != 0;
        let byte_len = usize::from(header & 0x7F);
        let packed = self.read_bytes(byte_len)?;

        let mut out = String::with_capacity(byte_len * 2);
        for byte in packed {
            out.push(unpack(tag, byte >> 4)?);
            out.push(unpack(tag, byte & 0x0F)?);
        }
        if odd {
            out.pop();
        }
        Ok(out)
    }

    // ------------------------------------------------------------------------
    // JIDs
    // ------------------------------------------------------------------------

    fn read_jid_pair(&mut self) -> Result<Jid, CodecError> {
        let user_tag = self.read_u8()?;
        let user = match user_tag {
            LIST_EMPTY => None,
            tag => Some(self.read_string(tag)?),
        };
        let server_tag = self.read_u8()?;
        let server = self.read_string(server_tag)?;
        let jid = match user {
            Some(user) => Jid::parse(&format!("{user}@{server}"))?,
            None => Jid::server_only(JidServer::of(&server)),
        };
        Ok(jid)
    }

    fn read_companion_jid(&mut self) -> Result<Jid, CodecError> {
        let domain = self.read_u8()?;
        let device = self.read_u8()?;
        let user_tag = self.read_u8()?;
        let user = self.read_string(user_tag)?;
        let server = match domain {
            DOMAIN_USER => JidServer::USER,
            DOMAIN_LID => JidServer::LID,
            DOMAIN_HOSTED => JidServer::HOSTED,
            DOMAIN_HOSTED_LID => JidServer::HOSTED_LID,
            other => {
                return Err(CodecError::InvalidTag {
                    tag: other,
                    context: "companion domain",
                })
            }
        };
        Ok(Jid::create(Some(&user), server, u32::from(device), 0)?)
    }
}

fn unpack(tag: u8, value: u8) -> Result<char, CodecError> {
    let alphabet: &[u8] = if tag == NIBBLE_8 {
        NIBBLE_ALPHABET
    } else {
        HEX_ALPHABET
    };
    match alphabet.get(usize::from(value)) {
        Some(c) => Ok(char::from(*c)),
        // 15 pads the final nibble of odd-length nibble strings
        None if value == 15 => Ok('\0'),
        None => Err(CodecError::InvalidPackedChar { value }),
    }
}
