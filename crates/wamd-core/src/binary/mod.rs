//! Binary node wire format
//!
//! Every stanza exchanged with the server is a [`Node`] serialised with a
//! token-compressed binary encoding: dictionary strings become one or two
//! bytes, digit and hex strings are nibble-packed, and JIDs have dedicated
//! tags.

pub mod decoder;
pub mod encoder;
pub mod frame;
pub mod node;
pub mod token;

pub use decoder::{Decoder, MAX_NESTING_DEPTH};
pub use encoder::Encoder;
pub use frame::{pack_frame, unpack_frame, Compression};
pub use node::{AttributeValue, Attributes, Node, NodeBuilder, NodeContent};

use crate::errors::CodecError;

/// Encode a node tree
pub fn encode(node: &Node) -> Result<Vec<u8>, CodecError> {
    Encoder::encode(node)
}

/// Decode a node tree, rejecting trailing bytes
pub fn decode(data: &[u8]) -> Result<Node, CodecError> {
    Decoder::decode(data)
}
