//! Frame layer
//!
//! A frame is one flag byte followed by the encoded node. Bit `0x02` of the
//! flag marks a zlib-compressed body.

use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression as ZlibCompression};

use super::decoder::Decoder;
use super::encoder::Encoder;
use super::node::Node;
use crate::errors::CodecError;

const FLAG_COMPRESSED: u8 = 0x02;

// ----------------------------------------------------------------------------
// Compression
// ----------------------------------------------------------------------------

/// zlib helpers shared by frames and history payloads
pub struct Compression;

impl Compression {
    /// Compress data using zlib
    pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), ZlibCompression::default());
        encoder.write_all(data).map_err(|e| CodecError::Compression {
            reason: e.to_string(),
        })?;
        encoder.finish().map_err(|e| CodecError::Compression {
            reason: e.to_string(),
        })
    }

    /// Decompress zlib data
    pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut decoder = ZlibDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| CodecError::Decompression {
                reason: e.to_string(),
            })?;
        Ok(decompressed)
    }
}

// ----------------------------------------------------------------------------
// Frames
// ----------------------------------------------------------------------------

/// Encode a node and prefix the flag byte
pub fn pack_frame(node: &Node, compress: bool) -> Result<Vec<u8>, CodecError> {
    let body = Encoder::encode(node)?;
    let mut frame = Vec::with_capacity(body.len() + 1);
    if compress {
        frame.push(FLAG_COMPRESSED);
        frame.extend_from_slice(&Compression::compress(&body)?);
    } else {
        frame.push(0);
        frame.extend_from_slice(&body);
    }
    Ok(frame)
}

/// Strip the flag byte, inflate if flagged and decode the node
pub fn unpack_frame(frame: &[u8]) -> Result<Node, CodecError> {
    let (flag, body) = frame.split_first().ok_or(CodecError::EmptyFrame)?;
    if flag & FLAG_COMPRESSED != 0 {
        Decoder::decode(&Compression::decompress(body)?)
    } else {
        Decoder::decode(body)
    }
}
