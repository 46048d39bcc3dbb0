//! Encoder and decoder for framed chaincode messages.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::ChaincodeMessage;
use bytes::BytesMut;

/// Encodes chaincode messages into frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a message into a ready-to-write frame.
    pub fn encode_message(message: &ChaincodeMessage) -> Result<BytesMut, ProtocolError> {
        let frame = Frame::from_json(message)?;
        frame.encode()
    }
}

/// Incremental decoder over a byte stream of frames.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Feeds freshly read bytes into the decoder.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Decodes the next complete message, if one is buffered.
    pub fn decode_message(&mut self) -> Result<Option<ChaincodeMessage>, ProtocolError> {
        let Some(frame) = Frame::decode(&mut self.buffer)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&frame.payload)?))
    }

    /// Bytes fed in but not yet decoded into messages.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discards any partially received data.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
