//! Binary framing for chaincode messages.
//!
//! Each message travels as a 16-byte header followed by the payload:
//!
//! ```text
//! offset  0       4         6       8             12       16
//!         | magic | version | flags | payload_len | crc32c | payload...
//! ```
//!
//! The checksum covers the payload only and is verified whenever the
//! CRC flag is set.

use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Magic bytes opening every frame.
pub const MAGIC: [u8; 4] = *b"CCSX";

/// Fixed header length in bytes.
pub const FRAME_HEADER_SIZE: usize = 16;

/// Flag bit: the crc32c field is meaningful.
pub const FLAG_CRC: u16 = 0x0001;

// Bits a version-1 peer is allowed to set.
const KNOWN_FLAGS: u16 = FLAG_CRC;

/// One wire frame: versioned header plus opaque payload bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub version: u16,
    pub flags: u16,
    pub payload: Bytes,
}

impl Frame {
    /// Wraps a payload in a current-version frame with CRC enabled.
    pub fn new(payload: Bytes) -> Self {
        Self {
            version: crate::PROTOCOL_VERSION,
            flags: FLAG_CRC,
            payload,
        }
    }

    /// Serializes a value to JSON and frames it.
    pub fn from_json<T: serde::Serialize>(value: &T) -> Result<Self, ProtocolError> {
        Ok(Self::new(Bytes::from(serde_json::to_vec(value)?)))
    }

    pub fn has_crc(&self) -> bool {
        self.flags & FLAG_CRC != 0
    }

    /// Renders the frame as ready-to-write bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let len =
            u32::try_from(self.payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
                size: u32::MAX,
                max: MAX_PAYLOAD_SIZE,
            })?;
        if len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut out = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        out.put_slice(&MAGIC);
        out.put_u16(self.version);
        out.put_u16(self.flags);
        out.put_u32(len);
        out.put_u32(if self.has_crc() {
            crc32c::crc32c(&self.payload)
        } else {
            0
        });
        out.put_slice(&self.payload);
        Ok(out)
    }

    /// Pulls the next complete frame out of `buf`.
    ///
    /// `Ok(None)` means more bytes are needed; nothing is consumed
    /// until a whole frame (header and payload) is available, so the
    /// caller can simply keep appending.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let magic: [u8; 4] = buf[0..4].try_into().unwrap_or(*b"\0\0\0\0");
        if magic != MAGIC {
            return Err(ProtocolError::InvalidMagic(magic));
        }

        let version = u16::from_be_bytes([buf[4], buf[5]]);
        if version != crate::PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let flags = u16::from_be_bytes([buf[6], buf[7]]);
        if flags & !KNOWN_FLAGS != 0 {
            return Err(ProtocolError::InvalidFlags(flags));
        }

        let payload_len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let declared_crc = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);

        if buf.len() - FRAME_HEADER_SIZE < payload_len as usize {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len as usize).freeze();

        let frame = Frame {
            version,
            flags,
            payload,
        };
        if frame.has_crc() {
            let actual = crc32c::crc32c(&frame.payload);
            if actual != declared_crc {
                return Err(ProtocolError::CrcMismatch {
                    expected: declared_crc,
                    actual,
                });
            }
        }
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roundtrip(payload: &[u8]) -> Frame {
        let mut wire = Frame::new(Bytes::copy_from_slice(payload)).encode().unwrap();
        Frame::decode(&mut wire).unwrap().unwrap()
    }

    #[test]
    fn test_roundtrip_preserves_payload() {
        let decoded = roundtrip(b"{\"type\":\"REGISTER\"}");
        assert_eq!(&decoded.payload[..], b"{\"type\":\"REGISTER\"}");
        assert_eq!(decoded.version, crate::PROTOCOL_VERSION);
        assert!(decoded.has_crc());

        assert!(roundtrip(b"").payload.is_empty());
    }

    #[test]
    fn test_incomplete_frames_consume_nothing() {
        let mut buf = BytesMut::from(&b"CCS"[..]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);

        let wire = Frame::new(Bytes::from_static(b"hello world")).encode().unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&wire[..FRAME_HEADER_SIZE + 5]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), FRAME_HEADER_SIZE + 5);

        buf.extend_from_slice(&wire[FRAME_HEADER_SIZE + 5..]);
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded.payload[..], b"hello world");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_header_validation() {
        let mut wire = Frame::new(Bytes::from_static(b"x")).encode().unwrap();
        wire[0] = b'Z';
        assert!(matches!(
            Frame::decode(&mut wire).unwrap_err(),
            ProtocolError::InvalidMagic(_)
        ));

        let mut wire = Frame::new(Bytes::from_static(b"x")).encode().unwrap();
        wire[4] = 0xFF;
        assert!(matches!(
            Frame::decode(&mut wire).unwrap_err(),
            ProtocolError::UnsupportedVersion(_)
        ));

        let mut wire = Frame::new(Bytes::from_static(b"x")).encode().unwrap();
        wire[6] = 0x80;
        assert!(matches!(
            Frame::decode(&mut wire).unwrap_err(),
            ProtocolError::InvalidFlags(_)
        ));
    }

    #[test]
    fn test_flipped_payload_bit_fails_crc() {
        let mut wire = Frame::new(Bytes::from_static(b"some payload bytes"))
            .encode()
            .unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        assert!(matches!(
            Frame::decode(&mut wire).unwrap_err(),
            ProtocolError::CrcMismatch { .. }
        ));
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut buf = BytesMut::new();
        for payload in [&b"one"[..], b"two"] {
            buf.extend_from_slice(
                &Frame::new(Bytes::copy_from_slice(payload)).encode().unwrap(),
            );
        }

        assert_eq!(&Frame::decode(&mut buf).unwrap().unwrap().payload[..], b"one");
        assert_eq!(&Frame::decode(&mut buf).unwrap().unwrap().payload[..], b"two");
        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
            prop_assert_eq!(&roundtrip(&payload).payload[..], &payload[..]);
        }
    }
}
