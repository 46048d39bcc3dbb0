//! Protocol error types.

use thiserror::Error;

/// Failures while framing or decoding chaincode messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame does not start with the CCSX magic (got {0:?})")]
    InvalidMagic([u8; 4]),

    #[error("peer speaks protocol version {0}, which this shim does not")]
    UnsupportedVersion(u16),

    #[error("frame payload of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("payload checksum mismatch (header {expected:#010x}, computed {actual:#010x})")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("frame carries unknown flag bits: {0:#06x}")]
    InvalidFlags(u16),

    #[error("malformed message payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
