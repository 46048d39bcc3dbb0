//! # ccshim-protocol
//!
//! Wire protocol for the chaincode shim.
//!
//! This crate provides:
//! - Binary framing with length prefix and CRC32C validation
//! - The `ChaincodeMessage` envelope and typed operation payloads
//! - Proposal decoding types (signed proposal, headers, identities)
//! - Query result types for paginated ledger scans

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod proposal;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use frame::{Frame, FLAG_CRC, FRAME_HEADER_SIZE, MAGIC};
pub use message::{
    ChaincodeEvent, ChaincodeId, ChaincodeInput, ChaincodeMessage, ChaincodeSpec, DelState,
    GetHistoryForKey, GetQueryResult, GetState, GetStateByRange, KeyModification, Kv, MessageType,
    PutState, QueryResponse, QueryResultBytes, QueryStateClose, QueryStateNext, TxResponse,
    STATUS_ERROR, STATUS_OK,
};
pub use proposal::{
    ChaincodeProposalPayload, ChannelHeader, Header, Proposal, SerializedIdentity,
    SignatureHeader, SignedProposal,
};

/// Protocol version supported by this implementation.
pub const PROTOCOL_VERSION: u16 = 1;

/// Maximum frame payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;
