//! Signed transaction proposal and its nested layers.
//!
//! The peer sends the proposal as opaque bytes nested several levels
//! deep: a `SignedProposal` wraps a `Proposal`, whose header bytes hold
//! a `Header`, which in turn carries the serialized signature and
//! channel headers. Each layer is decoded independently so failures can
//! be reported per step.

use crate::error::ProtocolError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

macro_rules! proposal_layer {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $ty {
                /// Decodes this layer from embedded bytes.
                pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
                    Ok(serde_json::from_slice(bytes)?)
                }

                /// Encodes this layer into embedded bytes.
                pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
                    Ok(serde_json::to_vec(self)?)
                }
            }
        )*
    };
}

/// A proposal plus the client signature over its bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignedProposal {
    #[serde(default)]
    pub proposal_bytes: Vec<u8>,
    #[serde(default)]
    pub signature: Vec<u8>,
}

/// The proposal itself: opaque header and payload bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Proposal {
    #[serde(default)]
    pub header: Vec<u8>,
    #[serde(default)]
    pub payload: Vec<u8>,
}

/// Header bytes: serialized channel and signature headers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub channel_header: Vec<u8>,
    #[serde(default)]
    pub signature_header: Vec<u8>,
}

/// Signature header: the creator identity bytes and a replay nonce.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignatureHeader {
    #[serde(default)]
    pub creator: Vec<u8>,
    #[serde(default)]
    pub nonce: Vec<u8>,
}

/// The identity that created the proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedIdentity {
    #[serde(default)]
    pub mspid: String,
    #[serde(default)]
    pub id_bytes: Vec<u8>,
}

/// Channel header: channel binding, epoch and timestamp.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelHeader {
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub tx_id: String,
    #[serde(default)]
    pub epoch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Proposal payload: the invocation input plus transient data that
/// must not end up on the ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChaincodeProposalPayload {
    #[serde(default)]
    pub input: Vec<u8>,
    #[serde(default)]
    pub transient_map: HashMap<String, Vec<u8>>,
}

proposal_layer!(
    SignedProposal,
    Proposal,
    Header,
    SignatureHeader,
    SerializedIdentity,
    ChannelHeader,
    ChaincodeProposalPayload,
);
