//! Chaincode message envelope and typed operation payloads.
//!
//! Every exchange with the peer is a `ChaincodeMessage`. The `payload`
//! field carries a JSON-encoded operation payload whose shape depends
//! on the message type.

use crate::error::ProtocolError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::proposal::SignedProposal;

/// Status code for a successful transaction response.
pub const STATUS_OK: i32 = 200;

/// Status threshold for error transaction responses.
pub const STATUS_ERROR: i32 = 500;

/// Chaincode message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    // Handshake
    Register,
    Registered,
    Ready,

    // Transaction lifecycle
    Init,
    Transaction,
    Completed,

    // Replies to state operations
    Response,
    Error,

    // State operations
    GetState,
    PutState,
    DelState,
    GetStateByRange,
    GetQueryResult,
    GetHistoryForKey,
    QueryStateNext,
    QueryStateClose,
    InvokeChaincode,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Matches the wire spelling.
        let s = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Message envelope exchanged with the peer over the duplex stream.
///
/// Immutable once sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaincodeMessage {
    /// Message type.
    #[serde(rename = "type")]
    pub msg_type: MessageType,

    /// Type-dependent payload bytes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,

    /// Channel the transaction runs on.
    #[serde(default)]
    pub channel_id: String,

    /// Transaction id assigned by the peer.
    #[serde(default)]
    pub txid: String,

    /// Signed proposal accompanying Init/Transaction messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal: Option<SignedProposal>,

    /// Chaincode event accompanying Completed messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<ChaincodeEvent>,
}

impl ChaincodeMessage {
    pub fn new(
        msg_type: MessageType,
        channel_id: impl Into<String>,
        txid: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            msg_type,
            payload,
            channel_id: channel_id.into(),
            txid: txid.into(),
            proposal: None,
            event: None,
        }
    }

    pub fn with_proposal(mut self, proposal: SignedProposal) -> Self {
        self.proposal = Some(proposal);
        self
    }

    pub fn with_event(mut self, event: Option<ChaincodeEvent>) -> Self {
        self.event = event;
        self
    }

    /// The transaction context id scoping this message's invocation.
    pub fn tx_context_id(&self) -> String {
        format!("{}{}", self.channel_id, self.txid)
    }
}

macro_rules! json_payload {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $ty {
                /// Decodes this payload from message bytes.
                pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
                    Ok(serde_json::from_slice(bytes)?)
                }

                /// Encodes this payload into message bytes.
                pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
                    Ok(serde_json::to_vec(self)?)
                }
            }
        )*
    };
}

/// Identity of a chaincode, sent with Register and InvokeChaincode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaincodeId {
    pub name: String,
}

/// Invocation input: raw argument list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChaincodeInput {
    #[serde(default)]
    pub args: Vec<Vec<u8>>,
}

impl ChaincodeInput {
    /// Builds an input from UTF-8 string arguments.
    pub fn from_strings<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            args: args
                .into_iter()
                .map(|a| a.as_ref().as_bytes().to_vec())
                .collect(),
        }
    }
}

/// Target and input of a chaincode-to-chaincode invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaincodeSpec {
    pub chaincode_id: ChaincodeId,
    pub input: ChaincodeInput,
}

/// Event accumulated by a stub and attached to the Completed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeEvent {
    pub event_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

/// Application-level response to an Init/Invoke call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxResponse {
    /// 0 means the application never called success or error.
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

impl TxResponse {
    /// A successful response carrying a payload.
    pub fn success(payload: Vec<u8>) -> Self {
        Self {
            status: STATUS_OK,
            message: String::new(),
            payload,
        }
    }

    /// An error response carrying a message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR,
            message: message.into(),
            payload: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status < STATUS_ERROR && self.status != 0
    }
}

/// GetState operation payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetState {
    #[serde(default)]
    pub collection: String,
    pub key: String,
}

/// PutState operation payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutState {
    #[serde(default)]
    pub collection: String,
    pub key: String,
    #[serde(default)]
    pub value: Vec<u8>,
}

/// DelState operation payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelState {
    #[serde(default)]
    pub collection: String,
    pub key: String,
}

/// GetStateByRange operation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStateByRange {
    #[serde(default)]
    pub collection: String,
    pub start_key: String,
    pub end_key: String,
}

/// GetQueryResult operation payload (rich query).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetQueryResult {
    #[serde(default)]
    pub collection: String,
    pub query: String,
}

/// GetHistoryForKey operation payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetHistoryForKey {
    pub key: String,
}

/// QueryStateNext operation payload: fetch the next page of a cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryStateNext {
    pub id: String,
}

/// QueryStateClose operation payload: release a server-side cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryStateClose {
    pub id: String,
}

/// One page of query results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Vec<QueryResultBytes>,
    #[serde(default)]
    pub has_more: bool,
    /// Server-side cursor id, used for Next/Close.
    #[serde(default)]
    pub id: String,
}

/// An opaque element of a query result page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResultBytes {
    #[serde(default)]
    pub result_bytes: Vec<u8>,
}

/// A key/value record produced by range and rich queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kv {
    #[serde(default)]
    pub namespace: String,
    pub key: String,
    #[serde(default)]
    pub value: Vec<u8>,
}

/// A historical modification of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyModification {
    pub tx_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub value: Vec<u8>,
    #[serde(default)]
    pub is_delete: bool,
}

json_payload!(
    ChaincodeMessage,
    ChaincodeId,
    ChaincodeInput,
    ChaincodeSpec,
    TxResponse,
    GetState,
    PutState,
    DelState,
    GetStateByRange,
    GetQueryResult,
    GetHistoryForKey,
    QueryStateNext,
    QueryStateClose,
    QueryResponse,
    Kv,
    KeyModification,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_wire_spelling() {
        assert_eq!(
            serde_json::to_string(&MessageType::GetStateByRange).unwrap(),
            "\"GET_STATE_BY_RANGE\""
        );
        assert_eq!(MessageType::InvokeChaincode.to_string(), "INVOKE_CHAINCODE");

        let parsed: MessageType = serde_json::from_str("\"REGISTERED\"").unwrap();
        assert_eq!(parsed, MessageType::Registered);
    }

    #[test]
    fn test_envelope_roundtrip() {
        let msg = ChaincodeMessage::new(
            MessageType::GetState,
            "mychannel",
            "tx-1",
            GetState {
                collection: String::new(),
                key: "k".to_string(),
            }
            .to_bytes()
            .unwrap(),
        );

        let bytes = msg.to_bytes().unwrap();
        let decoded = ChaincodeMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.msg_type, MessageType::GetState);
        assert_eq!(decoded.channel_id, "mychannel");
        assert_eq!(decoded.txid, "tx-1");

        let payload = GetState::from_bytes(&decoded.payload).unwrap();
        assert_eq!(payload.key, "k");
    }

    #[test]
    fn test_tx_context_id() {
        let msg = ChaincodeMessage::new(MessageType::Response, "chan", "tx9", vec![]);
        assert_eq!(msg.tx_context_id(), "chantx9");
    }

    #[test]
    fn test_tx_response_constructors() {
        let ok = TxResponse::success(b"data".to_vec());
        assert_eq!(ok.status, STATUS_OK);
        assert!(ok.is_ok());

        let err = TxResponse::error("boom");
        assert_eq!(err.status, STATUS_ERROR);
        assert_eq!(err.message, "boom");
        assert!(!err.is_ok());

        // Unset status is neither success nor error.
        assert!(!TxResponse::default().is_ok());
    }

    #[test]
    fn test_input_from_strings() {
        let input = ChaincodeInput::from_strings(["fn", "a1"]);
        assert_eq!(input.args.len(), 2);
        assert_eq!(input.args[0], b"fn");
    }

    #[test]
    fn test_query_response_defaults() {
        let page: QueryResponse = serde_json::from_str("{}").unwrap();
        assert!(page.results.is_empty());
        assert!(!page.has_more);
        assert!(page.id.is_empty());
    }
}
