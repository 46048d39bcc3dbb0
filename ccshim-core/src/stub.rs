//! Per-invocation chaincode context.
//!
//! A stub is created for exactly one Init/Transaction message and holds
//! everything the application needs about it: arguments, the validated
//! proposal (creator, transient map, binding), and the state operations
//! that the handler routes to the peer.

use crate::error::ShimError;
use crate::handler::Handler;
use crate::iter::{HistoryQueryIterator, StateQueryIterator};
use ccshim_protocol::{
    ChaincodeEvent, ChaincodeInput, ChaincodeProposalPayload, ChannelHeader, Header, Proposal,
    SerializedIdentity, SignatureHeader, SignedProposal, TxResponse,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

const COMPOSITE_KEY_NS: char = '\u{0}';
const MIN_UNICODE_RUNE: char = '\u{0}';
const MAX_UNICODE_RUNE: char = '\u{10FFFF}';
/// Stands in for an empty start key so lexical range semantics stay
/// well defined relative to the empty string the peer treats specially.
const EMPTY_KEY_SUBSTITUTE: char = '\u{1}';

/// The proposal layers once decoded, built during stub construction and
/// read-only afterward.
#[derive(Debug, Clone)]
pub struct DecodedProposal {
    pub signature: Vec<u8>,
    pub signature_header: SignatureHeader,
    pub channel_header: ChannelHeader,
    pub payload: ChaincodeProposalPayload,
}

/// The invocation function name with its remaining arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionAndParameters {
    pub function: String,
    pub parameters: Vec<String>,
}

pub struct ChaincodeStub {
    handler: Arc<Handler>,
    channel_id: String,
    tx_id: String,
    args: Vec<String>,
    creator: Option<SerializedIdentity>,
    transient_map: HashMap<String, Vec<u8>>,
    binding: Option<String>,
    tx_timestamp: Option<DateTime<Utc>>,
    decoded_proposal: Option<DecodedProposal>,
    pending_event: Mutex<Option<ChaincodeEvent>>,
}

impl ChaincodeStub {
    pub(crate) fn new(
        handler: Arc<Handler>,
        channel_id: String,
        tx_id: String,
        input: ChaincodeInput,
        signed_proposal: Option<SignedProposal>,
    ) -> Result<Self, ShimError> {
        let args = input
            .args
            .iter()
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect();

        let mut stub = Self {
            handler,
            channel_id,
            tx_id,
            args,
            creator: None,
            transient_map: HashMap::new(),
            binding: None,
            tx_timestamp: None,
            decoded_proposal: None,
            pending_event: Mutex::new(None),
        };

        if let Some(proposal) = signed_proposal {
            stub.validate_signed_proposal(proposal)?;
        }

        Ok(stub)
    }

    /// Decodes and validates the nested proposal layers, step by step.
    /// The first failing step aborts construction with its own error.
    fn validate_signed_proposal(&mut self, signed: SignedProposal) -> Result<(), ShimError> {
        let proposal = Proposal::from_bytes(&signed.proposal_bytes).map_err(|e| {
            ShimError::Decode(format!("Failed extracting proposal from signed proposal: {}", e))
        })?;

        if proposal.header.is_empty() {
            return Err(ShimError::Decode("Proposal header is empty".to_string()));
        }
        if proposal.payload.is_empty() {
            return Err(ShimError::Decode("Proposal payload is empty".to_string()));
        }

        let header = Header::from_bytes(&proposal.header).map_err(|e| {
            ShimError::Decode(format!("Could not extract the header from the proposal: {}", e))
        })?;

        let signature_header = SignatureHeader::from_bytes(&header.signature_header)
            .map_err(|e| ShimError::Decode(format!("Decoding SignatureHeader failed: {}", e)))?;

        let creator = SerializedIdentity::from_bytes(&signature_header.creator)
            .map_err(|e| ShimError::Decode(format!("Decoding SerializedIdentity failed: {}", e)))?;

        let channel_header = ChannelHeader::from_bytes(&header.channel_header)
            .map_err(|e| ShimError::Decode(format!("Decoding ChannelHeader failed: {}", e)))?;

        let payload = ChaincodeProposalPayload::from_bytes(&proposal.payload).map_err(|e| {
            ShimError::Decode(format!("Decoding ChaincodeProposalPayload failed: {}", e))
        })?;

        self.binding = Some(compute_proposal_binding(
            &signature_header.nonce,
            &signature_header.creator,
            channel_header.epoch,
        ));
        self.tx_timestamp = channel_header.timestamp;
        self.creator = Some(creator);
        self.transient_map = payload.transient_map.clone();
        self.decoded_proposal = Some(DecodedProposal {
            signature: signed.signature,
            signature_header,
            channel_header,
            payload,
        });

        Ok(())
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    /// Invocation arguments as UTF-8 strings.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The identity that signed the proposal, if one was sent.
    pub fn creator(&self) -> Option<&SerializedIdentity> {
        self.creator.as_ref()
    }

    /// Transient data carried alongside the proposal; never written to
    /// the ledger.
    pub fn transient_map(&self) -> &HashMap<String, Vec<u8>> {
        &self.transient_map
    }

    /// Replay-protection digest over (nonce, creator, epoch).
    pub fn binding(&self) -> Option<&str> {
        self.binding.as_deref()
    }

    pub fn tx_timestamp(&self) -> Option<DateTime<Utc>> {
        self.tx_timestamp
    }

    pub fn decoded_proposal(&self) -> Option<&DecodedProposal> {
        self.decoded_proposal.as_ref()
    }

    /// Splits the arguments into a lowercased function name and its
    /// parameters. None if there are no arguments at all.
    pub fn get_function_and_parameters(&self) -> Option<FunctionAndParameters> {
        let (function, parameters) = self.args.split_first()?;
        Some(FunctionAndParameters {
            function: function.to_lowercase(),
            parameters: parameters.to_vec(),
        })
    }

    /// Records the event to attach to this invocation's Completed
    /// reply. A later call replaces an earlier one.
    pub fn set_event(&self, name: &str, payload: Vec<u8>) -> Result<(), ShimError> {
        if name.is_empty() {
            return Err(ShimError::InvalidArgument(
                "Event name must be a non-empty string".to_string(),
            ));
        }
        *self.pending_event.lock() = Some(ChaincodeEvent {
            event_name: name.to_string(),
            payload,
        });
        Ok(())
    }

    pub(crate) fn take_event(&self) -> Option<ChaincodeEvent> {
        self.pending_event.lock().take()
    }

    pub async fn get_state(&self, key: &str) -> Result<Vec<u8>, ShimError> {
        tracing::debug!("get_state called with key: {}", key);
        self.handler
            .handle_get_state("", key, &self.channel_id, &self.tx_id)
            .await
    }

    pub async fn put_state(&self, key: &str, value: Vec<u8>) -> Result<(), ShimError> {
        self.handler
            .handle_put_state("", key, value, &self.channel_id, &self.tx_id)
            .await
    }

    pub async fn delete_state(&self, key: &str) -> Result<(), ShimError> {
        self.handler
            .handle_delete_state("", key, &self.channel_id, &self.tx_id)
            .await
    }

    /// Range scan over `[start_key, end_key)`. An empty start key is
    /// substituted before it reaches the wire.
    pub async fn get_state_by_range(
        &self,
        start_key: &str,
        end_key: &str,
    ) -> Result<StateQueryIterator, ShimError> {
        let start_key = substitute_empty_start_key(start_key);
        self.handler
            .handle_get_state_by_range("", &start_key, end_key, &self.channel_id, &self.tx_id)
            .await
    }

    /// Rich query against the peer's state database.
    pub async fn get_query_result(&self, query: &str) -> Result<StateQueryIterator, ShimError> {
        self.handler
            .handle_get_query_result("", query, &self.channel_id, &self.tx_id)
            .await
    }

    pub async fn get_history_for_key(&self, key: &str) -> Result<HistoryQueryIterator, ShimError> {
        self.handler
            .handle_get_history_for_key(key, &self.channel_id, &self.tx_id)
            .await
    }

    /// Calls another chaincode within this transaction. A non-empty
    /// `channel` targets that channel as `name/channel`.
    pub async fn invoke_chaincode(
        &self,
        chaincode_name: &str,
        args: Vec<Vec<u8>>,
        channel: &str,
    ) -> Result<TxResponse, ShimError> {
        let target = if channel.is_empty() {
            chaincode_name.to_string()
        } else {
            format!("{}/{}", chaincode_name, channel)
        };
        self.handler
            .handle_invoke_chaincode(&target, args, &self.channel_id, &self.tx_id)
            .await
    }

    /// Builds a NUL-framed composite key from an object type and its
    /// attributes; every segment must be non-empty.
    pub fn create_composite_key(
        &self,
        object_type: &str,
        attributes: &[String],
    ) -> Result<String, ShimError> {
        validate_composite_key_segment(object_type)?;

        let mut key = String::new();
        key.push(COMPOSITE_KEY_NS);
        key.push_str(object_type);
        key.push(MIN_UNICODE_RUNE);
        for attribute in attributes {
            validate_composite_key_segment(attribute)?;
            key.push_str(attribute);
            key.push(MIN_UNICODE_RUNE);
        }
        Ok(key)
    }

    /// Inverse of [`create_composite_key`](Self::create_composite_key).
    /// Keys that are empty or not NUL-prefixed yield `(None, [])`.
    pub fn split_composite_key(&self, composite_key: &str) -> (Option<String>, Vec<String>) {
        if !composite_key.starts_with(COMPOSITE_KEY_NS) {
            return (None, Vec::new());
        }

        let mut segments = composite_key[1..].split(MIN_UNICODE_RUNE);
        let object_type = match segments.next() {
            Some(first) if !first.is_empty() => first.to_string(),
            _ => return (None, Vec::new()),
        };

        let mut attributes: Vec<String> = segments.map(str::to_string).collect();
        // The trailing delimiter produces one empty tail segment.
        attributes.pop();
        (Some(object_type), attributes)
    }

    /// Scans every key descending from the given partial composite key,
    /// bounded above by the largest code point.
    pub async fn get_state_by_partial_composite_key(
        &self,
        object_type: &str,
        attributes: &[String],
    ) -> Result<StateQueryIterator, ShimError> {
        let partial = self.create_composite_key(object_type, attributes)?;
        let end = format!("{}{}", partial, MAX_UNICODE_RUNE);
        self.get_state_by_range(&partial, &end).await
    }

    pub async fn get_private_data(&self, collection: &str, key: &str) -> Result<Vec<u8>, ShimError> {
        validate_collection(collection)?;
        self.handler
            .handle_get_state(collection, key, &self.channel_id, &self.tx_id)
            .await
    }

    pub async fn put_private_data(
        &self,
        collection: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), ShimError> {
        validate_collection(collection)?;
        self.handler
            .handle_put_state(collection, key, value, &self.channel_id, &self.tx_id)
            .await
    }

    pub async fn delete_private_data(&self, collection: &str, key: &str) -> Result<(), ShimError> {
        validate_collection(collection)?;
        self.handler
            .handle_delete_state(collection, key, &self.channel_id, &self.tx_id)
            .await
    }

    pub async fn get_private_data_by_range(
        &self,
        collection: &str,
        start_key: &str,
        end_key: &str,
    ) -> Result<StateQueryIterator, ShimError> {
        validate_collection(collection)?;
        let start_key = substitute_empty_start_key(start_key);
        self.handler
            .handle_get_state_by_range(
                collection,
                &start_key,
                end_key,
                &self.channel_id,
                &self.tx_id,
            )
            .await
    }

    pub async fn get_private_data_by_partial_composite_key(
        &self,
        collection: &str,
        object_type: &str,
        attributes: &[String],
    ) -> Result<StateQueryIterator, ShimError> {
        validate_collection(collection)?;
        let partial = self.create_composite_key(object_type, attributes)?;
        let end = format!("{}{}", partial, MAX_UNICODE_RUNE);
        self.get_private_data_by_range(collection, &partial, &end).await
    }

    pub async fn get_private_data_query_result(
        &self,
        collection: &str,
        query: &str,
    ) -> Result<StateQueryIterator, ShimError> {
        validate_collection(collection)?;
        self.handler
            .handle_get_query_result(collection, query, &self.channel_id, &self.tx_id)
            .await
    }
}

fn substitute_empty_start_key(start_key: &str) -> String {
    if start_key.is_empty() {
        EMPTY_KEY_SUBSTITUTE.to_string()
    } else {
        start_key.to_string()
    }
}

fn validate_collection(collection: &str) -> Result<(), ShimError> {
    if collection.is_empty() {
        return Err(ShimError::InvalidArgument(
            "collection must be a valid string".to_string(),
        ));
    }
    Ok(())
}

fn validate_composite_key_segment(segment: &str) -> Result<(), ShimError> {
    if segment.is_empty() {
        return Err(ShimError::InvalidArgument(
            "objectType or attribute not a non-zero length string".to_string(),
        ));
    }
    Ok(())
}

fn compute_proposal_binding(nonce: &[u8], creator: &[u8], epoch: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(creator);
    hasher.update(epoch.to_le_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{bare_stub, idle_handler, stub_with_proposal};

    fn signed_proposal(
        nonce: &[u8],
        epoch: u64,
        transient: &[(&str, &[u8])],
    ) -> SignedProposal {
        let creator = SerializedIdentity {
            mspid: "Org1MSP".to_string(),
            id_bytes: b"-----BEGIN CERTIFICATE-----".to_vec(),
        };
        let signature_header = SignatureHeader {
            creator: creator.to_bytes().unwrap(),
            nonce: nonce.to_vec(),
        };
        let channel_header = ChannelHeader {
            channel_id: "mychannel".to_string(),
            tx_id: "tx-1".to_string(),
            epoch,
            timestamp: None,
        };
        let header = Header {
            channel_header: channel_header.to_bytes().unwrap(),
            signature_header: signature_header.to_bytes().unwrap(),
        };
        let payload = ChaincodeProposalPayload {
            input: vec![],
            transient_map: transient
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_vec()))
                .collect(),
        };
        let proposal = Proposal {
            header: header.to_bytes().unwrap(),
            payload: payload.to_bytes().unwrap(),
        };
        SignedProposal {
            proposal_bytes: proposal.to_bytes().unwrap(),
            signature: b"sig".to_vec(),
        }
    }

    #[test]
    fn test_valid_proposal_populates_stub() {
        let handler = idle_handler();
        let proposal = signed_proposal(b"nonce", 3, &[("secret", b"value")]);
        let stub = stub_with_proposal(&handler, proposal);

        assert_eq!(stub.creator().unwrap().mspid, "Org1MSP");
        assert_eq!(
            stub.transient_map().get("secret").map(Vec::as_slice),
            Some(b"value".as_slice())
        );
        assert!(stub.binding().is_some());
        assert!(stub.decoded_proposal().is_some());
    }

    #[test]
    fn test_binding_is_stable_and_keyed_on_inputs() {
        let b1 = compute_proposal_binding(b"nonce", b"creator", 5);
        let b2 = compute_proposal_binding(b"nonce", b"creator", 5);
        assert_eq!(b1, b2);
        assert_eq!(b1.len(), 64);
        assert!(b1.chars().all(|c| c.is_ascii_hexdigit()));

        assert_ne!(b1, compute_proposal_binding(b"other", b"creator", 5));
        assert_ne!(b1, compute_proposal_binding(b"nonce", b"other", 5));
        assert_ne!(b1, compute_proposal_binding(b"nonce", b"creator", 6));
    }

    #[test]
    fn test_validation_fails_fast_per_layer() {
        let handler = idle_handler();

        let garbage = SignedProposal {
            proposal_bytes: b"not json".to_vec(),
            signature: vec![],
        };
        let err = ChaincodeStub::new(
            handler.clone(),
            "ch".into(),
            "tx".into(),
            ChaincodeInput::default(),
            Some(garbage),
        )
        .err()
        .unwrap();
        assert!(err.to_string().starts_with("Failed extracting proposal"));

        let empty_header = SignedProposal {
            proposal_bytes: Proposal {
                header: vec![],
                payload: b"x".to_vec(),
            }
            .to_bytes()
            .unwrap(),
            signature: vec![],
        };
        let err = ChaincodeStub::new(
            handler.clone(),
            "ch".into(),
            "tx".into(),
            ChaincodeInput::default(),
            Some(empty_header),
        )
        .err()
        .unwrap();
        assert_eq!(err.to_string(), "Proposal header is empty");

        let empty_payload = SignedProposal {
            proposal_bytes: Proposal {
                header: b"x".to_vec(),
                payload: vec![],
            }
            .to_bytes()
            .unwrap(),
            signature: vec![],
        };
        let err = ChaincodeStub::new(
            handler.clone(),
            "ch".into(),
            "tx".into(),
            ChaincodeInput::default(),
            Some(empty_payload),
        )
        .err()
        .unwrap();
        assert_eq!(err.to_string(), "Proposal payload is empty");

        let bad_header = SignedProposal {
            proposal_bytes: Proposal {
                header: b"not a header".to_vec(),
                payload: b"x".to_vec(),
            }
            .to_bytes()
            .unwrap(),
            signature: vec![],
        };
        let err = ChaincodeStub::new(
            handler,
            "ch".into(),
            "tx".into(),
            ChaincodeInput::default(),
            Some(bad_header),
        )
        .err()
        .unwrap();
        assert!(err.to_string().starts_with("Could not extract the header"));
    }

    #[test]
    fn test_no_proposal_leaves_identity_unset() {
        let handler = idle_handler();
        let stub = bare_stub(&handler, "ch", "tx");
        assert!(stub.creator().is_none());
        assert!(stub.binding().is_none());
        assert!(stub.transient_map().is_empty());
    }

    #[test]
    fn test_function_and_parameters_lowercases_function() {
        let handler = idle_handler();
        let stub = ChaincodeStub::new(
            handler,
            "ch".into(),
            "tx".into(),
            ChaincodeInput::from_strings(["TransferAsset", "a", "b"]),
            None,
        )
        .unwrap();

        let fp = stub.get_function_and_parameters().unwrap();
        assert_eq!(fp.function, "transferasset");
        assert_eq!(fp.parameters, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_function_and_parameters_empty_args() {
        let handler = idle_handler();
        let stub = bare_stub(&handler, "ch", "tx");
        assert!(stub.get_function_and_parameters().is_none());
    }

    #[test]
    fn test_composite_key_vectors() {
        let handler = idle_handler();
        let stub = bare_stub(&handler, "ch", "tx");

        assert_eq!(stub.create_composite_key("k", &[]).unwrap(), "\u{0}k\u{0}");
        assert_eq!(
            stub.create_composite_key("k", &["a1".into(), "a2".into()])
                .unwrap(),
            "\u{0}k\u{0}a1\u{0}a2\u{0}"
        );

        assert!(stub.create_composite_key("", &[]).is_err());
        assert!(stub
            .create_composite_key("k", &["a".into(), "".into()])
            .is_err());
    }

    #[test]
    fn test_split_composite_key_edge_cases() {
        let handler = idle_handler();
        let stub = bare_stub(&handler, "ch", "tx");

        assert_eq!(stub.split_composite_key(""), (None, Vec::new()));
        assert_eq!(stub.split_composite_key("no-nul-here"), (None, Vec::new()));

        let (object_type, attributes) = stub.split_composite_key("\u{0}k\u{0}a1\u{0}a2\u{0}");
        assert_eq!(object_type.as_deref(), Some("k"));
        assert_eq!(attributes, vec!["a1".to_string(), "a2".to_string()]);

        let (object_type, attributes) = stub.split_composite_key("\u{0}k\u{0}");
        assert_eq!(object_type.as_deref(), Some("k"));
        assert!(attributes.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn test_composite_key_roundtrip(
            object_type in "[a-zA-Z][a-zA-Z0-9]{0,8}",
            attributes in proptest::collection::vec("[a-zA-Z0-9]{1,8}", 0..5),
        ) {
            let handler = idle_handler();
            let stub = bare_stub(&handler, "ch", "tx");

            let key = stub.create_composite_key(&object_type, &attributes).unwrap();
            let (split_type, split_attrs) = stub.split_composite_key(&key);
            proptest::prop_assert_eq!(split_type.as_deref(), Some(object_type.as_str()));
            proptest::prop_assert_eq!(split_attrs, attributes);
        }
    }

    #[test]
    fn test_set_event_requires_name() {
        let handler = idle_handler();
        let stub = bare_stub(&handler, "ch", "tx");

        assert!(stub.set_event("", vec![]).is_err());
        stub.set_event("transfer", b"payload".to_vec()).unwrap();

        let event = stub.take_event().unwrap();
        assert_eq!(event.event_name, "transfer");
        assert_eq!(event.payload, b"payload");
        assert!(stub.take_event().is_none());
    }
}
