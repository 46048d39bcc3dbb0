//! Connection state machine driving the conversation with the peer.
//!
//! The handler owns the duplex stream, performs the
//! Created → Established → Ready handshake, dispatches inbound
//! Init/Transaction messages onto worker tasks, and routes outbound
//! state operations through the per-context message queue.

use crate::chaincode::Chaincode;
use crate::error::ShimError;
use crate::iter::{HistoryQueryIterator, QueryIterator, StateQueryIterator};
use crate::queue::{MessageQueue, PendingRequest};
use crate::stream::PeerStream;
use crate::stub::ChaincodeStub;
use crate::writer::MessageWriter;
use ccshim_protocol::{
    ChaincodeId, ChaincodeInput, ChaincodeMessage, ChaincodeSpec, DelState, Decoder,
    GetHistoryForKey, GetQueryResult, GetState, GetStateByRange, MessageType, PutState,
    QueryResponse, QueryStateClose, QueryStateNext, TxResponse,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::{oneshot, Mutex, Notify};

/// Handshake states. Closing is cancellation, not a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerState {
    Created,
    Established,
    Ready,
}

impl fmt::Display for HandlerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerState::Created => write!(f, "created"),
            HandlerState::Established => write!(f, "established"),
            HandlerState::Ready => write!(f, "ready"),
        }
    }
}

/// The operation kind a reply is decoded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageMethod {
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

#[derive(Debug, Clone, Copy)]
enum MessageAction {
    Init,
    Invoke,
}

impl fmt::Display for MessageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageAction::Init => write!(f, "Init"),
            MessageAction::Invoke => write!(f, "Invoke"),
        }
    }
}

/// A peer reply decoded per operation kind.
enum ParsedResponse {
    Payload(Vec<u8>),
    Page(QueryResponse),
    Nested(ChaincodeMessage),
}

impl ParsedResponse {
    fn into_payload(self) -> Result<Vec<u8>, ShimError> {
        match self {
            ParsedResponse::Payload(bytes) => Ok(bytes),
            _ => Err(ShimError::Decode("unexpected response shape".to_string())),
        }
    }

    fn into_page(self) -> Result<QueryResponse, ShimError> {
        match self {
            ParsedResponse::Page(page) => Ok(page),
            _ => Err(ShimError::Decode("unexpected response shape".to_string())),
        }
    }

    fn into_nested(self) -> Result<ChaincodeMessage, ShimError> {
        match self {
            ParsedResponse::Nested(message) => Ok(message),
            _ => Err(ShimError::Decode("unexpected response shape".to_string())),
        }
    }
}

pub struct Handler {
    chaincode: Arc<dyn Chaincode>,
    writer: Arc<MessageWriter>,
    queue: MessageQueue,
    reader: Mutex<Option<ReadHalf<PeerStream>>>,
    decoder: Mutex<Decoder>,
    shutdown: Notify,
    closed: AtomicBool,
    read_buffer_size: usize,
}

impl Handler {
    /// Builds a handler over an already-connected peer stream.
    pub fn new(
        stream: PeerStream,
        chaincode: Arc<dyn Chaincode>,
        read_buffer_size: usize,
    ) -> Arc<Self> {
        let (read_half, write_half) = tokio::io::split(stream);
        let writer = Arc::new(MessageWriter::new(write_half));

        Arc::new(Self {
            chaincode,
            queue: MessageQueue::new(writer.clone()),
            writer,
            reader: Mutex::new(Some(read_half)),
            decoder: Mutex::new(Decoder::new()),
            shutdown: Notify::new(),
            closed: AtomicBool::new(false),
            read_buffer_size,
        })
    }

    /// Builds the Register message announcing the chaincode identity.
    pub fn register_message(chaincode_name: &str) -> Result<ChaincodeMessage, ShimError> {
        let payload = ChaincodeId {
            name: chaincode_name.to_string(),
        }
        .to_bytes()?;
        Ok(ChaincodeMessage::new(MessageType::Register, "", "", payload))
    }

    /// Cancels the connection and unblocks the receive loop.
    ///
    /// Requests already awaiting replies are not cancelled; they stay
    /// pending if the peer never answers.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("closing handler connection");
        self.shutdown.notify_one();
    }

    /// Opens the conversation: sends the register message, then loops
    /// receiving inbound messages until the stream ends or the handler
    /// is closed.
    pub async fn chat(self: &Arc<Self>, register: ChaincodeMessage) -> Result<(), ShimError> {
        self.writer.send(&register).await?;

        let mut state = HandlerState::Created;
        let mut buf = vec![0u8; self.read_buffer_size];

        loop {
            let n = tokio::select! {
                _ = self.shutdown.notified() => {
                    tracing::debug!("chat loop cancelled");
                    self.writer.shutdown().await;
                    return Ok(());
                }
                read = async {
                    let mut guard = self.reader.lock().await;
                    let reader = guard.as_mut().ok_or(ShimError::NotConnected)?;
                    reader.read(&mut buf).await.map_err(ShimError::Io)
                } => read?,
            };

            if n == 0 {
                tracing::error!("peer closed the stream");
                return Err(ShimError::ConnectionClosed);
            }

            let messages = {
                let mut decoder = self.decoder.lock().await;
                decoder.extend(&buf[..n]);
                let mut complete = Vec::new();
                while let Some(message) = decoder.decode_message()? {
                    complete.push(message);
                }
                complete
            };

            for message in messages {
                if let Err(e) = self.dispatch(&mut state, message).await {
                    self.close();
                    return Err(e);
                }
            }
        }
    }

    async fn dispatch(
        self: &Arc<Self>,
        state: &mut HandlerState,
        message: ChaincodeMessage,
    ) -> Result<(), ShimError> {
        tracing::debug!(
            "[{}-{}] received {} in state {}",
            message.channel_id,
            message.txid,
            message.msg_type,
            state
        );

        match *state {
            HandlerState::Created => {
                if message.msg_type == MessageType::Registered {
                    tracing::info!("registered with peer, state transferred to established");
                    *state = HandlerState::Established;
                } else {
                    tracing::error!(
                        "in created state, can only process REGISTERED but received {}",
                        message.msg_type
                    );
                    self.writer
                        .send(&state_violation_reply(&message, *state))
                        .await?;
                }
            }
            HandlerState::Established => {
                if message.msg_type == MessageType::Ready {
                    tracing::info!("peer reported ready, state transferred to ready");
                    *state = HandlerState::Ready;
                } else {
                    tracing::error!(
                        "in established state, can only process READY but received {}",
                        message.msg_type
                    );
                    self.writer
                        .send(&state_violation_reply(&message, *state))
                        .await?;
                }
            }
            HandlerState::Ready => match message.msg_type {
                MessageType::Response | MessageType::Error => {
                    if let Err(e) = self.queue.handle_response(message).await {
                        // A desynced context; others are unaffected.
                        tracing::error!("{}", e);
                    }
                }
                MessageType::Init => {
                    let handler = self.clone();
                    tokio::spawn(async move {
                        handler.handle_message(message, MessageAction::Init).await;
                    });
                }
                MessageType::Transaction => {
                    let handler = self.clone();
                    tokio::spawn(async move {
                        handler.handle_message(message, MessageAction::Invoke).await;
                    });
                }
                other => {
                    tracing::error!("received unknown message type {} from peer, exiting", other);
                    return Err(ShimError::ProtocolViolation(format!(
                        "unexpected {} message in ready state",
                        other
                    )));
                }
            },
        }
        Ok(())
    }

    /// Runs one Init/Transaction to completion and writes exactly one
    /// Completed or Error reply.
    async fn handle_message(self: Arc<Self>, message: ChaincodeMessage, action: MessageAction) {
        let reply = self.execute_message(&message, action).await;
        if let Err(e) = self.writer.send(&reply).await {
            tracing::error!(
                "[{}-{}] failed to send {} reply: {}",
                message.channel_id,
                message.txid,
                action,
                e
            );
        }
    }

    async fn execute_message(
        self: &Arc<Self>,
        message: &ChaincodeMessage,
        action: MessageAction,
    ) -> ChaincodeMessage {
        let input = match ChaincodeInput::from_bytes(&message.payload) {
            Ok(input) => input,
            Err(_) => {
                tracing::error!(
                    "[{}-{}] incorrect payload format, sending ERROR back to peer",
                    message.channel_id,
                    message.txid
                );
                return ChaincodeMessage::new(
                    MessageType::Error,
                    &message.channel_id,
                    &message.txid,
                    message.payload.clone(),
                );
            }
        };

        let stub = match ChaincodeStub::new(
            self.clone(),
            message.channel_id.clone(),
            message.txid.clone(),
            input,
            message.proposal.clone(),
        ) {
            Ok(stub) => stub,
            Err(e) => {
                tracing::error!(
                    "failed to construct a chaincode stub for the {} message: {}",
                    action,
                    e
                );
                return ChaincodeMessage::new(
                    MessageType::Error,
                    &message.channel_id,
                    &message.txid,
                    e.to_string().into_bytes(),
                );
            }
        };

        let mut response = match action {
            MessageAction::Init => self.chaincode.init(&stub).await,
            MessageAction::Invoke => self.chaincode.invoke(&stub).await,
        };

        if response.status == 0 {
            let text = format!(
                "[{}-{}] calling chaincode {} has not called success or error",
                message.channel_id, message.txid, action
            );
            tracing::error!("{}", text);
            response = TxResponse::error(text);
        }

        if !response.is_ok() {
            tracing::error!(
                "[{}-{}] calling chaincode {} returned error response {}, sending ERROR back to peer",
                message.channel_id,
                message.txid,
                action,
                response.message
            );
            return ChaincodeMessage::new(
                MessageType::Error,
                &message.channel_id,
                &message.txid,
                response.message.into_bytes(),
            );
        }

        tracing::info!(
            "[{}-{}] calling chaincode {} succeeded, sending COMPLETED back to peer",
            message.channel_id,
            message.txid,
            action
        );
        match response.to_bytes() {
            Ok(payload) => ChaincodeMessage::new(
                MessageType::Completed,
                &message.channel_id,
                &message.txid,
                payload,
            )
            .with_event(stub.take_event()),
            Err(e) => ChaincodeMessage::new(
                MessageType::Error,
                &message.channel_id,
                &message.txid,
                e.to_string().into_bytes(),
            ),
        }
    }

    /// Enqueues a request for its transaction context and awaits the
    /// correlated reply.
    async fn ask_peer(&self, message: ChaincodeMessage) -> Result<ChaincodeMessage, ShimError> {
        let (tx, rx) = oneshot::channel();
        self.queue
            .enqueue(PendingRequest {
                message,
                reply: tx,
            })
            .await;
        rx.await.map_err(|_| ShimError::ConnectionClosed)?
    }

    /// Decodes a peer reply according to the operation kind.
    fn parse_response(
        &self,
        response: ChaincodeMessage,
        method: MessageMethod,
    ) -> Result<ParsedResponse, ShimError> {
        match response.msg_type {
            MessageType::Response => {
                tracing::debug!(
                    "[{}-{}] received {:?} successful response",
                    response.channel_id,
                    response.txid,
                    method
                );
                match method {
                    MessageMethod::GetStateByRange
                    | MessageMethod::GetQueryResult
                    | MessageMethod::GetHistoryForKey
                    | MessageMethod::QueryStateNext
                    | MessageMethod::QueryStateClose => {
                        let page = QueryResponse::from_bytes(&response.payload)
                            .map_err(|e| ShimError::Decode(format!("malformed query response: {}", e)))?;
                        Ok(ParsedResponse::Page(page))
                    }
                    MessageMethod::InvokeChaincode => {
                        let nested = ChaincodeMessage::from_bytes(&response.payload).map_err(
                            |e| ShimError::Decode(format!("malformed nested message: {}", e)),
                        )?;
                        Ok(ParsedResponse::Nested(nested))
                    }
                    _ => Ok(ParsedResponse::Payload(response.payload)),
                }
            }
            MessageType::Error => {
                tracing::debug!(
                    "[{}-{}] received {:?} error response",
                    response.channel_id,
                    response.txid,
                    method
                );
                Err(ShimError::Peer(
                    String::from_utf8_lossy(&response.payload).into_owned(),
                ))
            }
            other => Err(ShimError::ProtocolViolation(format!(
                "[{}-{}] received incorrect {} in response to the {:?} call, expecting RESPONSE",
                response.channel_id, response.txid, other, method
            ))),
        }
    }

    pub(crate) async fn handle_get_state(
        &self,
        collection: &str,
        key: &str,
        channel_id: &str,
        tx_id: &str,
    ) -> Result<Vec<u8>, ShimError> {
        let payload = GetState {
            collection: collection.to_string(),
            key: key.to_string(),
        }
        .to_bytes()?;
        let reply = self
            .ask_peer(ChaincodeMessage::new(
                MessageType::GetState,
                channel_id,
                tx_id,
                payload,
            ))
            .await?;
        self.parse_response(reply, MessageMethod::GetState)?
            .into_payload()
    }

    pub(crate) async fn handle_put_state(
        &self,
        collection: &str,
        key: &str,
        value: Vec<u8>,
        channel_id: &str,
        tx_id: &str,
    ) -> Result<(), ShimError> {
        let payload = PutState {
            collection: collection.to_string(),
            key: key.to_string(),
            value,
        }
        .to_bytes()?;
        let reply = self
            .ask_peer(ChaincodeMessage::new(
                MessageType::PutState,
                channel_id,
                tx_id,
                payload,
            ))
            .await?;
        self.parse_response(reply, MessageMethod::PutState)?
            .into_payload()?;
        Ok(())
    }

    pub(crate) async fn handle_delete_state(
        &self,
        collection: &str,
        key: &str,
        channel_id: &str,
        tx_id: &str,
    ) -> Result<(), ShimError> {
        let payload = DelState {
            collection: collection.to_string(),
            key: key.to_string(),
        }
        .to_bytes()?;
        let reply = self
            .ask_peer(ChaincodeMessage::new(
                MessageType::DelState,
                channel_id,
                tx_id,
                payload,
            ))
            .await?;
        self.parse_response(reply, MessageMethod::DelState)?
            .into_payload()?;
        Ok(())
    }

    pub(crate) async fn handle_get_state_by_range(
        self: &Arc<Self>,
        collection: &str,
        start_key: &str,
        end_key: &str,
        channel_id: &str,
        tx_id: &str,
    ) -> Result<StateQueryIterator, ShimError> {
        let payload = GetStateByRange {
            collection: collection.to_string(),
            start_key: start_key.to_string(),
            end_key: end_key.to_string(),
        }
        .to_bytes()?;
        let reply = self
            .ask_peer(ChaincodeMessage::new(
                MessageType::GetStateByRange,
                channel_id,
                tx_id,
                payload,
            ))
            .await?;
        let page = self
            .parse_response(reply, MessageMethod::GetStateByRange)?
            .into_page()?;
        Ok(QueryIterator::new(
            self.clone(),
            channel_id.to_string(),
            tx_id.to_string(),
            page,
        ))
    }

    pub(crate) async fn handle_get_query_result(
        self: &Arc<Self>,
        collection: &str,
        query: &str,
        channel_id: &str,
        tx_id: &str,
    ) -> Result<StateQueryIterator, ShimError> {
        let payload = GetQueryResult {
            collection: collection.to_string(),
            query: query.to_string(),
        }
        .to_bytes()?;
        let reply = self
            .ask_peer(ChaincodeMessage::new(
                MessageType::GetQueryResult,
                channel_id,
                tx_id,
                payload,
            ))
            .await?;
        let page = self
            .parse_response(reply, MessageMethod::GetQueryResult)?
            .into_page()?;
        Ok(QueryIterator::new(
            self.clone(),
            channel_id.to_string(),
            tx_id.to_string(),
            page,
        ))
    }

    pub(crate) async fn handle_get_history_for_key(
        self: &Arc<Self>,
        key: &str,
        channel_id: &str,
        tx_id: &str,
    ) -> Result<HistoryQueryIterator, ShimError> {
        let payload = GetHistoryForKey {
            key: key.to_string(),
        }
        .to_bytes()?;
        let reply = self
            .ask_peer(ChaincodeMessage::new(
                MessageType::GetHistoryForKey,
                channel_id,
                tx_id,
                payload,
            ))
            .await?;
        let page = self
            .parse_response(reply, MessageMethod::GetHistoryForKey)?
            .into_page()?;
        Ok(QueryIterator::new(
            self.clone(),
            channel_id.to_string(),
            tx_id.to_string(),
            page,
        ))
    }

    pub(crate) async fn handle_query_state_next(
        &self,
        id: &str,
        channel_id: &str,
        tx_id: &str,
    ) -> Result<QueryResponse, ShimError> {
        let payload = QueryStateNext { id: id.to_string() }.to_bytes()?;
        let reply = self
            .ask_peer(ChaincodeMessage::new(
                MessageType::QueryStateNext,
                channel_id,
                tx_id,
                payload,
            ))
            .await?;
        self.parse_response(reply, MessageMethod::QueryStateNext)?
            .into_page()
    }

    pub(crate) async fn handle_query_state_close(
        &self,
        id: &str,
        channel_id: &str,
        tx_id: &str,
    ) -> Result<QueryResponse, ShimError> {
        let payload = QueryStateClose { id: id.to_string() }.to_bytes()?;
        let reply = self
            .ask_peer(ChaincodeMessage::new(
                MessageType::QueryStateClose,
                channel_id,
                tx_id,
                payload,
            ))
            .await?;
        self.parse_response(reply, MessageMethod::QueryStateClose)?
            .into_page()
    }

    pub(crate) async fn handle_invoke_chaincode(
        &self,
        chaincode_name: &str,
        args: Vec<Vec<u8>>,
        channel_id: &str,
        tx_id: &str,
    ) -> Result<TxResponse, ShimError> {
        let payload = ChaincodeSpec {
            chaincode_id: ChaincodeId {
                name: chaincode_name.to_string(),
            },
            input: ChaincodeInput { args },
        }
        .to_bytes()?;
        let reply = self
            .ask_peer(ChaincodeMessage::new(
                MessageType::InvokeChaincode,
                channel_id,
                tx_id,
                payload,
            ))
            .await?;
        let nested = self
            .parse_response(reply, MessageMethod::InvokeChaincode)?
            .into_nested()?;

        match nested.msg_type {
            MessageType::Completed => TxResponse::from_bytes(&nested.payload)
                .map_err(|e| ShimError::Decode(format!("malformed invoke response: {}", e))),
            MessageType::Error => Err(ShimError::Peer(
                String::from_utf8_lossy(&nested.payload).into_owned(),
            )),
            other => Err(ShimError::ProtocolViolation(format!(
                "unexpected {} reply to a chaincode invocation",
                other
            ))),
        }
    }
}

/// The Error reply sent when a message arrives in the wrong handshake
/// state.
fn state_violation_reply(message: &ChaincodeMessage, state: HandlerState) -> ChaincodeMessage {
    let text = format!(
        "[{}-{}] handler cannot handle message ({}, with payload size {}) while in state {}",
        message.channel_id,
        message.txid,
        message.msg_type,
        message.payload.len(),
        state
    );
    ChaincodeMessage::new(
        MessageType::Error,
        &message.channel_id,
        &message.txid,
        text.into_bytes(),
    )
}
