//! Shared test harness: an in-memory peer endpoint plus small
//! chaincode implementations to drive the handler with.

use crate::chaincode::Chaincode;
use crate::error::ShimError;
use crate::handler::Handler;
use crate::stream::PeerStream;
use crate::stub::ChaincodeStub;
use async_trait::async_trait;
use ccshim_protocol::{
    ChaincodeInput, ChaincodeMessage, Decoder, Encoder, MessageType, SignedProposal, TxResponse,
};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

/// The peer's end of an in-memory connection.
pub(crate) struct TestPeer {
    read: ReadHalf<DuplexStream>,
    write: WriteHalf<DuplexStream>,
    decoder: Decoder,
    buf: Vec<u8>,
}

impl TestPeer {
    pub async fn recv(&mut self) -> ChaincodeMessage {
        loop {
            if let Some(message) = self.decoder.decode_message().unwrap() {
                return message;
            }
            let n = self.read.read(&mut self.buf).await.unwrap();
            assert!(n > 0, "stream closed while awaiting message");
            self.decoder.extend(&self.buf[..n]);
        }
    }

    pub async fn send(&mut self, message: &ChaincodeMessage) {
        let encoded = Encoder::encode_message(message).unwrap();
        self.write.write_all(&encoded).await.unwrap();
        self.write.flush().await.unwrap();
    }

    pub async fn expect_register(&mut self) -> ChaincodeMessage {
        let register = self.recv().await;
        assert_eq!(register.msg_type, MessageType::Register);
        register
    }

    /// Consumes the Register message and walks the handler to ready.
    pub async fn handshake(&mut self) {
        self.expect_register().await;
        self.send(&ChaincodeMessage::new(
            MessageType::Registered,
            "",
            "",
            vec![],
        ))
        .await;
        self.send(&ChaincodeMessage::new(MessageType::Ready, "", "", vec![]))
            .await;
    }
}

/// Spawns a handler chatting over an in-memory stream and returns the
/// peer end plus the chat task.
pub(crate) async fn start_handler(
    chaincode: Arc<dyn Chaincode>,
) -> (
    Arc<Handler>,
    TestPeer,
    JoinHandle<Result<(), ShimError>>,
) {
    let (near, far) = tokio::io::duplex(256 * 1024);
    let handler = Handler::new(PeerStream::Memory { stream: near }, chaincode, 8192);

    let register = Handler::register_message("testcc").unwrap();
    let chat = {
        let handler = handler.clone();
        tokio::spawn(async move { handler.chat(register).await })
    };

    let (read, write) = tokio::io::split(far);
    let peer = TestPeer {
        read,
        write,
        decoder: Decoder::new(),
        buf: vec![0u8; 8192],
    };
    (handler, peer, chat)
}

/// A handler whose stream goes nowhere. For tests that never perform
/// state operations.
pub(crate) fn idle_handler() -> Arc<Handler> {
    let (near, far) = tokio::io::duplex(4096);
    std::mem::forget(far);
    Handler::new(PeerStream::Memory { stream: near }, Arc::new(EchoChaincode), 8192)
}

pub(crate) fn bare_stub(handler: &Arc<Handler>, channel_id: &str, tx_id: &str) -> ChaincodeStub {
    ChaincodeStub::new(
        handler.clone(),
        channel_id.to_string(),
        tx_id.to_string(),
        ChaincodeInput::default(),
        None,
    )
    .unwrap()
}

pub(crate) fn stub_with_args(handler: &Arc<Handler>, args: &[&str]) -> ChaincodeStub {
    ChaincodeStub::new(
        handler.clone(),
        "ch".to_string(),
        "tx".to_string(),
        ChaincodeInput::from_strings(args.iter().copied()),
        None,
    )
    .unwrap()
}

pub(crate) fn stub_with_proposal(
    handler: &Arc<Handler>,
    proposal: SignedProposal,
) -> ChaincodeStub {
    ChaincodeStub::new(
        handler.clone(),
        "ch".to_string(),
        "tx".to_string(),
        ChaincodeInput::default(),
        Some(proposal),
    )
    .unwrap()
}

/// Succeeds with the invocation parameters joined back together.
pub(crate) struct EchoChaincode;

#[async_trait]
impl Chaincode for EchoChaincode {
    async fn init(&self, stub: &ChaincodeStub) -> TxResponse {
        self.invoke(stub).await
    }

    async fn invoke(&self, stub: &ChaincodeStub) -> TxResponse {
        let parameters = stub
            .get_function_and_parameters()
            .map(|fp| fp.parameters)
            .unwrap_or_default();
        TxResponse::success(parameters.join(",").into_bytes())
    }
}

/// Returns a response without ever setting a status.
pub(crate) struct ForgetfulChaincode;

#[async_trait]
impl Chaincode for ForgetfulChaincode {
    async fn init(&self, _stub: &ChaincodeStub) -> TxResponse {
        TxResponse::default()
    }

    async fn invoke(&self, _stub: &ChaincodeStub) -> TxResponse {
        TxResponse::default()
    }
}

/// Reads the key named by its first parameter and returns the value.
pub(crate) struct StateReaderChaincode;

#[async_trait]
impl Chaincode for StateReaderChaincode {
    async fn init(&self, stub: &ChaincodeStub) -> TxResponse {
        self.invoke(stub).await
    }

    async fn invoke(&self, stub: &ChaincodeStub) -> TxResponse {
        let Some(fp) = stub.get_function_and_parameters() else {
            return TxResponse::error("no function".to_string());
        };
        let Some(key) = fp.parameters.first() else {
            return TxResponse::error("no key".to_string());
        };
        match stub.get_state(key).await {
            Ok(value) => TxResponse::success(value),
            Err(e) => TxResponse::error(e.to_string()),
        }
    }
}
