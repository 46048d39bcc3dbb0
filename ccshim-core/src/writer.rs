//! Single-writer access to the shared peer stream.
//!
//! The outbound queue already guarantees at most one in-flight request
//! per transaction context, but independent contexts and handshake
//! replies still write concurrently; every physical write goes through
//! this mutex so frames never interleave.

use crate::error::ShimError;
use crate::stream::PeerStream;
use ccshim_protocol::{ChaincodeMessage, Encoder};
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::Mutex;

pub(crate) struct MessageWriter {
    inner: Mutex<Option<WriteHalf<PeerStream>>>,
}

impl MessageWriter {
    pub fn new(write_half: WriteHalf<PeerStream>) -> Self {
        Self {
            inner: Mutex::new(Some(write_half)),
        }
    }

    /// Encodes and writes one message to the stream.
    pub async fn send(&self, message: &ChaincodeMessage) -> Result<(), ShimError> {
        let encoded = Encoder::encode_message(message)?;

        let mut guard = self.inner.lock().await;
        let writer = guard.as_mut().ok_or(ShimError::NotConnected)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;

        tracing::debug!(
            "[{}-{}] sent {} ({} bytes)",
            message.channel_id,
            message.txid,
            message.msg_type,
            encoded.len()
        );
        Ok(())
    }

    /// Shuts the write half down; subsequent sends fail NotConnected.
    pub async fn shutdown(&self) {
        if let Some(mut writer) = self.inner.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}
