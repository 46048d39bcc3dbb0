//! Outbound message queue.
//!
//! Serializes concurrent requests per transaction context onto the
//! shared stream: each context gets a lazily created FIFO, the head of
//! which is the only message in flight for that context. Independent
//! contexts proceed concurrently.

use crate::error::ShimError;
use crate::writer::MessageWriter;
use ccshim_protocol::ChaincodeMessage;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;

/// A queued request: the wire message plus the completion handle its
/// caller awaits. Lives from enqueue until its reply (or a queue/write
/// error) resolves it.
pub(crate) struct PendingRequest {
    pub message: ChaincodeMessage,
    pub reply: oneshot::Sender<Result<ChaincodeMessage, ShimError>>,
}

pub(crate) struct MessageQueue {
    writer: Arc<MessageWriter>,
    queues: DashMap<String, VecDeque<PendingRequest>>,
}

impl MessageQueue {
    pub fn new(writer: Arc<MessageWriter>) -> Self {
        Self {
            writer,
            queues: DashMap::new(),
        }
    }

    /// Pushes a request onto its context FIFO; if it is now the sole
    /// entry it is sent immediately, otherwise it waits its turn.
    pub async fn enqueue(&self, request: PendingRequest) {
        let context_id = request.message.tx_context_id();

        let head = {
            let mut queue = self.queues.entry(context_id.clone()).or_default();
            let message = queue.is_empty().then(|| request.message.clone());
            queue.push_back(request);
            message
        };

        match head {
            Some(message) => self.send_message(&context_id, message).await,
            None => tracing::debug!("request for context {} queued behind head", context_id),
        }
    }

    /// Resolves the head of the context FIFO with the peer's reply,
    /// then sends the next queued request if one exists.
    ///
    /// The pop and the peek at the successor happen under one entry
    /// guard: a caller woken by the reply that immediately enqueues
    /// again finds the successor still at the front and waits behind
    /// it, so the successor is written exactly once.
    pub async fn handle_response(&self, response: ChaincodeMessage) -> Result<(), ShimError> {
        let context_id = response.tx_context_id();

        let Some((head, next)) = self.pop_head(&context_id) else {
            return Err(ShimError::Queue(format!(
                "no in-flight request for transaction context {}",
                context_id
            )));
        };

        // The caller may have gone away; the FIFO still advances.
        let _ = head.reply.send(Ok(response));

        if let Some(next) = next {
            self.send_message(&context_id, next).await;
        }
        Ok(())
    }

    /// Pops a context's in-flight head and, under the same entry
    /// guard, captures the successor's wire message.
    fn pop_head(&self, context_id: &str) -> Option<(PendingRequest, Option<ChaincodeMessage>)> {
        let popped = self.queues.get_mut(context_id).and_then(|mut queue| {
            let head = queue.pop_front()?;
            let next = queue.front().map(|r| r.message.clone());
            Some((head, next))
        });
        self.drop_if_empty(context_id);
        popped
    }

    /// Writes a context's head-of-queue message to the stream. A
    /// failed write resolves that head with the error and moves on to
    /// its successor.
    async fn send_message(&self, context_id: &str, message: ChaincodeMessage) {
        let mut message = message;
        loop {
            match self.writer.send(&message).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::error!(
                        "failed to send queued request for context {}: {}",
                        context_id,
                        e
                    );
                    let Some((head, next)) = self.pop_head(context_id) else {
                        return;
                    };
                    let _ = head.reply.send(Err(e));
                    match next {
                        Some(next) => message = next,
                        None => return,
                    }
                }
            }
        }
    }

    fn drop_if_empty(&self, context_id: &str) {
        self.queues
            .remove_if(context_id, |_, queue| queue.is_empty());
    }

    /// Number of contexts with queued or in-flight requests.
    #[cfg(test)]
    pub fn context_count(&self) -> usize {
        self.queues.len()
    }
}
