//! Pull cursors over paginated query results.
//!
//! The peer answers range/query/history requests with one page of
//! opaque result bytes plus a server-side cursor id. The iterator walks
//! the local page and fetches further pages on demand; `done` turns
//! true on the element that exhausts both.

use crate::error::ShimError;
use crate::handler::Handler;
use ccshim_protocol::{Kv, KeyModification, QueryResponse};
use std::marker::PhantomData;
use std::sync::Arc;

/// Decodes one opaque query result entry into its element type.
pub trait QueryResultElement: Sized {
    fn from_result_bytes(bytes: &[u8]) -> Result<Self, ShimError>;
}

impl QueryResultElement for Kv {
    fn from_result_bytes(bytes: &[u8]) -> Result<Self, ShimError> {
        Kv::from_bytes(bytes).map_err(|e| ShimError::Decode(format!("malformed KV result: {}", e)))
    }
}

impl QueryResultElement for KeyModification {
    fn from_result_bytes(bytes: &[u8]) -> Result<Self, ShimError> {
        KeyModification::from_bytes(bytes)
            .map_err(|e| ShimError::Decode(format!("malformed history result: {}", e)))
    }
}

/// One step of an iterator: the element, if any, and whether the
/// cursor is exhausted. `value` is None only on the terminal step of
/// an already-exhausted iterator.
#[derive(Debug)]
pub struct QueryResult<T> {
    pub value: Option<T>,
    pub done: bool,
}

/// Cursor over key/value records from a range scan or rich query.
pub type StateQueryIterator = QueryIterator<Kv>;

/// Cursor over the modification history of a single key.
pub type HistoryQueryIterator = QueryIterator<KeyModification>;

pub struct QueryIterator<T> {
    handler: Arc<Handler>,
    channel_id: String,
    tx_id: String,
    response: QueryResponse,
    cursor: usize,
    _element: PhantomData<T>,
}

impl<T: QueryResultElement> QueryIterator<T> {
    pub(crate) fn new(
        handler: Arc<Handler>,
        channel_id: String,
        tx_id: String,
        first_page: QueryResponse,
    ) -> Self {
        Self {
            handler,
            channel_id,
            tx_id,
            response: first_page,
            cursor: 0,
            _element: PhantomData,
        }
    }

    /// Yields the next element, fetching the next page from the peer
    /// when the local one is exhausted and the server reported more.
    pub async fn next(&mut self) -> Result<QueryResult<T>, ShimError> {
        loop {
            if self.cursor < self.response.results.len() {
                let element =
                    T::from_result_bytes(&self.response.results[self.cursor].result_bytes)?;
                self.cursor += 1;
                let done = self.cursor >= self.response.results.len() && !self.response.has_more;
                return Ok(QueryResult {
                    value: Some(element),
                    done,
                });
            }

            if self.response.has_more {
                tracing::debug!(
                    "iterator {} exhausted local page, fetching next",
                    self.response.id
                );
                self.response = self
                    .handler
                    .handle_query_state_next(&self.response.id, &self.channel_id, &self.tx_id)
                    .await?;
                self.cursor = 0;
                continue;
            }

            return Ok(QueryResult {
                value: None,
                done: true,
            });
        }
    }

    /// Releases the server-side cursor.
    pub async fn close(&mut self) -> Result<QueryResponse, ShimError> {
        self.handler
            .handle_query_state_close(&self.response.id, &self.channel_id, &self.tx_id)
            .await
    }
}
