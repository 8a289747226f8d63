//! Generation backends: whatever opens the response stream for a session.

use super::transport::{channel, StreamTransport, Transport, TransportFeed};
use crate::error::ApiError;
use crate::table::RagParams;
use crate::types::{CellAddress, SessionId, TableId};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fully resolved prompt for one target cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellPrompt {
    pub address: CellAddress,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag_params: Option<RagParams>,
}

/// What a backend is asked to generate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub session_id: SessionId,
    pub table_id: TableId,
    pub stream: bool,
    pub prompts: Vec<CellPrompt>,
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Open the response stream for a request. Errors here happen before any
    /// byte is consumed, so retryable ones may be retried.
    async fn open(&self, request: &GenerationRequest) -> Result<Box<dyn Transport>, ApiError>;
}

/// Replays a captured response body in fixed-size reads
pub struct ReplayBackend {
    body: Bytes,
    chunk_size: usize,
}

impl ReplayBackend {
    pub fn new(body: impl Into<Bytes>, chunk_size: usize) -> Self {
        Self {
            body: body.into(),
            chunk_size,
        }
    }
}

#[async_trait]
impl GenerationBackend for ReplayBackend {
    async fn open(&self, _request: &GenerationRequest) -> Result<Box<dyn Transport>, ApiError> {
        Ok(Box::new(StreamTransport::chunked(
            self.body.clone(),
            self.chunk_size,
        )))
    }
}

/// Backend handing out pre-arranged transports or failures in order
#[derive(Default)]
pub struct ScriptedBackend {
    queue: Mutex<VecDeque<Result<Box<dyn Transport>, ApiError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    opens: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a hand-driven transport and return its feed.
    pub fn push_channel(&self) -> TransportFeed {
        let (feed, transport) = channel();
        self.queue.lock().push_back(Ok(Box::new(transport)));
        feed
    }

    pub fn push_transport(&self, transport: impl Transport + 'static) {
        self.queue.lock().push_back(Ok(Box::new(transport)));
    }

    /// Queue a failed open.
    pub fn push_failure(&self, error: ApiError) {
        self.queue.lock().push_back(Err(error));
    }

    /// Number of `open` calls so far, failed ones included.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn open(&self, request: &GenerationRequest) -> Result<Box<dyn Transport>, ApiError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        self.queue.lock().pop_front().unwrap_or_else(|| {
            Err(ApiError::TransportError(
                "no transport scripted for this request".to_string(),
            ))
        })
    }
}
