//! Byte transports that feed a generation session.

use crate::error::ApiError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt::Display;
use tokio::sync::mpsc;

/// A source of raw response bytes for one session.
///
/// `None` means the stream ended. A transport error ends the session; the
/// session manager does not read past it.
#[async_trait]
pub trait Transport: Send {
    async fn next_chunk(&mut self) -> Option<Result<Bytes, ApiError>>;

    /// Release the underlying connection. Called once the session is terminal.
    async fn close(&mut self) {}
}

/// Transport over any byte stream (an HTTP body, a replayed capture)
pub struct StreamTransport {
    inner: BoxStream<'static, Result<Bytes, ApiError>>,
}

impl StreamTransport {
    pub fn new<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Display,
    {
        Self {
            inner: stream
                .map(|item| item.map_err(|e| ApiError::TransportError(e.to_string())))
                .boxed(),
        }
    }

    /// Split `data` into fixed-size reads.
    pub fn chunked(data: Bytes, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let mut chunks = Vec::with_capacity(data.len() / chunk_size + 1);
        let mut start = 0;
        while start < data.len() {
            let end = (start + chunk_size).min(data.len());
            chunks.push(Ok::<Bytes, ApiError>(data.slice(start..end)));
            start = end;
        }
        Self::new(futures::stream::iter(chunks))
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn next_chunk(&mut self) -> Option<Result<Bytes, ApiError>> {
        self.inner.next().await
    }

    async fn close(&mut self) {
        self.inner = futures::stream::empty().boxed();
    }
}

/// Create a transport driven by hand through its paired feed.
pub fn channel() -> (TransportFeed, ChannelTransport) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TransportFeed { tx }, ChannelTransport { rx })
}

/// Writing half of a [`ChannelTransport`]. Dropping it ends the stream.
#[derive(Clone)]
pub struct TransportFeed {
    tx: mpsc::UnboundedSender<Result<Bytes, ApiError>>,
}

impl TransportFeed {
    /// Push one read. Returns `false` once the session has closed the transport.
    pub fn send(&self, data: impl Into<Bytes>) -> bool {
        self.tx.send(Ok(data.into())).is_ok()
    }

    /// Fail the stream with a transport error.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.tx
            .send(Err(ApiError::TransportError(message.into())))
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct ChannelTransport {
    rx: mpsc::UnboundedReceiver<Result<Bytes, ApiError>>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn next_chunk(&mut self) -> Option<Result<Bytes, ApiError>> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}
