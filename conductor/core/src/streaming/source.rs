//! Response Sources
//!
//! The networking collaborator hands over an already-open response: a status,
//! headers, and something that yields body chunks. [`ChunkSource`] is that
//! "something"; `reqwest::Response` implements it directly and any
//! `Stream<Item = Result<Bytes, E>>` can be adapted with [`StreamSource`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;

use crate::error::{ConductorError, Result};

/// Longest error-body excerpt kept in a transport error
const MAX_ERROR_BODY: usize = 4096;

/// Producer of raw body chunks
#[async_trait]
pub trait ChunkSource: Send {
    /// Next chunk, `None` at end of body
    async fn next_chunk(&mut self) -> Option<Result<Bytes>>;
}

#[async_trait]
impl ChunkSource for reqwest::Response {
    async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        self.chunk().await.map_err(ConductorError::from).transpose()
    }
}

/// Adapter from any byte stream to a [`ChunkSource`]
pub struct StreamSource<S>(pub S);

#[async_trait]
impl<S, E> ChunkSource for StreamSource<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin,
    E: std::fmt::Display + Send,
{
    async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        self.0
            .next()
            .await
            .map(|chunk| chunk.map_err(|e| ConductorError::connection(e.to_string())))
    }
}

/// An already-open HTTP response
pub struct OpenResponse<S> {
    /// Response status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Body chunk source
    pub body: S,
}

impl<S: ChunkSource> OpenResponse<S> {
    /// Wrap a status and body with empty headers
    pub fn new(status: StatusCode, body: S) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// Attach response headers
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Read the body of a failed response as text, up to a fixed limit
    ///
    /// The body is never decoded as events.
    pub(crate) async fn read_error_body(&mut self) -> String {
        let mut body = Vec::new();
        while let Some(Ok(chunk)) = self.body.next_chunk().await {
            body.extend_from_slice(&chunk);
            if body.len() >= MAX_ERROR_BODY {
                body.truncate(MAX_ERROR_BODY);
                break;
            }
        }
        String::from_utf8_lossy(&body).into_owned()
    }
}

impl OpenResponse<reqwest::Response> {
    /// Adopt a response opened by `reqwest`
    #[must_use]
    pub fn from_reqwest(response: reqwest::Response) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
            body: response,
        }
    }
}

impl<S> std::fmt::Debug for OpenResponse<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}
