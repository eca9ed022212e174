//! Request body capture under a size limit.
//!
//! # Responsibilities
//! - Detect whether a request carries a body, even without a declared length
//! - Enforce the maximum request body size (413 Payload Too Large)
//! - Replace the request body with a buffered copy that can be read again
//!
//! # Design Decisions
//! - A declared length above the limit is rejected before reading anything
//! - Undeclared bodies are probed with a small peek whose bytes are replayed
//! - Chunked bodies grow the buffer in fixed increments

use axum::{
    body::{Body, Bytes, HttpBody},
    http::{header, HeaderMap, Request},
};
use futures_util::stream::{self, StreamExt};

use crate::gate::types::{GateError, GateResult};

/// Upper bound on bytes read while probing a body with no declared length.
pub const PEEK_LIMIT: usize = 512;

/// Buffer growth increment for chunked or undeclared bodies.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// A fully buffered request body.
#[derive(Debug, Clone, Default)]
pub struct CapturedBody {
    bytes: Bytes,
}

impl CapturedBody {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Shared handle to the captured bytes.
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    /// A fresh, unconsumed body with the same content.
    pub fn replay(&self) -> Body {
        Body::from(self.bytes.clone())
    }
}

/// Captures request bodies up to `max_body_size` bytes.
#[derive(Debug, Clone)]
pub struct BodyGuard {
    max_body_size: usize,
}

impl BodyGuard {
    pub fn new(max_body_size: usize) -> Self {
        Self { max_body_size }
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Buffer the request body and put a replayable copy back into the request.
    ///
    /// On error the request body has been consumed and the request must not
    /// be forwarded.
    pub async fn capture(&self, request: &mut Request<Body>) -> GateResult<CapturedBody> {
        let declared = declared_length(request.headers());
        let chunked = is_chunked(request.headers());

        if let Some(len) = declared {
            if len > self.max_body_size {
                tracing::warn!(
                    content_length = len,
                    limit = self.max_body_size,
                    "Declared body length exceeds limit"
                );
                return Err(GateError::BodyTooLarge { limit: self.max_body_size });
            }
        }

        let body = std::mem::take(request.body_mut());
        let body = if declared.unwrap_or(0) > 0 {
            body
        } else {
            match peek(body).await? {
                Some(body) => body,
                None => return Ok(CapturedBody::default()),
            }
        };

        let bytes = self.read_limited(body, declared, chunked).await?;
        let captured = CapturedBody { bytes };
        *request.body_mut() = captured.replay();
        Ok(captured)
    }

    async fn read_limited(
        &self,
        body: Body,
        declared: Option<usize>,
        chunked: bool,
    ) -> GateResult<Bytes> {
        let limit = self.max_body_size.saturating_add(1);
        let incremental = chunked || declared.unwrap_or(0) == 0;
        let mut buf: Vec<u8> = match declared {
            Some(len) if !incremental => Vec::with_capacity(len.min(limit)),
            _ => Vec::new(),
        };

        let mut frames = body.into_data_stream();
        while let Some(frame) = frames.next().await {
            let chunk = frame.map_err(|e| GateError::BodyRead(e.to_string()))?;
            let take = chunk.len().min(limit - buf.len());

            if incremental {
                for piece in chunk[..take].chunks(CHUNK_SIZE) {
                    if buf.capacity() - buf.len() < piece.len() {
                        buf.reserve_exact(CHUNK_SIZE.min(limit - buf.len()));
                    }
                    buf.extend_from_slice(piece);
                }
            } else {
                buf.extend_from_slice(&chunk[..take]);
            }

            if buf.len() > self.max_body_size {
                tracing::warn!(
                    read = buf.len(),
                    limit = self.max_body_size,
                    "Body max limit reached"
                );
                return Err(GateError::BodyTooLarge { limit: self.max_body_size });
            }
        }

        Ok(Bytes::from(buf))
    }
}

/// Read the first few frames of an undeclared body.
///
/// Returns `None` when the body is empty, otherwise a body that yields the
/// peeked frames followed by the rest of the stream.
async fn peek(body: Body) -> GateResult<Option<Body>> {
    if body.is_end_stream() {
        return Ok(None);
    }

    let mut rest = body.into_data_stream();
    let mut head: Vec<Bytes> = Vec::new();
    let mut seen = 0;
    let mut ended = false;

    while seen < PEEK_LIMIT {
        match rest.next().await {
            Some(Ok(chunk)) => {
                seen += chunk.len();
                if !chunk.is_empty() {
                    head.push(chunk);
                }
            }
            Some(Err(e)) => return Err(GateError::BodyRead(e.to_string())),
            None => {
                ended = true;
                break;
            }
        }
    }

    if ended && head.is_empty() {
        return Ok(None);
    }

    let replay = stream::iter(head.into_iter().map(Ok::<_, axum::Error>)).chain(rest);
    Ok(Some(Body::from_stream(replay)))
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("chunked"))
}
