//! Reusable synthetic responses for cache hits.
//!
//! A cache hit is answered with a response built from the cached status
//! alone. Those responses are recycled through a bounded free list: a
//! `PooledResponse` is reset and handed back when dropped, so it cannot be
//! touched after release.
//!
//! The pool is nominal. The body and the status-text value are static
//! reason phrases shared with every rendered response; the header map is
//! the only allocation `to_response` makes.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::Response,
};
use std::sync::{Arc, Mutex};

use crate::cache::verdict::Verdict;

/// Header carrying the reason phrase of a synthetic response.
pub const STATUS_TEXT_HEADER: HeaderName = HeaderName::from_static("status-text");

#[derive(Debug)]
struct SyntheticResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: &'static str,
}

impl SyntheticResponse {
    fn blank() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: "",
        }
    }

    fn fill(&mut self, verdict: Verdict) {
        self.status = verdict.status();
        self.body = self.status.canonical_reason().unwrap_or("");
        self.headers
            .insert(STATUS_TEXT_HEADER, HeaderValue::from_static(self.body));
    }

    fn reset(&mut self) {
        self.status = StatusCode::OK;
        self.headers.clear();
        self.body = "";
    }
}

/// Bounded free list of synthetic responses.
#[derive(Debug, Clone)]
pub struct ResponsePool {
    free: Arc<Mutex<Vec<SyntheticResponse>>>,
    capacity: usize,
}

impl ResponsePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Arc::new(Mutex::new(Vec::with_capacity(capacity))),
            capacity,
        }
    }

    /// Take a response from the pool, or allocate one, and fill it from `verdict`.
    pub fn acquire(&self, verdict: Verdict) -> PooledResponse {
        let recycled = self
            .free
            .lock()
            .expect("response pool mutex poisoned")
            .pop();
        let mut inner = recycled.unwrap_or_else(SyntheticResponse::blank);
        inner.fill(verdict);

        PooledResponse {
            inner: Some(inner),
            pool: self.clone(),
        }
    }

    /// Number of idle responses ready for reuse.
    pub fn idle(&self) -> usize {
        self.free.lock().expect("response pool mutex poisoned").len()
    }

    fn release(&self, mut response: SyntheticResponse) {
        response.reset();
        let mut free = self.free.lock().expect("response pool mutex poisoned");
        if free.len() < self.capacity {
            free.push(response);
        }
    }
}

/// A synthetic response borrowed from a `ResponsePool`.
#[derive(Debug)]
pub struct PooledResponse {
    inner: Option<SyntheticResponse>,
    pool: ResponsePool,
}

impl PooledResponse {
    fn get(&self) -> &SyntheticResponse {
        // Only `Drop` takes the value.
        self.inner.as_ref().expect("pooled response used after release")
    }

    pub fn status(&self) -> StatusCode {
        self.get().status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.get().headers
    }

    pub fn body(&self) -> &str {
        self.get().body
    }

    /// Render an owned response for the client. The body is not copied.
    pub fn to_response(&self) -> Response {
        let inner = self.get();
        let mut response = Response::new(Body::from(inner.body));
        *response.status_mut() = inner.status;
        *response.headers_mut() = inner.headers.clone();
        response
    }
}

impl Drop for PooledResponse {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            self.pool.release(inner);
        }
    }
}
