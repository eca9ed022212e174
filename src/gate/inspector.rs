//! Client for the external inspection service.
//!
//! The inspector receives a copy of each request (same method, target,
//! end-to-end headers and body) and answers with a status code: below 400
//! allows the request, anything else denies it.

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, Method, Request, StatusCode},
    response::Response,
};
use std::future::Future;
use std::time::{Duration, Instant};

use crate::gate::types::{GateError, GateResult};
use crate::observability::metrics;
use crate::security::headers::strip_hop_by_hop;

/// A request as sent to the inspector.
#[derive(Debug, Clone)]
pub struct InspectionRequest {
    pub method: Method,
    /// Path and query exactly as received.
    pub target: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InspectionRequest {
    /// Copy method, target and forwardable headers from `request`, with `body`.
    pub fn from_request<B>(request: &Request<B>, body: Bytes) -> Self {
        let target = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();

        let mut headers = request.headers().clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        Self {
            method: request.method().clone(),
            target,
            headers,
            body,
        }
    }
}

/// The inspector's answer, fully read.
#[derive(Debug, Clone)]
pub struct InspectorResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InspectorResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Relay the response to the client unchanged, minus hop-by-hop headers.
    pub fn into_response(self) -> Response {
        let mut headers = self.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);

        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response
    }
}

/// Something that can judge a request.
pub trait Inspector: Send + Sync + 'static {
    fn inspect(
        &self,
        request: InspectionRequest,
    ) -> impl Future<Output = GateResult<InspectorResponse>> + Send;
}

/// Inspector reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpInspector {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpInspector {
    /// Build a client for `base_url`. Fails if the URL is empty.
    pub fn new(base_url: &str, timeout: Duration) -> GateResult<Self> {
        if base_url.trim().is_empty() {
            return Err(GateError::Configuration("inspector URL cannot be empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(100)
            .build()
            .map_err(|e| GateError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn classify(&self, err: reqwest::Error) -> GateError {
        if err.is_timeout() {
            GateError::InspectorTimeout(self.timeout)
        } else {
            GateError::InspectorUnreachable(err.to_string())
        }
    }
}

impl Inspector for HttpInspector {
    async fn inspect(&self, request: InspectionRequest) -> GateResult<InspectorResponse> {
        let url = format!("{}{}", self.base_url, request.target);
        let start = Instant::now();

        let result = async {
            let response = self
                .client
                .request(request.method, &url)
                .headers(request.headers)
                .body(request.body)
                .send()
                .await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(InspectorResponse { status, headers, body })
        }
        .await;
        metrics::record_inspector_call(start);

        result.map_err(|e| {
            let err = self.classify(e);
            tracing::error!(url = %url, error = %err, "Failed to send request to inspector");
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_url_is_configuration_error() {
        let err = HttpInspector::new("  ", Duration::from_secs(2)).unwrap_err();
        assert!(matches!(err, GateError::Configuration(_)));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let inspector = HttpInspector::new("http://waf:8000/", Duration::from_secs(2)).unwrap();
        assert_eq!(inspector.base_url(), "http://waf:8000");
    }

    #[test]
    fn test_inspection_request_copies_target_and_headers() {
        let request = Request::post("http://gate.local/api/items?id=7")
            .header(header::HOST, "gate.local")
            .header(header::CONNECTION, "keep-alive")
            .header(header::CONTENT_LENGTH, "4")
            .header("x-api-version", "2")
            .body(())
            .unwrap();

        let inspection = InspectionRequest::from_request(&request, Bytes::from_static(b"data"));
        assert_eq!(inspection.method, Method::POST);
        assert_eq!(inspection.target, "/api/items?id=7");
        assert_eq!(inspection.headers.len(), 1);
        assert_eq!(inspection.headers.get("x-api-version").unwrap(), "2");
        assert_eq!(&inspection.body[..], b"data");
    }

    #[tokio::test]
    async fn test_response_relayed_verbatim() {
        let mut inspected = InspectorResponse::new(StatusCode::FORBIDDEN, "blocked by rule 942100");
        inspected.headers.insert("x-waf-rule", "942100".parse().unwrap());
        inspected.headers.insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());

        let response = inspected.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers().get("x-waf-rule").unwrap(), "942100");
        assert!(response.headers().get(header::TRANSFER_ENCODING).is_none());

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"blocked by rule 942100");
    }

    #[tokio::test]
    async fn test_unreachable_inspector() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let inspector =
            HttpInspector::new(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();
        let request = Request::get("/").body(()).unwrap();

        let err = inspector
            .inspect(InspectionRequest::from_request(&request, Bytes::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::InspectorUnreachable(_)));
    }
}
