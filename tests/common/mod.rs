//! Shared utilities for integration testing.

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use waf_gate::config::GatewayConfig;
use waf_gate::{GatewayServer, Shutdown};

/// A running mock service and the number of requests it has seen.
pub struct MockService {
    pub addr: SocketAddr,
    calls: Arc<AtomicUsize>,
}

impl MockService {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Start an inspector that forbids paths containing "attack" and bodies
/// containing "DROP TABLE", and allows everything else.
pub async fn start_inspector() -> MockService {
    async fn inspect(State(calls): State<Arc<AtomicUsize>>, request: Request<Body>) -> Response {
        calls.fetch_add(1, Ordering::SeqCst);
        let path = request.uri().path().to_string();
        let body = to_bytes(request.into_body(), usize::MAX).await.unwrap_or_default();

        let suspicious = body.windows(10).any(|w| w == b"DROP TABLE");
        if path.contains("attack") || suspicious {
            (StatusCode::FORBIDDEN, [("x-waf-rule", "942100")], "blocked by inspector").into_response()
        } else {
            (StatusCode::OK, "clean").into_response()
        }
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let app = Router::new().fallback(inspect).with_state(calls.clone());
    MockService { addr: serve(app).await, calls }
}

/// Start a backend that describes what it received.
pub async fn start_backend() -> MockService {
    async fn echo(State(calls): State<Arc<AtomicUsize>>, request: Request<Body>) -> String {
        calls.fetch_add(1, Ordering::SeqCst);
        let method = request.method().clone();
        let target = request
            .uri()
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_default();
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none")
            .to_string();
        let body = to_bytes(request.into_body(), usize::MAX).await.unwrap_or_default();

        format!("backend {} {} id={} body={}", method, target, request_id, body.len())
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let app = Router::new().fallback(echo).with_state(calls.clone());
    MockService { addr: serve(app).await, calls }
}

/// Read from `socket` until the end of an HTTP head. Returns the head.
pub async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if socket.read(&mut byte).await.unwrap() == 0 {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Start a raw backend that accepts websocket upgrades and then echoes
/// every byte it receives.
pub async fn start_upgrade_backend() -> MockService {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let head = read_head(&mut socket).await.to_ascii_lowercase();
                if !head.contains("upgrade: websocket") {
                    let _ = socket
                        .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                        .await;
                    return;
                }

                let accepted = "HTTP/1.1 101 Switching Protocols\r\n\
                                Connection: Upgrade\r\n\
                                Upgrade: websocket\r\n\r\n";
                if socket.write_all(accepted.as_bytes()).await.is_err() {
                    return;
                }

                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    MockService { addr, calls }
}

/// Gateway config pointing at the given inspector and backend.
pub fn gateway_config(inspector: SocketAddr, backend: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.inspector.url = format!("http://{}", inspector);
    config.backend.address = backend.to_string();
    config
}

/// A gateway running on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    shutdown: Shutdown,
    handle: JoinHandle<Result<(), std::io::Error>>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server to stop.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("gateway did not stop")
            .unwrap()
            .unwrap();
    }
}

pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = GatewayServer::new(config).unwrap();

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    let handle = tokio::spawn(async move { server.run(listener, receiver).await });

    TestGateway { addr, shutdown, handle }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
