//! Inspection gateway library.
//!
//! Every request is copied to an external inspection service; its verdict
//! decides whether the request reaches the backend. Repeat offenders are
//! jailed and verdicts for equivalent requests can be cached.

pub mod cache;
pub mod config;
pub mod gate;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::GatewayConfig;
pub use gate::{Gate, GateError, GateResult};
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
