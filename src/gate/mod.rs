//! Inspection gate.
//!
//! # Components
//! - `types`: gate errors and their client-facing status codes
//! - `inspector`: client for the external inspection service
//! - `coordinator`: per-request flow tying body guard, jail and cache together

pub mod coordinator;
pub mod inspector;
pub mod types;

pub use coordinator::{client_identity, inspection_middleware, Gate};
pub use inspector::{HttpInspector, InspectionRequest, Inspector, InspectorResponse};
pub use types::{GateError, GateResult};
