//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → jail.rs (reject clients serving a sentence)
//!     → limits.rs (capture the body under the size limit)
//!     → headers.rs (hop-by-hop hygiene for inspector and backend hops)
//! ```
//!
//! # Design Decisions
//! - Fail closed: a body that cannot be read is never forwarded
//! - Only inspector 403 verdicts count as offenses

pub mod headers;
pub mod jail;
pub mod limits;
