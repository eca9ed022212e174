//! Lifecycle management.
//!
//! ```text
//! Ctrl+C → Shutdown::trigger → server stops accepting, drains → sweepers exit
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
