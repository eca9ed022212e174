//! Verdict caching subsystem.
//!
//! # Data Flow
//! ```text
//! Request + client address
//!     → key.rs (method, normalized path, optional headers/host/remote → SHA-256)
//!     → verdict.rs (DashMap lookup; expired entries dropped lazily and by sweeper)
//!     → pool.rs (hit: synthetic response from a bounded free list)
//! ```
//!
//! # Design Decisions
//! - Only the inspector's status code is cached, never its body
//! - One TTL per cache instance
//! - Sensitive headers never feed the key
//! - Lost updates on the same key are tolerated; the cache is advisory

pub mod key;
pub mod pool;
pub mod verdict;

pub use key::{derive_cache_key, CacheKey, CacheKeyOptions};
pub use pool::{PooledResponse, ResponsePool};
pub use verdict::{CachePolicy, Verdict, VerdictCache};
