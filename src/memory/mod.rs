//! Memory management for fleet-core.
//!
//! Holds the TTL cache used for ephemeral per-client state.

mod cache;

pub use cache::{CacheEntryOptions, CacheError, MemoryCache};
