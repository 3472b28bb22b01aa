//! State cache: the authoritative in-memory queue.
//!
//! Entries live in an id-ordered map with a session index, so per-session
//! lookups cost only that session's own entries. The ledger is guarded by one
//! `RwLock` shared with the admission settings; writers take it exclusively,
//! readers copy out under the shared side.

mod ledger;
mod manager;

pub use manager::{CacheConfig, StateCache};
