//! # Lineup
//!
//! Queue state manager for live sign-up events: participants claim a slot
//! to perform, an operator opens and closes signups, caps how many slots one
//! participant may hold, and can require payment before a claim counts.
//!
//! ## Core Concepts
//!
//! - **Entries**: one participant's claim, moving `AskingName → (AwaitingPayment →) InLine`
//! - **State cache**: the authoritative in-memory queue, written through to a store
//! - **Admission policy**: whether a session may claim, and what follows the name
//! - **Stores**: opaque snapshot services (memory, files, timeout wrapper)
//!
//! ## Example
//!
//! ```ignore
//! use lineup::{CacheConfig, EntryDraft, FileStore, FileStoreConfig, SessionId, SlotRef, StateCache};
//!
//! let store = FileStore::open(FileStoreConfig {
//!     path: "./queue".into(),
//!     ..Default::default()
//! })?;
//! let cache = StateCache::load(store, CacheConfig::default())?;
//! cache.set_open(true)?;
//!
//! let session = SessionId(1234);
//! if cache.can_admit(session) {
//!     let entry = cache.add_entry(EntryDraft::new(
//!         session,
//!         SlotRef::new("42", "ABBA - Waterloo", "https://example.org/42"),
//!     ))?;
//!     cache.confirm_name(entry.id, "Anna")?;
//! }
//!
//! for entry in cache.in_line() {
//!     println!("{} - {}", entry.performer(), entry.slot.label);
//! }
//! ```

pub mod admission;
pub mod cache;
pub mod error;
pub mod stage;
pub mod store;
pub mod types;

// Re-exports
pub use admission::AdmissionPolicy;
pub use cache::{CacheConfig, StateCache};
pub use error::{QueueError, Result};
pub use store::{
    BoundedStore, EntryStore, FileStore, FileStoreConfig, MemoryStore, Snapshot, StoredSettings,
};
pub use types::*;
