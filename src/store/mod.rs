//! Durable store drivers.
//!
//! The cache treats the store as an opaque snapshot service: it loads
//! everything once at startup, then overwrites the full entry collection
//! after each entry mutation and single settings after each settings change.
//!
//! Drivers:
//! - [`MemoryStore`]: in-process, with failure and latency injection
//! - [`FileStore`]: checksummed snapshot files in a locked directory
//! - [`BoundedStore`]: runs another driver on a worker thread with a timeout

mod bounded;
mod file;
mod memory;

pub use bounded::BoundedStore;
pub use file::{FileStore, FileStoreConfig};
pub use memory::MemoryStore;

use crate::error::Result;
use crate::types::{AdmissionSettings, Entry, Setting};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Settings as found in the store; absent keys fall back to configured defaults.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSettings {
    pub open: Option<bool>,
    pub limit: Option<u32>,
    pub price: Option<u32>,
}

impl StoredSettings {
    /// Fill missing values from `defaults`.
    pub fn resolve(&self, defaults: AdmissionSettings) -> AdmissionSettings {
        AdmissionSettings {
            open: self.open.unwrap_or(defaults.open),
            limit: self.limit.unwrap_or(defaults.limit),
            price: self.price.unwrap_or(defaults.price),
        }
    }

    /// Record one saved setting.
    pub fn set(&mut self, setting: Setting) {
        match setting {
            Setting::Open(open) => self.open = Some(open),
            Setting::Limit(limit) => self.limit = Some(limit),
            Setting::Price(price) => self.price = Some(price),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Drain every present value, in key order.
    pub fn take(&mut self) -> Vec<Setting> {
        let taken = std::mem::take(self);
        [
            taken.open.map(Setting::Open),
            taken.limit.map(Setting::Limit),
            taken.price.map(Setting::Price),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

impl From<AdmissionSettings> for StoredSettings {
    fn from(settings: AdmissionSettings) -> Self {
        Self {
            open: Some(settings.open),
            limit: Some(settings.limit),
            price: Some(settings.price),
        }
    }
}

/// Everything a store holds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub entries: Vec<Entry>,
    pub settings: StoredSettings,
}

/// A remote key-value service holding the entry collection and settings.
pub trait EntryStore: Send + Sync {
    /// Load the full collection and settings.
    fn load(&self) -> Result<Snapshot>;

    /// Overwrite the stored entry collection.
    fn save_entries(&self, entries: &[Entry]) -> Result<()>;

    /// Persist one setting.
    fn save_setting(&self, setting: Setting) -> Result<()>;
}

impl<S: EntryStore + ?Sized> EntryStore for Arc<S> {
    fn load(&self) -> Result<Snapshot> {
        (**self).load()
    }

    fn save_entries(&self, entries: &[Entry]) -> Result<()> {
        (**self).save_entries(entries)
    }

    fn save_setting(&self, setting: Setting) -> Result<()> {
        (**self).save_setting(setting)
    }
}

impl<S: EntryStore + ?Sized> EntryStore for Box<S> {
    fn load(&self) -> Result<Snapshot> {
        (**self).load()
    }

    fn save_entries(&self, entries: &[Entry]) -> Result<()> {
        (**self).save_entries(entries)
    }

    fn save_setting(&self, setting: Setting) -> Result<()> {
        (**self).save_setting(setting)
    }
}
