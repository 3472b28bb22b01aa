//! In-process store driver.

use super::{EntryStore, Snapshot};
use crate::error::{QueueError, Result};
use crate::types::{Entry, Setting};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct MemoryInner {
    snapshot: Mutex<Snapshot>,
    fail_loads: AtomicBool,
    fail_writes: AtomicBool,
    delay: Mutex<Option<Duration>>,
    entry_saves: AtomicU64,
    setting_saves: AtomicU64,
}

/// Store kept in memory.
///
/// Clones share the same contents, so a test can hand one clone to the
/// cache and inspect what was persisted through another.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing contents.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        let store = Self::new();
        *store.inner.snapshot.lock() = snapshot;
        store
    }

    /// Last successfully saved contents.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.snapshot.lock().clone()
    }

    /// Make `load` fail until reset.
    pub fn set_fail_loads(&self, fail: bool) {
        self.inner.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Make every save fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long inside every call.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.inner.delay.lock() = delay;
    }

    /// Number of successful `save_entries` calls.
    pub fn entry_saves(&self) -> u64 {
        self.inner.entry_saves.load(Ordering::SeqCst)
    }

    /// Number of successful `save_setting` calls.
    pub fn setting_saves(&self) -> u64 {
        self.inner.setting_saves.load(Ordering::SeqCst)
    }

    fn pause(&self) {
        let delay = *self.inner.delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(QueueError::StoreUnavailable("write rejected".into()));
        }
        Ok(())
    }
}

impl EntryStore for MemoryStore {
    fn load(&self) -> Result<Snapshot> {
        self.pause();
        if self.inner.fail_loads.load(Ordering::SeqCst) {
            return Err(QueueError::StoreUnavailable("connection refused".into()));
        }
        Ok(self.snapshot())
    }

    fn save_entries(&self, entries: &[Entry]) -> Result<()> {
        self.pause();
        self.check_writable()?;
        self.inner.snapshot.lock().entries = entries.to_vec();
        self.inner.entry_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn save_setting(&self, setting: Setting) -> Result<()> {
        self.pause();
        self.check_writable()?;
        self.inner.snapshot.lock().settings.set(setting);
        self.inner.setting_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_contents() {
        let store = MemoryStore::new();
        let other = store.clone();

        store.save_setting(Setting::Open(true)).unwrap();
        assert_eq!(other.snapshot().settings.open, Some(true));
        assert_eq!(other.setting_saves(), 1);
    }

    #[test]
    fn test_failed_write_keeps_previous_contents() {
        let store = MemoryStore::new();
        store.save_entries(&[]).unwrap();
        store.set_fail_writes(true);

        assert!(store.save_setting(Setting::Price(10)).is_err());
        assert_eq!(store.snapshot().settings.price, None);
        assert_eq!(store.entry_saves(), 1);
    }

    #[test]
    fn test_failing_load() {
        let store = MemoryStore::new();
        store.set_fail_loads(true);
        assert!(matches!(
            store.load(),
            Err(QueueError::StoreUnavailable(_))
        ));
    }
}
