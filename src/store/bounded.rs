//! Timeout wrapper for store drivers.
//!
//! Calls are handed to a single worker thread in submission order and the
//! caller waits at most `timeout` for the reply. A call that times out keeps
//! running on the worker; later calls queue behind it, so saves still reach
//! the driver in the order they were issued. The queue is bounded: while a
//! hung driver holds it full, new calls fail at once instead of piling up.

use super::{EntryStore, Snapshot};
use crate::error::{QueueError, Result};
use crate::types::{Entry, Setting};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::warn;

/// Calls that may wait behind the one the worker is running.
const QUEUE_CAPACITY: usize = 64;

type Job<S> = Box<dyn FnOnce(&S) + Send + 'static>;

/// Runs another store on a worker thread and bounds every call by a timeout.
pub struct BoundedStore<S: EntryStore + 'static> {
    jobs: Option<Sender<Job<S>>>,
    worker: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl<S: EntryStore + 'static> BoundedStore<S> {
    /// Start the worker thread for `inner`.
    pub fn new(inner: S, timeout: Duration) -> Result<Self> {
        Self::with_capacity(inner, timeout, QUEUE_CAPACITY)
    }

    /// Like [`BoundedStore::new`] with room for `capacity` waiting calls.
    pub fn with_capacity(inner: S, timeout: Duration, capacity: usize) -> Result<Self> {
        let (jobs, queue) = bounded::<Job<S>>(capacity);
        let inner = Arc::new(inner);

        let worker = std::thread::Builder::new()
            .name("lineup-store".into())
            .spawn(move || {
                for job in queue {
                    job(inner.as_ref());
                }
            })?;

        Ok(Self {
            jobs: Some(jobs),
            worker: Some(worker),
            timeout,
        })
    }

    fn call<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T> + Send + 'static,
    {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| QueueError::StoreUnavailable("store worker stopped".into()))?;

        let (reply, response) = bounded(1);
        let job: Job<S> = Box::new(move |store: &S| {
            // The caller may have given up waiting.
            let _ = reply.send(f(store));
        });
        match jobs.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(op, "store queue full");
                return Err(QueueError::StoreUnavailable(format!(
                    "{op} rejected, store queue full"
                )));
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(QueueError::StoreUnavailable("store worker stopped".into()));
            }
        }

        match response.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    op,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "store call timed out"
                );
                Err(QueueError::StoreUnavailable(format!(
                    "{op} timed out after {:?}",
                    self.timeout
                )))
            }
            Err(RecvTimeoutError::Disconnected) => Err(QueueError::StoreUnavailable(format!(
                "{op} aborted by store worker"
            ))),
        }
    }
}

impl<S: EntryStore + 'static> EntryStore for BoundedStore<S> {
    fn load(&self) -> Result<Snapshot> {
        self.call("load", |store| store.load())
    }

    fn save_entries(&self, entries: &[Entry]) -> Result<()> {
        let entries = entries.to_vec();
        self.call("save_entries", move |store| store.save_entries(&entries))
    }

    fn save_setting(&self, setting: Setting) -> Result<()> {
        self.call("save_setting", move |store| store.save_setting(setting))
    }
}

impl<S: EntryStore + 'static> Drop for BoundedStore<S> {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain and release the driver
        // (and any file lock it holds) before we return.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Instant;

    #[test]
    fn test_passes_calls_through() {
        let memory = MemoryStore::new();
        let store = BoundedStore::new(memory.clone(), Duration::from_secs(1)).unwrap();

        store.save_setting(Setting::Limit(5)).unwrap();
        assert_eq!(store.load().unwrap().settings.limit, Some(5));
        assert_eq!(memory.setting_saves(), 1);
    }

    #[test]
    fn test_slow_store_times_out() {
        let memory = MemoryStore::new();
        memory.set_delay(Some(Duration::from_millis(300)));
        let store = BoundedStore::new(memory.clone(), Duration::from_millis(20)).unwrap();

        let started = Instant::now();
        let result = store.save_setting(Setting::Open(true));
        assert!(matches!(result, Err(QueueError::StoreUnavailable(_))));
        assert!(started.elapsed() < Duration::from_millis(300));

        // The abandoned call still completes before the store is released.
        drop(store);
        assert_eq!(memory.snapshot().settings.open, Some(true));
    }

    #[test]
    fn test_full_queue_rejects_calls() {
        let memory = MemoryStore::new();
        memory.set_delay(Some(Duration::from_millis(300)));
        let store =
            BoundedStore::with_capacity(memory.clone(), Duration::from_millis(30), 1).unwrap();

        // The first call occupies the worker, the second waits in the queue.
        assert!(store.save_setting(Setting::Limit(1)).is_err());
        assert!(store.save_setting(Setting::Limit(2)).is_err());

        match store.save_setting(Setting::Limit(3)) {
            Err(QueueError::StoreUnavailable(msg)) => assert!(msg.contains("queue full")),
            other => panic!("expected a full queue, got {other:?}"),
        }

        drop(store);
        assert_eq!(memory.snapshot().settings.limit, Some(2));
        assert_eq!(memory.setting_saves(), 2);
    }

    #[test]
    fn test_driver_errors_are_returned() {
        let memory = MemoryStore::new();
        memory.set_fail_writes(true);
        let store = BoundedStore::new(memory, Duration::from_secs(1)).unwrap();

        assert!(matches!(
            store.save_entries(&[]),
            Err(QueueError::StoreUnavailable(_))
        ));
    }
}
