//! The state cache: authoritative entries and settings, checkpointed to a store.

use super::ledger::Ledger;
use crate::admission::{validate_settings, AdmissionPolicy};
use crate::error::{QueueError, Result};
use crate::store::{BoundedStore, EntryStore, StoredSettings};
use crate::stage;
use crate::types::{
    AdmissionSettings, Entry, EntryDraft, EntryId, QueueStats, SessionId, Setting, Stage,
    Timestamp,
};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cache configuration.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Upper bound for every store call.
    pub store_timeout: Duration,

    /// Settings used for keys the store has never saved.
    pub defaults: AdmissionSettings,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(3),
            defaults: AdmissionSettings::default(),
        }
    }
}

/// In-memory mirror of the queue, shared between request handlers via `Arc`.
///
/// Every mutation holds the exclusive lock for its whole read-modify-write
/// and is written through to the store before returning. Saves are ordered
/// by a separate flush lock taken before the exclusive lock is released, so
/// the store always ends up with the latest snapshot while readers only wait
/// for the in-memory part.
///
/// Durability is best effort: when a save fails the caller gets
/// [`QueueError::StoreUnavailable`] but the in-memory change stands and is
/// carried by the next successful save. Settings whose save failed are kept
/// aside and re-sent with the next save or flush. A crash loses at most the
/// mutations not yet saved.
pub struct StateCache {
    ledger: RwLock<Ledger>,

    /// Serializes store writes in mutation order. Holds the settings whose
    /// save has not succeeded yet.
    flush_lock: Mutex<StoredSettings>,

    /// Set when the last entry save failed.
    dirty: AtomicBool,

    store: Box<dyn EntryStore>,
}

impl StateCache {
    /// Populate the cache from `store`.
    ///
    /// Any failure is an [`QueueError::Initialization`]: the process must not
    /// run with an unknown queue.
    pub fn load<S: EntryStore + 'static>(store: S, config: CacheConfig) -> Result<Self> {
        let store = BoundedStore::new(store, config.store_timeout)
            .map_err(QueueError::into_initialization)?;

        let snapshot = store.load().map_err(QueueError::into_initialization)?;
        let settings = snapshot.settings.resolve(config.defaults);
        validate_settings(&settings).map_err(QueueError::into_initialization)?;

        let ledger = Ledger::from_entries(snapshot.entries, settings)?;
        let stats = ledger.stats();
        info!(
            entries = stats.total,
            in_line = stats.in_line,
            open = settings.open,
            limit = settings.limit,
            price = settings.price,
            "queue state loaded"
        );

        Ok(Self {
            ledger: RwLock::new(ledger),
            flush_lock: Mutex::new(StoredSettings::default()),
            dirty: AtomicBool::new(false),
            store: Box::new(store),
        })
    }

    // --- Entry Mutations ---

    /// Create an entry in `AskingName` for the draft's session.
    ///
    /// Admission is re-checked under the exclusive lock, so concurrent calls
    /// for one session can never exceed the limit.
    pub fn add_entry(&self, draft: EntryDraft) -> Result<Entry> {
        stage::check_initial(draft.stage)?;

        let mut ledger = self.ledger.write();
        ledger
            .policy()
            .admit(draft.session, ledger.held(draft.session))?;

        let entry = Entry {
            id: ledger.allocate_id(),
            session: draft.session,
            handle: draft.handle,
            display_name: draft.display_name,
            typed_name: None,
            slot: draft.slot,
            stage: Stage::AskingName,
            created_at: Timestamp::now(),
            queued_at: None,
            extras: draft.extras,
        };
        ledger.insert(entry.clone());
        debug!(
            entry = %entry.id,
            session = %entry.session,
            slot = %entry.slot.id,
            "entry added"
        );

        self.persist_entries(ledger)?;
        Ok(entry)
    }

    /// Replace an entry wholesale (last writer wins).
    ///
    /// `id`, `created_at` and an existing `queued_at` are kept from the stored
    /// record. Moving into `InLine` stamps `queued_at`.
    pub fn edit_entry(&self, id: EntryId, replacement: Entry) -> Result<Entry> {
        let mut ledger = self.ledger.write();
        let current = ledger.get(id).ok_or(QueueError::NotFound(id))?.clone();
        if current.is_pending() && !ledger.settings.open {
            return self.fail_closed(ledger, id);
        }

        ledger
            .policy()
            .check_transition(current.stage, replacement.stage)?;

        let mut updated = replacement;
        updated.id = id;
        updated.created_at = current.created_at;
        updated.queued_at = current.queued_at;
        let to = updated.stage;
        enter_stage(&mut updated, to);

        ledger.replace(updated.clone());
        debug!(entry = %id, from = ?current.stage, to = ?updated.stage, "entry edited");

        self.persist_entries(ledger)?;
        Ok(updated)
    }

    /// Delete an entry from any stage (cancellation or leaving the line).
    pub fn remove_entry(&self, id: EntryId) -> Result<Entry> {
        let mut ledger = self.ledger.write();
        let removed = ledger.remove(id).ok_or(QueueError::NotFound(id))?;
        debug!(entry = %id, stage = ?removed.stage, "entry removed");

        self.persist_entries(ledger)?;
        Ok(removed)
    }

    /// Delete every entry a session holds.
    pub fn remove_session(&self, session: SessionId) -> Result<Vec<Entry>> {
        let mut ledger = self.ledger.write();
        let removed = ledger.remove_session(session);
        if removed.is_empty() {
            return Ok(removed);
        }
        debug!(session = %session, count = removed.len(), "session entries removed");

        self.persist_entries(ledger)?;
        Ok(removed)
    }

    /// Empty the whole queue. Returns how many entries were dropped.
    pub fn clear(&self) -> Result<usize> {
        let mut ledger = self.ledger.write();
        let count = ledger.clear();
        info!(count, "queue cleared");

        self.persist_entries(ledger)?;
        Ok(count)
    }

    // --- Stage Advancement ---

    /// Record the performer name and advance out of `AskingName`.
    ///
    /// Goes to `AwaitingPayment` when a price is set, otherwise straight to
    /// `InLine`.
    pub fn confirm_name(&self, id: EntryId, typed_name: impl Into<String>) -> Result<Entry> {
        let mut ledger = self.ledger.write();
        let current = ledger.get(id).ok_or(QueueError::NotFound(id))?.clone();
        if current.is_pending() && !ledger.settings.open {
            return self.fail_closed(ledger, id);
        }

        let policy = ledger.policy();
        let next = policy.stage_after_name();
        if current.stage != Stage::AskingName {
            return Err(QueueError::InvalidTransition {
                from: Some(current.stage),
                to: next,
            });
        }
        policy.check_transition(current.stage, next)?;

        let mut updated = current;
        updated.typed_name = Some(typed_name.into());
        enter_stage(&mut updated, next);

        ledger.replace(updated.clone());
        debug!(entry = %id, stage = ?next, "name confirmed");

        self.persist_entries(ledger)?;
        Ok(updated)
    }

    /// Payment went through: `AwaitingPayment -> InLine`.
    ///
    /// Confirming an entry that is already in line returns it unchanged, so a
    /// repeated confirmation never re-stamps its place.
    pub fn confirm_payment(&self, id: EntryId) -> Result<Entry> {
        let mut ledger = self.ledger.write();
        let current = ledger.get(id).ok_or(QueueError::NotFound(id))?.clone();
        match current.stage {
            Stage::InLine => {
                debug!(entry = %id, "duplicate payment confirmation ignored");
                return Ok(current);
            }
            Stage::AskingName => {
                return Err(QueueError::InvalidTransition {
                    from: Some(Stage::AskingName),
                    to: Stage::InLine,
                });
            }
            Stage::AwaitingPayment => {}
        }
        if !ledger.settings.open {
            return self.fail_closed(ledger, id);
        }

        let mut updated = current;
        enter_stage(&mut updated, Stage::InLine);

        ledger.replace(updated.clone());
        debug!(entry = %id, "payment confirmed");

        self.persist_entries(ledger)?;
        Ok(updated)
    }

    /// Persist the current collection and any unsaved settings again. Safe to
    /// call at any time.
    pub fn flush(&self) -> Result<()> {
        let ledger = self.ledger.read();
        let snapshot = ledger.to_vec();
        let mut unsaved = self.flush_lock.lock();
        drop(ledger);
        self.save_snapshot(&snapshot)?;
        self.save_settings(&mut unsaved)
    }

    // --- Admission ---

    pub fn settings(&self) -> AdmissionSettings {
        self.ledger.read().settings
    }

    /// Snapshot of the current admission rules.
    pub fn policy(&self) -> AdmissionPolicy {
        self.ledger.read().policy()
    }

    pub fn is_open(&self) -> bool {
        self.ledger.read().settings.open
    }

    pub fn requires_payment(&self) -> bool {
        self.policy().requires_payment()
    }

    /// Whether `session` may start a new claim right now.
    pub fn can_admit(&self, session: SessionId) -> bool {
        let ledger = self.ledger.read();
        ledger.policy().can_admit(ledger.held(session))
    }

    pub fn set_open(&self, open: bool) -> Result<()> {
        self.update_setting(Setting::Open(open))
    }

    pub fn set_limit(&self, limit: u32) -> Result<()> {
        self.update_setting(Setting::Limit(limit))
    }

    pub fn set_price(&self, price: u32) -> Result<()> {
        self.update_setting(Setting::Price(price))
    }

    // --- Queries ---

    pub fn get(&self, id: EntryId) -> Option<Entry> {
        self.ledger.read().get(id).cloned()
    }

    /// Every entry, in id order.
    pub fn all(&self) -> Vec<Entry> {
        self.ledger.read().to_vec()
    }

    /// Entries held by one session, in id order.
    pub fn by_session(&self, session: SessionId) -> Vec<Entry> {
        self.ledger.read().session_entries(session)
    }

    /// The session's entry still waiting for a name, if any.
    pub fn pending_for_session(&self, session: SessionId) -> Option<Entry> {
        self.ledger.read().pending_for_session(session)
    }

    /// Who's next: `InLine` entries ordered by the time they joined.
    pub fn in_line(&self) -> Vec<Entry> {
        self.ledger.read().in_line()
    }

    pub fn stats(&self) -> QueueStats {
        self.ledger.read().stats()
    }

    /// Pretty JSON of every entry, for operator diagnostics.
    pub fn dump_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.all())?)
    }

    // --- Internal ---

    /// Pending entry touched after signups closed: drop it instead of advancing.
    fn fail_closed(
        &self,
        mut ledger: RwLockWriteGuard<'_, Ledger>,
        id: EntryId,
    ) -> Result<Entry> {
        if let Some(removed) = ledger.remove(id) {
            warn!(
                entry = %id,
                session = %removed.session,
                stage = ?removed.stage,
                "signups closed, pending entry removed"
            );
        }
        if let Err(e) = self.persist_entries(ledger) {
            warn!(entry = %id, error = %e, "closed entry removal not persisted");
        }
        Err(QueueError::EntryClosed(id))
    }

    fn update_setting(&self, setting: Setting) -> Result<()> {
        let mut ledger = self.ledger.write();
        let mut settings = ledger.settings;
        setting.apply(&mut settings);
        validate_settings(&settings)?;
        ledger.settings = settings;
        info!(key = setting.key(), value = ?setting, "setting changed");

        let mut unsaved = self.flush_lock.lock();
        drop(ledger);
        unsaved.set(setting);
        self.save_settings(&mut unsaved)
    }

    /// Write the collection while still ordered behind the caller's exclusive lock.
    ///
    /// Settings left over from an earlier failed save ride along; their
    /// failure is logged but does not fail the entry mutation.
    fn persist_entries(&self, ledger: RwLockWriteGuard<'_, Ledger>) -> Result<()> {
        let snapshot = ledger.to_vec();
        let mut unsaved = self.flush_lock.lock();
        drop(ledger);
        self.save_snapshot(&snapshot)?;
        if let Err(e) = self.save_settings(&mut unsaved) {
            debug!(error = %e, "unsaved settings still pending");
        }
        Ok(())
    }

    /// Send every unsaved setting. Whatever fails stays in `unsaved`.
    ///
    /// Caller holds `flush_lock`, which guards `unsaved`.
    fn save_settings(&self, unsaved: &mut StoredSettings) -> Result<()> {
        let queued = unsaved.take();
        for (i, setting) in queued.iter().enumerate() {
            if let Err(e) = self.store.save_setting(*setting) {
                warn!(key = setting.key(), error = %e, "setting not persisted");
                queued[i..].iter().for_each(|rest| unsaved.set(*rest));
                return Err(e.into_store_unavailable());
            }
        }
        Ok(())
    }

    /// Caller holds `flush_lock`.
    fn save_snapshot(&self, snapshot: &[Entry]) -> Result<()> {
        match self.store.save_entries(snapshot) {
            Ok(()) => {
                self.dirty.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                warn!(entries = snapshot.len(), error = %e, "entry snapshot not persisted");
                Err(e.into_store_unavailable())
            }
        }
    }
}

impl Drop for StateCache {
    fn drop(&mut self) {
        // Best-effort retry of a save that failed earlier.
        let unsaved = self.dirty.load(Ordering::SeqCst) || !self.flush_lock.lock().is_empty();
        if unsaved {
            let _ = self.flush();
        }
    }
}

/// Move `entry` to `to`, stamping `queued_at` the first time it reaches the line.
fn enter_stage(entry: &mut Entry, to: Stage) {
    entry.stage = to;
    if to == Stage::InLine && entry.queued_at.is_none() {
        entry.queued_at = Some(Timestamp::now());
    }
}
