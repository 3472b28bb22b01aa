//! In-memory entry collection with a session index.

use crate::admission::AdmissionPolicy;
use crate::error::{QueueError, Result};
use crate::types::{AdmissionSettings, Entry, EntryId, QueueStats, SessionId, Stage};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Entries and settings guarded by the cache's lock.
///
/// `by_session` always holds exactly the ids in `entries`, keyed by their
/// session; empty sets are dropped.
#[derive(Debug)]
pub(crate) struct Ledger {
    entries: BTreeMap<EntryId, Entry>,
    by_session: HashMap<SessionId, BTreeSet<EntryId>>,
    pub(crate) settings: AdmissionSettings,
    next_id: EntryId,
}

impl Ledger {
    pub(crate) fn new(settings: AdmissionSettings) -> Self {
        Self {
            entries: BTreeMap::new(),
            by_session: HashMap::new(),
            settings,
            next_id: EntryId(1),
        }
    }

    /// Rebuild from a loaded snapshot. Ids continue after the highest loaded id.
    pub(crate) fn from_entries(
        entries: Vec<Entry>,
        settings: AdmissionSettings,
    ) -> Result<Self> {
        let mut ledger = Self::new(settings);
        for entry in entries {
            if ledger.entries.contains_key(&entry.id) {
                return Err(QueueError::Initialization(format!(
                    "duplicate entry id {} in snapshot",
                    entry.id
                )));
            }
            if entry.id >= ledger.next_id {
                ledger.next_id = entry.id.next();
            }
            ledger.insert(entry);
        }
        Ok(ledger)
    }

    pub(crate) fn policy(&self) -> AdmissionPolicy {
        AdmissionPolicy::new(self.settings)
    }

    /// Hand out the next id.
    pub(crate) fn allocate_id(&mut self) -> EntryId {
        let id = self.next_id;
        self.next_id = id.next();
        id
    }

    /// Pending+active entries held by `session`.
    pub(crate) fn held(&self, session: SessionId) -> usize {
        self.by_session.get(&session).map_or(0, BTreeSet::len)
    }

    pub(crate) fn get(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub(crate) fn insert(&mut self, entry: Entry) {
        self.by_session
            .entry(entry.session)
            .or_default()
            .insert(entry.id);
        self.entries.insert(entry.id, entry);
    }

    /// Replace the record stored under `entry.id`, re-keying the index if the
    /// session changed.
    pub(crate) fn replace(&mut self, entry: Entry) {
        let previous = self.entries.get(&entry.id).map(|old| old.session);
        if let Some(old_session) = previous.filter(|s| *s != entry.session) {
            self.unindex(old_session, entry.id);
        }
        self.insert(entry);
    }

    pub(crate) fn remove(&mut self, id: EntryId) -> Option<Entry> {
        let entry = self.entries.remove(&id)?;
        self.unindex(entry.session, id);
        Some(entry)
    }

    /// Remove every entry of `session`, in id order.
    pub(crate) fn remove_session(&mut self, session: SessionId) -> Vec<Entry> {
        let ids = self.by_session.remove(&session).unwrap_or_default();
        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect()
    }

    /// Remove everything. Ids keep counting up.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.by_session.clear();
        count
    }

    fn unindex(&mut self, session: SessionId, id: EntryId) {
        if let Some(ids) = self.by_session.get_mut(&session) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_session.remove(&session);
            }
        }
    }

    pub(crate) fn to_vec(&self) -> Vec<Entry> {
        self.entries.values().cloned().collect()
    }

    pub(crate) fn session_entries(&self, session: SessionId) -> Vec<Entry> {
        self.by_session
            .get(&session)
            .into_iter()
            .flatten()
            .filter_map(|id| self.entries.get(id).cloned())
            .collect()
    }

    /// First entry of `session` still waiting for a name.
    pub(crate) fn pending_for_session(&self, session: SessionId) -> Option<Entry> {
        self.by_session
            .get(&session)?
            .iter()
            .filter_map(|id| self.entries.get(id))
            .find(|entry| entry.stage == Stage::AskingName)
            .cloned()
    }

    /// `InLine` entries by `queued_at`, ties broken by id.
    pub(crate) fn in_line(&self) -> Vec<Entry> {
        let mut line: Vec<Entry> = self
            .entries
            .values()
            .filter(|entry| entry.stage == Stage::InLine)
            .cloned()
            .collect();
        line.sort_by_key(|entry| (entry.queued_at, entry.id));
        line
    }

    pub(crate) fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total: self.entries.len(),
            sessions: self.by_session.len(),
            ..Default::default()
        };
        for entry in self.entries.values() {
            match entry.stage {
                Stage::AskingName => stats.asking_name += 1,
                Stage::AwaitingPayment => stats.awaiting_payment += 1,
                Stage::InLine => stats.in_line += 1,
            }
        }
        stats
    }

    #[cfg(test)]
    pub(crate) fn index_is_consistent(&self) -> bool {
        let indexed: usize = self.by_session.values().map(BTreeSet::len).sum();
        indexed == self.entries.len()
            && self.by_session.iter().all(|(session, ids)| {
                !ids.is_empty()
                    && ids.iter().all(|id| {
                        self.entries
                            .get(id)
                            .is_some_and(|entry| entry.session == *session)
                    })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SlotRef, Timestamp};

    fn entry(id: u64, session: i64, stage: Stage, queued_at: Option<i64>) -> Entry {
        Entry {
            id: EntryId(id),
            session: SessionId(session),
            handle: format!("user{session}"),
            display_name: String::new(),
            typed_name: None,
            slot: SlotRef::new(id.to_string(), "Song", "https://example.org"),
            stage,
            created_at: Timestamp(0),
            queued_at: queued_at.map(Timestamp),
            extras: Default::default(),
        }
    }

    #[test]
    fn test_ids_continue_after_loaded_max() {
        let mut ledger = Ledger::from_entries(
            vec![
                entry(4, 1, Stage::InLine, Some(10)),
                entry(9, 2, Stage::AskingName, None),
            ],
            AdmissionSettings::default(),
        )
        .unwrap();
        assert_eq!(ledger.allocate_id(), EntryId(10));
        assert_eq!(ledger.allocate_id(), EntryId(11));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = Ledger::from_entries(
            vec![
                entry(1, 1, Stage::AskingName, None),
                entry(1, 2, Stage::AskingName, None),
            ],
            AdmissionSettings::default(),
        );
        assert!(matches!(result, Err(QueueError::Initialization(_))));
    }

    #[test]
    fn test_index_follows_mutations() {
        let mut ledger = Ledger::new(AdmissionSettings::default());
        ledger.insert(entry(1, 1, Stage::AskingName, None));
        ledger.insert(entry(2, 1, Stage::InLine, Some(5)));
        ledger.insert(entry(3, 2, Stage::AskingName, None));
        assert_eq!(ledger.held(SessionId(1)), 2);

        // Moving entry 3 to session 1.
        ledger.replace(entry(3, 1, Stage::AskingName, None));
        assert_eq!(ledger.held(SessionId(1)), 3);
        assert_eq!(ledger.held(SessionId(2)), 0);
        assert!(ledger.index_is_consistent());

        ledger.remove(EntryId(1));
        assert_eq!(ledger.held(SessionId(1)), 2);
        assert!(ledger.index_is_consistent());

        let removed = ledger.remove_session(SessionId(1));
        assert_eq!(removed.len(), 2);
        assert_eq!(ledger.stats().total, 0);
        assert!(ledger.index_is_consistent());
    }

    #[test]
    fn test_in_line_sorted_by_queue_time() {
        let mut ledger = Ledger::new(AdmissionSettings::default());
        ledger.insert(entry(1, 1, Stage::InLine, Some(30)));
        ledger.insert(entry(2, 2, Stage::AwaitingPayment, None));
        ledger.insert(entry(3, 3, Stage::InLine, Some(10)));
        ledger.insert(entry(4, 4, Stage::InLine, Some(10)));

        let ids: Vec<u64> = ledger.in_line().iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![3, 4, 1]);
    }

    #[test]
    fn test_pending_for_session_skips_queued() {
        let mut ledger = Ledger::new(AdmissionSettings::default());
        ledger.insert(entry(1, 1, Stage::InLine, Some(1)));
        ledger.insert(entry(2, 1, Stage::AskingName, None));

        assert_eq!(
            ledger.pending_for_session(SessionId(1)).map(|e| e.id),
            Some(EntryId(2))
        );
        assert!(ledger.pending_for_session(SessionId(9)).is_none());
    }

    #[test]
    fn test_stats() {
        let mut ledger = Ledger::new(AdmissionSettings::default());
        ledger.insert(entry(1, 1, Stage::InLine, Some(1)));
        ledger.insert(entry(2, 1, Stage::AskingName, None));
        ledger.insert(entry(3, 2, Stage::AwaitingPayment, None));

        assert_eq!(
            ledger.stats(),
            QueueStats {
                total: 3,
                asking_name: 1,
                awaiting_payment: 1,
                in_line: 1,
                sessions: 2,
            }
        );
    }
}
