//! Core types for the sign-up queue.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for an entry (assigned by the cache).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u64);

impl EntryId {
    pub fn next(self) -> Self {
        EntryId(self.0 + 1)
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identity of one conversational participant (their chat id).
///
/// The cache only compares and hashes it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub i64);

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Lifecycle phase of an entry.
///
/// Removal is terminal and is represented by the entry's absence from the
/// collection, so it has no variant here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Slot selected, waiting for the performer name.
    #[default]
    AskingName,
    /// Name given, waiting for an external payment confirmation.
    AwaitingPayment,
    /// Claim counts; the entry is part of the visible queue.
    InLine,
}

impl Stage {
    /// Pending entries have not reached the line yet.
    pub fn is_pending(self) -> bool {
        !matches!(self, Stage::InLine)
    }
}

/// Reference to the claimed slot, supplied fully formed by the catalog.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRef {
    /// Catalog id of the song.
    pub id: String,
    /// Display label ("Artist - Title").
    pub label: String,
    /// Link to the chords/lyrics page.
    pub link: String,
    /// Free-form note shown next to the label.
    #[serde(default)]
    pub note: Option<String>,
}

impl SlotRef {
    pub fn new(id: impl Into<String>, label: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            link: link.into(),
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// One participant's claim on one slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Unique identifier (assigned by the cache).
    pub id: EntryId,

    /// Who holds the claim.
    pub session: SessionId,

    /// Account handle, without the leading `@`.
    pub handle: String,

    /// Account display name.
    pub display_name: String,

    /// Performer name typed by the participant.
    #[serde(default)]
    pub typed_name: Option<String>,

    /// The claimed slot, stored verbatim.
    pub slot: SlotRef,

    /// Lifecycle phase.
    pub stage: Stage,

    /// When the entry was created.
    pub created_at: Timestamp,

    /// When the entry joined the line. Set once, on entry into `InLine`.
    #[serde(default)]
    pub queued_at: Option<Timestamp>,

    /// Cached auxiliary text (e.g. a lyrics excerpt).
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

impl Entry {
    pub fn is_pending(&self) -> bool {
        self.stage.is_pending()
    }

    /// Name to announce: the typed name if any, else the display name, else the handle.
    pub fn performer(&self) -> &str {
        match self.typed_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ if !self.display_name.is_empty() => &self.display_name,
            _ => &self.handle,
        }
    }
}

/// Input for creating a new entry (before id and timestamps are assigned).
#[derive(Clone, Debug)]
pub struct EntryDraft {
    pub session: SessionId,
    pub handle: String,
    pub display_name: String,
    pub slot: SlotRef,
    /// Requested stage. Anything other than `AskingName` is rejected.
    pub stage: Stage,
    pub extras: BTreeMap<String, String>,
}

impl EntryDraft {
    /// Create a draft for `session` claiming `slot`.
    pub fn new(session: SessionId, slot: SlotRef) -> Self {
        Self {
            session,
            handle: String::new(),
            display_name: String::new(),
            slot,
            stage: Stage::AskingName,
            extras: BTreeMap::new(),
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = handle.into();
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }
}

/// Process-wide admission settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionSettings {
    /// Whether new claims are accepted.
    pub open: bool,
    /// Maximum pending+active entries per session (at least 1).
    pub limit: u32,
    /// Price per slot; 0 means free.
    pub price: u32,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            open: false,
            limit: 3,
            price: 0,
        }
    }
}

/// A single changed setting, persisted on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Setting {
    Open(bool),
    Limit(u32),
    Price(u32),
}

impl Setting {
    /// Store key for this setting.
    pub fn key(&self) -> &'static str {
        match self {
            Setting::Open(_) => "open",
            Setting::Limit(_) => "limit",
            Setting::Price(_) => "price",
        }
    }

    /// Apply this setting to a settings value.
    pub fn apply(self, settings: &mut AdmissionSettings) {
        match self {
            Setting::Open(open) => settings.open = open,
            Setting::Limit(limit) => settings.limit = limit,
            Setting::Price(price) => settings.price = price,
        }
    }
}

/// Queue statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub total: usize,
    pub asking_name: usize,
    pub awaiting_payment: usize,
    pub in_line: usize,
    pub sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(typed: Option<&str>, display: &str, handle: &str) -> Entry {
        Entry {
            id: EntryId(1),
            session: SessionId(10),
            handle: handle.into(),
            display_name: display.into(),
            typed_name: typed.map(String::from),
            slot: SlotRef::default(),
            stage: Stage::AskingName,
            created_at: Timestamp(0),
            queued_at: None,
            extras: BTreeMap::new(),
        }
    }

    #[test]
    fn test_performer_fallbacks() {
        assert_eq!(entry(Some("Duo"), "Ann", "ann").performer(), "Duo");
        assert_eq!(entry(Some("  "), "Ann", "ann").performer(), "Ann");
        assert_eq!(entry(None, "", "ann").performer(), "ann");
    }

    #[test]
    fn test_stage_wire_names() {
        let json = serde_json::to_string(&Stage::AwaitingPayment).unwrap();
        assert_eq!(json, "\"awaiting_payment\"");
    }

    #[test]
    fn test_setting_apply() {
        let mut settings = AdmissionSettings::default();
        Setting::Open(true).apply(&mut settings);
        Setting::Price(50).apply(&mut settings);
        assert!(settings.open);
        assert_eq!(settings.price, 50);
        assert_eq!(settings.limit, 3);
        assert_eq!(Setting::Limit(1).key(), "limit");
    }

    #[test]
    fn test_draft_defaults_to_initial_stage() {
        let draft = EntryDraft::new(SessionId(1), SlotRef::new("42", "Song", "https://x"));
        assert_eq!(draft.stage, Stage::AskingName);
        assert_eq!(Stage::default(), Stage::AskingName);
    }
}
