//! Snapshot files on local disk.
//!
//! Each key lives in its own file (`entries.snap`, `open.snap`,
//! `limit.snap`, `price.snap`):
//!
//! ```text
//! magic (4) | version (1) | payload len (8, LE) | payload (MessagePack) | crc32 (4, LE)
//! ```
//!
//! Writes go to a temporary file that is synced and renamed over the old one,
//! so a reader sees either the previous or the new snapshot.

use super::{EntryStore, Snapshot, StoredSettings};
use crate::error::{QueueError, Result};
use crate::types::{Entry, Setting};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for snapshot files.
const SNAPSHOT_MAGIC: &[u8; 4] = b"LNS\0";

/// Current snapshot format version.
const SNAPSHOT_VERSION: u8 = 1;

/// Magic, version and length before the payload, checksum after it.
const FRAME_OVERHEAD: u64 = 4 + 1 + 8 + 4;

const ENTRIES_KEY: &str = "entries";

/// File store configuration.
#[derive(Clone, Debug)]
pub struct FileStoreConfig {
    /// Directory holding the snapshot files.
    pub path: PathBuf,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./lineup-data"),
            create_if_missing: true,
        }
    }
}

/// Store backed by a directory of snapshot files.
pub struct FileStore {
    path: PathBuf,

    /// Lock file for exclusive access.
    _lock_file: File,
}

impl FileStore {
    /// Open the store directory, creating it if configured to.
    pub fn open(config: FileStoreConfig) -> Result<Self> {
        if !config.path.exists() {
            if !config.create_if_missing {
                return Err(QueueError::Initialization(format!(
                    "store directory {} does not exist",
                    config.path.display()
                )));
            }
            fs::create_dir_all(&config.path)?;
        }

        let lock_file = Self::acquire_lock(&config.path)?;

        Ok(Self {
            path: config.path,
            _lock_file: lock_file,
        })
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| QueueError::Locked)?;
        Ok(lock_file)
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.path.join(format!("{key}.snap"))
    }

    fn write_key<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = rmp_serde::to_vec(value)?;
        let final_path = self.key_path(key);
        let tmp_path = self.path.join(format!("{key}.snap.tmp"));

        let mut file = File::create(&tmp_path)?;
        file.write_all(SNAPSHOT_MAGIC)?;
        file.write_all(&[SNAPSHOT_VERSION])?;
        file.write_all(&(payload.len() as u64).to_le_bytes())?;
        file.write_all(&payload)?;
        file.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    fn read_key<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(QueueError::InvalidFormat(format!(
                "invalid snapshot magic in {key}"
            )));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != SNAPSHOT_VERSION {
            return Err(QueueError::InvalidFormat(format!(
                "unsupported snapshot version {} in {key}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);
        if len > file_len.saturating_sub(FRAME_OVERHEAD) {
            return Err(QueueError::InvalidFormat(format!(
                "payload length {len} exceeds file size {file_len} in {key}"
            )));
        }

        let mut payload = vec![0u8; len as usize];
        file.read_exact(&mut payload)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&payload);
        if stored_checksum != computed_checksum {
            return Err(QueueError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        Ok(Some(rmp_serde::from_slice(&payload)?))
    }
}

impl EntryStore for FileStore {
    fn load(&self) -> Result<Snapshot> {
        let entries: Vec<Entry> = self.read_key(ENTRIES_KEY)?.unwrap_or_default();
        let settings = StoredSettings {
            open: self.read_key("open")?,
            limit: self.read_key("limit")?,
            price: self.read_key("price")?,
        };
        Ok(Snapshot { entries, settings })
    }

    fn save_entries(&self, entries: &[Entry]) -> Result<()> {
        self.write_key(ENTRIES_KEY, &entries)
    }

    fn save_setting(&self, setting: Setting) -> Result<()> {
        match setting {
            Setting::Open(open) => self.write_key(setting.key(), &open),
            Setting::Limit(limit) => self.write_key(setting.key(), &limit),
            Setting::Price(price) => self.write_key(setting.key(), &price),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryId, SessionId, SlotRef, Stage, Timestamp};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> FileStore {
        FileStore::open(FileStoreConfig {
            path: dir.path().join("store"),
            create_if_missing: true,
        })
        .unwrap()
    }

    fn sample_entry(id: u64) -> Entry {
        Entry {
            id: EntryId(id),
            session: SessionId(77),
            handle: "ann".into(),
            display_name: "Ann K".into(),
            typed_name: Some("Ann & Bo".into()),
            slot: SlotRef::new("12", "Queen - Bohemian Rhapsody", "https://example.org/12")
                .with_note("key of B"),
            stage: Stage::InLine,
            created_at: Timestamp(1_000),
            queued_at: Some(Timestamp(2_000)),
            extras: BTreeMap::from([("lyrics".to_string(), "Is this the real life".to_string())]),
        }
    }

    #[test]
    fn test_empty_store_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        let snapshot = store.load().unwrap();
        assert!(snapshot.entries.is_empty());
        assert_eq!(snapshot.settings, StoredSettings::default());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir);
            store.save_entries(&[sample_entry(1), sample_entry(2)]).unwrap();
            store.save_setting(Setting::Open(true)).unwrap();
            store.save_setting(Setting::Price(50)).unwrap();
        }

        let store = open(&dir);
        let snapshot = store.load().unwrap();
        assert_eq!(snapshot.entries, vec![sample_entry(1), sample_entry(2)]);
        assert_eq!(snapshot.settings.open, Some(true));
        assert_eq!(snapshot.settings.price, Some(50));
        assert_eq!(snapshot.settings.limit, None);
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = TempDir::new().unwrap();
        let _first = open(&dir);

        let second = FileStore::open(FileStoreConfig {
            path: dir.path().join("store"),
            create_if_missing: true,
        });
        assert!(matches!(second, Err(QueueError::Locked)));
    }

    #[test]
    fn test_missing_directory_without_create() {
        let dir = TempDir::new().unwrap();
        let result = FileStore::open(FileStoreConfig {
            path: dir.path().join("nope"),
            create_if_missing: false,
        });
        assert!(matches!(result, Err(QueueError::Initialization(_))));
    }

    #[test]
    fn test_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.save_entries(&[sample_entry(1)]).unwrap();

        let path = store.key_path(ENTRIES_KEY);
        let mut bytes = fs::read(&path).unwrap();
        // Flip a payload byte (header is 13 bytes).
        bytes[14] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            store.load(),
            Err(QueueError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_oversized_length() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.save_entries(&[sample_entry(1)]).unwrap();

        let path = store.key_path(ENTRIES_KEY);
        let mut bytes = fs::read(&path).unwrap();
        bytes[5..13].copy_from_slice(&u64::MAX.to_le_bytes());
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(store.load(), Err(QueueError::InvalidFormat(_))));

        // One byte past the end is caught the same way.
        let actual = (bytes.len() as u64) - FRAME_OVERHEAD;
        bytes[5..13].copy_from_slice(&(actual + 1).to_le_bytes());
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(store.load(), Err(QueueError::InvalidFormat(_))));
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        fs::write(store.key_path("open"), b"not a snapshot").unwrap();

        assert!(matches!(store.load(), Err(QueueError::InvalidFormat(_))));
    }
}
