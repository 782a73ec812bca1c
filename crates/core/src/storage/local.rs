//! In-process origin store with optional file persistence

use super::{EVENT_CAPACITY, Envelope, StorageEvent, StorageEvents, TokenStore};
use crate::error::{CoreError, CoreResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

/// Source of changes picked up from the backing file
const EXTERNAL: u64 = u64::MAX;

fn read_entries(path: &Path) -> CoreResult<BTreeMap<String, String>> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            CoreError::serialization_error(format!(
                "token store {} is corrupt: {e}",
                path.display()
            ))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(e.into()),
    }
}

struct Origin {
    entries: Mutex<BTreeMap<String, String>>,
    path: Option<PathBuf>,
    events: broadcast::Sender<Envelope>,
    next_tab: AtomicU64,
}

impl Origin {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> CoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Key-value store shared by every tab handle of one origin.
///
/// Cloning a `LocalStore` yields another handle for the *same* tab; use
/// [`LocalStore::tab`] to open a new tab on the same origin. A write is
/// announced to all tabs except the one that made it.
#[derive(Clone)]
pub struct LocalStore {
    origin: Arc<Origin>,
    tab: u64,
}

impl LocalStore {
    /// Create an empty, memory-only origin
    pub fn in_memory() -> Self {
        Self::with_entries(BTreeMap::new(), None)
    }

    /// Open an origin backed by a JSON file, creating it on first write
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = read_entries(&path)?;
        debug!(path = %path.display(), keys = entries.len(), "Opened token store");
        Ok(Self::with_entries(entries, Some(path)))
    }

    fn with_entries(entries: BTreeMap<String, String>, path: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            origin: Arc::new(Origin {
                entries: Mutex::new(entries),
                path,
                events,
                next_tab: AtomicU64::new(1),
            }),
            tab: 0,
        }
    }

    /// Open another tab on the same origin
    pub fn tab(&self) -> Self {
        Self {
            origin: Arc::clone(&self.origin),
            tab: self.origin.next_tab.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.origin.path.as_deref()
    }

    /// Pick up changes another process made to the backing file.
    ///
    /// Each changed key is announced to every tab of this origin. Returns the
    /// number of keys that changed; always 0 for a memory-only store.
    pub fn reload(&self) -> CoreResult<usize> {
        let Some(path) = &self.origin.path else {
            return Ok(0);
        };
        let fresh = read_entries(path)?;

        let mut entries = self.origin.lock();
        let mut changes: Vec<StorageEvent> = entries
            .iter()
            .filter(|(key, _)| !fresh.contains_key(*key))
            .map(|(key, old)| StorageEvent {
                key: Some(key.clone()),
                old_value: Some(old.clone()),
                new_value: None,
            })
            .collect();
        for (key, new) in &fresh {
            let old = entries.get(key);
            if old != Some(new) {
                changes.push(StorageEvent {
                    key: Some(key.clone()),
                    old_value: old.cloned(),
                    new_value: Some(new.clone()),
                });
            }
        }
        *entries = fresh;
        drop(entries);

        if !changes.is_empty() {
            debug!(path = %path.display(), changed = changes.len(), "Reloaded token store");
        }
        for event in &changes {
            let _ = self.origin.events.send(Envelope {
                source: EXTERNAL,
                event: event.clone(),
            });
        }
        Ok(changes.len())
    }

    /// Remove every key, notifying other tabs with a key-less event
    pub fn clear(&self) -> CoreResult<()> {
        let mut entries = self.origin.lock();
        if entries.is_empty() {
            return Ok(());
        }
        let previous = std::mem::take(&mut *entries);
        if let Err(e) = self.origin.persist(&entries) {
            *entries = previous;
            return Err(e);
        }
        self.announce(StorageEvent {
            key: None,
            old_value: None,
            new_value: None,
        });
        Ok(())
    }

    fn announce(&self, event: StorageEvent) {
        // No subscribers is fine
        let _ = self.origin.events.send(Envelope {
            source: self.tab,
            event,
        });
    }
}

impl TokenStore for LocalStore {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.origin.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        let mut entries = self.origin.lock();
        let old_value = entries.insert(key.to_string(), value.to_string());
        if old_value.as_deref() == Some(value) {
            return Ok(());
        }
        if let Err(e) = self.origin.persist(&entries) {
            match &old_value {
                Some(old) => entries.insert(key.to_string(), old.clone()),
                None => entries.remove(key),
            };
            return Err(e);
        }
        self.announce(StorageEvent {
            key: Some(key.to_string()),
            old_value,
            new_value: Some(value.to_string()),
        });
        Ok(())
    }

    fn remove(&self, key: &str) -> CoreResult<()> {
        let mut entries = self.origin.lock();
        let Some(old_value) = entries.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.origin.persist(&entries) {
            entries.insert(key.to_string(), old_value);
            return Err(e);
        }
        self.announce(StorageEvent {
            key: Some(key.to_string()),
            old_value: Some(old_value),
            new_value: None,
        });
        Ok(())
    }

    fn events(&self) -> StorageEvents {
        StorageEvents::new(self.tab, self.origin.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

    #[test]
    fn values_round_trip() {
        let store = LocalStore::in_memory();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);

        store.set(ACCESS_TOKEN_KEY, "a1").unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("a1"));

        store.remove(ACCESS_TOKEN_KEY).unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn writes_reach_other_tabs_only() {
        let first = LocalStore::in_memory();
        let second = first.tab();
        let mut first_events = first.events();
        let mut second_events = second.events();

        first.set(REFRESH_TOKEN_KEY, "r1").unwrap();

        assert_eq!(first_events.try_recv(), None);
        assert_eq!(
            second_events.try_recv(),
            Some(StorageEvent {
                key: Some(REFRESH_TOKEN_KEY.to_string()),
                old_value: None,
                new_value: Some("r1".to_string()),
            })
        );
        assert_eq!(second.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r1"));
    }

    #[test]
    fn unchanged_writes_are_silent() {
        let first = LocalStore::in_memory();
        let second = first.tab();
        first.set(ACCESS_TOKEN_KEY, "a1").unwrap();

        let mut events = second.events();
        first.set(ACCESS_TOKEN_KEY, "a1").unwrap();
        first.remove(REFRESH_TOKEN_KEY).unwrap();

        assert_eq!(events.try_recv(), None);
    }

    #[test]
    fn clear_announces_a_keyless_event() {
        let first = LocalStore::in_memory();
        let second = first.tab();
        first.set(ACCESS_TOKEN_KEY, "a1").unwrap();
        let mut events = second.events();

        first.clear().unwrap();

        let event = events.try_recv().unwrap();
        assert_eq!(event.key, None);
        assert!(event.removes(REFRESH_TOKEN_KEY));
        assert_eq!(second.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session").join("tokens.json");

        let store = LocalStore::open(&path).unwrap();
        store.set(ACCESS_TOKEN_KEY, "a1").unwrap();
        store.set(REFRESH_TOKEN_KEY, "r1").unwrap();
        store.remove(ACCESS_TOKEN_KEY).unwrap();
        drop(store);

        let reopened = LocalStore::open(&path).unwrap();
        assert_eq!(reopened.path(), Some(path.as_path()));
        assert_eq!(reopened.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(reopened.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r1"));
    }

    #[test]
    fn failed_writes_leave_entries_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let session_dir = dir.path().join("session");
        let path = session_dir.join("tokens.json");

        let store = LocalStore::open(&path).unwrap();
        store.set(ACCESS_TOKEN_KEY, "a1").unwrap();
        store.set(REFRESH_TOKEN_KEY, "r1").unwrap();
        let other = store.tab();
        let mut events = other.events();

        // The parent directory turns into a regular file
        std::fs::remove_dir_all(&session_dir).unwrap();
        std::fs::write(&session_dir, b"not a directory").unwrap();

        assert!(store.set(ACCESS_TOKEN_KEY, "a2").is_err());
        assert!(store.set("theme", "dark").is_err());
        assert!(store.remove(REFRESH_TOKEN_KEY).is_err());
        assert!(store.clear().is_err());

        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("a1"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r1"));
        assert_eq!(store.get("theme").unwrap(), None);
        assert_eq!(events.try_recv(), None);
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = LocalStore::open(&path).err().unwrap();
        assert!(matches!(err, CoreError::Serialization { .. }));
    }

    #[test]
    fn reload_announces_changes_from_another_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let ours = LocalStore::open(&path).unwrap();
        ours.set(ACCESS_TOKEN_KEY, "a1").unwrap();
        ours.set(REFRESH_TOKEN_KEY, "r1").unwrap();
        let mut events = ours.events();

        let theirs = LocalStore::open(&path).unwrap();
        theirs.set(ACCESS_TOKEN_KEY, "a2").unwrap();
        theirs.remove(REFRESH_TOKEN_KEY).unwrap();

        assert_eq!(ours.reload().unwrap(), 2);
        assert_eq!(ours.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("a2"));

        let mut seen = vec![events.try_recv().unwrap(), events.try_recv().unwrap()];
        seen.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(seen[0].new_value.as_deref(), Some("a2"));
        assert!(seen[1].removes(REFRESH_TOKEN_KEY));

        assert_eq!(ours.reload().unwrap(), 0);
        assert_eq!(LocalStore::in_memory().reload().unwrap(), 0);
    }

    #[tokio::test]
    async fn events_end_when_origin_is_dropped() {
        let store = LocalStore::in_memory();
        let mut events = store.tab().events();
        drop(store);
        assert_eq!(events.recv().await, None);
    }
}
