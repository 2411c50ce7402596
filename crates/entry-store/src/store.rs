//! File-based entry storage with an in-memory index

use crate::error::{Result, StoreError};
use crate::record;
use crate::types::{CacheEntry, CacheStats, EntryState, EntrySummary, Payload};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const RECORD_EXTENSION: &str = "entry";

/// Durable store of cache entries.
///
/// Every entry is one record file under `<root>/entries`. Records are
/// written to `<root>/tmp` first and renamed into place, so a crash never
/// leaves a partially written record visible. The index keeps a summary of
/// every committed entry; artifact bytes and pending queries are read from
/// disk on demand.
pub struct EntryStore {
    entries_dir: PathBuf,
    tmp_dir: PathBuf,
    index: RwLock<HashMap<String, EntrySummary>>,
    tmp_seq: AtomicU64,
}

impl EntryStore {
    /// Create a store rooted at `root`. Call [`EntryStore::init`] before use.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            entries_dir: root.join("entries"),
            tmp_dir: root.join("tmp"),
            index: RwLock::new(HashMap::new()),
            tmp_seq: AtomicU64::new(0),
        }
    }

    /// Ensure the directory layout exists and discard interrupted writes
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.entries_dir).await?;
        fs::create_dir_all(&self.tmp_dir).await?;

        let mut leftovers = 0usize;
        let mut dir = fs::read_dir(&self.tmp_dir).await?;
        while let Some(item) = dir.next_entry().await? {
            if let Err(e) = fs::remove_file(item.path()).await {
                warn!(path = ?item.path(), error = %e, "Failed to remove interrupted write");
            } else {
                leftovers += 1;
            }
        }

        info!(entries_dir = ?self.entries_dir, leftovers, "Entry store initialized");
        Ok(())
    }

    /// Persist an entry, replacing any previous record with the same id.
    ///
    /// The index is only updated once the record is durably in place.
    pub async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let path = self.record_path(&entry.id)?;
        let raw = record::encode(entry)?;

        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self.tmp_dir.join(format!("{}.{}.tmp", entry.id, seq));
        if let Err(e) = write_and_rename(&tmp, &path, &raw).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        self.index
            .write()
            .await
            .insert(entry.id.clone(), entry.summary());
        debug!(id = %entry.id, state = entry.state().as_str(), bytes = raw.len(), "Stored entry");
        Ok(())
    }

    /// Record an entry in the index without touching disk.
    ///
    /// Used when a state change must become visible even though persisting
    /// it failed; the previous on-disk record is left as it was.
    pub async fn put_in_memory(&self, entry: &CacheEntry) {
        self.index
            .write()
            .await
            .insert(entry.id.clone(), entry.summary());
    }

    /// Look up an entry's summary from the index
    pub async fn summary(&self, id: &str) -> Option<EntrySummary> {
        self.index.read().await.get(id).cloned()
    }

    /// Load a full entry.
    ///
    /// Returns `Ok(None)` if the entry is unknown or its record vanished.
    /// I/O and decoding problems are reported as errors, distinct from
    /// absence.
    pub async fn get(&self, id: &str) -> Result<Option<CacheEntry>> {
        let Some(summary) = self.summary(id).await else {
            return Ok(None);
        };

        // Failed entries are fully described by their summary, which also
        // covers failures that could only be recorded in memory.
        if let (EntryState::Failed, Some(failure)) = (summary.state, summary.error.clone()) {
            return Ok(Some(CacheEntry {
                id: summary.id,
                created_at: summary.created_at,
                expires_at: summary.expires_at,
                payload: Payload::Error(failure),
            }));
        }

        let path = self.record_path(id)?;
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(id, "Record missing from disk, dropping index entry");
                self.index.write().await.remove(id);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let entry = record::decode(&raw)?;
        if entry.id != id {
            return Err(StoreError::Corrupt(format!(
                "record for {} names {}",
                id, entry.id
            )));
        }
        Ok(Some(entry))
    }

    /// Remove an entry from the index and disk. Idempotent; returns whether
    /// anything was removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let path = self.record_path(id)?;
        let indexed = self.index.write().await.remove(id).is_some();

        let on_disk = match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        if indexed || on_disk {
            debug!(id, "Deleted entry");
        }
        Ok(indexed || on_disk)
    }

    /// Read every record from disk and rebuild the index from them.
    ///
    /// Records that cannot be decoded are removed. Failed entries that only
    /// exist in memory stay failed. Used at startup, before anything else
    /// touches the store.
    pub async fn list(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.entries_dir).await?;

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();

            let decoded = fs::read(&path)
                .await
                .map_err(StoreError::from)
                .and_then(|raw| record::decode(&raw));
            match decoded {
                Ok(entry) if entry.id == stem => entries.push(entry),
                Ok(entry) => {
                    warn!(path = ?path, id = %entry.id, "Record name does not match its id, removing");
                    let _ = fs::remove_file(&path).await;
                }
                Err(e) => {
                    warn!(path = ?path, error = %e, "Unreadable record, removing");
                    let _ = fs::remove_file(&path).await;
                }
            }
        }

        let mut index = self.index.write().await;
        let previous = std::mem::take(&mut *index);
        for entry in &mut entries {
            // A failure that could only be recorded in memory outranks the
            // pending record still on disk.
            if let Some(failure) = previous
                .get(&entry.id)
                .filter(|s| s.state == EntryState::Failed && entry.state() == EntryState::Pending)
                .and_then(|s| s.error.clone())
            {
                entry.payload = Payload::Error(failure);
            }
            index.insert(entry.id.clone(), entry.summary());
        }
        info!(entries = entries.len(), "Loaded entries from disk");

        Ok(entries)
    }

    /// Summaries of all indexed entries
    pub async fn summaries(&self) -> Vec<EntrySummary> {
        self.index.read().await.values().cloned().collect()
    }

    /// Get current store statistics
    pub async fn stats(&self) -> CacheStats {
        let index = self.index.read().await;
        let mut stats = CacheStats {
            entries: index.len(),
            ..CacheStats::default()
        };
        for summary in index.values() {
            stats.total_bytes += summary.size;
            match summary.state {
                EntryState::Pending => stats.pending += 1,
                EntryState::Active => stats.active += 1,
                EntryState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    fn record_path(&self, id: &str) -> Result<PathBuf> {
        let safe = !id.is_empty()
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
        if !safe {
            return Err(StoreError::Corrupt(format!("invalid entry id {:?}", id)));
        }
        Ok(self
            .entries_dir
            .join(format!("{}.{}", id, RECORD_EXTENSION)))
    }
}

async fn write_and_rename(tmp: &Path, path: &Path, raw: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp).await?;
    file.write_all(raw).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(tmp, path).await
}
