//! Durable metadata tables for the disk cache.
//!
//! [`JournalMetadataStore`] keeps the table in memory and appends one JSON
//! line per change. The journal is replayed at open and rewritten in full
//! once it holds far more records than live rows.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::entities::CacheEntry;
use crate::domain::ports::{CacheError, CacheResult, MetadataStore};

/// Records tolerated beyond twice the live rows before compacting.
const COMPACTION_SLACK: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalRecord {
    Upsert(CacheEntry),
    Remove { uri: String },
    Clear,
}

/// Rows plus an access-ordered index.
#[derive(Debug, Default)]
struct MetadataTable {
    rows: HashMap<String, CacheEntry>,
    by_access: BTreeSet<(u64, String)>,
    total_size: u64,
}

impl MetadataTable {
    fn apply(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::Upsert(entry) => self.upsert(entry),
            JournalRecord::Remove { uri } => {
                self.remove(&uri);
            }
            JournalRecord::Clear => self.clear(),
        }
    }

    fn upsert(&mut self, entry: CacheEntry) {
        self.remove(&entry.uri);
        self.by_access
            .insert((entry.last_access_time, entry.uri.clone()));
        self.total_size = self.total_size.saturating_add(entry.file_size_bytes);
        self.rows.insert(entry.uri.clone(), entry);
    }

    fn remove(&mut self, uri: &str) -> Option<CacheEntry> {
        let entry = self.rows.remove(uri)?;
        self.by_access
            .remove(&(entry.last_access_time, entry.uri.clone()));
        self.total_size = self.total_size.saturating_sub(entry.file_size_bytes);
        Some(entry)
    }

    fn oldest_on_disk(&self, limit: usize) -> Vec<CacheEntry> {
        self.by_access
            .iter()
            .filter_map(|(_, uri)| self.rows.get(uri))
            .filter(|entry| entry.on_disk)
            .take(limit)
            .cloned()
            .collect()
    }

    fn ordered(&self) -> impl Iterator<Item = &CacheEntry> {
        self.by_access.iter().filter_map(|(_, uri)| self.rows.get(uri))
    }

    fn clear(&mut self) {
        self.rows.clear();
        self.by_access.clear();
        self.total_size = 0;
    }
}

/// Volatile metadata table. Used in tests and for throwaway caches.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    table: MetadataTable,
}

impl InMemoryMetadataStore {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn upsert(&mut self, entry: CacheEntry) -> CacheResult<()> {
        self.table.upsert(entry);
        Ok(())
    }

    fn get(&self, uri: &str) -> Option<CacheEntry> {
        self.table.rows.get(uri).cloned()
    }

    fn remove(&mut self, uri: &str) -> CacheResult<Option<CacheEntry>> {
        Ok(self.table.remove(uri))
    }

    fn oldest_on_disk(&self, limit: usize) -> Vec<CacheEntry> {
        self.table.oldest_on_disk(limit)
    }

    fn total_size(&self) -> u64 {
        self.table.total_size
    }

    fn entries(&self) -> Vec<CacheEntry> {
        self.table.rows.values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.table.rows.len()
    }

    fn clear(&mut self) -> CacheResult<()> {
        self.table.clear();
        Ok(())
    }
}

/// Metadata table persisted as an append-only JSON-lines journal.
#[derive(Debug)]
pub struct JournalMetadataStore {
    path: PathBuf,
    table: MetadataTable,
    journal: File,
    records: usize,
}

impl JournalMetadataStore {
    /// Opens or creates the journal at `path` and replays it.
    ///
    /// Lines that do not parse, such as a record torn by a crash mid-append,
    /// are skipped and the journal is rewritten without them.
    ///
    /// # Errors
    /// Returns error if the journal cannot be read or created.
    pub fn open(path: impl Into<PathBuf>) -> CacheResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut table = MetadataTable::default();
        let mut records = 0;
        let mut skipped = 0;
        match File::open(&path) {
            Ok(file) => {
                for line in BufReader::new(file).split(b'\n') {
                    let line = line?;
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    match serde_json::from_slice::<JournalRecord>(&line) {
                        Ok(record) => {
                            table.apply(record);
                            records += 1;
                        }
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Skipping malformed journal record");
                            skipped += 1;
                        }
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let journal = Self::open_append(&path)?;
        let mut store = Self {
            path,
            table,
            journal,
            records,
        };
        if skipped > 0 || store.needs_compaction() {
            store.compact()?;
        }
        info!(
            path = %store.path.display(),
            rows = store.table.rows.len(),
            records = store.records,
            "Opened metadata journal"
        );
        Ok(store)
    }

    /// Returns the journal path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records currently in the journal file.
    #[must_use]
    pub const fn journal_records(&self) -> usize {
        self.records
    }

    /// Rewrites the journal as one upsert per live row.
    ///
    /// # Errors
    /// Returns error if the new journal cannot be written.
    pub fn compact(&mut self) -> CacheResult<()> {
        let dir = self
            .path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let mut temp_file = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(temp_file.as_file_mut());
            for entry in self.table.ordered() {
                serde_json::to_writer(&mut writer, &JournalRecord::Upsert(entry.clone()))?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        temp_file
            .persist(&self.path)
            .map_err(|e| CacheError::JournalError(e.error.to_string()))?;

        self.journal = Self::open_append(&self.path)?;
        let before = self.records;
        self.records = self.table.rows.len();
        debug!(path = %self.path.display(), before, after = self.records, "Compacted metadata journal");
        Ok(())
    }

    fn open_append(path: &Path) -> CacheResult<File> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }

    fn needs_compaction(&self) -> bool {
        self.records > 2 * self.table.rows.len() + COMPACTION_SLACK
    }

    fn append(&mut self, record: &JournalRecord) -> CacheResult<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.journal.write_all(&line)?;
        self.journal.flush()?;
        self.records += 1;
        Ok(())
    }

    fn compact_if_needed(&mut self) -> CacheResult<()> {
        if self.needs_compaction() {
            self.compact()?;
        }
        Ok(())
    }
}

impl MetadataStore for JournalMetadataStore {
    fn upsert(&mut self, entry: CacheEntry) -> CacheResult<()> {
        let record = JournalRecord::Upsert(entry);
        self.append(&record)?;
        self.table.apply(record);
        self.compact_if_needed()
    }

    fn get(&self, uri: &str) -> Option<CacheEntry> {
        self.table.rows.get(uri).cloned()
    }

    fn remove(&mut self, uri: &str) -> CacheResult<Option<CacheEntry>> {
        if !self.table.rows.contains_key(uri) {
            return Ok(None);
        }
        self.append(&JournalRecord::Remove {
            uri: uri.to_string(),
        })?;
        let removed = self.table.remove(uri);
        self.compact_if_needed()?;
        Ok(removed)
    }

    fn oldest_on_disk(&self, limit: usize) -> Vec<CacheEntry> {
        self.table.oldest_on_disk(limit)
    }

    fn total_size(&self) -> u64 {
        self.table.total_size
    }

    fn entries(&self) -> Vec<CacheEntry> {
        self.table.rows.values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.table.rows.len()
    }

    fn clear(&mut self) -> CacheResult<()> {
        self.append(&JournalRecord::Clear)?;
        self.table.clear();
        self.compact()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(uri: &str, size: u64, at: u64) -> CacheEntry {
        CacheEntry {
            uri: uri.to_string(),
            file_size_bytes: size,
            width: None,
            height: None,
            last_access_time: at,
            on_disk: true,
        }
    }

    fn journal_path(dir: &TempDir) -> PathBuf {
        dir.path().join("index.jsonl")
    }

    #[test]
    fn test_rows_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = JournalMetadataStore::open(journal_path(&dir)).unwrap();
            store.upsert(entry("a", 10, 1)).unwrap();
            store.upsert(entry("b", 20, 2)).unwrap();
            store.upsert(entry("a", 15, 3)).unwrap();
            store.remove("b").unwrap();
        }

        let store = JournalMetadataStore::open(journal_path(&dir)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").map(|e| e.file_size_bytes), Some(15));
        assert_eq!(store.total_size(), 15);
        assert!(store.get("b").is_none());
    }

    #[test]
    fn test_torn_trailing_record_is_skipped() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = JournalMetadataStore::open(journal_path(&dir)).unwrap();
            store.upsert(entry("a", 10, 1)).unwrap();
        }
        let mut file = OpenOptions::new()
            .append(true)
            .open(journal_path(&dir))
            .unwrap();
        file.write_all(br#"{"op":"upsert","uri":"b","file_si"#).unwrap();
        drop(file);

        let store = JournalMetadataStore::open(journal_path(&dir)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.journal_records(), 1);
        let text = fs::read_to_string(journal_path(&dir)).unwrap();
        assert!(!text.contains("\"b\""));
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn test_journal_compacts_when_overgrown() {
        let dir = TempDir::new().unwrap();
        let mut store = JournalMetadataStore::open(journal_path(&dir)).unwrap();
        for at in 0..200 {
            store.upsert(entry("hot", 1, at)).unwrap();
        }
        assert!(store.journal_records() <= 2 * store.len() + COMPACTION_SLACK);

        let lines = fs::read_to_string(journal_path(&dir)).unwrap().lines().count();
        assert_eq!(lines, store.journal_records());
    }

    #[test]
    fn test_clear_persists() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = JournalMetadataStore::open(journal_path(&dir)).unwrap();
            store.upsert(entry("a", 10, 1)).unwrap();
            store.clear().unwrap();
        }
        let store = JournalMetadataStore::open(journal_path(&dir)).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.total_size(), 0);
    }

    #[test]
    fn test_oldest_on_disk_skips_provisional_rows() {
        let mut store = InMemoryMetadataStore::new();
        store.upsert(entry("c", 1, 30)).unwrap();
        store.upsert(CacheEntry::provisional("p", 5)).unwrap();
        store.upsert(entry("a", 1, 10)).unwrap();
        store.upsert(entry("b", 1, 10)).unwrap();

        let order: Vec<_> = store
            .oldest_on_disk(10)
            .into_iter()
            .map(|e| e.uri)
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(store.oldest_on_disk(1).len(), 1);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_remove_missing_row_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut store = JournalMetadataStore::open(journal_path(&dir)).unwrap();
        assert!(store.remove("ghost").unwrap().is_none());
        assert_eq!(store.journal_records(), 0);
    }
}
