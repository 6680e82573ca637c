// crates/callosum-store/src/file/mod.rs
// ============================================================================
// Module: File-Backed Coordination Store
// Description: CoordinationStore over the persisted state layout: a
// rotating append-only journal, plus single-document lock-table and
// context-record files.
// Purpose: Give a Callosum deployment durable, cross-process-safe state
// without embedding a database engine.
// Dependencies: callosum-core, fs2, serde_json, thiserror, tracing
// ============================================================================

//! ## Overview
//! Every mutation of the lock table or context record follows the same
//! discipline: take an exclusive `fs2` advisory lock on the corresponding
//! file, read its current contents, compute the new value, write it back,
//! then release. This bounds the lock-table race documented in the data
//! model's concurrency notes to the read-modify-write window, not the
//! whole process lifetime. Journal appends are serialized the same way so
//! that rotation never interleaves with a concurrent append.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use callosum_core::core::Action;
use callosum_core::core::ContextKey;
use callosum_core::core::ContextRecord;
use callosum_core::core::InstanceId;
use callosum_core::core::JournalEntry;
use callosum_core::core::Lock;
use callosum_core::core::Tier;
use callosum_core::store::Conflict;
use callosum_core::store::CoordinationStore;
use callosum_core::store::StoreError;
use fs2::FileExt;
use serde::Deserialize;
use serde::Serialize;

/// Default journal rotation threshold, in bytes.
pub const DEFAULT_ROTATE_BYTES: u64 = 2 * 1024 * 1024;

/// Maximum journal lines scanned by `find_recent_on_key`, bounding the cost
/// of an unindexed linear scan over the current (unrotated) journal file.
const MAX_JOURNAL_SCAN_LINES: usize = 10_000;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for [`FileCoordinationStore`].
#[derive(Debug, Clone, Deserialize)]
pub struct FileStoreConfig {
    /// Directory holding `journal`, `locks.json`, and `context.json`.
    pub state_dir: PathBuf,
    /// Journal rotation threshold, in bytes.
    #[serde(default = "default_rotate_bytes")]
    pub rotate_bytes: u64,
}

const fn default_rotate_bytes() -> u64 {
    DEFAULT_ROTATE_BYTES
}

impl FileStoreConfig {
    /// Builds a config pointing at `state_dir` with the default rotation
    /// threshold.
    #[must_use]
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self { state_dir: state_dir.into(), rotate_bytes: DEFAULT_ROTATE_BYTES }
    }
}

// ============================================================================
// SECTION: On-Disk Documents
// ============================================================================

/// On-disk form of `locks.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LockDocument {
    /// Active locks, keyed by context key string.
    locks: Vec<Lock>,
}

/// On-disk form of `context.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ContextDocument {
    /// Context records across every key, newest last.
    records: Vec<ContextRecord>,
}

// ============================================================================
// SECTION: File Coordination Store
// ============================================================================

/// [`CoordinationStore`] persisted under a state directory per the layout:
/// `journal` (rotating JSON-lines), `locks.json`, `context.json`.
pub struct FileCoordinationStore {
    journal_path: PathBuf,
    locks_path: PathBuf,
    context_path: PathBuf,
    rotate_bytes: u64,
    /// In-process serialization, layered under the cross-process `fs2`
    /// advisory lock so same-process callers never interleave either.
    guard: Mutex<()>,
}

impl FileCoordinationStore {
    /// Opens (creating if absent) a store under `config.state_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when the state directory cannot be
    /// created.
    pub fn open(config: &FileStoreConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.state_dir)
            .map_err(|error| StoreError::Backend(format!("creating state dir: {error}")))?;
        Ok(Self {
            journal_path: config.state_dir.join("journal"),
            locks_path: config.state_dir.join("locks.json"),
            context_path: config.state_dir.join("context.json"),
            rotate_bytes: config.rotate_bytes,
            guard: Mutex::new(()),
        })
    }

    fn lock_guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read_locks(&self) -> Result<LockDocument, StoreError> {
        read_json_document(&self.locks_path)
    }

    fn write_locks(&self, document: &LockDocument) -> Result<(), StoreError> {
        write_json_document(&self.locks_path, document)
    }

    fn read_context(&self) -> Result<ContextDocument, StoreError> {
        read_json_document(&self.context_path)
    }

    fn write_context(&self, document: &ContextDocument) -> Result<(), StoreError> {
        write_json_document(&self.context_path, document)
    }

    /// Rotates the journal file (`journal` -> `journal.1` -> `journal.2`)
    /// when it has reached `rotate_bytes`. Must be called with the journal
    /// file already exclusively locked.
    fn rotate_if_needed(&self) -> Result<(), StoreError> {
        let size = fs::metadata(&self.journal_path).map(|metadata| metadata.len()).unwrap_or(0);
        if size < self.rotate_bytes {
            return Ok(());
        }
        let rotated_2 = self.journal_path.with_extension("2");
        let rotated_1 = self.journal_path.with_extension("1");
        if rotated_1.exists() {
            fs::rename(&rotated_1, &rotated_2)
                .map_err(|error| StoreError::Backend(format!("rotating journal.1: {error}")))?;
        }
        fs::rename(&self.journal_path, &rotated_1)
            .map_err(|error| StoreError::Backend(format!("rotating journal: {error}")))?;
        tracing::debug!(path = %self.journal_path.display(), "journal rotated");
        Ok(())
    }
}

impl CoordinationStore for FileCoordinationStore {
    fn append_journal(&self, entry: JournalEntry) -> Result<(), StoreError> {
        let _process_guard = self.lock_guard();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)
            .map_err(|error| StoreError::Backend(format!("opening journal: {error}")))?;
        file.lock_exclusive().map_err(|error| StoreError::Backend(format!("locking journal: {error}")))?;

        let result = (|| {
            self.rotate_if_needed()?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.journal_path)
                .map_err(|error| StoreError::Backend(format!("reopening journal: {error}")))?;
            let mut line = serde_json::to_string(&entry)
                .map_err(|error| StoreError::Backend(format!("serializing journal entry: {error}")))?;
            line.push('\n');
            file.write_all(line.as_bytes())
                .map_err(|error| StoreError::Backend(format!("appending journal: {error}")))?;
            file.sync_data().map_err(|error| StoreError::Backend(format!("syncing journal: {error}")))
        })();

        fs2::FileExt::unlock(&file).map_err(|error| StoreError::Backend(format!("unlocking journal: {error}")))?;
        result
    }

    fn acquire_lock(
        &self,
        context_key: &ContextKey,
        instance: &InstanceId,
        tier: Tier,
        now_millis: i64,
        expires_at: i64,
    ) -> Result<bool, StoreError> {
        let _process_guard = self.lock_guard();
        with_exclusive_lock(&self.locks_path, || {
            let mut document = self.read_locks()?;
            document.locks.retain(|lock| !lock.is_expired(now_millis) || lock.context_key != *context_key);
            if let Some(existing) = document.locks.iter().find(|lock| &lock.context_key == context_key) {
                if !existing.is_held_by(instance) {
                    return Ok(false);
                }
            }
            document.locks.retain(|lock| &lock.context_key != context_key);
            document.locks.push(Lock {
                instance: instance.clone(),
                context_key: context_key.clone(),
                tier,
                acquired_at: now_millis,
                expires_at,
            });
            self.write_locks(&document)?;
            Ok(true)
        })
    }

    fn release_lock(&self, context_key: &ContextKey, instance: &InstanceId) -> Result<(), StoreError> {
        let _process_guard = self.lock_guard();
        with_exclusive_lock(&self.locks_path, || {
            let mut document = self.read_locks()?;
            document.locks.retain(|lock| !(&lock.context_key == context_key && lock.is_held_by(instance)));
            self.write_locks(&document)
        })
    }

    fn record_context(&self, record: ContextRecord) -> Result<(), StoreError> {
        let _process_guard = self.lock_guard();
        with_exclusive_lock(&self.context_path, || {
            let mut document = self.read_context()?;
            document.records.push(record);
            self.write_context(&document)
        })
    }

    fn check_conflict(
        &self,
        context_key: &ContextKey,
        instance: &InstanceId,
        tier: Tier,
        now_millis: i64,
        window_millis: i64,
    ) -> Result<Conflict, StoreError> {
        let _process_guard = self.lock_guard();
        let locks = self.read_locks()?;
        if let Some(lock) = locks.locks.iter().find(|lock| &lock.context_key == context_key) {
            if !lock.is_expired(now_millis) && !lock.is_held_by(instance) {
                return Ok(Conflict::LockedByOther { holder: lock.instance.clone() });
            }
        }
        if tier.requires_duplicate_check() {
            let context = self.read_context()?;
            let hit = context
                .records
                .iter()
                .rev()
                .find(|record| {
                    &record.context_key == context_key
                        && &record.instance != instance
                        && record.is_within_window(now_millis, window_millis)
                });
            if let Some(record) = hit {
                return Ok(Conflict::RecentOther { instance: record.instance.clone(), timestamp: record.timestamp });
            }
        }
        Ok(Conflict::None)
    }

    fn find_recent_on_key(
        &self,
        context_key: &ContextKey,
        instance: &InstanceId,
        now_millis: i64,
        window_millis: i64,
        include_self: bool,
    ) -> Result<Option<JournalEntry>, StoreError> {
        let _process_guard = self.lock_guard();
        let Some(file) = open_for_read(&self.journal_path)? else {
            return Ok(None);
        };
        let reader = BufReader::new(file);
        let mut found = None;
        for line in reader.lines().collect::<Result<Vec<_>, _>>()
            .map_err(|error| StoreError::Backend(format!("reading journal: {error}")))?
            .into_iter()
            .rev()
            .take(MAX_JOURNAL_SCAN_LINES)
        {
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line)
                .map_err(|error| StoreError::Backend(format!("parsing journal line: {error}")))?;
            if entry.action == Action::Complete
                && entry.context_key.as_ref() == Some(context_key)
                && (include_self || &entry.instance != instance)
                && now_millis - entry.timestamp <= window_millis
            {
                found = Some(entry);
                break;
            }
        }
        Ok(found)
    }

    fn recent_context(
        &self,
        context_key: &ContextKey,
        now_millis: i64,
        window_millis: i64,
    ) -> Result<Option<ContextRecord>, StoreError> {
        let _process_guard = self.lock_guard();
        let document = self.read_context()?;
        Ok(document
            .records
            .into_iter()
            .rev()
            .find(|record| &record.context_key == context_key && record.is_within_window(now_millis, window_millis)))
    }

    fn sweep_expired_locks(&self, now_millis: i64) -> Result<usize, StoreError> {
        let _process_guard = self.lock_guard();
        with_exclusive_lock(&self.locks_path, || {
            let mut document = self.read_locks()?;
            let before = document.locks.len();
            document.locks.retain(|lock| !lock.is_expired(now_millis));
            let swept = before - document.locks.len();
            if swept > 0 {
                self.write_locks(&document)?;
            }
            Ok(swept)
        })
    }

    fn active_locks(&self, now_millis: i64) -> Result<Vec<Lock>, StoreError> {
        let _process_guard = self.lock_guard();
        let document = self.read_locks()?;
        Ok(document.locks.into_iter().filter(|lock| !lock.is_expired(now_millis)).collect())
    }

    fn recent_journal(&self, limit: usize) -> Result<Vec<JournalEntry>, StoreError> {
        let _process_guard = self.lock_guard();
        // Oldest archive first, so the final `limit` lines come out in
        // chronological order even when the in-flight file alone has fewer
        // than `limit` lines and a rotation archive must fill the rest.
        let ordered_paths =
            [self.journal_path.with_extension("2"), self.journal_path.with_extension("1"), self.journal_path.clone()];
        let mut lines = Vec::new();
        for path in &ordered_paths {
            let Some(file) = open_for_read(path)? else { continue };
            for line in BufReader::new(file).lines() {
                let line = line.map_err(|error| StoreError::Backend(format!("reading {}: {error}", path.display())))?;
                if !line.trim().is_empty() {
                    lines.push(line);
                }
            }
        }
        let start = lines.len().saturating_sub(limit);
        lines[start..]
            .iter()
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|error| StoreError::Backend(format!("parsing journal line: {error}")))
            })
            .collect()
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Runs `body` while holding an exclusive `fs2` advisory lock on `path`.
fn with_exclusive_lock<T>(path: &Path, body: impl FnOnce() -> Result<T, StoreError>) -> Result<T, StoreError> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|error| StoreError::Backend(format!("opening {}: {error}", path.display())))?;
    file.lock_exclusive().map_err(|error| StoreError::Backend(format!("locking {}: {error}", path.display())))?;
    let result = body();
    fs2::FileExt::unlock(&file)
        .map_err(|error| StoreError::Backend(format!("unlocking {}: {error}", path.display())))?;
    result
}

/// Opens `path` for reading, returning `None` when it does not exist yet.
fn open_for_read(path: &Path) -> Result<Option<File>, StoreError> {
    match File::open(path) {
        Ok(file) => Ok(Some(file)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(StoreError::Backend(format!("opening {}: {error}", path.display()))),
    }
}

/// Reads a JSON document, returning its `Default` when the file is absent.
fn read_json_document<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> Result<T, StoreError> {
    let Some(file) = open_for_read(path)? else {
        return Ok(T::default());
    };
    serde_json::from_reader(BufReader::new(file))
        .map_err(|error| StoreError::Backend(format!("parsing {}: {error}", path.display())))
}

/// Writes a JSON document atomically via a temp-file-then-rename.
fn write_json_document<T: Serialize>(path: &Path, document: &T) -> Result<(), StoreError> {
    let tmp_path = path.with_extension("tmp");
    let mut tmp = File::create(&tmp_path)
        .map_err(|error| StoreError::Backend(format!("creating {}: {error}", tmp_path.display())))?;
    serde_json::to_writer_pretty(&mut tmp, document)
        .map_err(|error| StoreError::Backend(format!("serializing {}: {error}", path.display())))?;
    tmp.sync_all().map_err(|error| StoreError::Backend(format!("syncing {}: {error}", tmp_path.display())))?;
    fs::rename(&tmp_path, path).map_err(|error| StoreError::Backend(format!("renaming into {}: {error}", path.display())))
}

#[cfg(test)]
mod tests {
    use callosum_core::core::InstanceId;
    use callosum_core::core::RuleName;
    use callosum_core::core::Tier;
    use tempfile::tempdir;

    use super::*;

    fn instance(name: &str) -> InstanceId {
        InstanceId::new(name).expect("non-empty")
    }

    fn key(name: &str) -> ContextKey {
        ContextKey::new(name).expect("non-empty")
    }

    fn open_store(dir: &Path) -> FileCoordinationStore {
        FileCoordinationStore::open(&FileStoreConfig::new(dir)).expect("opens")
    }

    #[test]
    fn lock_round_trips_across_acquire_and_release() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(dir.path());
        let alpha = instance("alpha");
        let k = key("email:alice@example.com");

        assert!(store.acquire_lock(&k, &alpha, Tier::Commitment, 0, 1_000).expect("acquires"));
        let locks = store.read_locks().expect("reads");
        assert_eq!(locks.locks.len(), 1);

        store.release_lock(&k, &alpha).expect("releases");
        let locks = store.read_locks().expect("reads");
        assert!(locks.locks.is_empty());
    }

    #[test]
    fn other_instance_cannot_acquire_an_unexpired_lock() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(dir.path());
        let alpha = instance("alpha");
        let beta = instance("beta");
        let k = key("message:channel-delete");

        assert!(store.acquire_lock(&k, &alpha, Tier::Irreversible, 0, 1_000).expect("acquires"));
        assert!(!store.acquire_lock(&k, &beta, Tier::Irreversible, 0, 1_000).expect("contends"));
    }

    #[test]
    fn journal_survives_a_rotation() {
        let dir = tempdir().expect("tempdir");
        let mut config = FileStoreConfig::new(dir.path());
        config.rotate_bytes = 10;
        let store = FileCoordinationStore::open(&config).expect("opens");

        for index in 0..5 {
            let entry = JournalEntry {
                timestamp: index,
                instance: instance("alpha"),
                tool: "exec".to_string(),
                tier: Tier::Internal,
                rule_name: RuleName::new("rule"),
                context_key: None,
                action: Action::Intercept,
                params_digest: None,
                conflict_note: None,
            };
            store.append_journal(entry).expect("appends");
        }

        assert!(dir.path().join("journal").exists());
        assert!(dir.path().join("journal.1").exists());
    }

    #[test]
    fn find_recent_on_key_scans_the_current_journal() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(dir.path());
        let alpha = instance("alpha");
        let k = key("email:alice@example.com");
        let entry = JournalEntry {
            timestamp: 0,
            instance: alpha.clone(),
            tool: "exec".to_string(),
            tier: Tier::Commitment,
            rule_name: RuleName::new("email-send"),
            context_key: Some(k.clone()),
            action: Action::Complete,
            params_digest: None,
            conflict_note: None,
        };
        store.append_journal(entry).expect("appends");

        let found = store.find_recent_on_key(&k, &instance("beta"), 500, 1_000, true).expect("scans");
        assert!(found.is_some());
    }

    #[test]
    fn recent_journal_spans_a_rotation_archive() {
        let dir = tempdir().expect("tempdir");
        let mut config = FileStoreConfig::new(dir.path());
        config.rotate_bytes = 10;
        let store = FileCoordinationStore::open(&config).expect("opens");

        for index in 0..5 {
            let entry = JournalEntry {
                timestamp: index,
                instance: instance("alpha"),
                tool: "exec".to_string(),
                tier: Tier::Internal,
                rule_name: RuleName::new("rule"),
                context_key: None,
                action: Action::Intercept,
                params_digest: None,
                conflict_note: None,
            };
            store.append_journal(entry).expect("appends");
        }
        assert!(dir.path().join("journal.1").exists());

        let entries = store.recent_journal(5).expect("reads");
        assert_eq!(entries.len(), 5);
        assert_eq!(entries.first().expect("has entry").timestamp, 0);
        assert_eq!(entries.last().expect("has entry").timestamp, 4);
    }

    #[test]
    fn check_conflict_never_flags_the_caller_own_context_record() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(dir.path());
        let alpha = instance("alpha");
        let k = key("channel:andy");
        store
            .record_context(ContextRecord { instance: alpha.clone(), context_key: k.clone(), tier: Tier::Routine, timestamp: 0, tool: "message".to_string() })
            .expect("records");

        let conflict = store.check_conflict(&k, &alpha, Tier::Commitment, 10, 1_000).expect("checks");
        assert_eq!(conflict, Conflict::None);
    }

    #[test]
    fn two_separate_handles_over_the_same_directory_contend_on_the_same_lock() {
        let dir = tempdir().expect("tempdir");
        let handle_a = open_store(dir.path());
        let handle_b = open_store(dir.path());
        let alpha = instance("alpha");
        let beta = instance("beta");
        let k = key("message:channel-delete");

        assert!(handle_a.acquire_lock(&k, &alpha, Tier::Irreversible, 0, 1_000).expect("first handle acquires"));
        assert!(!handle_b.acquire_lock(&k, &beta, Tier::Irreversible, 0, 1_000).expect("second handle sees the lock"));

        handle_a.release_lock(&k, &alpha).expect("first handle releases");
        assert!(handle_b.acquire_lock(&k, &beta, Tier::Irreversible, 10, 1_000).expect("second handle acquires once freed"));
    }
}
