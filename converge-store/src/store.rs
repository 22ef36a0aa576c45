//! Transactional store facade
//!
//! The public contract of the ledger: append, filtered reads,
//! counters, snapshot and load. Writers to a context are serialized by
//! a per-context critical section around the counter+clock
//! read-modify-write and the entry write; reads go straight to the
//! backend's consistent snapshot and never block writers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use converge_model::{hasher, Clock, Entry, LamportClock, SystemClock};
use parking_lot::Mutex;
use tracing::debug;

use crate::durable::RedbBackend;
use crate::error::LedgerError;
use crate::memory::MemoryBackend;
use crate::snapshot::{self, Snapshot};
use crate::tables::{TableBackend, TableError};
use crate::watch::{WatchHandle, WatchRegistry};

/// Default per-entry payload cap (4 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4 * 1024 * 1024;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub max_payload_bytes: usize,
    /// Deadline for acquiring a context's write lock; exceeding it
    /// fails the operation instead of blocking indefinitely.
    pub lock_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// Read filters; all optional and composed with AND.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Exact key match; `None` matches every key.
    pub key: Option<String>,
    /// Only entries with sequence strictly greater than this.
    pub after_sequence: u64,
    /// Cap on returned entries; 0 means no cap.
    pub limit: u64,
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub fail_if_exists: bool,
    pub verify_integrity: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            fail_if_exists: false,
            verify_integrity: true,
        }
    }
}

/// The append-only context store.
pub struct LedgerStore {
    backend: Arc<dyn TableBackend>,
    watch: Arc<WatchRegistry>,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    context_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LedgerStore {
    pub fn new(backend: Arc<dyn TableBackend>, config: StoreConfig) -> Self {
        Self {
            backend,
            watch: Arc::new(WatchRegistry::new()),
            config,
            clock: Arc::new(SystemClock),
            context_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Non-durable store over the in-memory table set.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), StoreConfig::default())
    }

    /// Durable store over redb tables in `dir`.
    pub fn open(dir: impl AsRef<Path>, config: StoreConfig) -> Result<Self, TableError> {
        Ok(Self::new(Arc::new(RedbBackend::open(dir)?), config))
    }

    /// Replace the wall clock (for deterministic tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Append an entry to a context. Returns the committed entry.
    pub fn append(
        &self,
        context_id: &str,
        key: &str,
        payload: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<Entry, LedgerError> {
        self.append_inner(context_id, key, payload, metadata, None)
    }

    /// Append with a remote Lamport time: the context clock advances to
    /// `max(local, received) + 1`.
    pub fn append_with_received_time(
        &self,
        context_id: &str,
        key: &str,
        payload: Vec<u8>,
        received: u64,
        metadata: HashMap<String, String>,
    ) -> Result<Entry, LedgerError> {
        self.append_inner(context_id, key, payload, metadata, Some(received))
    }

    fn append_inner(
        &self,
        context_id: &str,
        key: &str,
        payload: Vec<u8>,
        metadata: HashMap<String, String>,
        received: Option<u64>,
    ) -> Result<Entry, LedgerError> {
        if context_id.is_empty() {
            return Err(LedgerError::InvalidContextId);
        }
        if payload.len() > self.config.max_payload_bytes {
            return Err(LedgerError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_bytes,
            });
        }

        let lock = self.context_lock(context_id);
        let _guard = lock
            .try_lock_for(self.config.lock_timeout)
            .ok_or(LedgerError::LockTimeout(self.config.lock_timeout))?;

        let sequence = self
            .backend
            .sequence(context_id)
            .map_err(|e| LedgerError::SequenceFailed(e.to_string()))?
            + 1;
        let mut clock = LamportClock::at(
            self.backend
                .lamport_time(context_id)
                .map_err(|e| LedgerError::LamportTimeFailed(e.to_string()))?,
        );
        let lamport = match received {
            Some(received) => clock.update(received),
            None => clock.tick(),
        };

        let entry = Entry::new(
            context_id.to_string(),
            key.to_string(),
            payload,
            metadata,
            sequence,
            lamport,
            self.clock.now_ns(),
        );
        self.backend
            .commit_entry(&entry)
            .map_err(|e| LedgerError::AppendFailed(e.to_string()))?;

        // Notify while the context lock is held so every subscriber's
        // queue sees commit order; delivery itself never blocks.
        self.watch.notify(&entry);

        debug!(context_id, sequence, lamport, "appended entry");
        Ok(entry)
    }

    /// Filtered, paginated read. Returns entries in ascending sequence
    /// order plus the context's current sequence counter (regardless of
    /// filters; 0 for an unknown context).
    pub fn get(
        &self,
        context_id: &str,
        options: GetOptions,
    ) -> Result<(Vec<Entry>, u64), LedgerError> {
        if context_id.is_empty() {
            return Err(LedgerError::InvalidContextId);
        }
        let (mut entries, latest) = self
            .backend
            .read_context(context_id, options.key.as_deref(), options.after_sequence)
            .map_err(|e| LedgerError::GetFailed(e.to_string()))?;
        if options.limit > 0 {
            entries.truncate(options.limit as usize);
        }
        Ok((entries, latest))
    }

    /// Current sequence counter; 0 for an unknown context. Never
    /// creates state.
    pub fn current_sequence(&self, context_id: &str) -> Result<u64, LedgerError> {
        self.backend
            .sequence(context_id)
            .map_err(|e| LedgerError::SequenceFailed(e.to_string()))
    }

    /// Current Lamport time; 0 for an unknown context. Never creates
    /// state.
    pub fn current_lamport_time(&self, context_id: &str) -> Result<u64, LedgerError> {
        self.backend
            .lamport_time(context_id)
            .map_err(|e| LedgerError::LamportTimeFailed(e.to_string()))
    }

    /// Serialize a context into a self-describing compressed blob with
    /// a Merkle root over its entry hashes.
    pub fn snapshot(&self, context_id: &str) -> Result<Snapshot, LedgerError> {
        if context_id.is_empty() {
            return Err(LedgerError::InvalidContextId);
        }
        let (entries, sequence) = self
            .backend
            .read_context(context_id, None, 0)
            .map_err(|e| LedgerError::SnapshotFailed(e.to_string()))?;
        snapshot::encode(context_id, &entries, sequence, self.clock.now_ns())
    }

    /// Restore a snapshot into `context_id`. Returns
    /// `(entries_restored, latest_sequence)`.
    ///
    /// When the target differs from the snapshot's source context, each
    /// entry gets a fresh id (ids stay globally unique) and a
    /// recomputed content hash (the hash covers the context id). The
    /// target's logical clock is left untouched: importing a causally
    /// later history does not advance local time.
    pub fn load(
        &self,
        context_id: &str,
        blob: &[u8],
        options: LoadOptions,
    ) -> Result<(u64, u64), LedgerError> {
        if context_id.is_empty() {
            return Err(LedgerError::InvalidContextId);
        }
        let decoded = snapshot::decode(blob)?;
        if options.verify_integrity {
            snapshot::verify_root(&decoded)?;
        }

        let lock = self.context_lock(context_id);
        let _guard = lock
            .try_lock_for(self.config.lock_timeout)
            .ok_or(LedgerError::LockTimeout(self.config.lock_timeout))?;

        if options.fail_if_exists {
            let existing = self
                .backend
                .sequence(context_id)
                .map_err(|e| LedgerError::SequenceFailed(e.to_string()))?;
            if existing > 0 {
                return Err(LedgerError::ContextAlreadyExists(context_id.to_string()));
            }
        }

        let mut entries = decoded.entries;
        if context_id != decoded.context_id {
            for entry in &mut entries {
                entry.rebind_context(context_id);
            }
        }
        // Never let the counter fall behind the imported rows, even if
        // the blob's own counter does.
        let source_sequence = decoded
            .sequence
            .max(entries.iter().map(|e| e.sequence).max().unwrap_or(0));

        let latest = self
            .backend
            .commit_import(context_id, &entries, source_sequence)
            .map_err(|e| LedgerError::LoadFailed(e.to_string()))?;

        debug!(
            context_id,
            restored = entries.len(),
            latest, "loaded snapshot"
        );
        Ok((entries.len() as u64, latest))
    }

    /// Recompute an entry's canonical hash and compare it against the
    /// stored one.
    pub fn verify_entry(&self, entry: &Entry) -> Result<(), LedgerError> {
        let computed = hasher::hash_entry(entry);
        if computed != entry.content_hash {
            return Err(LedgerError::HashMismatch {
                entry_id: entry.id.to_string(),
                stored: entry.content_hash,
                computed,
            });
        }
        Ok(())
    }

    /// Subscribe to entries committed to a context, optionally filtered
    /// to one key. Dropping the handle unsubscribes.
    pub fn subscribe(&self, context_id: &str, key_filter: Option<String>) -> WatchHandle {
        self.watch.subscribe(context_id, key_filter)
    }

    /// Number of live subscriptions on a context.
    pub fn subscriber_count(&self, context_id: &str) -> usize {
        self.watch.subscriber_count(context_id)
    }

    fn context_lock(&self, context_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.context_locks.lock();
        locks
            .entry(context_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
