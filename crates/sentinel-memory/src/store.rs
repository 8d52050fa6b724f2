//! Single-writer store with capacity purge and an expiration heap.

use crate::error::{MemoryError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest key (in bytes) accepted by [`SharedMemory::write`].
pub const MAX_KEY_LEN: usize = 256;

/// Upper bound on any TTL so absolute expiry never overflows `Instant`.
const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

/// Stale heap slots tolerated before the heap is rebuilt from the store.
const HEAP_SLACK: usize = 64;

/// Configuration for a [`SharedMemory`] instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum number of live entries.
    pub max_entries: usize,
    /// TTL applied when a write does not specify one.
    pub default_ttl_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            default_ttl_secs: 7 * 24 * 3600,
        }
    }
}

impl MemoryConfig {
    /// Creates a configuration with the given capacity and default TTL.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Self::default()
        }
    }

    /// Overrides the default TTL.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = ttl.as_secs();
        self
    }

    #[inline]
    fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    seq: u64,
    expires_at: Instant,
}

/// Live state. Only the writer thread mutates entries; sweeps and reads
/// take the same lock for a point-in-time view.
#[derive(Debug, Default)]
struct Store {
    entries: HashMap<String, Entry>,
    /// Creation sequence -> hashed key. First element is the oldest entry.
    creation: BTreeMap<u64, String>,
    /// Min-heap of (expiry, seq, key). May hold stale slots for keys that
    /// were rewritten or evicted; `seq` tells them apart.
    expiry: BinaryHeap<Reverse<(Instant, u64, String)>>,
    next_seq: u64,
    evicted: u64,
    expired: u64,
}

impl Store {
    fn put(&mut self, key: String, value: Value, expires_at: Instant, max_entries: usize) {
        if max_entries == 0 {
            return;
        }

        if let Some(previous) = self.entries.remove(&key) {
            self.creation.remove(&previous.seq);
        } else {
            while self.entries.len() >= max_entries && self.evict_oldest() {}
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        self.creation.insert(seq, key.clone());
        self.expiry.push(Reverse((expires_at, seq, key.clone())));
        self.entries.insert(
            key,
            Entry {
                value,
                seq,
                expires_at,
            },
        );

        self.compact_heap();
    }

    fn evict_oldest(&mut self) -> bool {
        match self.creation.pop_first() {
            Some((seq, key)) => {
                self.entries.remove(&key);
                self.evicted += 1;
                debug!(seq, "evicted oldest memory entry");
                true
            }
            None => false,
        }
    }

    fn get(&self, key: &str, now: Instant) -> Option<Value> {
        self.entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone())
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        loop {
            match self.expiry.peek() {
                Some(Reverse((at, _, _))) if *at <= now => {}
                _ => break,
            }
            if let Some(Reverse((_, seq, key))) = self.expiry.pop() {
                let live = self.entries.get(&key).is_some_and(|e| e.seq == seq);
                if live {
                    self.entries.remove(&key);
                    self.creation.remove(&seq);
                    self.expired += 1;
                }
            }
        }
        self.compact_heap();
        self.entries.len()
    }

    fn compact_heap(&mut self) {
        if self.expiry.len() > 2 * self.entries.len() + HEAP_SLACK {
            self.expiry = self
                .entries
                .iter()
                .map(|(key, entry)| Reverse((entry.expires_at, entry.seq, key.clone())))
                .collect();
        }
    }
}

#[derive(Debug)]
enum WriteOp {
    Put {
        key: String,
        value: Value,
        expires_at: Instant,
    },
    Barrier(mpsc::SyncSender<()>),
}

/// Shared, TTL-bounded key/value store.
///
/// Cloning is cheap and every clone talks to the same writer thread.
/// The writer exits once the last handle is dropped.
///
/// # Example
///
/// ```rust
/// use sentinel_memory::{MemoryConfig, SharedMemory};
/// use serde_json::json;
///
/// let memory = SharedMemory::new(MemoryConfig::new(2))?;
/// memory.write("a", json!(1), None)?;
/// memory.write("b", json!(2), None)?;
/// memory.write("c", json!(3), None)?;
/// memory.flush();
///
/// assert_eq!(memory.len(), 2);
/// assert_eq!(memory.read("a"), None);
/// # Ok::<(), sentinel_memory::MemoryError>(())
/// ```
#[derive(Debug, Clone)]
pub struct SharedMemory {
    store: Arc<Mutex<Store>>,
    queue: mpsc::Sender<WriteOp>,
    config: Arc<MemoryConfig>,
}

impl SharedMemory {
    /// Creates a store and starts its writer thread.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::WriterSpawn`] if the OS refuses the thread.
    pub fn new(config: MemoryConfig) -> Result<Self> {
        let store = Arc::new(Mutex::new(Store::default()));
        let (queue, rx) = mpsc::channel();

        let writer_store = Arc::clone(&store);
        let max_entries = config.max_entries;
        thread::Builder::new()
            .name("sentinel-memory-writer".to_string())
            .spawn(move || run_writer(rx, writer_store, max_entries))?;

        debug!(max_entries, "shared memory writer started");
        Ok(Self {
            store,
            queue,
            config: Arc::new(config),
        })
    }

    /// Enqueues a write. The value becomes visible once the writer applies
    /// it; call [`flush`](Self::flush) to wait for that. The TTL counts
    /// from this call, not from when the writer gets to it.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidKey`] for empty keys, keys longer than
    /// [`MAX_KEY_LEN`], or keys containing control characters.
    pub fn write(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        validate_key(key)?;
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl()).min(MAX_TTL);
        let op = WriteOp::Put {
            key: hash_key(key),
            value,
            expires_at: Instant::now() + ttl,
        };
        if self.queue.send(op).is_err() {
            warn!(key, "memory writer unavailable, write dropped");
        }
        Ok(())
    }

    /// Returns the current value for `key`, or `None` if absent, expired,
    /// or malformed.
    #[must_use]
    pub fn read(&self, key: &str) -> Option<Value> {
        if validate_key(key).is_err() {
            return None;
        }
        self.store.lock().get(&hash_key(key), Instant::now())
    }

    /// Blocks until every write enqueued before this call has been applied.
    pub fn flush(&self) {
        let (ack, done) = mpsc::sync_channel(1);
        if self.queue.send(WriteOp::Barrier(ack)).is_ok() {
            let _ = done.recv();
        }
    }

    /// Removes TTL-elapsed entries and returns the remaining size.
    pub fn purge_expired(&self) -> usize {
        let remaining = self.store.lock().purge_expired(Instant::now());
        debug!(remaining, "memory sweep complete");
        remaining
    }

    /// Number of stored entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    /// Returns true if the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries removed by capacity overflow since creation.
    #[must_use]
    pub fn evicted_count(&self) -> u64 {
        self.store.lock().evicted
    }

    /// Entries removed by TTL sweeps since creation.
    #[must_use]
    pub fn expired_count(&self) -> u64 {
        self.store.lock().expired
    }

    /// The configuration this store was built with.
    #[must_use]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }
}

fn run_writer(rx: mpsc::Receiver<WriteOp>, store: Arc<Mutex<Store>>, max_entries: usize) {
    for op in rx {
        match op {
            WriteOp::Put { key, value, expires_at } => store.lock().put(key, value, expires_at, max_entries),
            WriteOp::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("shared memory writer stopped");
}

fn validate_key(key: &str) -> Result<()> {
    let reason = if key.is_empty() {
        "empty key"
    } else if key.len() > MAX_KEY_LEN {
        "key too long"
    } else if key.chars().any(char::is_control) {
        "key contains control characters"
    } else {
        return Ok(());
    };
    Err(MemoryError::InvalidKey {
        reason: reason.to_string(),
    })
}

fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}
