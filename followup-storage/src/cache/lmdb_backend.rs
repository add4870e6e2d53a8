//! LMDB-backed cache backend.
//!
//! Uses the heed crate (Rust bindings for LMDB) as a memory-mapped key-value
//! store shared by every request of one process. Entries carry their own
//! expiry and are purged lazily on read or by [`LmdbCacheBackend::purge_expired`].
//!
//! LMDB calls block, so every operation runs on tokio's blocking pool and
//! the caller's timeout can still fire while a transaction waits for the
//! writer lock.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use followup_core::CacheError;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::traits::{CacheBackend, CacheResult, CacheStats};

/// Error type for opening the LMDB environment.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::Unavailable {
            reason: e.to_string(),
        }
    }
}

fn txn_error(e: heed::Error) -> CacheError {
    CacheError::Backend {
        reason: e.to_string(),
    }
}

/// Length of the expiry header in front of every stored value.
const HEADER_LEN: usize = 8;

fn encode_entry(expires_at_millis: i64, value: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + value.len());
    bytes.extend_from_slice(&expires_at_millis.to_le_bytes());
    bytes.extend_from_slice(value);
    bytes
}

/// Split a stored entry into its expiry (unix millis) and payload.
fn decode_entry(bytes: &[u8]) -> Option<(i64, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return None;
    }
    let header: [u8; HEADER_LEN] = bytes[..HEADER_LEN].try_into().ok()?;
    Some((i64::from_le_bytes(header), &bytes[HEADER_LEN..]))
}

/// LMDB cache backend.
///
/// # Example
///
/// ```ignore
/// use followup_storage::cache::LmdbCacheBackend;
///
/// let backend = LmdbCacheBackend::new("/var/cache/followup", 64)?;
/// backend.set("tenant:external_id:T1", b"{}", Duration::from_secs(300)).await?;
/// ```
#[derive(Clone)]
pub struct LmdbCacheBackend {
    inner: Arc<LmdbStore>,
}

/// Environment, database handle and counters shared with blocking tasks.
struct LmdbStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    stats: RwLock<CacheStats>,
}

impl LmdbCacheBackend {
    /// Open (or create) an LMDB environment at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the
    /// environment/database cannot be opened.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let entry_count = {
            let rtxn = env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            db.len(&rtxn)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
        };

        Ok(Self {
            inner: Arc::new(LmdbStore {
                env,
                db,
                stats: RwLock::new(CacheStats {
                    entry_count,
                    ..Default::default()
                }),
            }),
        })
    }

    /// Run `op` against the store on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&LmdbStore) -> CacheResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| CacheError::Backend {
                reason: format!("lmdb task failed: {e}"),
            })?
    }

    /// Drop every expired entry. Returns the number removed.
    pub async fn purge_expired(&self) -> CacheResult<u64> {
        self.blocking(LmdbStore::purge_expired).await
    }
}

impl LmdbStore {
    fn with_stats(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }

    fn read(&self, key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        Ok(self
            .db
            .get(&rtxn, key)
            .map_err(txn_error)?
            .map(|bytes| bytes.to_vec()))
    }

    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = Utc::now().timestamp_millis();
        let Some(bytes) = self.read(key.as_bytes())? else {
            self.with_stats(|s| s.misses += 1);
            return Ok(None);
        };

        match decode_entry(&bytes) {
            Some((expires_at, value)) if expires_at > now => {
                self.with_stats(|s| s.hits += 1);
                Ok(Some(value.to_vec()))
            }
            Some(_) => {
                self.remove_key(key.as_bytes())?;
                self.with_stats(|s| {
                    s.misses += 1;
                    s.expirations += 1;
                });
                Ok(None)
            }
            None => {
                self.remove_key(key.as_bytes())?;
                Err(CacheError::Serialization {
                    reason: format!("entry for {key} is shorter than its header"),
                })
            }
        }
    }

    fn set(&self, key: &str, entry: &[u8]) -> CacheResult<()> {
        let is_new = self.read(key.as_bytes())?.is_none();

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), entry)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        if is_new {
            self.with_stats(|s| s.entry_count += 1);
        }
        Ok(())
    }

    fn remove_key(&self, key: &[u8]) -> CacheResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self.db.delete(&mut wtxn, key).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        if deleted {
            self.with_stats(|s| s.entry_count = s.entry_count.saturating_sub(1));
        }
        Ok(deleted)
    }

    /// Collect keys for which `keep` returns true.
    fn collect_keys(&self, keep: impl Fn(&[u8], &[u8]) -> bool) -> CacheResult<Vec<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let mut keys = Vec::new();
        for result in self.db.iter(&rtxn).map_err(txn_error)? {
            if let Ok((key, value)) = result {
                if keep(key, value) {
                    keys.push(key.to_vec());
                }
            }
        }
        Ok(keys)
    }

    fn remove_keys(&self, keys: &[Vec<u8>]) -> CacheResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut deleted = 0u64;
        for key in keys {
            if self.db.delete(&mut wtxn, key).map_err(txn_error)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;
        self.with_stats(|s| s.entry_count = s.entry_count.saturating_sub(deleted));
        Ok(deleted)
    }

    fn purge_expired(&self) -> CacheResult<u64> {
        let now = Utc::now().timestamp_millis();
        let expired = self.collect_keys(|_, value| {
            decode_entry(value).map_or(true, |(expires_at, _)| expires_at <= now)
        })?;
        let removed = self.remove_keys(&expired)?;
        self.with_stats(|s| s.expirations += removed);
        Ok(removed)
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    fn name(&self) -> &'static str {
        "lmdb"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let key = key.to_string();
        self.blocking(move |store| store.get(&key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_millis);
        let entry = encode_entry(expires_at, value);
        let key = key.to_string();
        self.blocking(move |store| store.set(&key, &entry)).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let key = key.as_bytes().to_vec();
        self.blocking(move |store| store.remove_key(&key)).await
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let prefix = prefix.as_bytes().to_vec();
        self.blocking(move |store| {
            let keys = store.collect_keys(|key, _| key.starts_with(&prefix))?;
            store.remove_keys(&keys)
        })
        .await
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        Ok(self
            .inner
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default())
    }
}
