//! Key-value store interface with watch semantics
//!
//! Records are hash-shaped (key → field → text). A transaction is opened
//! against a set of watched keys; commit fails with [`Error::Conflict`] if
//! any watched key changed after it was watched. Reads inside a
//! transaction see its own buffered writes.
//!
//! # Implementations
//!
//! - [`MemoryStore`] - versioned in-process map, used by tests and tools
//! - `RocksStore` - RocksDB optimistic transactions (feature `rocks`)

use crate::{
    error::{Error, Result},
    records::Record,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Open transaction against a store
pub trait KvTransaction {
    /// Every field of a record; a missing key is an empty record
    fn get_all(&mut self, key: &str) -> Result<Record>;

    /// One field of a record
    fn get_field(&mut self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self.get_all(key)?.remove(field))
    }

    /// Merge fields into a record, creating it if needed
    fn put_fields(&mut self, key: &str, fields: Record) -> Result<()>;

    /// Remove a record
    fn delete(&mut self, key: &str) -> Result<()>;

    /// Apply buffered writes atomically, or fail with a conflict
    fn commit(self: Box<Self>) -> Result<()>;
}

/// Transactional key-value store
pub trait KvStore: Send + Sync {
    /// Begin a transaction watching `keys`
    fn watch(&self, keys: &[String]) -> Result<Box<dyn KvTransaction + '_>>;
}

#[derive(Debug, Clone)]
struct Versioned {
    version: u64,
    record: Option<Record>,
}

#[derive(Debug, Default)]
struct MemoryState {
    clock: u64,
    entries: HashMap<String, Versioned>,
}

impl MemoryState {
    fn version(&self, key: &str) -> u64 {
        self.entries.get(key).map_or(0, |entry| entry.version)
    }

    fn record(&self, key: &str) -> Record {
        self.entries
            .get(key)
            .and_then(|entry| entry.record.clone())
            .unwrap_or_default()
    }
}

/// In-memory store with per-key versions
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed record, outside any transaction
    pub fn get_all(&self, key: &str) -> Record {
        self.state.read().record(key)
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.state
            .read()
            .entries
            .values()
            .filter(|entry| entry.record.is_some())
            .count()
    }

    /// No live records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryStore {
    fn watch(&self, keys: &[String]) -> Result<Box<dyn KvTransaction + '_>> {
        let state = self.state.read();
        let watched = keys
            .iter()
            .map(|key| (key.clone(), state.version(key)))
            .collect();
        Ok(Box::new(MemoryTransaction {
            store: self,
            watched,
            writes: BTreeMap::new(),
        }))
    }
}

struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    watched: HashMap<String, u64>,
    // None marks a deletion
    writes: BTreeMap<String, Option<Record>>,
}

impl KvTransaction for MemoryTransaction<'_> {
    fn get_all(&mut self, key: &str) -> Result<Record> {
        match self.writes.get(key) {
            Some(pending) => Ok(pending.clone().unwrap_or_default()),
            None => Ok(self.store.state.read().record(key)),
        }
    }

    fn put_fields(&mut self, key: &str, fields: Record) -> Result<()> {
        let mut record = self.get_all(key)?;
        record.extend(fields);
        self.writes.insert(key.to_string(), Some(record));
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.writes.insert(key.to_string(), None);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            store,
            watched,
            writes,
        } = *self;
        let mut state = store.state.write();
        for (key, seen) in &watched {
            if state.version(key) != *seen {
                return Err(Error::Conflict(format!("watched key {} changed", key)));
            }
        }
        for (key, record) in writes {
            state.clock += 1;
            let version = state.clock;
            state.entries.insert(key, Versioned { version, record });
        }
        Ok(())
    }
}

#[cfg(feature = "rocks")]
pub use rocks::RocksStore;

#[cfg(feature = "rocks")]
mod rocks {
    use super::{KvStore, KvTransaction};
    use crate::{
        error::{Error, Result},
        records::Record,
    };
    use rocksdb::{MultiThreaded, OptimisticTransactionDB, Options, Transaction};
    use std::path::{Path, PathBuf};

    type Db = OptimisticTransactionDB<MultiThreaded>;

    /// RocksDB-backed store; each key holds its record as JSON
    pub struct RocksStore {
        db: Db,
        path: PathBuf,
    }

    impl std::fmt::Debug for RocksStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RocksStore").field("path", &self.path).finish()
        }
    }

    impl RocksStore {
        /// Open or create database
        pub fn open(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            std::fs::create_dir_all(path)?;

            let mut opts = Options::default();
            opts.create_if_missing(true);
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

            let db = Db::open(&opts, path)?;
            tracing::info!(path = ?path, "Opened RocksDB store");
            Ok(Self {
                db,
                path: path.to_path_buf(),
            })
        }
    }

    impl KvStore for RocksStore {
        fn watch(&self, keys: &[String]) -> Result<Box<dyn KvTransaction + '_>> {
            let txn = self.db.transaction();
            // Tracking a key for conflict detection starts at get_for_update
            for key in keys {
                txn.get_for_update(key.as_bytes(), true)?;
            }
            Ok(Box::new(RocksTransaction { txn }))
        }
    }

    struct RocksTransaction<'db> {
        txn: Transaction<'db, Db>,
    }

    fn decode(key: &str, raw: Option<Vec<u8>>) -> Result<Record> {
        match raw {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::InvalidData(format!("record {}: {}", key, e))),
            None => Ok(Record::new()),
        }
    }

    impl KvTransaction for RocksTransaction<'_> {
        fn get_all(&mut self, key: &str) -> Result<Record> {
            let raw = self.txn.get(key.as_bytes())?;
            decode(key, raw)
        }

        fn put_fields(&mut self, key: &str, fields: Record) -> Result<()> {
            let mut record = self.get_all(key)?;
            record.extend(fields);
            self.txn.put(key.as_bytes(), serde_json::to_vec(&record)?)?;
            Ok(())
        }

        fn delete(&mut self, key: &str) -> Result<()> {
            self.txn.delete(key.as_bytes())?;
            Ok(())
        }

        fn commit(self: Box<Self>) -> Result<()> {
            let this = *self;
            this.txn.commit()?;
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use tempfile::TempDir;

        fn fields(pairs: &[(&str, &str)]) -> Record {
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
        }

        #[test]
        fn test_put_merge_and_read_back() {
            let dir = TempDir::new().unwrap();
            let store = RocksStore::open(dir.path()).unwrap();

            let mut txn = store.watch(&[]).unwrap();
            txn.put_fields("prices", fields(&[("USD", "1")])).unwrap();
            txn.put_fields("prices", fields(&[("EUR", "2")])).unwrap();
            assert_eq!(txn.get_field("prices", "USD").unwrap().as_deref(), Some("1"));
            txn.commit().unwrap();

            let mut txn = store.watch(&[]).unwrap();
            assert_eq!(txn.get_all("prices").unwrap().len(), 2);
        }

        #[test]
        fn test_watched_write_conflicts() {
            let dir = TempDir::new().unwrap();
            let store = RocksStore::open(dir.path()).unwrap();
            let key = vec!["positions".to_string()];

            let mut first = store.watch(&key).unwrap();
            let mut second = store.watch(&key).unwrap();
            second.put_fields("positions", fields(&[("module", "{}")])).unwrap();
            second.commit().unwrap();

            first.put_fields("positions", fields(&[("module", "{\"x\":1}")])).unwrap();
            let err = first.commit().unwrap_err();
            assert!(err.is_retryable());
        }
    }
}
