//! # Local Key-Value Store
//!
//! Durable storage for keys, abilities and known delegation origins. The
//! protocol only ever needs five operations, so that is the whole trait:
//!
//! | Operation       | Meaning                                           |
//! |-----------------|---------------------------------------------------|
//! | `get`           | read one record                                   |
//! | `put`           | insert or overwrite one record                    |
//! | `delete`        | remove one record, absent is fine                 |
//! | `list_keys`     | every key in a store, sorted                      |
//! | `list_by_index` | records whose top-level field equals a value      |
//!
//! Records are JSON values. Each named store maps to its own sled tree in
//! [`SledStore`]; [`MemoryStore`] is the same thing in a `HashMap`, for
//! tests and ephemeral contexts.

use parking_lot::RwLock;
use serde_json::Value;
use sled::{Db, Tree};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use super::{StorageError, StorageResult};

/// A store of named collections of JSON records.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, store: &str, key: &str) -> StorageResult<Option<Value>>;
    fn put(&self, store: &str, key: &str, value: &Value) -> StorageResult<()>;
    fn delete(&self, store: &str, key: &str) -> StorageResult<()>;
    fn list_keys(&self, store: &str) -> StorageResult<Vec<String>>;
    fn list_by_index(&self, store: &str, index: &str, value: &Value) -> StorageResult<Vec<Value>>;
}

fn index_matches(record: &Value, index: &str, value: &Value) -> bool {
    record.get(index) == Some(value)
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory [`KeyValueStore`]. Nothing survives a drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    stores: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, store: &str, key: &str) -> StorageResult<Option<Value>> {
        Ok(self
            .stores
            .read()
            .get(store)
            .and_then(|s| s.get(key))
            .cloned())
    }

    fn put(&self, store: &str, key: &str, value: &Value) -> StorageResult<()> {
        self.stores
            .write()
            .entry(store.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, store: &str, key: &str) -> StorageResult<()> {
        if let Some(s) = self.stores.write().get_mut(store) {
            s.remove(key);
        }
        Ok(())
    }

    fn list_keys(&self, store: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .stores
            .read()
            .get(store)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn list_by_index(&self, store: &str, index: &str, value: &Value) -> StorageResult<Vec<Value>> {
        Ok(self
            .stores
            .read()
            .get(store)
            .map(|s| {
                s.values()
                    .filter(|r| index_matches(r, index, value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// SledStore
// ---------------------------------------------------------------------------

/// sled-backed [`KeyValueStore`]. One tree per named store, prefixed so the
/// trees cannot collide with the blockstore's.
///
/// sled is thread-safe; share a `SledStore` through an `Arc` without extra
/// locking.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
}

impl SledStore {
    /// Open or create a store at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Ok(Self::from_db(sled::open(path)?))
    }

    /// A store that is deleted when dropped.
    pub fn open_temporary() -> StorageResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::from_db(db))
    }

    /// Wrap an already-open database, e.g. one shared with a
    /// [`Blockstore`](super::Blockstore).
    pub fn from_db(db: Db) -> Self {
        Self { db }
    }

    fn tree(&self, store: &str) -> StorageResult<Tree> {
        Ok(self.db.open_tree(format!("kv/{store}"))?)
    }

    fn decode(bytes: &[u8]) -> StorageResult<Value> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, store: &str, key: &str) -> StorageResult<Option<Value>> {
        match self.tree(store)?.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, store: &str, key: &str, value: &Value) -> StorageResult<()> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let tree = self.tree(store)?;
        tree.insert(key.as_bytes(), bytes)?;
        tree.flush()?;
        Ok(())
    }

    fn delete(&self, store: &str, key: &str) -> StorageResult<()> {
        let tree = self.tree(store)?;
        tree.remove(key.as_bytes())?;
        tree.flush()?;
        Ok(())
    }

    fn list_keys(&self, store: &str) -> StorageResult<Vec<String>> {
        self.tree(store)?
            .iter()
            .keys()
            .map(|k| {
                let k = k?;
                String::from_utf8(k.to_vec())
                    .map_err(|e| StorageError::Serialization(e.to_string()))
            })
            .collect()
    }

    fn list_by_index(&self, store: &str, index: &str, value: &Value) -> StorageResult<Vec<Value>> {
        let mut out = Vec::new();
        for entry in self.tree(store)?.iter().values() {
            let record = Self::decode(&entry?)?;
            if index_matches(&record, index, value) {
                out.push(record);
            }
        }
        Ok(out)
    }
}
