//! # Blockstore
//!
//! Content-addressed storage for signed blobs and raw blocks. Keys are CID
//! bytes, values are the exact bytes the CID hashes.
//!
//! Two properties hold for every write:
//!
//! 1. **Verified.** A block whose bytes do not hash to its CID is refused.
//! 2. **Idempotent.** Writing a block that is already present is a no-op,
//!    so submission can be retried per CID without coordination.
//!
//! The [`BlobFetcher`] and [`BlobSubmitter`] traits are the seams the change
//! chain and device linking talk to. A local [`Blockstore`] implements both;
//! a remote submission endpoint would implement them over HTTP.

use async_trait::async_trait;
use cid::Cid;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use super::{StorageError, StorageResult};
use crate::crypto::hash::cid_matches;

/// Bytes plus the address they hash to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub cid: Cid,
    pub data: Vec<u8>,
}

/// Reads blocks by address.
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    /// `Ok(None)` means "not found here", not failure.
    async fn fetch(&self, cid: &Cid) -> StorageResult<Option<Vec<u8>>>;
}

/// Accepts blocks for storage or publication.
#[async_trait]
pub trait BlobSubmitter: Send + Sync {
    /// Store every block. Already-present blocks are not an error.
    async fn submit(&self, blocks: &[Block]) -> StorageResult<()>;
}

enum Backend {
    Sled(sled::Tree),
    Memory(RwLock<HashMap<Cid, Vec<u8>>>),
}

/// Local content-addressed block storage.
pub struct Blockstore {
    backend: Backend,
}

impl Blockstore {
    /// Open or create a sled-backed blockstore at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Self::from_db(&sled::open(path)?)
    }

    /// Use the `blocks` tree of an already-open database.
    pub fn from_db(db: &sled::Db) -> StorageResult<Self> {
        Ok(Self {
            backend: Backend::Sled(db.open_tree("blocks")?),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(RwLock::new(HashMap::new())),
        }
    }

    /// Store a block after checking its address. Returns `true` if the
    /// block was new.
    pub fn put(&self, block: &Block) -> StorageResult<bool> {
        if !cid_matches(&block.cid, &block.data) {
            return Err(StorageError::ContentMismatch(block.cid.to_string()));
        }
        let inserted = match &self.backend {
            Backend::Sled(tree) => {
                let key = block.cid.to_bytes();
                if tree.contains_key(&key)? {
                    false
                } else {
                    tree.insert(key, block.data.as_slice())?;
                    true
                }
            }
            Backend::Memory(map) => {
                let mut map = map.write();
                if map.contains_key(&block.cid) {
                    false
                } else {
                    map.insert(block.cid, block.data.clone());
                    true
                }
            }
        };
        if inserted {
            debug!(cid = %block.cid, bytes = block.data.len(), "stored block");
        }
        Ok(inserted)
    }

    pub fn get(&self, cid: &Cid) -> StorageResult<Option<Vec<u8>>> {
        match &self.backend {
            Backend::Sled(tree) => Ok(tree.get(cid.to_bytes())?.map(|v| v.to_vec())),
            Backend::Memory(map) => Ok(map.read().get(cid).cloned()),
        }
    }

    pub fn has(&self, cid: &Cid) -> StorageResult<bool> {
        match &self.backend {
            Backend::Sled(tree) => Ok(tree.contains_key(cid.to_bytes())?),
            Backend::Memory(map) => Ok(map.read().contains_key(cid)),
        }
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        match &self.backend {
            Backend::Sled(tree) => tree.len(),
            Backend::Memory(map) => map.read().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush(&self) -> StorageResult<()> {
        if let Backend::Sled(tree) = &self.backend {
            tree.flush()?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlobFetcher for Blockstore {
    async fn fetch(&self, cid: &Cid) -> StorageResult<Option<Vec<u8>>> {
        self.get(cid)
    }
}

#[async_trait]
impl BlobSubmitter for Blockstore {
    async fn submit(&self, blocks: &[Block]) -> StorageResult<()> {
        for block in blocks {
            self.put(block)?;
        }
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::{dag_cbor_cid, raw_cid};

    fn block(data: &[u8]) -> Block {
        Block {
            cid: dag_cbor_cid(data).unwrap(),
            data: data.to_vec(),
        }
    }

    fn exercise(store: &Blockstore) {
        let b = block(b"\xa1\x61a\x01");
        assert!(!store.has(&b.cid).unwrap());
        assert!(store.put(&b).unwrap());
        assert!(!store.put(&b).unwrap(), "second write is a no-op");
        assert_eq!(store.get(&b.cid).unwrap(), Some(b.data.clone()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_blockstore() {
        exercise(&Blockstore::in_memory());
    }

    #[test]
    fn test_sled_blockstore() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&Blockstore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_rejects_mismatched_content() {
        let store = Blockstore::in_memory();
        let bad = Block {
            cid: raw_cid(b"one thing").unwrap(),
            data: b"another".to_vec(),
        };
        assert!(matches!(store.put(&bad), Err(StorageError::ContentMismatch(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_submit_is_idempotent() {
        let store = Blockstore::in_memory();
        let blocks = vec![block(b"x"), block(b"y")];
        store.submit(&blocks).await.unwrap();
        store.submit(&blocks).await.unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.fetch(&blocks[0].cid).await.unwrap().is_some());
    }
}
