//! # Storage Module
//!
//! Local persistence for an identity context.
//!
//! ```text
//! kv.rs          keys, abilities, delegation origins (JSON records)
//! blockstore.rs  content-addressed blobs and raw blocks
//! ```
//!
//! Both have a sled implementation for real use and an in-memory one for
//! tests. A single sled database can back both: the KV store uses
//! `kv/<store>` trees, the blockstore uses `blocks`.

pub mod blockstore;
pub mod kv;

pub use blockstore::{BlobFetcher, BlobSubmitter, Block, Blockstore};
pub use kv::{KeyValueStore, MemoryStore, SledStore};

/// Errors that can occur in either store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("block content does not match {0}")]
    ContentMismatch(String),

    #[error("remote store error: {0}")]
    Remote(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
