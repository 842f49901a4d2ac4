//! # Context
//!
//! Everything an identity session needs, passed explicitly instead of held
//! in globals: configuration, a clock, the local key-value store, a block
//! fetcher and submitter, and the cached local identity.
//!
//! Several contexts can live in one process. Tests do exactly that to run
//! both sides of a handshake, or a delegate and its provider, side by side.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::ProtocolConfig;
use crate::error::{Error, Result};
use crate::identity::account::{load_identity, LocalIdentity};
use crate::storage::{BlobFetcher, BlobSubmitter, Blockstore, KeyValueStore, MemoryStore};

pub struct Context {
    config: ProtocolConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,
    fetcher: Arc<dyn BlobFetcher>,
    submitter: Arc<dyn BlobSubmitter>,
    identity: RwLock<Option<Arc<LocalIdentity>>>,
    link_guard: tokio::sync::Mutex<()>,
    account_guard: tokio::sync::Mutex<()>,
}

impl Context {
    pub fn new(
        config: ProtocolConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn KeyValueStore>,
        fetcher: Arc<dyn BlobFetcher>,
        submitter: Arc<dyn BlobSubmitter>,
    ) -> Self {
        Self {
            config,
            clock,
            store,
            fetcher,
            submitter,
            identity: RwLock::new(None),
            link_guard: tokio::sync::Mutex::new(()),
            account_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// A context over a local key-value store and blockstore, the blockstore
    /// serving as both fetcher and submitter.
    pub fn local(
        config: ProtocolConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn KeyValueStore>,
        blocks: Arc<Blockstore>,
    ) -> Self {
        Self::new(config, clock, store, blocks.clone(), blocks)
    }

    /// Fully in-memory context on the system clock.
    pub fn in_memory() -> Self {
        Self::local(
            ProtocolConfig::default(),
            Arc::new(SystemClock),
            Arc::new(MemoryStore::new()),
            Arc::new(Blockstore::in_memory()),
        )
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn fetcher(&self) -> &dyn BlobFetcher {
        self.fetcher.as_ref()
    }

    pub fn submitter(&self) -> &dyn BlobSubmitter {
        self.submitter.as_ref()
    }

    /// The local identity, loading it from the key store on first use.
    pub fn identity(&self) -> Result<Option<Arc<LocalIdentity>>> {
        if let Some(identity) = self.identity.read().as_ref() {
            return Ok(Some(identity.clone()));
        }
        let loaded = load_identity(self.store.as_ref())?.map(Arc::new);
        if let Some(identity) = &loaded {
            *self.identity.write() = Some(identity.clone());
        }
        Ok(loaded)
    }

    /// The local identity, or [`Error::NoIdentity`].
    pub fn require_identity(&self) -> Result<Arc<LocalIdentity>> {
        self.identity()?.ok_or(Error::NoIdentity)
    }

    pub(crate) fn cache_identity(&self, identity: Arc<LocalIdentity>) {
        *self.identity.write() = Some(identity);
    }

    pub(crate) fn forget_identity(&self) {
        *self.identity.write() = None;
    }

    /// Held for the duration of a device link joined from this context.
    pub(crate) fn link_guard(&self) -> &tokio::sync::Mutex<()> {
        &self.link_guard
    }

    /// Held by account creation from the "no identity" check until the new
    /// key is saved.
    pub(crate) fn account_guard(&self) -> &tokio::sync::Mutex<()> {
        &self.account_guard
    }
}
