//! # Change-Chain Engine
//!
//! Builds, signs and addresses the append-only history of one account, and
//! the Ref records that publish its heads.
//!
//! ```text
//!   genesis (ts=0) <── change (depth 1) <── change (depth 2) <── ...
//!        ^                  ^
//!        └── genesisBlob    └── heads ── Ref (generation == head depth)
//! ```
//!
//! Depth is `1 + max(depth of deps)` with genesis at depth 0. A missing
//! dependency is an error, never a silent zero: publishing on a guessed
//! depth would produce a ref whose generation cannot be checked.

use cid::Cid;
use tracing::{debug, info};

use crate::blob::{
    decode_blob, sign_and_encode, verify_blob, Change, DocumentOperation, EncodedBlob, Ref,
};
use crate::clock::Clock;
use crate::config::ProtocolConfig;
use crate::crypto::keys::KeyPair;
use crate::error::{Error, Result};
use crate::identity::principal::Principal;
use crate::storage::{BlobFetcher, BlobSubmitter, Block};

/// Signs changes and refs for one keypair.
pub struct ChangeChain<'a> {
    keypair: &'a KeyPair,
    clock: &'a dyn Clock,
}

impl<'a> ChangeChain<'a> {
    pub fn new(keypair: &'a KeyPair, clock: &'a dyn Clock) -> Self {
        Self { keypair, clock }
    }

    pub fn create_genesis_change(&self) -> Result<EncodedBlob<Change>> {
        sign_and_encode(self.keypair, Change::genesis(self.keypair.principal()))
    }

    pub fn create_change(
        &self,
        genesis: Cid,
        deps: Vec<Cid>,
        depth: u64,
        ops: Vec<DocumentOperation>,
    ) -> Result<EncodedBlob<Change>> {
        let change = Change::new(
            self.keypair.principal(),
            genesis,
            deps,
            depth,
            ops,
            self.clock.now_ms(),
        );
        sign_and_encode(self.keypair, change)
    }

    /// `space` is dropped when it is the signer; `path` is dropped when it
    /// is empty or root.
    pub fn create_ref(
        &self,
        genesis: Cid,
        head: Cid,
        generation: u64,
        space: Option<&Principal>,
        path: Option<&str>,
    ) -> Result<EncodedBlob<Ref>> {
        let reference = Ref::new(
            self.keypair.principal(),
            genesis,
            head,
            generation,
            self.clock.now_ms(),
            space.cloned(),
            path.map(str::to_string),
        );
        sign_and_encode(self.keypair, reference)
    }
}

// ---------------------------------------------------------------------------
// Depth
// ---------------------------------------------------------------------------

async fn fetch_change(fetcher: &dyn BlobFetcher, cid: &Cid) -> Result<Change> {
    let data = fetcher
        .fetch(cid)
        .await
        .map_err(|e| Error::DependencyUnavailable(format!("{cid}: {e}")))?
        .ok_or_else(|| Error::DependencyUnavailable(cid.to_string()))?;
    let blob: EncodedBlob<Change> = decode_blob(&data, cid)?;
    verify_blob(&blob.decoded)?;
    Ok(blob.decoded)
}

/// Highest recorded depth among `deps`. Genesis counts as 0, and so does an
/// empty list.
pub async fn max_dependency_depth(fetcher: &dyn BlobFetcher, deps: &[Cid]) -> Result<u64> {
    let mut max = 0;
    for cid in deps {
        let change = fetch_change(fetcher, cid).await?;
        max = max.max(change.depth_or_zero());
    }
    Ok(max)
}

/// Depth of a change built on `deps`: `1 + max_dependency_depth(deps)`.
pub async fn depth_of(fetcher: &dyn BlobFetcher, deps: &[Cid]) -> Result<u64> {
    Ok(max_dependency_depth(fetcher, deps).await? + 1)
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

/// A change and the ref that publishes it.
#[derive(Debug, Clone)]
pub struct PublishedChange {
    pub change: EncodedBlob<Change>,
    pub reference: EncodedBlob<Ref>,
}

impl PublishedChange {
    pub fn blocks(&self) -> Vec<Block> {
        vec![self.change.to_block(), self.reference.to_block()]
    }
}

/// Where a change is published.
#[derive(Debug, Clone, Default)]
pub struct PublishTarget<'a> {
    pub space: Option<&'a Principal>,
    pub path: Option<&'a str>,
}

/// Build a change on `deps`, a ref with `generation == depth`, and submit
/// both. Nothing is submitted unless both records were signed.
pub async fn publish_change(
    chain: &ChangeChain<'_>,
    fetcher: &dyn BlobFetcher,
    submitter: &dyn BlobSubmitter,
    genesis: Cid,
    deps: Vec<Cid>,
    ops: Vec<DocumentOperation>,
    target: PublishTarget<'_>,
) -> Result<PublishedChange> {
    let depth = depth_of(fetcher, &deps).await?;
    let change = chain.create_change(genesis, deps, depth, ops)?;
    let reference = chain.create_ref(genesis, change.cid, depth, target.space, target.path)?;
    let published = PublishedChange { change, reference };
    submitter.submit(&published.blocks()).await?;
    info!(
        change = %published.change.cid,
        reference = %published.reference.cid,
        depth,
        "published change"
    );
    Ok(published)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A ref must point at `head`, agree on genesis, and carry
/// `generation == head.depth`.
pub fn check_ref_generation(reference: &Ref, head: &EncodedBlob<Change>) -> Result<()> {
    if !reference.heads.contains(&head.cid) {
        return Err(Error::ContentMismatch(format!(
            "ref does not point at {}",
            head.cid
        )));
    }
    let expected_genesis = head.decoded.genesis.unwrap_or(head.cid);
    if reference.genesis_blob != expected_genesis {
        return Err(Error::ContentMismatch(format!(
            "ref genesis {} differs from head genesis {expected_genesis}",
            reference.genesis_blob
        )));
    }
    let depth = head.decoded.depth_or_zero();
    if reference.generation != depth {
        return Err(Error::ContentMismatch(format!(
            "ref generation {} differs from head depth {depth}",
            reference.generation
        )));
    }
    Ok(())
}

/// Generations strictly increase for one `(space, path)`.
pub fn check_generation_advances(previous: Option<&Ref>, next: &Ref) -> Result<()> {
    if let Some(prev) = previous {
        if prev.space() != next.space() || prev.path != next.path {
            return Err(Error::ContentMismatch("refs publish different locations".into()));
        }
        if next.generation <= prev.generation {
            debug!(prev = prev.generation, next = next.generation, "stale ref");
            return Err(Error::ContentMismatch(format!(
                "generation {} does not advance past {}",
                next.generation, prev.generation
            )));
        }
    }
    Ok(())
}

/// Reject signed actions whose timestamp is too old or too far ahead.
pub fn check_freshness(ts: u64, now_ms: u64, config: &ProtocolConfig) -> Result<()> {
    let max_age = config.freshness_max_age.as_millis() as u64;
    let skew = config.freshness_future_skew.as_millis() as u64;
    if ts.saturating_add(max_age) < now_ms || ts > now_ms.saturating_add(skew) {
        return Err(Error::TimestampOutOfWindow { ts });
    }
    Ok(())
}
