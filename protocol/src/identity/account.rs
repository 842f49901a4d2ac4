//! # Local Account
//!
//! The one identity a context owns: its keypair, loaded from and saved to
//! the `keys` store, plus the flows that create and update the account's
//! home document.
//!
//! ## createAccount
//!
//! ```text
//!   keypair (P-256) ──> genesis Change (ts=0)
//!                        └─> home Change (depth=1, deps=[genesis],
//!                                          SetAttributes name [+ icon])
//!                             └─> Ref (generation=1, heads=[home])
//! ```
//!
//! All blocks are built and signed first, then submitted, and only then is
//! the key persisted. A failure anywhere leaves no stored identity behind.

use cid::Cid;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use super::principal::Principal;
use crate::blob::{
    encode_raw, sign_and_encode, AttrValue, Change, DocumentOperation, EncodedBlob, Profile,
    ProfileFields, Ref,
};
use crate::chain::{publish_change, ChangeChain, PublishTarget, PublishedChange};
use crate::config::{KEYS_STORE, LOCAL_KEY_NAME};
use crate::context::Context;
use crate::crypto::keys::{KeyPair, KeyType, StoredKey};
use crate::error::{Error, Result};
use crate::storage::{Block, KeyValueStore, StorageError};

/// The keypair a context signs with, and the principal derived from it.
pub struct LocalIdentity {
    keypair: KeyPair,
    principal: Principal,
}

impl LocalIdentity {
    pub fn new(keypair: KeyPair) -> Self {
        let principal = keypair.principal();
        Self { keypair, principal }
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// The account identifier in text form.
    pub fn account_id(&self) -> String {
        self.principal.to_string()
    }
}

impl fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalIdentity({})", self.principal)
    }
}

// ---------------------------------------------------------------------------
// Key persistence
// ---------------------------------------------------------------------------

/// Read the stored local key, if any.
pub fn load_identity(store: &dyn KeyValueStore) -> Result<Option<LocalIdentity>> {
    let Some(value) = store.get(KEYS_STORE, LOCAL_KEY_NAME)? else {
        return Ok(None);
    };
    let stored: StoredKey = serde_json::from_value(value)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(Some(LocalIdentity::new(KeyPair::from_stored(&stored)?)))
}

fn save_identity(store: &dyn KeyValueStore, identity: &LocalIdentity) -> Result<()> {
    let value = serde_json::to_value(identity.keypair.to_stored())
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    store.put(KEYS_STORE, LOCAL_KEY_NAME, &value)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Account creation
// ---------------------------------------------------------------------------

/// Everything `create_account` produced.
#[derive(Debug, Clone)]
pub struct CreatedAccount {
    pub identity: Arc<LocalIdentity>,
    pub genesis: EncodedBlob<Change>,
    pub home: EncodedBlob<Change>,
    pub reference: EncodedBlob<Ref>,
    pub icon: Option<Block>,
}

impl CreatedAccount {
    pub fn blocks(&self) -> Vec<Block> {
        let mut blocks = vec![
            self.genesis.to_block(),
            self.home.to_block(),
            self.reference.to_block(),
        ];
        if let Some(icon) = &self.icon {
            blocks.push(icon.clone());
        }
        blocks
    }
}

fn icon_attribute(icon: &Block) -> DocumentOperation {
    DocumentOperation::set_attribute("icon", AttrValue::Text(format!("ipfs://{}", icon.cid)))
}

/// Generate a new P-256 identity and publish its home document.
pub async fn create_account(ctx: &Context, name: &str, icon: Option<Vec<u8>>) -> Result<CreatedAccount> {
    let _creating = ctx.account_guard().lock().await;
    if ctx.identity()?.is_some() {
        return Err(Error::AccountExists);
    }

    let identity = Arc::new(LocalIdentity::new(KeyPair::generate(KeyType::P256)));
    let chain = ChangeChain::new(identity.keypair(), ctx.clock());

    let icon = icon.map(encode_raw).transpose()?;
    let genesis = chain.create_genesis_change()?;

    let mut ops = vec![DocumentOperation::set_attribute("name", name.into())];
    if let Some(icon) = &icon {
        ops.push(icon_attribute(icon));
    }
    let home = chain.create_change(genesis.cid, vec![genesis.cid], 1, ops)?;
    let reference = chain.create_ref(genesis.cid, home.cid, 1, None, None)?;

    let created = CreatedAccount {
        identity: identity.clone(),
        genesis,
        home,
        reference,
        icon,
    };
    ctx.submitter().submit(&created.blocks()).await?;

    save_identity(ctx.store().as_ref(), &identity)?;
    ctx.cache_identity(identity.clone());
    info!(account = %identity.principal(), "account created");
    Ok(created)
}

/// Drop the local identity. Published blobs are unaffected.
pub fn logout(ctx: &Context) -> Result<()> {
    let had = ctx.identity()?;
    ctx.store().delete(KEYS_STORE, LOCAL_KEY_NAME)?;
    ctx.forget_identity();
    if let Some(identity) = had {
        info!(account = %identity.principal(), "logged out");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Profile updates
// ---------------------------------------------------------------------------

/// Current state of a home document: which account owns it, its genesis,
/// and the heads to build on.
#[derive(Debug, Clone)]
pub struct HomeDocument {
    pub account: Principal,
    pub genesis: Cid,
    pub heads: Vec<Cid>,
}

/// Fields to change. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub icon: Option<Vec<u8>>,
    pub description: Option<String>,
}

/// Publish a change to a home document and a ref for it. The ref names the
/// document's account as `space`, which is dropped when that is us.
pub async fn update_profile(
    ctx: &Context,
    document: &HomeDocument,
    update: ProfileUpdate,
) -> Result<PublishedChange> {
    let identity = ctx.require_identity()?;
    let icon = update.icon.map(encode_raw).transpose()?;

    let mut ops = Vec::new();
    if let Some(name) = &update.name {
        ops.push(DocumentOperation::set_attribute("name", name.as_str().into()));
    }
    if let Some(description) = &update.description {
        ops.push(DocumentOperation::set_attribute("summary", description.as_str().into()));
    }
    if let Some(icon) = &icon {
        ops.push(icon_attribute(icon));
    }
    if ops.is_empty() {
        warn!(account = %document.account, "profile update with no fields");
    }

    if let Some(icon) = &icon {
        ctx.submitter().submit(std::slice::from_ref(icon)).await?;
    }

    let chain = ChangeChain::new(identity.keypair(), ctx.clock());
    publish_change(
        &chain,
        ctx.fetcher(),
        ctx.submitter(),
        document.genesis,
        document.heads.clone(),
        ops,
        PublishTarget {
            space: Some(&document.account),
            path: None,
        },
    )
    .await
}

/// Sign and submit a Profile blob describing `account` (or ourselves).
pub async fn publish_profile(
    ctx: &Context,
    fields: ProfileFields,
    account: Option<Principal>,
) -> Result<EncodedBlob<Profile>> {
    let identity = ctx.require_identity()?;
    let profile = Profile::new(identity.principal().clone(), fields, account, ctx.now_ms());
    let encoded = sign_and_encode(identity.keypair(), profile)?;
    ctx.submitter().submit(&[encoded.to_block()]).await?;
    Ok(encoded)
}
