//! The two ends of the device-link conversation.
//!
//! ```text
//!   Joiner                                   Initiator
//!   ──────                                   ─────────
//!   secretToken ───────────────────────────>
//!   joiner principal ──────────────────────>  token ok? else close
//!                <───────────────────────── Capability(AGENT, ts = t0)
//!   Capability(AGENT, ts = t0+1) ──────────>
//!   Profile{alias}   (ts = t0+2) ──────────>  verify, store
//!                <───────────────────────── close
//! ```
//!
//! In the blob names the Joiner is the "browser" and the Initiator the
//! "app": `app_to_browser_cap` is the Initiator's grant.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::dial::{dial_candidates, select_candidates, LinkEvent};
use super::session::{generate_secret_token, ActiveSession, AddrInfo, DeviceLinkSession, LinkSessionStatus};
use crate::blob::{decode_signed, sign_and_encode, Capability, CapabilityRole, EncodedBlob, Profile};
use crate::chain::check_freshness;
use crate::config::{DEFAULT_LINKED_ACCOUNT_NAME, DEVICE_LINK_PROTOCOL_ID};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::identity::account::{create_account, logout, LocalIdentity};
use crate::identity::principal::Principal;
use crate::storage::Block;
use crate::transport::{ByteStream, Transport};

/// The three blobs a successful link produces, and the two accounts.
#[derive(Debug, Clone)]
pub struct LinkOutcome {
    /// Joiner account.
    pub browser_account_id: String,
    /// Initiator account.
    pub app_account_id: String,
    pub profile_alias: EncodedBlob<Profile>,
    pub browser_to_app_cap: EncodedBlob<Capability>,
    pub app_to_browser_cap: EncodedBlob<Capability>,
}

impl LinkOutcome {
    pub fn blocks(&self) -> Vec<Block> {
        vec![
            self.profile_alias.to_block(),
            self.browser_to_app_cap.to_block(),
            self.app_to_browser_cap.to_block(),
        ]
    }
}

fn abort(reason: impl Into<String>) -> Error {
    Error::HandshakeAborted(reason.into())
}

/// Checks a capability from `signer` to `delegate` with role AGENT.
fn check_agent_cap(cap: &Capability, signer: &Principal, delegate: &Principal) -> Result<()> {
    if cap.signer != *signer {
        return Err(abort("capability signed by unexpected key"));
    }
    if cap.delegate != *delegate {
        return Err(abort("capability delegates to unexpected key"));
    }
    if cap.role != CapabilityRole::Agent {
        return Err(abort(format!("capability role {} is not AGENT", cap.role)));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Initiator
// ---------------------------------------------------------------------------

/// Side that already holds an account and hands out sessions.
pub struct LinkInitiator {
    ctx: Arc<Context>,
    session: Mutex<Option<ActiveSession>>,
}

impl LinkInitiator {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            session: Mutex::new(None),
        }
    }

    /// Start a new session, replacing any previous one.
    pub fn create_session(&self, label: Option<String>, addr_info: AddrInfo) -> Result<DeviceLinkSession> {
        let identity = self.ctx.require_identity()?;
        let secret = generate_secret_token();
        let ttl = self.ctx.config().link_session_ttl.as_millis() as u64;
        let expires_at = self.ctx.now_ms() + ttl;

        *self.session.lock() = Some(ActiveSession {
            secret: secret.clone(),
            account: identity.principal().clone(),
            label,
            expires_at,
            redeemed_at: None,
        });
        info!(account = %identity.principal(), expires_at, "device link session created");

        Ok(DeviceLinkSession {
            account_id: identity.account_id(),
            secret_token: secret,
            addr_info,
        })
    }

    pub fn status(&self) -> Option<LinkSessionStatus> {
        self.session.lock().as_ref().map(ActiveSession::status)
    }

    /// Run the Initiator side on an accepted stream, then close it. A bad
    /// token closes the stream without writing anything.
    pub async fn handle(&self, stream: &mut dyn ByteStream) -> Result<LinkOutcome> {
        let result = self.run(stream).await;
        if let Err(e) = stream.close().await {
            debug!(error = %e, "close after link");
        }
        match &result {
            Ok(outcome) => info!(joiner = %outcome.browser_account_id, "device linked"),
            Err(e) => warn!(error = %e, "device link failed"),
        }
        result
    }

    fn redeem(&self, token: &[u8]) -> Result<(Option<String>, Principal)> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(Error::TokenRejected)?;
        session.redeem(token, self.ctx.now_ms())?;
        Ok((session.label.clone(), session.account.clone()))
    }

    async fn run(&self, stream: &mut dyn ByteStream) -> Result<LinkOutcome> {
        let token = stream.expect_frame().await?;
        let joiner_key = stream.expect_frame().await?;
        let joiner = Principal::from_bytes(&joiner_key)?;
        let (label, account) = self.redeem(&token)?;

        let identity = self.ctx.require_identity()?;
        if *identity.principal() != account {
            return Err(abort("session belongs to a different account"));
        }

        let t0 = self.ctx.now_ms();
        let mut grant = Capability::new(account.clone(), joiner.clone(), CapabilityRole::Agent, t0);
        if let Some(label) = label {
            grant = grant.with_label(label);
        }
        let app_to_browser_cap = sign_and_encode(identity.keypair(), grant)?;
        stream.write_frame(&app_to_browser_cap.data).await?;

        let browser_to_app_cap: EncodedBlob<Capability> = decode_signed(&stream.expect_frame().await?)?;
        check_agent_cap(&browser_to_app_cap.decoded, &joiner, &account)?;
        if browser_to_app_cap.decoded.ts != t0 + 1 {
            return Err(abort("joiner capability out of order"));
        }

        let profile_alias: EncodedBlob<Profile> = decode_signed(&stream.expect_frame().await?)?;
        if profile_alias.decoded.signer != joiner || profile_alias.decoded.alias.as_ref() != Some(&account) {
            return Err(abort("profile alias does not link the two accounts"));
        }
        if profile_alias.decoded.ts != t0 + 2 {
            return Err(abort("profile alias out of order"));
        }

        let outcome = LinkOutcome {
            browser_account_id: joiner.to_string(),
            app_account_id: account.to_string(),
            profile_alias,
            browser_to_app_cap,
            app_to_browser_cap,
        };
        self.ctx.submitter().submit(&outcome.blocks()).await?;
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Joiner
// ---------------------------------------------------------------------------

/// Side that consumes a session, creating an account first if needed.
pub struct LinkJoiner {
    ctx: Arc<Context>,
    transport: Arc<dyn Transport>,
    events: Option<mpsc::UnboundedSender<LinkEvent>>,
}

impl LinkJoiner {
    pub fn new(ctx: Arc<Context>, transport: Arc<dyn Transport>) -> Self {
        Self {
            ctx,
            transport,
            events: None,
        }
    }

    /// Report dial progress on `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<LinkEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Link this context to the session's Initiator. An account created
    /// here is logged out again if the link fails.
    pub async fn link(&self, session: &DeviceLinkSession) -> Result<LinkOutcome> {
        let _guard = self
            .ctx
            .link_guard()
            .try_lock()
            .map_err(|_| Error::LinkInProgress(session.account_id.clone()))?;
        let initiator = session.initiator()?;

        let created = match self.ctx.identity()? {
            Some(_) => false,
            None => {
                create_account(&self.ctx, DEFAULT_LINKED_ACCOUNT_NAME, None).await?;
                true
            }
        };

        let result = self.run(session, &initiator).await;
        if let Err(e) = &result {
            if created {
                warn!(error = %e, "link failed, removing account created for it");
                if let Err(rollback) = logout(&self.ctx) {
                    warn!(error = %rollback, "rollback failed");
                }
            }
        }
        result
    }

    async fn run(&self, session: &DeviceLinkSession, initiator: &Principal) -> Result<LinkOutcome> {
        let identity = self.ctx.require_identity()?;
        let candidates = select_candidates(&session.multiaddrs());
        let mut stream = dial_candidates(
            self.transport.as_ref(),
            &candidates,
            DEVICE_LINK_PROTOCOL_ID,
            self.events.as_ref(),
        )
        .await?;

        let outcome = self
            .converse(&mut *stream, session, &identity, initiator)
            .await;
        if let Err(e) = stream.close().await {
            debug!(error = %e, "close after link");
        }
        let outcome = outcome?;

        self.ctx.submitter().submit(&outcome.blocks()).await?;
        info!(initiator = %initiator, account = %identity.principal(), "device linked");
        Ok(outcome)
    }

    async fn converse(
        &self,
        stream: &mut dyn ByteStream,
        session: &DeviceLinkSession,
        identity: &LocalIdentity,
        initiator: &Principal,
    ) -> Result<LinkOutcome> {
        let me = identity.principal();
        stream.write_frame(session.secret_token.as_bytes()).await?;
        stream.write_frame(me.as_bytes()).await?;

        // Closing instead of answering means the token was refused.
        let frame = stream.read_frame().await?.ok_or(Error::TokenRejected)?;
        let app_to_browser_cap: EncodedBlob<Capability> = decode_signed(&frame)?;
        check_agent_cap(&app_to_browser_cap.decoded, initiator, me)?;
        let t0 = app_to_browser_cap.decoded.ts;
        check_freshness(t0, self.ctx.now_ms(), self.ctx.config())?;

        let grant = Capability::new(me.clone(), initiator.clone(), CapabilityRole::Agent, t0 + 1);
        let browser_to_app_cap = sign_and_encode(identity.keypair(), grant)?;
        stream.write_frame(&browser_to_app_cap.data).await?;

        let alias = Profile::alias(me.clone(), initiator.clone(), t0 + 2);
        let profile_alias = sign_and_encode(identity.keypair(), alias)?;
        stream.write_frame(&profile_alias.data).await?;

        // The Initiator closes once it has verified and stored both.
        if stream.read_frame().await?.is_some() {
            return Err(abort("unexpected frame after alias"));
        }

        Ok(LinkOutcome {
            browser_account_id: me.to_string(),
            app_account_id: initiator.to_string(),
            profile_alias,
            browser_to_app_cap,
            app_to_browser_cap,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::verify_blob;
    use crate::storage::BlobFetcher;
    use crate::transport::{MemoryListener, MemoryTransport};
    use libp2p::Multiaddr;

    const ADDR: &str = "/ip4/127.0.0.1/tcp/55000";

    async fn initiator() -> Arc<LinkInitiator> {
        let ctx = Arc::new(Context::in_memory());
        create_account(&ctx, "Desktop", None).await.unwrap();
        Arc::new(LinkInitiator::new(ctx))
    }

    fn addr_info() -> AddrInfo {
        AddrInfo {
            peer_id: "local".into(),
            addrs: vec![ADDR.into()],
        }
    }

    fn serve_once(
        initiator: Arc<LinkInitiator>,
        mut listener: MemoryListener,
    ) -> tokio::task::JoinHandle<Result<LinkOutcome>> {
        tokio::spawn(async move {
            let mut stream = listener.accept().await.unwrap().unwrap();
            initiator.handle(&mut stream).await
        })
    }

    #[tokio::test]
    async fn test_link_with_existing_account() {
        let transport = MemoryTransport::new();
        let listener = transport.listen(ADDR.parse::<Multiaddr>().unwrap(), DEVICE_LINK_PROTOCOL_ID);
        let initiator = initiator().await;
        let session = initiator
            .create_session(Some("phone".into()), addr_info())
            .unwrap();
        let server = serve_once(initiator.clone(), listener);

        let joiner_ctx = Arc::new(Context::in_memory());
        create_account(&joiner_ctx, "Browser", None).await.unwrap();
        let joiner = LinkJoiner::new(joiner_ctx.clone(), Arc::new(transport));
        let outcome = joiner.link(&session).await.unwrap();
        let served = server.await.unwrap().unwrap();

        assert_eq!(outcome.app_account_id, session.account_id);
        assert_eq!(served.browser_account_id, outcome.browser_account_id);
        assert_eq!(outcome.app_to_browser_cap.decoded.label.as_deref(), Some("phone"));
        let t0 = outcome.app_to_browser_cap.decoded.ts;
        assert_eq!(outcome.browser_to_app_cap.decoded.ts, t0 + 1);
        assert_eq!(outcome.profile_alias.decoded.ts, t0 + 2);
        verify_blob(&outcome.profile_alias.decoded).unwrap();
        assert!(initiator.status().unwrap().redeemed_at.is_some());

        for block in outcome.blocks() {
            assert!(joiner_ctx.fetcher().fetch(&block.cid).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_session_is_single_use() {
        let transport = MemoryTransport::new();
        let mut listener = transport.listen(ADDR.parse::<Multiaddr>().unwrap(), DEVICE_LINK_PROTOCOL_ID);
        let initiator = initiator().await;
        let session = initiator.create_session(None, addr_info()).unwrap();
        let transport = Arc::new(transport);

        let server = {
            let initiator = initiator.clone();
            tokio::spawn(async move {
                let mut results = Vec::new();
                for _ in 0..2 {
                    let mut stream = listener.accept().await.unwrap().unwrap();
                    results.push(initiator.handle(&mut stream).await.is_ok());
                }
                results
            })
        };

        let first = LinkJoiner::new(Arc::new(Context::in_memory()), transport.clone());
        first.link(&session).await.unwrap();
        let second = LinkJoiner::new(Arc::new(Context::in_memory()), transport);
        assert!(matches!(second.link(&session).await, Err(Error::TokenRejected)));
        assert_eq!(server.await.unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_malformed_joiner_key_keeps_session() {
        let transport = MemoryTransport::new();
        let mut listener = transport.listen(ADDR.parse::<Multiaddr>().unwrap(), DEVICE_LINK_PROTOCOL_ID);
        let initiator = initiator().await;
        let session = initiator.create_session(None, addr_info()).unwrap();

        let server = {
            let initiator = initiator.clone();
            tokio::spawn(async move {
                let mut results = Vec::new();
                for _ in 0..2 {
                    let mut stream = listener.accept().await.unwrap().unwrap();
                    results.push(initiator.handle(&mut stream).await.is_ok());
                }
                results
            })
        };

        let mut stream = transport
            .dial(&ADDR.parse().unwrap(), DEVICE_LINK_PROTOCOL_ID)
            .await
            .unwrap();
        stream.write_frame(session.secret_token.as_bytes()).await.unwrap();
        stream.write_frame(&[0xde, 0xad]).await.unwrap();
        assert!(stream.read_frame().await.unwrap().is_none());
        assert!(initiator.status().unwrap().redeemed_at.is_none());

        let joiner = LinkJoiner::new(Arc::new(Context::in_memory()), Arc::new(transport));
        joiner.link(&session).await.unwrap();
        assert_eq!(server.await.unwrap(), vec![false, true]);
    }

    #[tokio::test]
    async fn test_expired_session_rolls_back_new_account() {
        let transport = MemoryTransport::new();
        let listener = transport.listen(ADDR.parse::<Multiaddr>().unwrap(), DEVICE_LINK_PROTOCOL_ID);
        let initiator = initiator().await;
        let session = initiator.create_session(None, addr_info()).unwrap();
        // Expire it.
        initiator.session.lock().as_mut().unwrap().expires_at = 0;
        let server = serve_once(initiator, listener);

        let joiner_ctx = Arc::new(Context::in_memory());
        let joiner = LinkJoiner::new(joiner_ctx.clone(), Arc::new(transport));
        assert!(joiner.link(&session).await.is_err());
        assert!(matches!(server.await.unwrap(), Err(Error::SessionExpired)));
        assert!(joiner_ctx.identity().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_existing_account_survives_failure() {
        let transport = Arc::new(MemoryTransport::new());
        let joiner_ctx = Arc::new(Context::in_memory());
        create_account(&joiner_ctx, "Keep Me", None).await.unwrap();
        let initiator = initiator().await;
        let session = initiator.create_session(None, addr_info()).unwrap();

        // Nobody listens: every dial fails.
        let joiner = LinkJoiner::new(joiner_ctx.clone(), transport);
        assert!(matches!(
            joiner.link(&session).await,
            Err(Error::AllDialsFailed { attempts: 1 })
        ));
        assert!(joiner_ctx.identity().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_link_refused() {
        let joiner_ctx = Arc::new(Context::in_memory());
        let _held = joiner_ctx.link_guard().try_lock().unwrap();
        let joiner = LinkJoiner::new(joiner_ctx.clone(), Arc::new(MemoryTransport::new()));
        let initiator = initiator().await;
        let session = initiator.create_session(None, addr_info()).unwrap();
        assert!(matches!(
            joiner.link(&session).await,
            Err(Error::LinkInProgress(_))
        ));
    }

    #[tokio::test]
    async fn test_create_session_requires_identity() {
        let initiator = LinkInitiator::new(Arc::new(Context::in_memory()));
        assert!(matches!(
            initiator.create_session(None, addr_info()),
            Err(Error::NoIdentity)
        ));
    }
}
