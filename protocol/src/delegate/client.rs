//! Delegate side: needs signatures, asks providers for them.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::host::EmbedHost;
use super::messages::{DelegateMessage, ProviderMessage, NO_IDENTITY};
use crate::ability::{Ability, KnownOrigins};
use crate::blob::{verify_blob, Comment, UnsignedComment};
use crate::crypto::keys::Signature;
use crate::error::{Error, Result};
use crate::storage::KeyValueStore;
use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    AwaitingReady,
    Initialized,
}

struct Frame {
    outbound: mpsc::Sender<DelegateMessage>,
    state: watch::Receiver<FrameState>,
    reader: JoinHandle<()>,
}

struct PendingRequest {
    origin: String,
    reply: oneshot::Sender<Result<Signature>>,
}

/// State shared with the per-frame reader tasks.
struct Shared {
    pending: DashMap<String, PendingRequest>,
    abilities: DashMap<String, Vec<Ability>>,
    origins: KnownOrigins,
}

impl Shared {
    /// Take the pending entry for `id` if it was sent to `origin`. Each
    /// entry is taken at most once.
    fn take(&self, origin: &str, id: &str) -> Option<PendingRequest> {
        self.pending
            .remove_if(id, |_, pending| pending.origin == origin)
            .map(|(_, pending)| pending)
    }

    fn on_message(&self, origin: &str, message: ProviderMessage) {
        match message {
            ProviderMessage::Ready => {}
            ProviderMessage::Abilities { abilities } => {
                self.abilities.insert(origin.to_string(), abilities);
            }
            ProviderMessage::ResolveSignature {
                signature_id,
                signature,
            } => match self.take(origin, &signature_id) {
                Some(pending) => {
                    let _ = pending.reply.send(Ok(signature));
                }
                None => debug!(origin, %signature_id, "ignoring unmatched signature"),
            },
            ProviderMessage::RejectSignature {
                signature_id,
                error,
            } => {
                let Some(pending) = self.take(origin, &signature_id) else {
                    debug!(origin, %signature_id, "ignoring unmatched rejection");
                    return;
                };
                let result = if error == NO_IDENTITY {
                    self.forget(origin);
                    Err(Error::NoIdentity)
                } else {
                    Err(Error::SigningRejected(error))
                };
                let _ = pending.reply.send(result);
            }
        }
    }

    fn forget(&self, origin: &str) {
        self.abilities.remove(origin);
        if let Err(e) = self.origins.remove(origin) {
            warn!(origin, error = %e, "failed to forget delegation origin");
        }
    }

    /// Drop every pending request sent to `origin`; their callers see
    /// [`Error::Cancelled`].
    fn cancel_origin(&self, origin: &str) {
        self.pending.retain(|_, pending| pending.origin != origin);
    }
}

/// Requests comment signatures from identity providers on other origins.
pub struct SigningDelegate {
    origin: String,
    host: Arc<dyn EmbedHost>,
    frames: DashMap<String, Frame>,
    shared: Arc<Shared>,
}

impl SigningDelegate {
    /// `origin` is this page's own origin; providers scope abilities by it.
    pub fn new(origin: impl Into<String>, host: Arc<dyn EmbedHost>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            origin: origin.into(),
            host,
            frames: DashMap::new(),
            shared: Arc::new(Shared {
                pending: DashMap::new(),
                abilities: DashMap::new(),
                origins: KnownOrigins::new(store),
            }),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn known_origins(&self) -> &KnownOrigins {
        &self.shared.origins
    }

    /// Open embeds for every remembered provider origin. Origins that fail
    /// to open are logged and skipped.
    pub async fn start(&self) -> Result<()> {
        for origin in self.shared.origins.list()? {
            if let Err(e) = self.open_frame(&origin).await {
                warn!(%origin, error = %e, "could not open embed");
            }
        }
        Ok(())
    }

    /// Remember `provider_origin` and open its embed.
    pub async fn connect(&self, provider_origin: &str) -> Result<()> {
        self.shared.origins.add(provider_origin)?;
        self.open_frame(provider_origin).await
    }

    async fn open_frame(&self, provider_origin: &str) -> Result<()> {
        if self.frames.contains_key(provider_origin) {
            return Ok(());
        }
        let channel = self.host.open_embed(provider_origin, &self.origin).await?;
        let (state_tx, state_rx) = watch::channel(FrameState::AwaitingReady);
        let reader = tokio::spawn(run_frame(
            provider_origin.to_string(),
            channel.inbound,
            channel.outbound.clone(),
            state_tx,
            self.shared.clone(),
        ));
        self.frames.insert(
            provider_origin.to_string(),
            Frame {
                outbound: channel.outbound,
                state: state_rx,
                reader,
            },
        );
        debug!(provider = provider_origin, "embed opened");
        Ok(())
    }

    pub fn frame_state(&self, provider_origin: &str) -> Option<FrameState> {
        self.frames
            .get(provider_origin)
            .map(|frame| *frame.state.borrow())
    }

    /// Wait until the provider has answered `ready` with our `init`.
    pub async fn wait_ready(&self, provider_origin: &str) -> Result<()> {
        let mut state = self
            .frames
            .get(provider_origin)
            .map(|frame| frame.state.clone())
            .ok_or_else(|| TransportError::ConnectionRefused(provider_origin.to_string()))?;
        loop {
            if *state.borrow_and_update() == FrameState::Initialized {
                return Ok(());
            }
            state.changed().await.map_err(|_| Error::Cancelled)?;
        }
    }

    /// Latest ability snapshot pushed by `provider_origin`.
    pub fn abilities(&self, provider_origin: &str) -> Vec<Ability> {
        self.shared
            .abilities
            .get(provider_origin)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Ask `provider_origin` to sign `comment` and return the signed record.
    ///
    /// A `NoIdentity` rejection also forgets the provider origin.
    pub async fn sign_comment(&self, provider_origin: &str, comment: UnsignedComment) -> Result<Comment> {
        let outbound = self
            .frames
            .get(provider_origin)
            .map(|frame| frame.outbound.clone())
            .ok_or_else(|| TransportError::ConnectionRefused(provider_origin.to_string()))?;
        self.wait_ready(provider_origin).await?;

        let signature_id = Uuid::new_v4().to_string();
        let (reply, response) = oneshot::channel();
        self.shared.pending.insert(
            signature_id.clone(),
            PendingRequest {
                origin: provider_origin.to_string(),
                reply,
            },
        );

        let request = DelegateMessage::RequestSignComment {
            signature_id: signature_id.clone(),
            comment: comment.clone(),
        };
        if outbound.send(request).await.is_err() {
            self.shared.pending.remove(&signature_id);
            return Err(Error::Cancelled);
        }

        let signature = response.await.map_err(|_| Error::Cancelled)??;
        let signed = Comment::from_unsigned(comment, signature);
        verify_blob(&signed)?;
        info!(provider = provider_origin, %signature_id, "comment signed");
        Ok(signed)
    }

    /// Number of requests still awaiting an answer.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Fail every outstanding request with [`Error::Cancelled`].
    pub fn cancel_all(&self) {
        self.shared.pending.clear();
    }

    /// Close the embed for `provider_origin` and cancel its requests.
    pub fn disconnect(&self, provider_origin: &str) {
        if let Some((_, frame)) = self.frames.remove(provider_origin) {
            frame.reader.abort();
        }
        self.shared.cancel_origin(provider_origin);
        self.shared.abilities.remove(provider_origin);
    }
}

impl Drop for SigningDelegate {
    fn drop(&mut self) {
        for frame in self.frames.iter() {
            frame.reader.abort();
        }
        self.shared.pending.clear();
    }
}

async fn run_frame(
    origin: String,
    mut inbound: mpsc::Receiver<ProviderMessage>,
    outbound: mpsc::Sender<DelegateMessage>,
    state: watch::Sender<FrameState>,
    shared: Arc<Shared>,
) {
    while let Some(message) = inbound.recv().await {
        if message == ProviderMessage::Ready {
            if outbound.send(DelegateMessage::Init).await.is_err() {
                break;
            }
            state.send_replace(FrameState::Initialized);
        }
        shared.on_message(&origin, message);
    }
    debug!(%origin, "embed channel closed");
    shared.cancel_origin(&origin);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::DocumentBlock;
    use crate::crypto::keys::{KeyPair, KeyType};
    use crate::delegate::host::EmbedChannel;
    use crate::identity::principal::Principal;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Hands the provider ends of each embed to the test.
    #[derive(Default)]
    struct ScriptedHost {
        opened: Mutex<Vec<(mpsc::Receiver<DelegateMessage>, mpsc::Sender<ProviderMessage>)>>,
    }

    #[async_trait]
    impl EmbedHost for ScriptedHost {
        async fn open_embed(&self, _provider: &str, _requester: &str) -> Result<EmbedChannel> {
            let (outbound, provider_rx) = mpsc::channel(8);
            let (provider_tx, inbound) = mpsc::channel(8);
            self.opened.lock().push((provider_rx, provider_tx));
            Ok(EmbedChannel { outbound, inbound })
        }
    }

    fn comment(signer: &Principal) -> UnsignedComment {
        UnsignedComment {
            signer: signer.clone(),
            space: signer.clone(),
            path: "/doc".into(),
            version: vec![],
            reply_parent: None,
            thread_root: None,
            body: vec![DocumentBlock::paragraph("b", "hi")],
            ts: 10,
        }
    }

    async fn initialized(
        host: &Arc<ScriptedHost>,
        delegate: &SigningDelegate,
    ) -> (mpsc::Receiver<DelegateMessage>, mpsc::Sender<ProviderMessage>) {
        delegate.connect("https://id.example").await.unwrap();
        let (mut rx, tx) = host.opened.lock().pop().unwrap();
        assert_eq!(delegate.frame_state("https://id.example"), Some(FrameState::AwaitingReady));
        tx.send(ProviderMessage::Ready).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), DelegateMessage::Init);
        delegate.wait_ready("https://id.example").await.unwrap();
        (rx, tx)
    }

    fn delegate_with(host: Arc<ScriptedHost>) -> SigningDelegate {
        SigningDelegate::new("https://a.example", host, Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_ready_triggers_init() {
        let host = Arc::new(ScriptedHost::default());
        let delegate = delegate_with(host.clone());
        initialized(&host, &delegate).await;
        assert_eq!(delegate.frame_state("https://id.example"), Some(FrameState::Initialized));
        assert!(delegate.known_origins().contains("https://id.example").unwrap());
    }

    #[tokio::test]
    async fn test_abilities_snapshot_replaced() {
        let host = Arc::new(ScriptedHost::default());
        let delegate = delegate_with(host.clone());
        let (mut rx, tx) = initialized(&host, &delegate).await;

        let principal = KeyPair::generate(KeyType::P256).principal();
        let ability = Ability {
            id: "a1".into(),
            account_uid: principal.to_string(),
            account_public_key: principal,
            target_path: None,
            target_uid: None,
            mode: crate::ability::AbilityMode::Comment,
            expiration: None,
            recursive: false,
            delegate_origin: "https://a.example".into(),
            identity_origin: "https://id.example".into(),
        };

        // A trailing `ready` makes the reader answer `init`, which proves the
        // snapshot before it was handled.
        tx.send(ProviderMessage::Abilities { abilities: vec![ability.clone()] }).await.unwrap();
        tx.send(ProviderMessage::Ready).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), DelegateMessage::Init);
        assert_eq!(delegate.abilities("https://id.example"), vec![ability]);

        tx.send(ProviderMessage::Abilities { abilities: vec![] }).await.unwrap();
        tx.send(ProviderMessage::Ready).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), DelegateMessage::Init);
        assert!(delegate.abilities("https://id.example").is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_answers_resolve_by_id() {
        let host = Arc::new(ScriptedHost::default());
        let delegate = Arc::new(delegate_with(host.clone()));
        let (mut rx, tx) = initialized(&host, &delegate).await;

        let kp = KeyPair::generate(KeyType::P256);
        let first = comment(&kp.principal());
        let mut second = comment(&kp.principal());
        second.ts = 11;

        let d1 = delegate.clone();
        let c1 = first.clone();
        let h1 = tokio::spawn(async move { d1.sign_comment("https://id.example", c1).await });
        let d2 = delegate.clone();
        let c2 = second.clone();
        let h2 = tokio::spawn(async move { d2.sign_comment("https://id.example", c2).await });

        let mut requests = Vec::new();
        for _ in 0..2 {
            match rx.recv().await.unwrap() {
                DelegateMessage::RequestSignComment { signature_id, comment } => {
                    requests.push((signature_id, comment))
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        // Answer in reverse order, plus a stray and a duplicate.
        tx.send(ProviderMessage::ResolveSignature {
            signature_id: "not-a-request".into(),
            signature: Signature::zeroed(),
        })
        .await
        .unwrap();
        for (id, unsigned) in requests.iter().rev() {
            let record = Comment::from_unsigned(unsigned.clone(), Signature::zeroed());
            let sig = crate::blob::sign_blob(&kp, record).unwrap().sig;
            let answer = ProviderMessage::ResolveSignature {
                signature_id: id.clone(),
                signature: sig,
            };
            tx.send(answer.clone()).await.unwrap();
            tx.send(answer).await.unwrap();
        }

        let signed1 = h1.await.unwrap().unwrap();
        let signed2 = h2.await.unwrap().unwrap();
        assert_eq!(signed1.ts, 10);
        assert_eq!(signed2.ts, 11);
        assert_eq!(delegate.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_no_identity_forgets_origin() {
        let host = Arc::new(ScriptedHost::default());
        let delegate = Arc::new(delegate_with(host.clone()));
        let (mut rx, tx) = initialized(&host, &delegate).await;

        let signer = KeyPair::generate(KeyType::P256).principal();
        let d = delegate.clone();
        let handle = tokio::spawn(async move { d.sign_comment("https://id.example", comment(&signer)).await });

        let Some(DelegateMessage::RequestSignComment { signature_id, .. }) = rx.recv().await else {
            panic!("expected a signing request");
        };
        tx.send(ProviderMessage::RejectSignature {
            signature_id,
            error: NO_IDENTITY.into(),
        })
        .await
        .unwrap();

        assert!(matches!(handle.await.unwrap(), Err(Error::NoIdentity)));
        assert!(!delegate.known_origins().contains("https://id.example").unwrap());
    }

    #[tokio::test]
    async fn test_other_rejection_keeps_origin() {
        let host = Arc::new(ScriptedHost::default());
        let delegate = Arc::new(delegate_with(host.clone()));
        let (mut rx, tx) = initialized(&host, &delegate).await;

        let signer = KeyPair::generate(KeyType::P256).principal();
        let d = delegate.clone();
        let handle = tokio::spawn(async move { d.sign_comment("https://id.example", comment(&signer)).await });

        let Some(DelegateMessage::RequestSignComment { signature_id, .. }) = rx.recv().await else {
            panic!("expected a signing request");
        };
        tx.send(ProviderMessage::RejectSignature {
            signature_id,
            error: "SigningFailed".into(),
        })
        .await
        .unwrap();

        assert!(matches!(handle.await.unwrap(), Err(Error::SigningRejected(_))));
        assert!(delegate.known_origins().contains("https://id.example").unwrap());
    }

    #[tokio::test]
    async fn test_cancel_all_fails_pending() {
        let host = Arc::new(ScriptedHost::default());
        let delegate = Arc::new(delegate_with(host.clone()));
        let (mut rx, _tx) = initialized(&host, &delegate).await;

        let signer = KeyPair::generate(KeyType::P256).principal();
        let d = delegate.clone();
        let handle = tokio::spawn(async move { d.sign_comment("https://id.example", comment(&signer)).await });
        rx.recv().await.unwrap();

        delegate.cancel_all();
        assert!(matches!(handle.await.unwrap(), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_provider_hangup_cancels_pending() {
        let host = Arc::new(ScriptedHost::default());
        let delegate = Arc::new(delegate_with(host.clone()));
        let (mut rx, tx) = initialized(&host, &delegate).await;

        let signer = KeyPair::generate(KeyType::P256).principal();
        let d = delegate.clone();
        let handle = tokio::spawn(async move { d.sign_comment("https://id.example", comment(&signer)).await });
        rx.recv().await.unwrap();

        drop(tx);
        drop(rx);
        assert!(matches!(handle.await.unwrap(), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_sign_without_frame_refused() {
        let delegate = delegate_with(Arc::new(ScriptedHost::default()));
        let signer = KeyPair::generate(KeyType::P256).principal();
        assert!(delegate
            .sign_comment("https://id.example", comment(&signer))
            .await
            .is_err());
    }
}
