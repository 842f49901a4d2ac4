//! Identity-provider side: holds the key, answers signing requests from one
//! requesting origin per embed.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::{DelegateMessage, ProviderMessage, NO_IDENTITY, SIGNING_FAILED};
use crate::ability::{match_ability, AbilityMode, AbilityStore, TargetId};
use crate::blob::{sign_blob, Comment, UnsignedComment};
use crate::context::Context;
use crate::crypto::keys::Signature;
use crate::error::{Error, Result};

pub struct IdentityProvider {
    origin: String,
    ctx: Arc<Context>,
    abilities: AbilityStore,
}

impl IdentityProvider {
    pub fn new(origin: impl Into<String>, ctx: Arc<Context>) -> Self {
        let abilities = AbilityStore::new(ctx.store().clone());
        Self {
            origin: origin.into(),
            ctx,
            abilities,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn abilities(&self) -> &AbilityStore {
        &self.abilities
    }

    /// Serve one embed opened by `requester_origin` until either side hangs
    /// up. Announces readiness first; ability pushes start on `init`.
    pub async fn serve(
        self: Arc<Self>,
        requester_origin: String,
        mut inbound: mpsc::Receiver<DelegateMessage>,
        outbound: mpsc::Sender<ProviderMessage>,
    ) {
        if outbound.send(ProviderMessage::Ready).await.is_err() {
            return;
        }
        let mut pusher: Option<JoinHandle<()>> = None;

        while let Some(message) = inbound.recv().await {
            match message {
                DelegateMessage::Init => {
                    if pusher.is_none() {
                        debug!(provider = %self.origin, requester = %requester_origin, "embed initialized");
                        pusher = Some(tokio::spawn(
                            self.clone()
                                .push_abilities(requester_origin.clone(), outbound.clone()),
                        ));
                    }
                }
                DelegateMessage::RequestSignComment {
                    signature_id,
                    comment,
                } => {
                    let reply = match self.sign_comment(&requester_origin, comment) {
                        Ok(signature) => ProviderMessage::ResolveSignature {
                            signature_id,
                            signature,
                        },
                        Err(err) => ProviderMessage::RejectSignature {
                            signature_id,
                            error: rejection_reason(&err).to_string(),
                        },
                    };
                    if outbound.send(reply).await.is_err() {
                        break;
                    }
                }
            }
        }

        if let Some(handle) = pusher {
            handle.abort();
        }
        debug!(provider = %self.origin, requester = %requester_origin, "embed closed");
    }

    /// Sign `comment` for `requester_origin` if one of its abilities covers
    /// the comment's target. Any refusal is [`Error::NoIdentity`].
    pub fn sign_comment(&self, requester_origin: &str, comment: UnsignedComment) -> Result<Signature> {
        let identity = self.ctx.identity()?.ok_or(Error::NoIdentity)?;
        let abilities = self.abilities.abilities_for_origin(requester_origin)?;
        let target = TargetId::new(comment.space.to_string(), &comment.path);

        let Some(ability) = match_ability(
            &abilities,
            &target,
            AbilityMode::Comment,
            requester_origin,
            self.ctx.now_ms(),
        ) else {
            debug!(requester = requester_origin, "no matching ability");
            return Err(Error::NoIdentity);
        };
        if ability.account_public_key != *identity.principal() || comment.signer != *identity.principal() {
            debug!(requester = requester_origin, ability = %ability.id, "ability is for another account");
            return Err(Error::NoIdentity);
        }

        let record = Comment::from_unsigned(comment, Signature::zeroed());
        let signed = sign_blob(identity.keypair(), record)?;
        info!(requester = requester_origin, ability = %ability.id, "signed comment");
        Ok(signed.sig)
    }

    async fn push_abilities(self: Arc<Self>, requester_origin: String, outbound: mpsc::Sender<ProviderMessage>) {
        let mut ticker = tokio::time::interval(self.ctx.config().ability_push_interval);
        loop {
            ticker.tick().await;
            let abilities = match self.abilities.abilities_for_origin(&requester_origin) {
                Ok(abilities) => abilities,
                Err(e) => {
                    warn!(error = %e, "failed to load abilities");
                    continue;
                }
            };
            if outbound
                .send(ProviderMessage::Abilities { abilities })
                .await
                .is_err()
            {
                break;
            }
        }
    }
}

fn rejection_reason(err: &Error) -> &'static str {
    match err {
        Error::NoIdentity => NO_IDENTITY,
        other => {
            warn!(error = %other, "signing request failed");
            SIGNING_FAILED
        }
    }
}
