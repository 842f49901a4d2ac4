//! Opening an identity provider's hidden embed. A browser host creates a
//! frame at `<provider>/embed/sign`; the in-process host wires channels
//! straight to an [`IdentityProvider`] in the same runtime.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::messages::{DelegateMessage, ProviderMessage};
use super::provider::IdentityProvider;
use crate::config::MESSAGE_CHANNEL_CAPACITY;
use crate::error::Result;
use crate::transport::TransportError;

/// Path of the signing embed under a provider origin.
pub const EMBED_SIGN_PATH: &str = "/embed/sign";

/// Both directions of one embed, seen from the delegate.
pub struct EmbedChannel {
    pub outbound: mpsc::Sender<DelegateMessage>,
    pub inbound: mpsc::Receiver<ProviderMessage>,
}

#[async_trait]
pub trait EmbedHost: Send + Sync {
    async fn open_embed(&self, provider_origin: &str, requester_origin: &str) -> Result<EmbedChannel>;
}

/// Providers registered by origin, served as tasks on the current runtime.
#[derive(Default, Clone)]
pub struct InProcessHost {
    providers: Arc<DashMap<String, Arc<IdentityProvider>>>,
}

impl InProcessHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: Arc<IdentityProvider>) {
        self.providers.insert(provider.origin().to_string(), provider);
    }

    pub fn unregister(&self, origin: &str) {
        self.providers.remove(origin);
    }
}

#[async_trait]
impl EmbedHost for InProcessHost {
    async fn open_embed(&self, provider_origin: &str, requester_origin: &str) -> Result<EmbedChannel> {
        let provider = self
            .providers
            .get(provider_origin)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                TransportError::ConnectionRefused(format!("{provider_origin}{EMBED_SIGN_PATH}"))
            })?;

        let (to_provider, provider_inbound) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        let (provider_outbound, from_provider) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        debug!(provider = provider_origin, requester = requester_origin, "opening embed");
        tokio::spawn(provider.serve(
            requester_origin.to_string(),
            provider_inbound,
            provider_outbound,
        ));

        Ok(EmbedChannel {
            outbound: to_provider,
            inbound: from_provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::error::Error;

    #[tokio::test]
    async fn test_unknown_provider_refused() {
        let host = InProcessHost::new();
        assert!(matches!(
            host.open_embed("https://nobody.example", "https://a.example").await,
            Err(Error::Transport(TransportError::ConnectionRefused(_)))
        ));
    }

    #[tokio::test]
    async fn test_open_embed_receives_ready() {
        let host = InProcessHost::new();
        let provider = Arc::new(IdentityProvider::new(
            "https://id.example",
            Arc::new(Context::in_memory()),
        ));
        host.register(provider);
        let mut channel = host
            .open_embed("https://id.example", "https://a.example")
            .await
            .unwrap();
        assert_eq!(channel.inbound.recv().await.unwrap(), ProviderMessage::Ready);
    }
}
