//! Model client abstraction
//!
//! A uniform interface to hosted chat-completion models. One blocking call
//! that returns either final text or tool-call requests, and one streaming
//! call that yields text fragments.

pub mod openai;
pub mod scripted;

pub use openai::OpenAiCompatibleClient;
pub use scripted::{ScriptStep, ScriptedModelClient};

use crate::config::{ChatConfig, ProviderKind};
use crate::error::ChatError;
use crate::models::{Conversation, ModelReply, ToolDeclaration};
use crate::Result;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;

/// Lazy, finite, non-restartable sequence of text fragments.
/// Ends (`None`) only after the provider's end marker; dropping it cancels the call.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    /// Model identifier, for logs
    fn model(&self) -> &str;

    /// Blocking completion. An empty `tools` slice advertises no tools.
    async fn complete(
        &self,
        system: &str,
        conversation: &Conversation,
        tools: &[ToolDeclaration],
    ) -> Result<ModelReply>;

    /// Incremental completion without tools
    async fn complete_streaming(
        &self,
        system: &str,
        conversation: &Conversation,
    ) -> Result<TextStream>;
}

/// One client per configured provider, so callers can pick a model option per request
pub struct ModelClients {
    clients: HashMap<ProviderKind, Arc<dyn ModelClient>>,
    default: Option<ProviderKind>,
}

impl ModelClients {
    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        let mut clients: HashMap<ProviderKind, Arc<dyn ModelClient>> = HashMap::new();

        for provider in &config.providers {
            let client = OpenAiCompatibleClient::new(provider, config.model_timeout)?;
            info!(provider = %provider.kind, model = %provider.model, "Model client ready");
            clients.insert(provider.kind, Arc::new(client));
        }

        Ok(Self {
            clients,
            default: config.default_provider,
        })
    }

    /// Collection with a single client registered as the default
    pub fn single(kind: ProviderKind, client: Arc<dyn ModelClient>) -> Self {
        let mut clients = HashMap::new();
        clients.insert(kind, client);
        Self {
            clients,
            default: Some(kind),
        }
    }

    pub fn available(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.clients.contains_key(kind))
            .collect()
    }

    /// Client for `kind`, or the default when `kind` is `None`
    pub fn get(&self, kind: Option<ProviderKind>) -> Result<Arc<dyn ModelClient>> {
        let kind = kind.or(self.default).ok_or_else(|| {
            ChatError::ProviderUnavailable("no model provider is configured".to_string())
        })?;

        self.clients.get(&kind).cloned().ok_or_else(|| {
            ChatError::ProviderUnavailable(format!("{} is not configured (missing {})", kind, kind.key_var()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_collection_reports_unavailable() {
        let clients = ModelClients::from_config(&ChatConfig::default()).unwrap();
        assert!(clients.available().is_empty());
        assert!(matches!(
            clients.get(None),
            Err(ChatError::ProviderUnavailable(_))
        ));
    }

    #[test]
    fn test_single_client_is_default() {
        let client: Arc<dyn ModelClient> = Arc::new(ScriptedModelClient::new(vec![]));
        let clients = ModelClients::single(ProviderKind::Gemini, client);

        assert_eq!(clients.available(), vec![ProviderKind::Gemini]);
        assert!(clients.get(None).is_ok());
        assert!(clients.get(Some(ProviderKind::OpenAi)).is_err());
    }
}
