pub mod catalog;
pub mod generic_provider;
pub mod registry;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::core::errors::InvokeError;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    // One outbound call; returns the raw assistant text. No retries here.
    async fn generate(&self, model_id: &str, messages: &[ChatMessage])
    -> Result<String, InvokeError>;
}

/// Routes a model id to the provider that serves it.
#[derive(Default, Clone)]
pub struct ProviderRouter {
    by_model: HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model_id: &str, provider: Arc<dyn LlmProvider>) {
        info!(
            "Routing model '{}' to provider '{}'",
            model_id,
            provider.name()
        );
        self.by_model
            .insert(model_id.trim().to_lowercase(), provider);
    }

    pub fn provider_for(&self, model_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.by_model.get(&model_id.trim().to_lowercase()).cloned()
    }

    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.by_model.keys().cloned().collect();
        models.sort();
        models
    }
}
