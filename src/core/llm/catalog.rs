use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use super::ProviderRouter;
use super::generic_provider::GenericProvider;

const PROVIDERS_JSON: &str = include_str!("providers.json");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCatalog {
    pub providers: Vec<ProviderDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub api_format: ApiFormat,
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFormat {
    Openai,
    Gemini,
}

impl ProviderCatalog {
    pub fn builtin() -> Result<Self> {
        Ok(serde_json::from_str(PROVIDERS_JSON)?)
    }

    /// Configured providers replace built-in ones with the same id.
    pub fn merged_with(mut self, configured: &[ProviderDef]) -> Self {
        for def in configured {
            match self.providers.iter_mut().find(|p| p.id == def.id) {
                Some(existing) => *existing = def.clone(),
                None => self.providers.push(def.clone()),
            }
        }
        self
    }

    pub fn get_provider(&self, id: &str) -> Option<&ProviderDef> {
        let normalized = id.to_lowercase();
        self.providers
            .iter()
            .find(|p| p.id == normalized || p.name.to_lowercase() == normalized)
    }

    /// Build a router over every provider whose API key is present in the environment.
    pub fn build_router(&self) -> ProviderRouter {
        self.build_router_with(|var| std::env::var(var).ok())
    }

    pub fn build_router_with(&self, lookup: impl Fn(&str) -> Option<String>) -> ProviderRouter {
        let mut router = ProviderRouter::new();
        for def in &self.providers {
            let Some(api_key) = lookup(&def.api_key_env).filter(|k| !k.trim().is_empty()) else {
                warn!(
                    "Skipping provider '{}': ${} is not set",
                    def.id, def.api_key_env
                );
                continue;
            };
            let provider = Arc::new(GenericProvider::new(def.clone(), api_key));
            for model in &def.models {
                router.register(model, provider.clone());
            }
        }
        router
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_parses() {
        let catalog = ProviderCatalog::builtin().unwrap();
        let deepseek = catalog.get_provider("deepseek").unwrap();
        assert_eq!(deepseek.api_format, ApiFormat::Openai);
        assert!(deepseek.models.iter().any(|m| m == "deepseek-r1"));
        assert!(catalog.get_provider("Google Gemini").is_some());
    }

    #[test]
    fn configured_provider_replaces_builtin_by_id() {
        let custom = ProviderDef {
            id: "openai".to_string(),
            name: "OpenAI proxy".to_string(),
            api_format: ApiFormat::Openai,
            base_url: "http://127.0.0.1:9999/v1/chat/completions".to_string(),
            api_key_env: "PROXY_KEY".to_string(),
            models: vec!["gpt-x-json".to_string()],
            extra_headers: HashMap::new(),
        };
        let catalog = ProviderCatalog::builtin().unwrap().merged_with(&[custom]);
        let openai = catalog.get_provider("openai").unwrap();
        assert_eq!(openai.api_key_env, "PROXY_KEY");
        assert_eq!(
            catalog.providers.iter().filter(|p| p.id == "openai").count(),
            1
        );
    }

    #[test]
    fn router_skips_providers_without_keys() {
        let catalog = ProviderCatalog::builtin().unwrap();
        let router = catalog.build_router_with(|var| {
            (var == "DEEPSEEK_API_KEY").then(|| "sk-test".to_string())
        });
        assert!(router.provider_for("deepseek-r1").is_some());
        assert!(router.provider_for("gpt-4o").is_none());
    }
}
