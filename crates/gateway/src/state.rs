//! Shared application state passed to every API handler (teacher's
//! `AppState` grouping pattern, trimmed to what this gateway's modules need:
//! config, persistence, the LLM provider registry, and the two per-Run
//! runtime registries — cancellation and the SSE stream bus).

use std::collections::HashMap;
use std::sync::Arc;

use ag_domain::config::Config;
use ag_providers::registry::ProviderRegistry;
use ag_providers::traits::LlmProvider;
use ag_store::Store;

use crate::runtime::cancel::CancelMap;
use crate::runtime::stream_bus::StreamBus;
use crate::runtime::tool_registry::ToolRegistry;

/// A resolved model reference: which provider serves it, and the literal
/// model name to send upstream (may differ from the caller-facing alias).
#[derive(Debug, Clone)]
pub struct ModelRoute {
    pub provider_id: String,
    pub resolved_model: String,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub llm: Arc<ProviderRegistry>,
    /// model name / alias -> route, built once at startup from every
    /// configured provider's `default_model` and `model_aliases` (spec §9
    /// Open Question: unknown models are a fail-closed `config_error`).
    pub model_router: Arc<HashMap<String, ModelRoute>>,
    pub cancel_map: Arc<CancelMap>,
    pub stream_bus: Arc<StreamBus>,
    /// In-process tool executors, looked up by name against each Run's
    /// declared tools (spec §4.2 step 4, §4.4). Empty unless an embedder
    /// registers tools before serving — this gateway ships none of its own.
    pub tool_registry: Arc<ToolRegistry>,
    /// SHA-256 hash of the configured bearer token. `None` = no auth
    /// enforced (local development only, spec §6).
    pub api_token_hash: Option<Vec<u8>>,
}

impl AppState {
    /// Resolve a model name to its configured provider and literal upstream
    /// model name. `None` means the model is unknown — callers must fail
    /// closed (spec §9 Open Question) rather than pass it upstream verbatim.
    pub fn resolve_model(&self, model: &str) -> Option<(Arc<dyn LlmProvider>, String)> {
        let route = self.model_router.get(model)?;
        let provider = self.llm.get(&route.provider_id)?;
        Some((provider, route.resolved_model.clone()))
    }
}

/// Build the model -> provider routing table from the LLM config (spec §9
/// Open Question resolution: model names are resolved against an explicit
/// table, never guessed). A provider's own id is also a valid "model name"
/// so callers can target "whatever this provider's default is" directly.
pub fn build_model_router(config: &ag_domain::config::LlmConfig) -> HashMap<String, ModelRoute> {
    let mut router = HashMap::new();
    for provider in &config.providers {
        if let Some(model) = &provider.default_model {
            router.entry(model.clone()).or_insert_with(|| ModelRoute {
                provider_id: provider.id.clone(),
                resolved_model: model.clone(),
            });
        }
        for (alias, real_model) in &provider.model_aliases {
            router.entry(alias.clone()).or_insert_with(|| ModelRoute {
                provider_id: provider.id.clone(),
                resolved_model: real_model.clone(),
            });
        }
    }
    router
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_domain::config::{LlmConfig, ProviderAuthConfig, ProviderConfig, ProviderKind};

    #[test]
    fn build_model_router_maps_default_model_and_resolves_aliases() {
        let config = LlmConfig {
            providers: vec![ProviderConfig {
                id: "openai".into(),
                kind: ProviderKind::OpenaiCompat,
                base_url: "https://api.openai.com/v1".into(),
                auth: ProviderAuthConfig::default(),
                default_model: Some("gpt-4o".into()),
                model_aliases: HashMap::from([("gpt4".to_string(), "gpt-4o-2024-08-06".to_string())]),
            }],
            ..Default::default()
        };
        let router = build_model_router(&config);
        assert_eq!(router.get("gpt-4o").unwrap().provider_id, "openai");
        assert_eq!(router.get("gpt4").unwrap().resolved_model, "gpt-4o-2024-08-06");
    }

    #[test]
    fn build_model_router_has_no_entry_for_unconfigured_model() {
        let router = build_model_router(&LlmConfig::default());
        assert!(router.get("made-up-model").is_none());
    }
}
