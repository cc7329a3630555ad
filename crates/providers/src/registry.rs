//! Provider registry.
//!
//! Constructs and holds all configured LLM provider instances. At startup the
//! registry reads the [`LlmConfig`], resolves authentication (env vars, direct
//! keys), and instantiates the appropriate adapter for each configured provider.

use crate::anthropic::AnthropicProvider;
use crate::bedrock::BedrockProvider;
use crate::google::GoogleProvider;
use crate::ollama::OllamaProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;
use ag_domain::config::{LlmConfig, LlmStartupPolicy, ProviderKind};
use ag_domain::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds all instantiated LLM providers and role assignments.
///
/// When the startup policy is `allow_none`, the registry also records
/// initialization errors so they can be surfaced in `/v1/models/readiness`
/// and the dashboard.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    /// Provider IDs that failed to initialize, with their error messages.
    /// Exposed via [`Self::init_errors`] for dashboard / readiness reporting.
    init_errors: Vec<ProviderInitError>,
}

/// Records a provider that failed to initialize.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider_id: String,
    pub kind: String,
    /// Error message with any potential secrets masked.
    pub error: String,
}

/// Mask substrings that look like API keys or bearer tokens in an error
/// message.  This prevents raw secrets from leaking into logs, readiness
/// endpoints, or dashboard UIs.
fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = if trimmed.len() > 8 {
                format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..])
            } else {
                "***masked***".to_string()
            };
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

impl ProviderRegistry {
    /// Build the registry from the application's [`LlmConfig`].
    ///
    /// Each entry in `config.providers` is instantiated using the appropriate
    /// adapter based on its `kind`. Auth keys are resolved eagerly (env vars
    /// are read at this point).
    ///
    /// Providers that fail to initialize are logged and skipped rather than
    /// aborting the entire startup.
    ///
    /// Async because the Bedrock adapter resolves AWS credentials (which may
    /// itself require network calls) at construction time.
    pub async fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let mut init_errors: Vec<ProviderInitError> = Vec::new();

        for pc in &config.providers {
            let result: Result<Arc<dyn LlmProvider>> = match pc.kind {
                ProviderKind::OpenaiCompat | ProviderKind::AzureOpenai => {
                    OpenAiCompatProvider::from_config(pc)
                        .map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
                }
                ProviderKind::Anthropic => {
                    AnthropicProvider::from_config(pc).map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
                }
                ProviderKind::Google => {
                    GoogleProvider::from_config(pc).map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
                }
                ProviderKind::AwsBedrock => BedrockProvider::from_config(pc)
                    .await
                    .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
                ProviderKind::Ollama => {
                    OllamaProvider::from_config(pc).map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
                }
            };

            match result {
                Ok(provider) => {
                    tracing::info!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        "registered LLM provider"
                    );
                    providers.insert(pc.id.clone(), provider);
                }
                Err(e) => {
                    // Mask potential API keys / secrets before logging or
                    // storing the error, so they never leak to dashboards
                    // or readiness endpoints.
                    let safe_error = mask_secrets(&e.to_string());
                    tracing::warn!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        error = %safe_error,
                        "failed to initialize LLM provider, skipping"
                    );
                    init_errors.push(ProviderInitError {
                        provider_id: pc.id.clone(),
                        kind: format!("{:?}", pc.kind),
                        error: safe_error,
                    });
                }
            }
        }

        if providers.is_empty() && !config.providers.is_empty() {
            // startup_policy takes precedence; AG_REQUIRE_LLM=1 is honored
            // as an env-level override for environments that can't edit config.
            let effective_policy = if config.startup_policy != LlmStartupPolicy::AllowNone {
                config.startup_policy
            } else if std::env::var("AG_REQUIRE_LLM")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false)
            {
                LlmStartupPolicy::RequireOne
            } else {
                LlmStartupPolicy::AllowNone
            };

            match effective_policy {
                LlmStartupPolicy::RequireOne => {
                    return Err(Error::Config(
                        "all configured LLM providers failed to initialize \
                         (startup_policy = require_one)"
                            .into(),
                    ));
                }
                LlmStartupPolicy::AllowNone => {
                    tracing::warn!(
                        failed_providers = init_errors.len(),
                        "no LLM providers initialized (startup_policy = allow_none); \
                         gateway will boot but LLM endpoints will fail until auth \
                         is configured — check /v1/models/readiness for details"
                    );
                }
            }
        }

        Ok(Self {
            providers,
            init_errors,
        })
    }

    /// Look up a provider by its config id.
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// Iterate over all registered providers.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn LlmProvider>)> {
        self.providers.iter()
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// List all registered provider IDs (sorted).
    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Provider initialization errors (empty if all succeeded).
    ///
    /// Surfaced in `/v1/models/readiness` so operators can diagnose missing
    /// API keys or misconfigured providers without needing to scrape startup
    /// logs.
    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_domain::config::{ProviderAuthConfig, ProviderAuthMode, ProviderConfig, ProviderKind};

    fn openai_compat_config(id: &str) -> ProviderConfig {
        ProviderConfig {
            id: id.into(),
            kind: ProviderKind::OpenaiCompat,
            base_url: "https://api.openai.com/v1".into(),
            auth: ProviderAuthConfig {
                mode: ProviderAuthMode::ApiKey,
                key: Some("sk-test-0123456789abcdef".into()),
                ..Default::default()
            },
            default_model: Some("gpt-4o-mini".into()),
            model_aliases: Default::default(),
        }
    }

    fn bad_provider_config(id: &str) -> ProviderConfig {
        // An env-based key whose env var is not set: resolution fails.
        ProviderConfig {
            id: id.into(),
            kind: ProviderKind::Anthropic,
            base_url: "https://api.anthropic.com".into(),
            auth: ProviderAuthConfig {
                mode: ProviderAuthMode::ApiKey,
                env: Some("AG_TEST_REGISTRY_MISSING_ENV_VAR_XYZ".into()),
                ..Default::default()
            },
            default_model: None,
            model_aliases: Default::default(),
        }
    }

    #[tokio::test]
    async fn from_config_registers_successful_providers() {
        let config = LlmConfig {
            providers: vec![openai_compat_config("primary")],
            ..Default::default()
        };
        let registry = ProviderRegistry::from_config(&config).await.unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("primary").is_some());
        assert!(registry.init_errors().is_empty());
    }

    #[tokio::test]
    async fn from_config_skips_failed_providers_and_records_error() {
        let config = LlmConfig {
            providers: vec![openai_compat_config("primary"), bad_provider_config("broken")],
            ..Default::default()
        };
        let registry = ProviderRegistry::from_config(&config).await.unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("broken").is_none());
        assert_eq!(registry.init_errors().len(), 1);
        assert_eq!(registry.init_errors()[0].provider_id, "broken");
    }

    #[tokio::test]
    async fn require_one_errors_when_all_providers_fail() {
        let config = LlmConfig {
            providers: vec![bad_provider_config("broken")],
            startup_policy: LlmStartupPolicy::RequireOne,
            ..Default::default()
        };
        let result = ProviderRegistry::from_config(&config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn allow_none_boots_empty_when_all_providers_fail() {
        let config = LlmConfig {
            providers: vec![bad_provider_config("broken")],
            startup_policy: LlmStartupPolicy::AllowNone,
            ..Default::default()
        };
        let registry = ProviderRegistry::from_config(&config).await.unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.init_errors().len(), 1);
    }

    #[tokio::test]
    async fn no_configured_providers_is_not_an_error() {
        let config = LlmConfig::default();
        let registry = ProviderRegistry::from_config(&config).await.unwrap();
        assert!(registry.is_empty());
        assert!(registry.init_errors().is_empty());
    }

    #[test]
    fn mask_secrets_redacts_long_token_like_substrings() {
        let msg = "request failed with key sk-proj-abcdefghijklmnopqrstuvwxyz";
        let masked = mask_secrets(msg);
        assert!(!masked.contains("abcdefghijklmnopqrstuvwxyz"));
        assert!(masked.contains("sk-p"));
    }
}
