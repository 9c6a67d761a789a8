use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AppConfig, LlmConfig, RoleEntry};
use crate::errors::{DeskAgentError, DeskAgentResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Output cap for the screenshot-to-text pass.
pub const VISION_MAX_TOKENS: u32 = 800;

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    active: String,
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn with_config(llm_config: LlmConfig) -> Self {
        Self {
            providers: HashMap::new(),
            active: llm_config.active_provider.clone(),
            llm_config,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> DeskAgentResult<Arc<dyn LlmProvider>> {
        self.providers.get(&self.active).cloned().ok_or_else(|| {
            DeskAgentError::Config(format!(
                "Active provider '{}' not found in registry",
                self.active
            ))
        })
    }

    /// Provider and call settings for the model that drives the desktop.
    ///
    /// Resolution order:
    /// 1. `[llm.roles.automation]`
    /// 2. the active provider with its default model, streaming
    pub fn automation(&self) -> DeskAgentResult<(Arc<dyn LlmProvider>, CallConfig)> {
        if let Some(entry) = self.llm_config.roles.automation.as_ref() {
            return self.resolve_role("automation", entry, None);
        }

        let provider = self.get_active()?;
        let (model, temperature) = self
            .llm_config
            .providers
            .get(&self.active)
            .map(|p| (p.model.clone(), p.temperature))
            .unwrap_or_else(|| (String::new(), 0.1));
        if model.is_empty() {
            return Err(DeskAgentError::Config(
                "Missing model configuration. Set llm.roles.automation or the active provider model."
                    .into(),
            ));
        }
        tracing::debug!(
            provider = %self.active,
            model = %model,
            "automation role not configured, using active provider"
        );
        Ok((
            provider,
            CallConfig {
                model,
                stream: true,
                temperature,
                max_tokens: None,
            },
        ))
    }

    /// Provider and call settings for screenshot OCR, or `None` when no vision
    /// model is configured. Always non-streaming, temperature 0, capped output.
    pub fn vision(&self) -> DeskAgentResult<Option<(Arc<dyn LlmProvider>, CallConfig)>> {
        let Some(entry) = self.llm_config.roles.vision.as_ref() else {
            return Ok(None);
        };
        let (provider, mut cfg) = self.resolve_role("vision", entry, Some(VISION_MAX_TOKENS))?;
        cfg.stream = false;
        cfg.temperature = 0.0;
        Ok(Some((provider, cfg)))
    }

    fn resolve_role(
        &self,
        role: &str,
        entry: &RoleEntry,
        max_tokens: Option<u32>,
    ) -> DeskAgentResult<(Arc<dyn LlmProvider>, CallConfig)> {
        let provider = self.providers.get(&entry.provider).cloned().ok_or_else(|| {
            DeskAgentError::Config(format!(
                "Role '{}' references unknown provider '{}'",
                role, entry.provider
            ))
        })?;
        let temperature = entry.temperature.unwrap_or_else(|| {
            self.llm_config
                .providers
                .get(&entry.provider)
                .map(|p| p.temperature)
                .unwrap_or(0.1)
        });
        tracing::debug!(
            role = role,
            provider = %entry.provider,
            model = %entry.model,
            stream = entry.stream,
            temperature = temperature,
            "resolved role config"
        );
        Ok((
            provider,
            CallConfig {
                model: entry.model.clone(),
                stream: entry.stream,
                temperature,
                max_tokens,
            },
        ))
    }

    /// Build a registry from the loaded app config.
    /// API keys are read from environment variables named `DESKAGENT_<ID>_API_KEY`.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::with_config(config.llm.clone());
        for (id, entry) in &config.llm.providers {
            let api_key = std::env::var(format!("DESKAGENT_{}_API_KEY", id.to_uppercase()))
                .ok()
                .or_else(|| entry.api_key.clone())
                // OpenAI-compatible servers want a bearer token even when auth is off.
                .unwrap_or_else(|| id.clone());
            let provider = OpenAiCompatibleProvider::new(id.clone(), entry.api_base.clone(), api_key);
            registry.register(Arc::new(provider));
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn registry(toml: &str) -> ProviderRegistry {
        ProviderRegistry::from_config(&parse_config(toml).unwrap())
    }

    #[test]
    fn vision_is_disabled_without_role() {
        let reg = registry("");
        assert!(reg.vision().unwrap().is_none());
    }

    #[test]
    fn vision_role_is_pinned_to_deterministic_capped_calls() {
        let reg = registry(
            r#"
[llm]
active_provider = "ollama"
[llm.providers.ollama]
display_name = "Ollama"
api_base = "http://127.0.0.1:11434/v1/chat/completions"
model = "llama3.1"
temperature = 0.7
[llm.roles.vision]
provider = "ollama"
model = "qwen2.5vl"
"#,
        );
        let (provider, cfg) = reg.vision().unwrap().unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(cfg.model, "qwen2.5vl");
        assert!(!cfg.stream);
        assert_eq!(cfg.temperature, 0.0);
        assert_eq!(cfg.max_tokens, Some(VISION_MAX_TOKENS));

        let (_, auto) = reg.automation().unwrap();
        assert_eq!(auto.model, "llama3.1");
        assert!(auto.stream);
        assert_eq!(auto.temperature, 0.7);
    }

    #[test]
    fn automation_without_any_model_is_a_config_error() {
        let reg = registry("");
        match reg.automation() {
            Err(DeskAgentError::Config(msg)) => assert!(msg.starts_with("Missing model configuration")),
            other => panic!("unexpected: {:?}", other.map(|(_, c)| c)),
        }
    }

    #[test]
    fn role_with_unknown_provider_fails() {
        let reg = registry(
            r#"
[llm.roles.automation]
provider = "nowhere"
model = "x"
"#,
        );
        assert!(matches!(reg.automation(), Err(DeskAgentError::Config(_))));
    }
}
