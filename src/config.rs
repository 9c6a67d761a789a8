use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{DeskAgentError, DeskAgentResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub active_provider: String,
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. `automation` falls back to the active provider;
    /// `vision` has no fallback and OCR stays disabled without it.
    pub roles: RolesConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert(
            "ollama".to_string(),
            ProviderEntry {
                display_name: "Ollama".into(),
                api_base: "http://127.0.0.1:11434/v1/chat/completions".into(),
                model: String::new(),
                temperature: default_temperature(),
                api_key: None,
            },
        );
        Self {
            active_provider: "ollama".into(),
            providers,
            roles: RolesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// Full chat-completions endpoint of an OpenAI-compatible server.
    pub api_base: String,
    /// Default model for this provider (used when no role entry exists).
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (env var DESKAGENT_<ID>_API_KEY wins).
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Tool-calling model that drives the desktop.
    pub automation: Option<RoleEntry>,
    /// Vision model used to turn screenshots into text.
    pub vision: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    pub model: String,
    #[serde(default = "default_true")]
    pub stream: bool,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_max_turn_seconds")]
    pub max_turn_seconds: u64,
    #[serde(default = "default_max_wait_seconds")]
    pub max_wait_seconds: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_turn_seconds: default_max_turn_seconds(),
            max_wait_seconds: default_max_wait_seconds(),
        }
    }
}

fn default_temperature() -> f64 {
    0.1
}

fn default_true() -> bool {
    true
}

fn default_max_steps() -> u32 {
    30
}

fn default_max_turn_seconds() -> u64 {
    300
}

fn default_max_wait_seconds() -> f64 {
    2.0
}

/// Environment overrides, captured once by the caller and applied to a loaded config.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub base_url: Option<String>,
    pub automation_model: Option<String>,
    pub ocr_model: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            base_url: read("DESKAGENT_BASE_URL"),
            automation_model: read("DESKAGENT_MODEL_AUTOMATION"),
            ocr_model: read("DESKAGENT_MODEL_OCR"),
        }
    }
}

impl AppConfig {
    pub fn apply_overrides(&mut self, env: &EnvOverrides) {
        let active = self.llm.active_provider.clone();
        if let Some(url) = &env.base_url {
            if let Some(entry) = self.llm.providers.get_mut(&active) {
                entry.api_base = url.clone();
            }
        }
        if let Some(model) = &env.automation_model {
            self.llm.roles.automation = Some(RoleEntry {
                provider: active.clone(),
                model: model.clone(),
                stream: true,
                temperature: None,
            });
        }
        if let Some(model) = &env.ocr_model {
            self.llm.roles.vision = Some(RoleEntry {
                provider: active,
                model: model.clone(),
                stream: false,
                temperature: Some(0.0),
            });
        }
    }
}

fn resolve_config_path() -> DeskAgentResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("deskagent").join("config.toml");
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in user config dir");
            return Ok(candidate);
        }
    }

    Err(DeskAgentError::Config(
        "config.toml not found next to executable, in working directory or user config dir"
            .into(),
    ))
}

pub fn parse_config(content: &str) -> DeskAgentResult<AppConfig> {
    Ok(toml::from_str(content)?)
}

pub fn load_config() -> DeskAgentResult<AppConfig> {
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}
