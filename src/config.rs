use std::{env, fs, net::SocketAddr, path::Path, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, LLMError};
use crate::providers::{openai::OpenAI, scripted::ScriptedProvider, LLMProvider};

const DEFAULT_BIND: &str = "0.0.0.0:3000";
const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    #[serde(rename = "openai")]
    OpenAI,
    /// Replies with `scripted_responses` in order; no network access.
    Scripted,
}

/// Relay server settings. Precedence: CLI flags, then environment, then the YAML
/// file, then defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind: String,
    pub model: String,
    pub provider: ProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scripted_responses: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            model: DEFAULT_MODEL.to_string(),
            provider: ProviderKind::default(),
            temperature: None,
            max_tokens: None,
            scripted_responses: Vec::new(),
        }
    }
}

impl RelayConfig {
    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Applies `JOURNEYGRID_BIND`, `JOURNEYGRID_MODEL` and `JOURNEYGRID_PROVIDER`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(bind) = env::var("JOURNEYGRID_BIND") {
            self.bind = bind;
        }
        if let Ok(model) = env::var("JOURNEYGRID_MODEL") {
            self.model = model;
        }
        if let Ok(provider) = env::var("JOURNEYGRID_PROVIDER") {
            match provider.to_ascii_lowercase().as_str() {
                "openai" => self.provider = ProviderKind::OpenAI,
                "scripted" => self.provider = ProviderKind::Scripted,
                other => tracing::warn!(
                    provider = other,
                    "unknown JOURNEYGRID_PROVIDER, keeping {:?}",
                    self.provider
                ),
            }
        }
        self
    }

    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.bind.clone()))
    }

    /// OpenAI credentials come from `OPENAI_API_KEY` and friends.
    pub fn build_provider(&self) -> Result<Arc<dyn LLMProvider>, LLMError> {
        Ok(match self.provider {
            ProviderKind::OpenAI => Arc::new(OpenAI::from_env()?),
            ProviderKind::Scripted => Arc::new(ScriptedProvider::from_responses(
                self.scripted_responses.iter().cloned(),
            )),
        })
    }
}
