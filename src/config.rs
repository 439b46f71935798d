//! Provider configuration helpers, plus the merged "effective
//! configuration" view (`getEffectiveConfiguration()`): session/project/
//! agent overrides are opaque external concerns, but the merge rule —
//! most-specific layer wins — is part of the core.

use std::env;

/// Supported local OpenAI-compatible providers. Used only to pick
/// sensible defaults; any OpenAI-compatible endpoint can be reached by
/// supplying `base_url` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    LmStudio,
    Ollama,
    LlamaCpp,
    VLlm,
}

impl Provider {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::LmStudio => "http://localhost:1234/v1",
            Provider::Ollama => "http://localhost:11434/v1",
            Provider::LlamaCpp => "http://localhost:8080/v1",
            Provider::VLlm => "http://localhost:8000/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::LmStudio => "local-model",
            Provider::Ollama => "llama3",
            Provider::LlamaCpp => "default",
            Provider::VLlm => "default",
        }
    }
}

/// Resolve the base URL for API requests. Priority: `OPEN_AGENT_BASE_URL`
/// environment variable > provider default > `fallback`.
pub fn get_base_url(provider: Option<Provider>, fallback: Option<&str>) -> String {
    if let Ok(url) = env::var("OPEN_AGENT_BASE_URL") {
        if !url.is_empty() {
            return url;
        }
    }
    if let Some(p) = provider {
        return p.default_base_url().to_string();
    }
    fallback.unwrap_or("http://localhost:1234/v1").to_string()
}

/// Resolve the model name for requests. If `prefer_env` is true,
/// `OPEN_AGENT_MODEL` wins over `fallback`; otherwise `fallback` wins.
pub fn get_model(fallback: Option<&str>, prefer_env: bool) -> String {
    if prefer_env {
        if let Ok(model) = env::var("OPEN_AGENT_MODEL") {
            if !model.is_empty() {
                return model;
            }
        }
    }
    fallback.unwrap_or("local-model").to_string()
}

/// One layer of configuration override (project, session, or agent).
/// `None` fields mean "this layer has no opinion"; merge falls through
/// to the next, less-specific layer.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayer {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub streaming_enabled: Option<bool>,
    pub context_limit: Option<u64>,
}

/// The fully-resolved configuration the Agent actually runs a turn
/// with (`getEffectiveConfiguration()`).
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfiguration {
    pub model: String,
    pub base_url: String,
    pub streaming_enabled: bool,
    pub context_limit: u64,
}

impl EffectiveConfiguration {
    /// Merge project → session → agent layers over a set of defaults,
    /// the most specific (agent) layer winning per field.
    pub fn merge(
        defaults: &EffectiveConfiguration,
        project: &ConfigLayer,
        session: &ConfigLayer,
        agent: &ConfigLayer,
    ) -> EffectiveConfiguration {
        let model = agent
            .model
            .clone()
            .or_else(|| session.model.clone())
            .or_else(|| project.model.clone())
            .unwrap_or_else(|| defaults.model.clone());
        let base_url = agent
            .base_url
            .clone()
            .or_else(|| session.base_url.clone())
            .or_else(|| project.base_url.clone())
            .unwrap_or_else(|| defaults.base_url.clone());
        let streaming_enabled = agent
            .streaming_enabled
            .or(session.streaming_enabled)
            .or(project.streaming_enabled)
            .unwrap_or(defaults.streaming_enabled);
        let context_limit = agent
            .context_limit
            .or(session.context_limit)
            .or(project.context_limit)
            .unwrap_or(defaults.context_limit);

        EffectiveConfiguration {
            model,
            base_url,
            streaming_enabled,
            context_limit,
        }
    }
}
