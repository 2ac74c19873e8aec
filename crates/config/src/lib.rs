//! Configuration loading, validation, and management for Switchboard.
//!
//! Loads configuration from `~/.switchboard/config.toml` with environment
//! variable overrides. Validates all settings at startup; nothing here is
//! re-read while serving requests.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use switchboard_core::{CLASSIFIER_TEMPERATURE, ModelDescriptor, ProviderFamily, TaskCategory};

/// The root configuration structure.
///
/// Maps directly to `~/.switchboard/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Temperature used when a chat request does not specify one
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Provider credentials keyed by family ("openai", "anthropic", "google", "perplexity")
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Every model the service may dispatch to
    #[serde(default = "default_models")]
    pub models: Vec<ModelDescriptor>,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Custom model pricing overrides (model name → pricing)
    #[serde(default)]
    pub pricing: HashMap<String, PricingOverrideConfig>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Allowed CORS origins. Empty = any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            cors_origins: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// SQLite database holding accounts, usage, conversations and profiles.
    /// `None` means `~/.switchboard/switchboard.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Credits given to an account on first use
    #[serde(default = "default_initial_grant")]
    pub initial_grant: i64,
}

fn default_initial_grant() -> i64 {
    switchboard_core::INITIAL_GRANT
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            initial_grant: default_initial_grant(),
        }
    }
}

impl LedgerConfig {
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("switchboard.db"))
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Model used to classify the user's intent
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,

    /// Output token ceiling for the classification call
    #[serde(default = "default_classifier_max_tokens")]
    pub classifier_max_tokens: u32,

    /// Model used when a client names a model that is not configured
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,

    /// Category name → model id
    #[serde(default = "default_routing_table")]
    pub table: BTreeMap<String, String>,
}

fn default_classifier_model() -> String {
    "gpt-4o-mini".into()
}
fn default_classifier_max_tokens() -> u32 {
    10
}
fn default_fallback_model() -> String {
    "gpt-4o".into()
}

fn default_routing_table() -> BTreeMap<String, String> {
    [
        (TaskCategory::Simple, "gpt-5-nano"),
        (TaskCategory::General, "gpt-5-mini"),
        (TaskCategory::Coding, "claude-sonnet-4-5"),
        (TaskCategory::Writing, "claude-sonnet-4-5"),
        (TaskCategory::Analysis, "gpt-5"),
        (TaskCategory::Science, "gemini-2.5-pro"),
        (TaskCategory::Realtime, "sonar-pro"),
    ]
    .into_iter()
    .map(|(c, m)| (c.as_str().to_string(), m.to_string()))
    .collect()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            classifier_model: default_classifier_model(),
            classifier_max_tokens: default_classifier_max_tokens(),
            fallback_model: default_fallback_model(),
            table: default_routing_table(),
        }
    }
}

fn default_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new("gpt-4o", ProviderFamily::OpenAi),
        ModelDescriptor::new("gpt-4o-mini", ProviderFamily::OpenAi),
        ModelDescriptor::new("gpt-5-nano", ProviderFamily::OpenAi).fixed(1.0),
        ModelDescriptor::new("gpt-5-mini", ProviderFamily::OpenAi).fixed(1.0),
        ModelDescriptor::new("gpt-5", ProviderFamily::OpenAi).fixed(1.0),
        ModelDescriptor::new("claude-sonnet-4-5", ProviderFamily::Anthropic).with_range(0.0, 1.0),
        ModelDescriptor::new("claude-haiku-4-5", ProviderFamily::Anthropic).with_range(0.0, 1.0),
        ModelDescriptor::new("gemini-2.5-pro", ProviderFamily::Google),
        ModelDescriptor::new("gemini-2.5-flash", ProviderFamily::Google),
        ModelDescriptor::new("sonar-pro", ProviderFamily::Perplexity).with_range(0.0, 1.99),
    ]
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_search_endpoint() -> String {
    "https://api.search.brave.com/res/v1/web/search".into()
}
fn default_max_results() -> usize {
    5
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            endpoint: default_search_endpoint(),
            max_results: default_max_results(),
        }
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("enabled", &self.enabled)
            .field("api_key", &redact(&self.api_key))
            .field("endpoint", &self.endpoint)
            .field("max_results", &self.max_results)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Qdrant base URL. Unset disables document retrieval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qdrant_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

fn default_collection() -> String {
    "switchboard_documents".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_top_k() -> usize {
    5
}
fn default_score_threshold() -> f32 {
    0.7
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            qdrant_url: None,
            api_key: None,
            collection: default_collection(),
            embedding_model: default_embedding_model(),
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
        }
    }
}

impl std::fmt::Debug for RetrievalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalConfig")
            .field("qdrant_url", &self.qdrant_url)
            .field("api_key", &redact(&self.api_key))
            .field("collection", &self.collection)
            .field("embedding_model", &self.embedding_model)
            .field("top_k", &self.top_k)
            .field("score_threshold", &self.score_threshold)
            .finish()
    }
}

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    /// Price per 1M input tokens in USD
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD
    pub output_per_m: f64,
}

/// Environment variables that supply provider keys, by family.
const PROVIDER_KEY_VARS: [(ProviderFamily, &str); 4] = [
    (ProviderFamily::OpenAi, "OPENAI_API_KEY"),
    (ProviderFamily::Anthropic, "ANTHROPIC_API_KEY"),
    (ProviderFamily::Google, "GOOGLE_API_KEY"),
    (ProviderFamily::Perplexity, "PERPLEXITY_API_KEY"),
];

impl AppConfig {
    /// Load configuration from the default path (~/.switchboard/config.toml)
    /// and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides. Keys already present in the file win
    /// for providers; `SWITCHBOARD_*` variables always win.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        for (family, name) in PROVIDER_KEY_VARS {
            let entry = self.providers.entry(family.as_str().to_string()).or_default();
            if entry.api_key.is_none() {
                entry.api_key = var(name);
            }
        }

        if self.search.api_key.is_none() {
            self.search.api_key = var("BRAVE_API_KEY");
        }
        if self.retrieval.qdrant_url.is_none() {
            self.retrieval.qdrant_url = var("QDRANT_URL");
        }
        if self.retrieval.api_key.is_none() {
            self.retrieval.api_key = var("QDRANT_API_KEY");
        }

        if let Some(port) = var("SWITCHBOARD_PORT").and_then(|p| p.parse().ok()) {
            self.gateway.port = port;
        }
        if let Some(host) = var("SWITCHBOARD_HOST") {
            self.gateway.host = host;
        }
        if let Some(path) = var("SWITCHBOARD_DATABASE") {
            self.ledger.database_path = Some(PathBuf::from(path));
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".switchboard")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.ledger.initial_grant < 1 {
            return Err(ConfigError::ValidationError(
                "ledger.initial_grant must be at least 1".into(),
            ));
        }

        for key in self.providers.keys() {
            key.parse::<ProviderFamily>().map_err(ConfigError::ValidationError)?;
        }

        for model in &self.models {
            if !model.temperature_range.is_valid() {
                return Err(ConfigError::ValidationError(format!(
                    "model '{}' needs a finite temperature range with min <= max",
                    model.id
                )));
            }
            if !model.fixed_temperature.is_finite() {
                return Err(ConfigError::ValidationError(format!(
                    "model '{}' has a non-finite fixed_temperature",
                    model.id
                )));
            }
        }

        let known = |id: &str| self.models.iter().any(|m| m.id == id);
        for id in [&self.routing.classifier_model, &self.routing.fallback_model] {
            if !known(id) {
                return Err(ConfigError::ValidationError(format!(
                    "routing refers to unknown model '{id}'"
                )));
            }
        }
        if let Some(classifier) = self.model(&self.routing.classifier_model) {
            if !classifier.accepts_temperature(CLASSIFIER_TEMPERATURE) {
                return Err(ConfigError::ValidationError(format!(
                    "routing.classifier_model '{}' cannot run at temperature {CLASSIFIER_TEMPERATURE}",
                    classifier.id
                )));
            }
        }

        for (category, id) in &self.routing.table {
            category.parse::<TaskCategory>().map_err(ConfigError::ValidationError)?;
            if !known(id) {
                return Err(ConfigError::ValidationError(format!(
                    "routing.table.{category} refers to unknown model '{id}'"
                )));
            }
        }
        for category in TaskCategory::ALL {
            if !self.routing.table.contains_key(category.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "routing.table has no model for '{category}'"
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.retrieval.score_threshold) {
            return Err(ConfigError::ValidationError(
                "retrieval.score_threshold must be between 0.0 and 1.0".into(),
            ));
        }

        Ok(())
    }

    /// Look up a configured model by id.
    pub fn model(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Credentials for a provider family, if any were configured.
    pub fn provider(&self, family: ProviderFamily) -> Option<&ProviderConfig> {
        self.providers.get(family.as_str())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_temperature: default_temperature(),
            gateway: GatewayConfig::default(),
            ledger: LedgerConfig::default(),
            providers: HashMap::new(),
            models: default_models(),
            routing: RoutingConfig::default(),
            search: SearchConfig::default(),
            retrieval: RetrievalConfig::default(),
            pricing: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
