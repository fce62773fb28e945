//! Configuration loading for skaldd.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.skald/config.toml` (user)
//! 3. `/etc/skald/config.toml` (system)
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.skald/secrets.toml` (user, must be 0600)
//! 2. `/etc/skald/secrets.toml` (system, must be 0600)

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use llm::builder::LLMBackend;
use serde::Deserialize;
use tracing::info;

use crate::cache::CacheConfig;
use crate::channel::{ChannelConfig, DEFAULT_MAX_BUFFERED_BYTES};
use crate::providers::{LlmChatProvider, ProviderChain, RetryConfig};
use crate::registry::{RegistryConfig, SessionConfig};
use crate::service::ServiceConfig;
use crate::{Result, SkaldError};

/// Daemon configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub streams: StreamsSection,
    #[serde(default)]
    pub sessions: SessionsSection,
}

/// Server network configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1:9741).
    #[serde(default = "default_address")]
    pub address: String,
    /// Backend request timeout in seconds (default: 120).
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    /// Interval of the registry and session sweep in seconds (default: 15).
    #[serde(default = "default_housekeeping")]
    pub housekeeping_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            request_timeout_secs: default_timeout(),
            housekeeping_interval_secs: default_housekeeping(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:9741".to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_housekeeping() -> u64 {
    15
}

/// What gets generated, independent of the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    /// Model id sent to every provider in the chain.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: usize,
    #[serde(default = "default_keywords_max_words")]
    pub keywords_max_words: usize,
    #[serde(default)]
    pub cache_streamed: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: None,
            default_max_tokens: default_max_tokens(),
            keywords_max_words: default_keywords_max_words(),
            cache_streamed: false,
        }
    }
}

fn default_max_tokens() -> usize {
    400
}

fn default_keywords_max_words() -> usize {
    1000
}

/// Provider configurations. Configured providers form the fallback chain in
/// the order openrouter, anthropic, openai, google, ollama.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openrouter: Option<ApiProviderConfig>,
    #[serde(default)]
    pub anthropic: Option<ApiProviderConfig>,
    #[serde(default)]
    pub openai: Option<ApiProviderConfig>,
    #[serde(default)]
    pub google: Option<ApiProviderConfig>,
    #[serde(default)]
    pub ollama: Option<OllamaConfig>,
}

/// API provider configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiProviderConfig {
    /// Endpoint override, e.g. for a proxy.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Ollama-specific configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaConfig {
    /// Ollama base URL (default: http://localhost:11434).
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

/// `[retry]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            jitter: true,
        }
    }
}

impl RetrySection {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .max_attempts(self.max_attempts)
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_secs(self.max_delay_secs))
            .jitter(self.jitter)
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// `[cache]` table: the translation cache.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_cache_entries")]
    pub max_entries: u64,
    #[serde(default = "default_cache_idle")]
    pub time_to_idle_secs: u64,
    #[serde(default = "default_cache_live")]
    pub time_to_live_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
            time_to_idle_secs: default_cache_idle(),
            time_to_live_secs: default_cache_live(),
        }
    }
}

impl CacheSection {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .max_entries(self.max_entries)
            .time_to_idle(Duration::from_secs(self.time_to_idle_secs))
            .time_to_live(Duration::from_secs(self.time_to_live_secs))
    }
}

fn default_cache_entries() -> u64 {
    128
}

fn default_cache_idle() -> u64 {
    30 * 60
}

fn default_cache_live() -> u64 {
    120 * 60
}

/// `[streams]` table: per-session registries and their channels.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamsSection {
    #[serde(default = "default_streams_per_session")]
    pub max_per_session: u64,
    #[serde(default = "default_stream_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_buffered_bytes")]
    pub max_buffered_bytes: usize,
}

impl Default for StreamsSection {
    fn default() -> Self {
        Self {
            max_per_session: default_streams_per_session(),
            ttl_secs: default_stream_ttl(),
            max_buffered_bytes: default_buffered_bytes(),
        }
    }
}

fn default_streams_per_session() -> u64 {
    10
}

fn default_stream_ttl() -> u64 {
    60
}

fn default_buffered_bytes() -> usize {
    DEFAULT_MAX_BUFFERED_BYTES
}

/// `[sessions]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionsSection {
    #[serde(default = "default_session_idle")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u64,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_session_idle(),
            max_sessions: default_max_sessions(),
        }
    }
}

fn default_session_idle() -> u64 {
    30 * 60
}

fn default_max_sessions() -> u64 {
    10_000
}

/// Secrets configuration (API keys).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub openrouter: Option<ApiKeySecret>,
    #[serde(default)]
    pub anthropic: Option<ApiKeySecret>,
    #[serde(default)]
    pub openai: Option<ApiKeySecret>,
    #[serde(default)]
    pub google: Option<ApiKeySecret>,
}

/// A single API key secret.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
}

/// Provider name → environment variable name mapping.
const PROVIDER_ENV_VARS: &[(&str, &str)] = &[
    ("openrouter", "OPENROUTER_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("openai", "OPENAI_API_KEY"),
    ("google", "GOOGLE_API_KEY"),
];

impl Config {
    /// Load configuration from the standard locations.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        let content = fs::read_to_string(&path).map_err(|e| {
            SkaldError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::parse(&content)
            .map_err(|e| SkaldError::Configuration(format!("In config file {path:?}: {e}")))
    }

    /// Parse a TOML document.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| SkaldError::Configuration(format!("Failed to parse config: {e}")))
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(SkaldError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".skald").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/skald/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(SkaldError::Configuration(
            "No config file found. Create ~/.skald/config.toml or /etc/skald/config.toml"
                .to_string(),
        ))
    }

    /// The model to generate with; required.
    pub fn model(&self) -> Result<&str> {
        self.generation
            .model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| SkaldError::Configuration("generation.model is not set".into()))
    }

    pub fn service_config(&self) -> Result<ServiceConfig> {
        Ok(ServiceConfig::new(self.model()?)
            .default_max_tokens(self.generation.default_max_tokens)
            .keywords_max_words(self.generation.keywords_max_words)
            .cache_streamed(self.generation.cache_streamed)
            .channel(ChannelConfig::new().max_buffered_bytes(self.streams.max_buffered_bytes))
            .cache(self.cache.to_cache_config()))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new()
            .idle_timeout(Duration::from_secs(self.sessions.idle_timeout_secs))
            .max_sessions(self.sessions.max_sessions)
            .registry(
                RegistryConfig::new()
                    .max_streams(self.streams.max_per_session)
                    .ttl(Duration::from_secs(self.streams.ttl_secs)),
            )
    }

    /// Build the fallback chain of every configured provider.
    ///
    /// A configured API provider without a key is an error.
    pub fn provider_chain(&self, secrets: &Secrets) -> Result<ProviderChain> {
        let timeout = self.server.request_timeout_secs;
        let mut chain = ProviderChain::new().with_retry(self.retry.to_retry_config());

        let api_providers = [
            ("openrouter", LLMBackend::OpenRouter, &self.providers.openrouter),
            ("anthropic", LLMBackend::Anthropic, &self.providers.anthropic),
            ("openai", LLMBackend::OpenAI, &self.providers.openai),
            ("google", LLMBackend::Google, &self.providers.google),
        ];
        for (name, backend, section) in api_providers {
            let Some(section) = section else { continue };
            let key = secrets.api_key(name).ok_or_else(|| {
                SkaldError::Configuration(format!("provider {name} is configured but has no API key"))
            })?;
            let mut provider = LlmChatProvider::new(backend, Some(key), name).timeout_secs(timeout);
            if let Some(ref url) = section.base_url {
                provider = provider.base_url(url);
            }
            info!(provider = name, "provider enabled");
            chain.push(Arc::new(provider));
        }

        if let Some(ref ollama) = self.providers.ollama {
            let provider = LlmChatProvider::new(LLMBackend::Ollama, None::<String>, "ollama")
                .base_url(&ollama.base_url)
                .timeout_secs(timeout);
            info!(provider = "ollama", url = %ollama.base_url, "provider enabled");
            chain.push(Arc::new(provider));
        }

        if chain.is_empty() {
            return Err(SkaldError::NoProvider);
        }
        Ok(chain)
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists (keys may come from env vars).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".skald").join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/skald/secrets.toml");
        if system_secrets.exists() {
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Load one secrets file, refusing it if others can read it.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            SkaldError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            SkaldError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            SkaldError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(SkaldError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// API key for a provider, falling back to its environment variable.
    pub fn api_key(&self, provider: &str) -> Option<String> {
        let from_file = match provider {
            "openrouter" => self.openrouter.as_ref(),
            "anthropic" => self.anthropic.as_ref(),
            "openai" => self.openai.as_ref(),
            "google" => self.google.as_ref(),
            _ => None,
        }
        .map(|s| s.api_key.clone());

        from_file.or_else(|| {
            PROVIDER_ENV_VARS
                .iter()
                .find(|(name, _)| *name == provider)
                .and_then(|(_, env_var)| std::env::var(env_var).ok())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.server.address, "127.0.0.1:9741");
        assert_eq!(config.server.request_timeout_secs, 120);
        assert_eq!(config.generation.default_max_tokens, 400);
        assert!(!config.generation.cache_streamed);
        assert_eq!(config.cache.max_entries, 128);
        assert_eq!(config.streams.max_per_session, 10);
        assert_eq!(config.streams.ttl_secs, 60);
        assert_eq!(config.sessions.max_sessions, 10_000);
    }

    #[test]
    fn parse_minimal_config() {
        let config = Config::parse(
            r#"
            [generation]
            model = "anthropic/claude-sonnet-4"
        "#,
        )
        .unwrap();
        assert_eq!(config.model().unwrap(), "anthropic/claude-sonnet-4");
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn parse_full_config() {
        let config = Config::parse(
            r#"
            [server]
            address = "0.0.0.0:8080"
            request_timeout_secs = 30

            [generation]
            model = "llama3"
            default_max_tokens = 800
            cache_streamed = true

            [providers.ollama]
            base_url = "http://gpu-box:11434"

            [retry]
            max_attempts = 5
            jitter = false

            [cache]
            max_entries = 512
            time_to_idle_secs = 60

            [streams]
            max_per_session = 4
            ttl_secs = 10
            max_buffered_bytes = 4096

            [sessions]
            idle_timeout_secs = 300
        "#,
        )
        .unwrap();

        assert_eq!(config.server.address, "0.0.0.0:8080");
        assert_eq!(
            config.providers.ollama.as_ref().unwrap().base_url,
            "http://gpu-box:11434"
        );

        let service = config.service_config().unwrap();
        assert_eq!(service.model, "llama3");
        assert_eq!(service.default_max_tokens, 800);
        assert!(service.cache_streamed);
        assert_eq!(service.channel.max_buffered_bytes, 4096);
        assert_eq!(service.cache.max_entries, 512);
        assert_eq!(service.cache.time_to_idle, Duration::from_secs(60));
        assert_eq!(service.cache.time_to_live, Duration::from_secs(120 * 60));

        let sessions = config.session_config();
        assert_eq!(sessions.idle_timeout, Duration::from_secs(300));
        assert_eq!(sessions.registry.max_streams, 4);
        assert_eq!(sessions.registry.ttl, Duration::from_secs(10));

        let retry = config.retry.to_retry_config();
        assert_eq!(retry.max_attempts, 5);
        assert!(!retry.jitter);

        let chain = config.provider_chain(&Secrets::default()).unwrap();
        assert_eq!(chain.provider_names(), ["ollama"]);
    }

    #[test]
    fn missing_model_is_a_configuration_error() {
        let config = Config::default();
        assert!(matches!(
            config.service_config(),
            Err(SkaldError::Configuration(_))
        ));
    }

    #[test]
    fn no_provider_configured() {
        let config = Config::default();
        assert!(matches!(
            config.provider_chain(&Secrets::default()),
            Err(SkaldError::NoProvider)
        ));
    }

    #[test]
    fn parse_secrets() {
        let secrets: Secrets = toml::from_str(
            r#"
            [openrouter]
            api_key = "sk-or-test-key"
        "#,
        )
        .unwrap();
        assert_eq!(
            secrets.openrouter.as_ref().unwrap().api_key,
            "sk-or-test-key"
        );
        assert!(secrets.openai.is_none());
    }

    #[test]
    fn api_key_from_secrets() {
        let secrets = Secrets {
            openrouter: Some(ApiKeySecret {
                api_key: "from-file".to_string(),
            }),
            ..Default::default()
        };
        assert_eq!(secrets.api_key("openrouter"), Some("from-file".to_string()));
        assert_eq!(secrets.api_key("nonexistent"), None);
    }

    #[test]
    fn config_not_found_returns_error() {
        let err = Config::load(Some(Path::new("/nonexistent/config.toml")))
            .unwrap_err()
            .to_string();
        assert!(err.contains("Config file not found"));
    }

    #[cfg(unix)]
    #[test]
    fn world_readable_secrets_are_rejected() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[openai]\napi_key = \"k\"").unwrap();
        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o644)).unwrap();
        assert!(Secrets::load_from_file(file.path()).is_err());

        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o600)).unwrap();
        let secrets = Secrets::load_from_file(file.path()).unwrap();
        assert_eq!(secrets.api_key("openai"), Some("k".to_string()));
    }
}
