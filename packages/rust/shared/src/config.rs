//! Application configuration for ShopAlly.
//!
//! User config lives at `~/.shopally/shopally.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets never live in the file; only the names of the env vars holding them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShopAllyError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "shopally.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".shopally";

// ---------------------------------------------------------------------------
// Config structs (matching shopally.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    /// Search and enrichment pipeline.
    #[serde(default)]
    pub search: SearchConfig,

    /// Price-drop alert scanner.
    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub push: PushConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// libSQL database file holding subscriptions and the cache.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.shopally/shopally.db".into()
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Maximum enrichment tasks in flight.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Sustained enrichment calls per second.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Token-bucket burst size.
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Whole-request deadline.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: u64,

    /// Items must score strictly above this to be returned.
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: u8,

    /// Extra attempts after a rate-limited enrichment call.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff unit; attempt `n` waits `n * retry_backoff_ms`.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_language")]
    pub default_language: String,

    /// Languages a detected query language may switch the response to.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            request_timeout_secs: default_request_timeout(),
            cache_ttl_hours: default_cache_ttl_hours(),
            relevance_threshold: default_relevance_threshold(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
            default_language: default_language(),
            languages: default_languages(),
        }
    }
}

fn default_max_concurrency() -> usize {
    8
}
fn default_requests_per_second() -> f64 {
    5.0
}
fn default_burst() -> u32 {
    1
}
fn default_request_timeout() -> u64 {
    120
}
fn default_cache_ttl_hours() -> u64 {
    24
}
fn default_relevance_threshold() -> u8 {
    30
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff() -> u64 {
    1000
}
fn default_language() -> String {
    "en".into()
}
fn default_languages() -> Vec<String> {
    vec!["en".into(), "am".into()]
}

/// `[alerts]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Seconds between scans.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Subscriptions per scan page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Item ids per upstream price request.
    #[serde(default = "default_fetch_chunk")]
    pub fetch_chunk_size: usize,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            page_size: default_page_size(),
            fetch_chunk_size: default_fetch_chunk(),
        }
    }
}

fn default_interval() -> u64 {
    4 * 60 * 60
}
fn default_page_size() -> usize {
    500
}
fn default_fetch_chunk() -> usize {
    20
}

/// `[catalog]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_url")]
    pub base_url: String,

    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_catalog_url(),
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_catalog_url() -> String {
    "http://localhost:8081/".into()
}
fn default_http_timeout() -> u64 {
    12
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// API keys are read from `<prefix>1`, `<prefix>2`, ... until one is unset.
    #[serde(default = "default_api_key_env_prefix")]
    pub api_key_env_prefix: String,

    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_model(),
            api_key_env_prefix: default_api_key_env_prefix(),
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_llm_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta/".into()
}
fn default_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_api_key_env_prefix() -> String {
    "GEMINI_API_KEY_".into()
}

/// `[push]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Message send endpoint (FCM v1 `messages:send` shape).
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Name of the env var holding the bearer token.
    #[serde(default = "default_push_token_env")]
    pub auth_token_env: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            auth_token_env: default_push_token_env(),
        }
    }
}

fn default_push_token_env() -> String {
    "PUSH_AUTH_TOKEN".into()
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime enrichment configuration.
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub max_concurrency: usize,
    pub requests_per_second: f64,
    pub burst: u32,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub cache_ttl: Duration,
    pub relevance_threshold: u8,
    pub request_timeout: Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for EnrichmentConfig {
    fn from(config: &AppConfig) -> Self {
        let search = &config.search;
        Self {
            max_concurrency: search.max_concurrency.max(1),
            requests_per_second: search.requests_per_second,
            burst: search.burst.max(1),
            max_retries: search.max_retries,
            retry_backoff: Duration::from_millis(search.retry_backoff_ms),
            cache_ttl: Duration::from_secs(search.cache_ttl_hours * 60 * 60),
            relevance_threshold: search.relevance_threshold,
            request_timeout: Duration::from_secs(search.request_timeout_secs),
        }
    }
}

/// Runtime alert scanner configuration.
#[derive(Debug, Clone)]
pub struct AlertScanConfig {
    pub interval: Duration,
    pub page_size: usize,
    pub fetch_chunk_size: usize,
}

impl Default for AlertScanConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for AlertScanConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.alerts.interval_secs),
            page_size: config.alerts.page_size.max(1),
            fetch_chunk_size: config.alerts.fetch_chunk_size.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.shopally/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ShopAllyError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.shopally/shopally.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ShopAllyError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        ShopAllyError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ShopAllyError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ShopAllyError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ShopAllyError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

impl AppConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(self.search.requests_per_second > 0.0) {
            return Err(ShopAllyError::config(
                "search.requests_per_second must be greater than zero",
            ));
        }
        if self.search.relevance_threshold > 100 {
            return Err(ShopAllyError::config(
                "search.relevance_threshold must be between 0 and 100",
            ));
        }
        for (name, value) in [
            ("catalog.base_url", Some(&self.catalog.base_url)),
            ("llm.endpoint", Some(&self.llm.endpoint)),
            ("push.endpoint", self.push.endpoint.as_ref()),
        ] {
            if let Some(value) = value {
                url::Url::parse(value)
                    .map_err(|e| ShopAllyError::config(format!("{name} '{value}': {e}")))?;
            }
        }
        Ok(())
    }

    /// Database path with a leading `~/` expanded to the home directory.
    pub fn db_path(&self) -> Result<PathBuf> {
        match self.storage.db_path.strip_prefix("~/") {
            Some(rest) => {
                let home = dirs::home_dir()
                    .ok_or_else(|| ShopAllyError::config("could not determine home directory"))?;
                Ok(home.join(rest))
            }
            None => Ok(PathBuf::from(&self.storage.db_path)),
        }
    }
}
