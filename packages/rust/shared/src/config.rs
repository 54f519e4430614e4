//! Application configuration for sitekb.
//!
//! User config lives at `~/.sitekb/sitekb.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SiteKbError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sitekb.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sitekb";

// ---------------------------------------------------------------------------
// Config structs (matching sitekb.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Fetch and batching behavior.
    #[serde(default)]
    pub crawl: CrawlSection,

    /// Embedding provider selection.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Query-server generation and registration.
    #[serde(default)]
    pub server: ServerConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory holding one subdirectory per knowledge base.
    #[serde(default = "default_kb_root")]
    pub kb_root: String,

    /// Directory where generated query-server descriptors are written.
    #[serde(default = "default_servers_dir")]
    pub servers_dir: String,

    /// Default page budget per crawl.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Default link depth for recursive crawls.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            kb_root: default_kb_root(),
            servers_dir: default_servers_dir(),
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
        }
    }
}

fn default_kb_root() -> String {
    "~/.sitekb/knowledge-bases".into()
}
fn default_servers_dir() -> String {
    "~/.sitekb/servers".into()
}
fn default_max_pages() -> usize {
    100
}
fn default_max_depth() -> u32 {
    3
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSection {
    /// Per-page fetch timeout.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Timeout for HEAD probes during strategy detection.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Timeout for fetching a sitemap document.
    #[serde(default = "default_sitemap_timeout")]
    pub sitemap_timeout_secs: u64,

    /// Number of pages fetched concurrently in sitemap mode.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Ask intermediaries not to serve cached responses.
    #[serde(default = "default_true")]
    pub bypass_cache: bool,

    /// Drop links to other hosts from extraction results.
    #[serde(default = "default_true")]
    pub exclude_external_links: bool,

    /// Drop links to social networks from extraction results.
    #[serde(default = "default_true")]
    pub exclude_social_links: bool,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout(),
            probe_timeout_secs: default_probe_timeout(),
            sitemap_timeout_secs: default_sitemap_timeout(),
            batch_size: default_batch_size(),
            bypass_cache: true,
            exclude_external_links: true,
            exclude_social_links: true,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_probe_timeout() -> u64 {
    10
}
fn default_sitemap_timeout() -> u64 {
    30
}
fn default_batch_size() -> usize {
    10
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Local model name. `feature-hash-<dims>` selects the built-in hashing
    /// embedder; sentence-transformer names such as `all-MiniLM-L6-v2` need a
    /// build with the `local-models` feature.
    #[serde(default = "default_local_model")]
    pub model: String,

    /// Where downloaded local model weights are cached.
    #[serde(default = "default_model_cache_dir")]
    pub model_cache_dir: String,

    /// Use the external (OpenAI-compatible) provider instead of the local model.
    #[serde(default)]
    pub use_external: bool,

    /// Model requested from the external provider.
    #[serde(default = "default_external_model")]
    pub external_model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of the external embeddings API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout for the external provider.
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_local_model(),
            model_cache_dir: default_model_cache_dir(),
            use_external: false,
            external_model: default_external_model(),
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_local_model() -> String {
    "feature-hash-384".into()
}
fn default_model_cache_dir() -> String {
    "~/.sitekb/models".into()
}
fn default_external_model() -> String {
    "text-embedding-3-small".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_embedding_timeout() -> u64 {
    60
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Command used to register a generated server with the host application.
    ///
    /// Each element may contain `{name}`, `{manifest}` and `{kb_path}` placeholders.
    /// Empty disables registration.
    #[serde(default)]
    pub register_command: Vec<String>,

    /// Command used to remove a server's registration when its knowledge base
    /// is deleted. Same placeholders as `register_command`; empty disables it.
    #[serde(default)]
    pub unregister_command: Vec<String>,

    /// Upper bound on how long a registration or unregistration command may run.
    #[serde(default = "default_register_timeout")]
    pub register_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            register_command: Vec::new(),
            unregister_command: Vec::new(),
            register_timeout_secs: default_register_timeout(),
        }
    }
}

fn default_register_timeout() -> u64 {
    30
}

impl AppConfig {
    /// Expand a leading `~` in a configured path.
    pub fn resolve_path(raw: &str) -> PathBuf {
        if raw == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        } else if let Some(rest) = raw.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(raw)
    }

    /// Resolved knowledge base root directory.
    pub fn kb_root(&self) -> PathBuf {
        Self::resolve_path(&self.defaults.kb_root)
    }

    /// Resolved query-server output directory.
    pub fn servers_dir(&self) -> PathBuf {
        Self::resolve_path(&self.defaults.servers_dir)
    }
}

// ---------------------------------------------------------------------------
// Crawl config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub max_pages: usize,
    pub max_depth: u32,
    pub batch_size: usize,
    pub fetch_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub sitemap_timeout_secs: u64,
    pub bypass_cache: bool,
    pub exclude_external_links: bool,
    pub exclude_social_links: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_pages: config.defaults.max_pages,
            max_depth: config.defaults.max_depth,
            batch_size: config.crawl.batch_size.max(1),
            fetch_timeout_secs: config.crawl.fetch_timeout_secs,
            probe_timeout_secs: config.crawl.probe_timeout_secs,
            sitemap_timeout_secs: config.crawl.sitemap_timeout_secs,
            bypass_cache: config.crawl.bypass_cache,
            exclude_external_links: config.crawl.exclude_external_links,
            exclude_social_links: config.crawl.exclude_social_links,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sitekb/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| SiteKbError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sitekb/sitekb.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| SiteKbError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SiteKbError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SiteKbError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SiteKbError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SiteKbError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the external embedding API key from `api_key_env`.
///
/// Unset and empty variables are both an error.
pub fn validate_api_key(config: &EmbeddingConfig) -> Result<String> {
    let var_name = &config.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(SiteKbError::config(format!(
            "embedding API key not found. Set the {var_name} environment variable \
             or use a local embedding model"
        ))),
    }
}
