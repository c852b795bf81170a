//! Bootstrap configuration loading and resolution
//!
//! Configuration file priority:
//! 1. Command-line argument (highest priority)
//! 2. `VDIG_CONFIG` environment variable
//! 3. User config file (`~/.config/vdig/vdig-ai.toml` or platform equivalent)
//! 4. Built-in defaults (fallback)
//!
//! Every table and field is optional; missing values take built-in defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "VDIG_CONFIG";

/// Environment variable overriding the storage root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "VDIG_ROOT_FOLDER";

/// Admission ceiling bounds
pub const MIN_CONCURRENT: usize = 1;
pub const MAX_CONCURRENT: usize = 10;

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Storage root; workspaces are its sub-directories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub asr: AsrConfig,

    /// Text-generation backend configurations
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5731,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Task engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum simultaneously executing tasks (1-10)
    pub max_concurrent: usize,
    /// Retries of one stage operation before it fails terminally
    pub max_stage_retries: u32,
    /// Total attempts of one outbound request
    pub fetch_attempts: u32,
    /// Minimum spacing between outbound requests
    pub pacing_ms: u64,
    /// Upper bound of random delay added to the pacing interval
    pub jitter_ms: u64,
    /// Delay before a stage operation is re-attempted
    pub stage_retry_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_stage_retries: 3,
            fetch_attempts: 3,
            pacing_ms: 2000,
            jitter_ms: 500,
            stage_retry_delay_ms: 2000,
        }
    }
}

impl EngineConfig {
    /// Clamp out-of-range values, logging every adjustment
    pub fn normalized(mut self) -> Self {
        let clamped = self.max_concurrent.clamp(MIN_CONCURRENT, MAX_CONCURRENT);
        if clamped != self.max_concurrent {
            warn!(
                requested = self.max_concurrent,
                using = clamped,
                "max_concurrent out of range {}-{}, clamping",
                MIN_CONCURRENT,
                MAX_CONCURRENT
            );
            self.max_concurrent = clamped;
        }
        if self.fetch_attempts == 0 {
            warn!("fetch_attempts must be at least 1, using 1");
            self.fetch_attempts = 1;
        }
        self
    }
}

/// Video platform client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// `key=value` cookies file (SESSDATA, bili_jct, buvid3)
    pub cookies_file: Option<PathBuf>,
    pub user_agent: String,
    /// API base URL
    pub base_url: String,
    /// Public site URL used to build per-part references
    pub site_url: String,
    pub request_timeout_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            cookies_file: None,
            user_agent: get_user_agent(),
            base_url: "https://api.bilibili.com".to_string(),
            site_url: "https://www.bilibili.com".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// External transcription command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    /// argv template; `{url}` and `{output}` are substituted
    pub command: Option<Vec<String>>,
}

/// Text-generation backend configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Name clients select the model by
    pub name: String,
    /// Model identifier sent to the backend
    pub model_name: String,
    /// OpenAI-compatible API base, e.g. `https://api.example.com/v1`
    pub api_base: String,
    #[serde(default)]
    pub api_key: String,
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("name", &self.name)
            .field("model_name", &self.model_name)
            .field("api_base", &self.api_base)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl TomlConfig {
    /// Look up a generation backend by its configured name
    pub fn model(&self, name: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Storage root: `VDIG_ROOT_FOLDER`, then TOML `root_folder`, then OS default
    pub fn resolved_root_folder(&self) -> PathBuf {
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }
        self.root_folder
            .clone()
            .unwrap_or_else(default_root_folder)
    }
}

/// Standard User-Agent for outbound HTTP clients
pub fn get_user_agent() -> String {
    format!("vdig/{}", env!("CARGO_PKG_VERSION"))
}

/// Locate the config file following the documented priority order
///
/// Returns `None` when no file is named and the user config file does not exist.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = user_config_path()?;
    if user_config.exists() {
        Some(user_config)
    } else {
        debug!(path = %user_config.display(), "No user config file, using defaults");
        None
    }
}

/// `~/.config/vdig/vdig-ai.toml` (platform equivalent), whether or not it exists
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("vdig").join("vdig-ai.toml"))
}

/// Load and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Resolve and load configuration, falling back to defaults when no file is found
///
/// An explicitly named file (CLI or env) that cannot be read is an error.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        Some(path) => load_toml_config(&path),
        None => Ok(TomlConfig::default()),
    }
}

/// Write configuration atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    std::fs::write(&temp_path, content)?;

    // Model credentials live in this file
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// OS-dependent default storage root
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("vdig"))
        .unwrap_or_else(|| PathBuf::from("./vdig_data"))
}
