use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration for CodeRadar
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CodeRadarConfig {
    /// HTTP listener
    #[serde(default)]
    pub server: ServerConfig,

    /// Worker pool and deadlines
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Store write retries
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Event channel buffering
    #[serde(default)]
    pub events: EventsConfig,

    /// LLM configuration for deep-run insights
    #[serde(default)]
    pub llm: LLMConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Repositories registered at startup
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Size of the worker pool shared by all running jobs
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Deadline for a single analyzer invocation
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Deadline for a whole run; on expiry the run is finalized with what it has
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            task_timeout_secs: default_task_timeout_secs(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_max_write_retries")]
    pub max_write_retries: u32,

    /// First backoff; doubles on every retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_write_retries: default_max_write_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Per-topic broadcast buffer; slower subscribers observe a lag notice
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// LLM configuration for insight synthesis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Without an LLM, deep runs finish with empty insights
    #[serde(default)]
    pub enabled: bool,

    /// LLM provider: "anthropic" or "openai-compatible"
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    #[serde(default)]
    pub model: Option<String>,

    /// Base URL for openai-compatible endpoints
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_llm_provider(),
            model: None,
            base_url: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error", or a full filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "compact", "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub path: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_max_concurrent_tasks() -> usize {
    4
}
fn default_task_timeout_secs() -> u64 {
    120
}
fn default_job_timeout_secs() -> u64 {
    900
}
fn default_max_write_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    50
}
fn default_channel_capacity() -> usize {
    256
}
fn default_llm_provider() -> String {
    "anthropic".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> usize {
    2048
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

/// Loaded configuration plus the file it came from.
pub struct ConfigManager {
    config: CodeRadarConfig,
    config_path: Option<PathBuf>,
}

/// `.env` files, first existing one wins.
fn env_file_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(".env")];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".coderadar.env"));
    }
    candidates
}

/// Config files, first existing one wins.
fn config_file_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(".coderadar.toml")];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".coderadar").join("config.toml"));
    }
    candidates
}

/// Unparseable values are ignored with a warning rather than failing startup.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid value", name, raw);
            None
        }
    }
}

impl ConfigManager {
    /// Environment (after loading a `.env` file) overrides the first config
    /// file found, which overrides defaults.
    pub fn load() -> Result<Self, ConfigError> {
        info!("Loading CodeRadar configuration...");
        Self::load_dotenv();
        let found = config_file_candidates().into_iter().find(|p| p.exists());
        let config = match &found {
            Some(path) => Self::read_toml_file(path)?,
            None => CodeRadarConfig::default(),
        };
        Self::finish(config, found)
    }

    /// Load an explicit config file; environment overrides still apply.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        Self::load_dotenv();
        let config = Self::read_toml_file(path)?;
        Self::finish(config, Some(path.to_path_buf()))
    }

    fn finish(config: CodeRadarConfig, config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = Self::apply_env_overrides(config);
        Self::validate_config(&config)?;

        match &config_path {
            Some(path) => info!(path = %path.display(), "configuration loaded"),
            None => info!("configuration loaded from defaults (no config file)"),
        }
        info!(
            workers = config.scheduler.max_concurrent_tasks,
            task_timeout_secs = config.scheduler.task_timeout_secs,
            job_timeout_secs = config.scheduler.job_timeout_secs,
            llm = if config.llm.enabled {
                config.llm.provider.as_str()
            } else {
                "disabled"
            },
            "scheduler settings"
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    fn load_dotenv() {
        let Some(path) = env_file_candidates().into_iter().find(|p| p.exists()) else {
            return;
        };
        match dotenv::from_path(&path) {
            Ok(()) => info!(path = %path.display(), "loaded environment file"),
            Err(e) => warn!(path = %path.display(), "could not load environment file: {}", e),
        }
    }

    fn read_toml_file(path: &Path) -> Result<CodeRadarConfig, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    fn apply_env_overrides(mut config: CodeRadarConfig) -> CodeRadarConfig {
        let server = &mut config.server;
        if let Ok(host) = std::env::var("CODERADAR_HOST") {
            server.host = host;
        }
        server.port = env_parse("CODERADAR_PORT").unwrap_or(server.port);

        let scheduler = &mut config.scheduler;
        scheduler.max_concurrent_tasks =
            env_parse("CODERADAR_MAX_CONCURRENT_TASKS").unwrap_or(scheduler.max_concurrent_tasks);
        scheduler.task_timeout_secs =
            env_parse("CODERADAR_TASK_TIMEOUT_SECS").unwrap_or(scheduler.task_timeout_secs);
        scheduler.job_timeout_secs =
            env_parse("CODERADAR_JOB_TIMEOUT_SECS").unwrap_or(scheduler.job_timeout_secs);

        let llm = &mut config.llm;
        if let Ok(provider) = std::env::var("CODERADAR_LLM_PROVIDER") {
            llm.provider = provider;
        }
        // Naming a model is enough to turn synthesis on.
        if let Ok(model) = std::env::var("CODERADAR_LLM_MODEL") {
            llm.model = Some(model);
            llm.enabled = true;
        }
        if let Ok(url) = std::env::var("CODERADAR_LLM_BASE_URL") {
            llm.base_url = Some(url);
        }
        if llm.api_key.is_none() {
            let key_var = if llm.provider == "anthropic" {
                "ANTHROPIC_API_KEY"
            } else {
                "OPENAI_API_KEY"
            };
            llm.api_key = std::env::var(key_var).ok();
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.logging.level = level;
        }
        config
    }

    fn validate_config(config: &CodeRadarConfig) -> Result<(), ConfigError> {
        match config.llm.provider.as_str() {
            "anthropic" | "openai-compatible" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid LLM provider: {}. Must be one of: anthropic, openai-compatible",
                    other
                )))
            }
        }

        // Full filter directives (e.g. "info,coderadar_engine=debug") are passed through.
        let level = config.logging.level.as_str();
        if !level.contains('=') && !level.contains(',') {
            match level {
                "trace" | "debug" | "info" | "warn" | "error" => {}
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                        other
                    )))
                }
            }
        }

        match config.logging.format.as_str() {
            "pretty" | "compact" | "json" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, compact, json",
                    other
                )))
            }
        }

        if config.scheduler.max_concurrent_tasks == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if config.scheduler.task_timeout_secs == 0 || config.scheduler.job_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler timeouts must be greater than zero".to_string(),
            ));
        }
        if config.events.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "events.channel_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn config(&self) -> &CodeRadarConfig {
        &self.config
    }

    /// Mutable access for command-line overrides applied after loading.
    pub fn config_mut(&mut self) -> &mut CodeRadarConfig {
        &mut self.config
    }

    /// `None` when running on defaults.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Writes the default configuration as TOML, creating parent directories.
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = CodeRadarConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}
