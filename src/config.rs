//! TOML configuration with environment overrides.
//!
//! ```toml
//! [archive]
//! root = "./processos"
//! file_id = "1H8KAkOmYcEk98YtWiufVHXFgPvdTnXbC"
//!
//! [models.supervisor]
//! provider = "groq"
//! model = "llama-3.3-70b-versatile"
//! temperature = 0.0
//!
//! [models.agent]
//! provider = "google"
//! model = "gemini-2.0-flash-lite"
//! temperature = 0.0
//!
//! [pipeline]
//! recursion_limit = 25
//!
//! [server]
//! bind = "127.0.0.1:7480"
//! ```
//!
//! Every section is optional. A missing config file yields the defaults
//! above. `SEI_ARCHIVE_FILE_ID` (or the older `GDRIVE_FILE_ID`) and
//! `SEI_ARCHIVE_ROOT` override the archive section.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    /// Directory holding one `SEI_NNN_YYYY` folder per case.
    #[serde(default = "default_archive_root")]
    pub root: PathBuf,
    /// Opaque identifier of the remote ZIP.
    #[serde(default = "default_file_id")]
    pub file_id: String,
    /// URL template; `{id}` is replaced with `file_id`.
    #[serde(default = "default_download_url")]
    pub download_url: String,
    #[serde(default = "default_download_timeout_secs")]
    pub timeout_secs: u64,
    /// Start the download when a chat session or server starts.
    #[serde(default = "default_true")]
    pub auto_download: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: default_archive_root(),
            file_id: default_file_id(),
            download_url: default_download_url(),
            timeout_secs: default_download_timeout_secs(),
            auto_download: true,
        }
    }
}

impl ArchiveConfig {
    pub fn resolved_url(&self) -> String {
        self.download_url.replace("{id}", &self.file_id)
    }
}

fn default_archive_root() -> PathBuf {
    PathBuf::from("./processos")
}
fn default_file_id() -> String {
    "1H8KAkOmYcEk98YtWiufVHXFgPvdTnXbC".to_string()
}
fn default_download_url() -> String {
    "https://drive.usercontent.google.com/download?id={id}&export=download&confirm=t".to_string()
}
fn default_download_timeout_secs() -> u64 {
    600
}
fn default_true() -> bool {
    true
}

/// Model provider. All of them speak the OpenAI chat-completions dialect.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Groq,
    Google,
    Ollama,
    OpenAi,
}

impl Provider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            Provider::Ollama => "http://localhost:11434/v1",
            Provider::OpenAi => "https://api.openai.com/v1",
        }
    }

    /// Environment variable holding the API key, if the provider needs one.
    pub fn default_api_key_env(&self) -> Option<&'static str> {
        match self {
            Provider::Groq => Some("GROQ_API_KEY"),
            Provider::Google => Some("GOOGLE_API_KEY"),
            Provider::Ollama => None,
            Provider::OpenAi => Some("OPENAI_API_KEY"),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::Groq => "groq",
            Provider::Google => "google",
            Provider::Ollama => "ollama",
            Provider::OpenAi => "openai",
        };
        f.write_str(name)
    }
}

/// Settings of one model role.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelSettings {
    pub provider: Provider,
    pub model: String,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pull the model through the Ollama API before first use.
    #[serde(default = "default_true")]
    pub auto_pull: bool,
}

impl ModelSettings {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.0,
            base_url: None,
            api_key_env: None,
            timeout_secs: default_model_timeout_secs(),
            max_retries: default_max_retries(),
            auto_pull: true,
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    pub fn api_key_env(&self) -> Option<&str> {
        self.api_key_env
            .as_deref()
            .or_else(|| self.provider.default_api_key_env())
    }
}

fn default_model_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelsConfig {
    #[serde(default = "default_supervisor_model")]
    pub supervisor: ModelSettings,
    #[serde(default = "default_agent_model")]
    pub agent: ModelSettings,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            supervisor: default_supervisor_model(),
            agent: default_agent_model(),
        }
    }
}

fn default_supervisor_model() -> ModelSettings {
    ModelSettings::new(Provider::Groq, "llama-3.3-70b-versatile")
}
fn default_agent_model() -> ModelSettings {
    ModelSettings::new(Provider::Google, "gemini-2.0-flash-lite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Maximum supervisor/worker steps per chat turn.
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recursion_limit: default_recursion_limit(),
        }
    }
}

fn default_recursion_limit() -> usize {
    25
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// How often the download banner is refreshed.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7480".to_string()
}

/// Load and validate the config at `path`, then apply environment overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        debug!(path = %path.display(), "config loaded");
        config
    } else {
        warn!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    let file_id = var("SEI_ARCHIVE_FILE_ID").or_else(|| var("GDRIVE_FILE_ID"));
    if let Some(id) = file_id.filter(|id| !id.trim().is_empty()) {
        config.archive.file_id = id.trim().to_string();
    }
    if let Some(root) = var("SEI_ARCHIVE_ROOT").filter(|r| !r.trim().is_empty()) {
        config.archive.root = PathBuf::from(root);
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.archive.file_id.trim().is_empty() {
        bail!("archive.file_id must not be empty");
    }
    if !config.archive.download_url.contains("{id}") {
        bail!("archive.download_url must contain an {{id}} placeholder");
    }
    if config.pipeline.recursion_limit == 0 {
        bail!("pipeline.recursion_limit must be >= 1");
    }
    if config.chat.poll_interval_ms == 0 {
        bail!("chat.poll_interval_ms must be > 0");
    }
    for (role, settings) in [
        ("supervisor", &config.models.supervisor),
        ("agent", &config.models.agent),
    ] {
        if settings.model.trim().is_empty() {
            bail!("models.{}.model must not be empty", role);
        }
        if !(0.0..=2.0).contains(&settings.temperature) {
            bail!("models.{}.temperature must be in [0.0, 2.0]", role);
        }
    }
    Ok(())
}
