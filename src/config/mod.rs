use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the working directory before the user config
const LOCAL_CONFIG_FILE: &str = "transcriber.yaml";

/// Prefix of every environment override
const ENV_PREFIX: &str = "TRANSCRIBER_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Speech recognition backend
    pub whisper: WhisperConfig,

    /// External media tools
    pub tools: ToolsConfig,

    /// Where jobs, uploads and scratch files live
    pub storage: StorageConfig,

    /// HTTP server settings
    pub server: ServerConfig,

    /// Optional text enhancement pass
    pub enhancement: EnhancementConfig,

    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhisperConfig {
    /// whisper.cpp command line binary
    pub binary: String,

    /// Directory holding `ggml-<model>.bin` files, `<data_dir>/models` if unset
    pub models_dir: Option<PathBuf>,

    /// Model used when a job does not pick one
    pub default_model: String,

    /// Worker threads passed to the engine, engine default if unset
    pub threads: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub yt_dlp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// How often progress subscribers re-check a job
    pub poll_interval_ms: u64,

    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancementConfig {
    /// Anthropic API key; enhancement is unavailable without one
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted upload
    pub max_upload_mb: u64,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            binary: "whisper-cli".to_string(),
            models_dir: None,
            default_model: crate::jobs::DEFAULT_MODEL.to_string(),
            threads: None,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            yt_dlp: "yt-dlp".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            data_dir: home.join(".video-transcriber"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            poll_interval_ms: 500,
            max_concurrent_jobs: 3,
        }
    }
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "claude-3-haiku-20240307".to_string(),
            max_tokens: 4096,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { max_upload_mb: 4096 }
    }
}

impl Config {
    /// Load configuration from file or fall back to defaults, then apply
    /// environment overrides
    pub async fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML configuration file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path).context("Failed to read config file")?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Write this configuration to the user config path
    pub async fn save(&self) -> Result<PathBuf> {
        let config_path = Self::user_config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(&config_path, content).context("Failed to write config file")?;

        Ok(config_path)
    }

    /// First existing config file: working directory, then user config dir
    pub fn config_path() -> Option<PathBuf> {
        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Some(local_config);
        }

        Self::user_config_path().ok().filter(|path| path.exists())
    }

    pub fn user_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("video-transcriber").join("config.yaml"))
    }

    /// Apply `TRANSCRIBER_*` overrides. `ANTHROPIC_API_KEY` is honoured too.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.is_empty());

        if let Some(dir) = var("DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(model) = var("WHISPER_MODEL") {
            self.whisper.default_model = model;
        }
        if let Some(binary) = var("WHISPER_BINARY") {
            self.whisper.binary = binary;
        }
        if let Some(host) = var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid {}PORT value: {}", ENV_PREFIX, port),
            }
        }

        let api_key = var("ANTHROPIC_API_KEY").or_else(|| lookup("ANTHROPIC_API_KEY").filter(|v| !v.is_empty()));
        if api_key.is_some() {
            self.enhancement.api_key = api_key;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.whisper.default_model.trim().is_empty() {
            anyhow::bail!("whisper.default_model must not be empty");
        }

        if self.server.poll_interval_ms == 0 {
            anyhow::bail!("server.poll_interval_ms must be greater than zero");
        }

        if self.server.max_concurrent_jobs == 0 {
            anyhow::bail!("server.max_concurrent_jobs must be at least 1");
        }

        Ok(())
    }

    pub fn models_dir(&self) -> PathBuf {
        self.whisper
            .models_dir
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("models"))
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.storage.data_dir.join("uploads")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.storage.data_dir.join("temp")
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.storage.data_dir.join("jobs")
    }

    /// Create the data directory layout
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.uploads_dir(), self.temp_dir(), self.jobs_dir()] {
            fs_err::create_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.server.poll_interval_ms)
    }

    pub fn max_upload_bytes(&self) -> usize {
        usize::try_from(self.limits.max_upload_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        match Self::config_path() {
            Some(path) => println!("  Config File: {}", path.display()),
            None => println!("  Config File: (defaults)"),
        }
        println!("  Data Directory: {}", self.storage.data_dir.display());
        println!("  Whisper Binary: {}", self.whisper.binary);
        println!("  Models Directory: {}", self.models_dir().display());
        println!("  Default Model: {}", self.whisper.default_model);
        println!("  ffmpeg: {}", self.tools.ffmpeg);
        println!("  yt-dlp: {}", self.tools.yt_dlp);
        println!("  Server: {}:{}", self.server.host, self.server.port);
        println!(
            "  Text Enhancement: {}",
            if self.enhancement.api_key.is_some() { "available" } else { "disabled (no API key)" }
        );
    }
}
