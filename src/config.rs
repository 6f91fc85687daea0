use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;

/// Top-level configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VisorConfig {
    pub gateway: GatewayConfig,
    pub session: SessionConfig,
    pub models: ModelsConfig,
    pub video: VideoConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

fn default_port() -> u16 {
    7300
}
fn default_bind() -> String {
    "127.0.0.1".into()
}

/// Session lifecycle settings: history retention and TTL expiry.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Retention bound; trimming keeps the trailing `2 * max_history`
    /// window plus every system message.
    #[serde(default = "default_max_history")]
    pub max_history: u32,
    /// Inactivity after which a session is evicted.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u32,
    /// Cadence of the background expiry sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            timeout_minutes: default_timeout_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_max_history() -> u32 {
    10
}
fn default_timeout_minutes() -> u32 {
    30
}
fn default_sweep_interval_secs() -> u64 {
    300
}

/// Remote model endpoints. Both models speak the OpenAI-compatible
/// chat-completions protocol at the same base URL.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub api_key: Option<String>,
    #[serde(default = "ModelConfig::vision_default")]
    pub vision: ModelConfig,
    #[serde(default = "ModelConfig::chat_default")]
    pub chat: ModelConfig,
    /// Per-request timeout; an elapsed timeout is an upstream failure.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            vision: ModelConfig::vision_default(),
            chat: ModelConfig::chat_default(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.studio.nebius.com/v1".into()
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl ModelConfig {
    fn vision_default() -> Self {
        Self {
            model: "Qwen/Qwen2-VL-72B-Instruct".into(),
            max_tokens: 1000,
            temperature: 0.3,
        }
    }

    fn chat_default() -> Self {
        Self {
            model: "google/gemma-3-27b-it".into(),
            max_tokens: 500,
            temperature: 0.7,
        }
    }
}

/// Frame sampling limits for uploaded videos.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_max_frames")]
    pub max_frames: u32,
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u32,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            max_frames: default_max_frames(),
            max_duration_secs: default_max_duration_secs(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_max_frames() -> u32 {
    30
}
fn default_max_duration_secs() -> u32 {
    120
}
fn default_max_upload_bytes() -> usize {
    64 * 1024 * 1024
}

/// Load configuration from file or use defaults.
///
/// Search order:
/// 1. `VISOR_CONFIG` env var
/// 2. `~/.visor/config.toml`
/// 3. Zero-config defaults (no file needed)
pub fn load() -> anyhow::Result<VisorConfig> {
    let path = config_path();

    if path.exists() {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let mut config: VisorConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config at {}: {e}", path.display()))?;

        resolve_api_key(&mut config);
        validate(&config)?;

        info!("loaded config from {}", path.display());
        Ok(config)
    } else {
        info!("no config file found, using zero-config defaults");
        let mut config = VisorConfig::default();
        resolve_api_key(&mut config);
        Ok(config)
    }
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("VISOR_CONFIG") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".visor").join("config.toml")
}

/// Resolve the API key from environment variables if not set in config.
fn resolve_api_key(config: &mut VisorConfig) {
    if config.models.api_key.is_none() {
        config.models.api_key = std::env::var("VISOR_API_KEY")
            .or_else(|_| std::env::var("NEBIUS_API_KEY"))
            .ok();
    }
}

/// Validate the config and return clear error messages.
fn validate(config: &VisorConfig) -> anyhow::Result<()> {
    if config.session.max_history == 0 {
        anyhow::bail!("session.max_history must be > 0");
    }
    if config.session.timeout_minutes == 0 {
        anyhow::bail!("session.timeout_minutes must be > 0");
    }
    if config.models.vision.max_tokens == 0 || config.models.chat.max_tokens == 0 {
        anyhow::bail!("models.*.max_tokens must be > 0");
    }
    if config.video.max_frames == 0 {
        anyhow::bail!("video.max_frames must be > 0");
    }
    if config.video.max_duration_secs == 0 {
        anyhow::bail!("video.max_duration_secs must be > 0");
    }
    Ok(())
}
