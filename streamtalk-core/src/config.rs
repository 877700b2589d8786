// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Every section has defaults so an empty file (or none at all) is a valid config
use crate::paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use streamtalk_llm::ModelConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub reading: ReadingConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub avatar: AvatarConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Name the assistant answers to in prompts
    #[serde(default = "default_persona_name")]
    pub name: String,
    /// Optional character sheet prepended to every system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_file: Option<String>,
    #[serde(default = "default_reply_max_tokens")]
    pub reply_max_tokens: u32,
    #[serde(default = "default_interpretation_max_tokens")]
    pub interpretation_max_tokens: u32,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            character_file: None,
            reply_max_tokens: default_reply_max_tokens(),
            interpretation_max_tokens: default_interpretation_max_tokens(),
            summary_max_tokens: default_summary_max_tokens(),
        }
    }
}

fn default_persona_name() -> String {
    "Choco".to_string()
}

fn default_reply_max_tokens() -> u32 {
    1024
}

fn default_interpretation_max_tokens() -> u32 {
    2048
}

fn default_summary_max_tokens() -> u32 {
    512
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_history_dir")]
    pub history_dir: String,
    /// Budget for turns sent with each model call
    #[serde(default = "default_context_tokens")]
    pub context_tokens: usize,
    /// Window size that triggers summarization of the oldest turns
    #[serde(default = "default_summary_threshold")]
    pub summary_threshold: usize,
    /// Approximate size of each chunk moved out for summarization
    #[serde(default = "default_summary_chunk_tokens")]
    pub summary_chunk_tokens: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            history_dir: default_history_dir(),
            context_tokens: default_context_tokens(),
            summary_threshold: default_summary_threshold(),
            summary_chunk_tokens: default_summary_chunk_tokens(),
        }
    }
}

fn default_history_dir() -> String {
    paths::history_dir().to_string_lossy().to_string()
}

fn default_context_tokens() -> usize {
    3000
}

fn default_summary_threshold() -> usize {
    7000
}

fn default_summary_chunk_tokens() -> usize {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingConfig {
    /// When false the model is told to decline readings and start actions are stripped
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_topic_timeout_secs")]
    pub topic_timeout_secs: u64,
    #[serde(default = "default_selection_timeout_secs")]
    pub selection_timeout_secs: u64,
    /// How long a revealed spread stays on screen after narration ends
    #[serde(default = "default_reveal_hold_secs")]
    pub reveal_hold_secs: u64,
    #[serde(default = "default_failed_hold_secs")]
    pub failed_hold_secs: u64,
}

impl Default for ReadingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            topic_timeout_secs: default_topic_timeout_secs(),
            selection_timeout_secs: default_selection_timeout_secs(),
            reveal_hold_secs: default_reveal_hold_secs(),
            failed_hold_secs: default_failed_hold_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_topic_timeout_secs() -> u64 {
    60
}

fn default_selection_timeout_secs() -> u64 {
    120
}

fn default_reveal_hold_secs() -> u64 {
    30
}

fn default_failed_hold_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Speech backend: "silent" or "remote"
    #[serde(default = "default_speech_backend")]
    pub backend: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    /// Directory holding ref_<emotion>.wav reference clips
    #[serde(default = "default_reference_dir")]
    pub reference_dir: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// External player invoked with the audio file path appended
    #[serde(default = "default_player_command")]
    pub player_command: Vec<String>,
    #[serde(default = "default_speech_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            backend: default_speech_backend(),
            remote_url: None,
            reference_dir: default_reference_dir(),
            language: default_language(),
            player_command: default_player_command(),
            timeout_secs: default_speech_timeout_secs(),
        }
    }
}

fn default_speech_backend() -> String {
    "silent".to_string()
}

fn default_reference_dir() -> String {
    "assets/voice".to_string()
}

fn default_language() -> String {
    "ko".to_string()
}

fn default_player_command() -> Vec<String> {
    ["ffplay", "-nodisp", "-autoexit", "-loglevel", "quiet"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_speech_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarConfig {
    /// Drive ambient gaze motion while idle
    #[serde(default = "default_true")]
    pub idle_motion: bool,
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    /// Gaze targets are drawn from [-range, range] on both axes
    #[serde(default = "default_gaze_range")]
    pub gaze_range: f32,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            idle_motion: true,
            idle_interval_ms: default_idle_interval_ms(),
            gaze_range: default_gaze_range(),
        }
    }
}

fn default_idle_interval_ms() -> u64 {
    4000
}

fn default_gaze_range() -> f32 {
    0.6
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    #[serde(default = "default_overlay_host")]
    pub host: String,
    #[serde(default = "default_overlay_port")]
    pub port: u16,
    /// Entries kept per feed
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Entries older than this are aged out of the feeds
    #[serde(default = "default_horizon_secs")]
    pub horizon_secs: u64,
    /// Required as X-API-Key on POST /api/chat when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

// Custom Debug impl to redact sensitive fields
impl std::fmt::Debug for OverlayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("max_entries", &self.max_entries)
            .field("horizon_secs", &self.horizon_secs)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            host: default_overlay_host(),
            port: default_overlay_port(),
            max_entries: default_max_entries(),
            horizon_secs: default_horizon_secs(),
            api_key: None,
        }
    }
}

fn default_overlay_host() -> String {
    "127.0.0.1".to_string()
}

fn default_overlay_port() -> u16 {
    8765
}

fn default_max_entries() -> usize {
    50
}

fn default_horizon_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// Drop senders whose name ends in "bot" or "봇"
    #[serde(default = "default_true")]
    pub drop_bots: bool,
    #[serde(default = "default_true")]
    pub drop_urls: bool,
    /// A single character repeated more than this many times marks spam
    #[serde(default = "default_max_repeat")]
    pub max_repeat: usize,
    #[serde(default)]
    pub blocked_keywords: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            max_length: default_max_length(),
            drop_bots: true,
            drop_urls: true,
            max_repeat: default_max_repeat(),
            blocked_keywords: Vec::new(),
        }
    }
}

fn default_min_length() -> usize {
    1
}

fn default_max_length() -> usize {
    500
}

fn default_max_repeat() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Read `name: text` lines from standard input
    #[serde(default = "default_true")]
    pub stdin: bool,
    /// First reconnect delay; doubles on every consecutive failure
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Consecutive failures before a source is abandoned
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            stdin: true,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            reconnect_attempts: default_reconnect_attempts(),
        }
    }
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_reconnect_attempts() -> u32 {
    5
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Expose GET /metrics on the overlay server
    #[serde(default)]
    pub enabled: bool,
}

/// Expand tilde (~) to home directory in paths
/// Logs a warning if expansion fails and falls back to the original path
pub fn expand_tilde(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(base_dirs) = directories::BaseDirs::new() {
            return base_dirs
                .home_dir()
                .join(stripped)
                .to_string_lossy()
                .to_string();
        } else {
            tracing::warn!(
                path = %path,
                "Failed to expand tilde in path: could not determine home directory"
            );
        }
    } else if path == "~" {
        if let Some(base_dirs) = directories::BaseDirs::new() {
            return base_dirs.home_dir().to_string_lossy().to_string();
        } else {
            tracing::warn!("Failed to expand tilde: could not determine home directory");
        }
    }
    path.to_string()
}

fn parse_bool(key: &str, val: &str) -> Result<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("{} must be a boolean, got: {}", key, other),
    }
}

impl Config {
    /// Find the config file, checking multiple locations in order:
    /// 1. STREAMTALK_CONFIG_PATH env var (if set)
    /// 2. ./config.toml (current directory - for development)
    /// 3. ~/.config/streamtalk/config.toml (XDG config dir)
    pub fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("STREAMTALK_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Load configuration from config.toml with environment variable overrides
    pub fn load() -> Result<Self> {
        let mut config = if let Some(config_path) = Self::find_config_file() {
            tracing::info!(
                path = %config_path.display(),
                "Loading configuration from file"
            );
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            tracing::info!("No config file found, using environment variables and defaults");
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.finalize()?;
        Ok(config)
    }

    /// Parse a TOML document without applying overrides
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str::<Config>(content).context("Invalid config TOML")
    }

    /// Apply overrides from a key lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("LLM_API_KEY").or_else(|| lookup("GROQ_API_KEY")) {
            self.model.set_str("api_key", val);
        }
        if let Some(val) = lookup("LLM_MODEL") {
            self.model.set_str("model", val);
        }
        if let Some(val) = lookup("CHAT_HISTORY_MAX_TOKENS") {
            self.memory.context_tokens = val.parse().with_context(|| {
                format!("CHAT_HISTORY_MAX_TOKENS must be a number, got: {}", val)
            })?;
        }
        if let Some(val) = lookup("CHAT_HISTORY_SUMMARY_THRESHOLD") {
            self.memory.summary_threshold = val.parse().with_context(|| {
                format!(
                    "CHAT_HISTORY_SUMMARY_THRESHOLD must be a number, got: {}",
                    val
                )
            })?;
        }
        if let Some(val) = lookup("CHAT_HISTORY_SUMMARY_TOKENS") {
            self.memory.summary_chunk_tokens = val.parse().with_context(|| {
                format!("CHAT_HISTORY_SUMMARY_TOKENS must be a number, got: {}", val)
            })?;
        }
        if let Some(val) = lookup("TTS_REMOTE_URL") {
            if !val.trim().is_empty() {
                self.speech.remote_url = Some(val);
                self.speech.backend = "remote".to_string();
            }
        }
        if let Some(val) = lookup("READING_ENABLED") {
            self.reading.enabled = parse_bool("READING_ENABLED", &val)?;
        }
        Ok(())
    }

    /// Expand paths and validate cross-field constraints
    pub fn finalize(&mut self) -> Result<()> {
        self.memory.history_dir = expand_tilde(&self.memory.history_dir);
        self.speech.reference_dir = expand_tilde(&self.speech.reference_dir);
        if let Some(ref path) = self.persona.character_file {
            self.persona.character_file = Some(expand_tilde(path));
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory.context_tokens == 0 || self.memory.summary_chunk_tokens == 0 {
            anyhow::bail!("memory.context_tokens and memory.summary_chunk_tokens must be positive");
        }
        if self.memory.context_tokens >= self.memory.summary_threshold {
            anyhow::bail!(
                "memory.context_tokens ({}) must be smaller than memory.summary_threshold ({})",
                self.memory.context_tokens,
                self.memory.summary_threshold
            );
        }
        if self.reading.topic_timeout_secs == 0 || self.reading.selection_timeout_secs == 0 {
            anyhow::bail!("reading timeouts must be positive");
        }
        if self.chat.reconnect_attempts == 0 {
            anyhow::bail!("chat.reconnect_attempts must be at least 1");
        }
        if self.filter.min_length > self.filter.max_length {
            anyhow::bail!(
                "filter.min_length ({}) exceeds filter.max_length ({})",
                self.filter.min_length,
                self.filter.max_length
            );
        }
        match self.speech.backend.as_str() {
            "silent" => {}
            "remote" => {
                if self.speech.remote_url.is_none() {
                    anyhow::bail!(
                        "speech.remote_url is required for the remote backend (set in config.toml or TTS_REMOTE_URL)"
                    );
                }
                if self.speech.player_command.is_empty() {
                    anyhow::bail!("speech.player_command must name a player program");
                }
            }
            other => anyhow::bail!("Unknown speech backend '{}'. Use 'silent' or 'remote'", other),
        }
        Ok(())
    }

    pub fn history_dir(&self) -> PathBuf {
        PathBuf::from(&self.memory.history_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.model.backend_type(), "openai");
        assert_eq!(config.memory.context_tokens, 3000);
        assert_eq!(config.memory.summary_threshold, 7000);
        assert_eq!(config.memory.summary_chunk_tokens, 2000);
        assert!(config.reading.enabled);
        assert_eq!(config.speech.backend, "silent");
        assert_eq!(config.overlay.max_entries, 50);
        assert!(!config.metrics.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_sections_parse() {
        let config = Config::parse(
            r#"
[model]
type = "mock"

[persona]
name = "Mocha"
character_file = "character.txt"

[memory]
history_dir = "/tmp/history"
context_tokens = 1000
summary_threshold = 4000

[reading]
enabled = false
selection_timeout_secs = 45

[speech]
backend = "remote"
remote_url = "http://localhost:9880/tts"
player_command = ["afplay"]

[filter]
blocked_keywords = ["spoiler"]

[chat]
stdin = false
reconnect_attempts = 3

[metrics]
enabled = true
"#,
        )
        .unwrap();
        assert_eq!(config.model.backend_type(), "mock");
        assert_eq!(config.persona.name, "Mocha");
        assert_eq!(config.history_dir(), PathBuf::from("/tmp/history"));
        assert!(!config.reading.enabled);
        assert_eq!(config.reading.selection_timeout_secs, 45);
        assert_eq!(config.speech.player_command, vec!["afplay"]);
        assert_eq!(config.filter.blocked_keywords, vec!["spoiler"]);
        assert!(!config.chat.stdin);
        assert_eq!(config.chat.reconnect_attempts, 3);
        assert_eq!(config.chat.reconnect_delay_ms, 2000);
        assert!(config.metrics.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup_from(&[
                ("GROQ_API_KEY", "gsk-from-env"),
                ("LLM_MODEL", "llama-3.3-70b-versatile"),
                ("CHAT_HISTORY_MAX_TOKENS", "1500"),
                ("CHAT_HISTORY_SUMMARY_THRESHOLD", "5000"),
                ("CHAT_HISTORY_SUMMARY_TOKENS", "800"),
                ("TTS_REMOTE_URL", "http://gpu-box:9880"),
                ("READING_ENABLED", "off"),
            ]))
            .unwrap();
        assert_eq!(config.model.get_str("api_key"), Some("gsk-from-env"));
        assert_eq!(config.model.get_str("model"), Some("llama-3.3-70b-versatile"));
        assert_eq!(config.memory.context_tokens, 1500);
        assert_eq!(config.memory.summary_threshold, 5000);
        assert_eq!(config.memory.summary_chunk_tokens, 800);
        assert_eq!(config.speech.backend, "remote");
        assert!(!config.reading.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_llm_api_key_wins_over_groq_key() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup_from(&[
                ("LLM_API_KEY", "primary"),
                ("GROQ_API_KEY", "secondary"),
            ]))
            .unwrap();
        assert_eq!(config.model.get_str("api_key"), Some("primary"));
    }

    #[test]
    fn test_invalid_numeric_override_errors() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup_from(&[("CHAT_HISTORY_MAX_TOKENS", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("CHAT_HISTORY_MAX_TOKENS"));
    }

    #[test]
    fn test_invalid_bool_override_errors() {
        let mut config = Config::default();
        assert!(config
            .apply_overrides(lookup_from(&[("READING_ENABLED", "maybe")]))
            .is_err());
    }

    #[test]
    fn test_context_budget_must_be_below_threshold() {
        let mut config = Config::default();
        config.memory.context_tokens = 8000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("summary_threshold"));
    }

    #[test]
    fn test_remote_speech_requires_url() {
        let mut config = Config::default();
        config.speech.backend = "remote".to_string();
        assert!(config.validate().is_err());
        config.speech.remote_url = Some("http://localhost:9880".to_string());
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_speech_backend_rejected() {
        let mut config = Config::default();
        config.speech.backend = "carrier-pigeon".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = Config::default();
        config.model.set_str("api_key", "gsk-very-secret");
        config.overlay.api_key = Some("overlay-secret".to_string());
        let debug_str = format!("{:?}", config);
        assert!(!debug_str.contains("gsk-very-secret"));
        assert!(!debug_str.contains("overlay-secret"));
        assert!(debug_str.contains("[REDACTED]"));
    }

    #[test]
    fn test_expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde("/var/lib/streamtalk"), "/var/lib/streamtalk");
        assert_eq!(expand_tilde("relative/dir"), "relative/dir");
    }
}
