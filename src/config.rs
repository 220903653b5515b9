use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the durable state file inside `data_dir`.
pub const SETTINGS_FILE: &str = "chad_memory.json";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file '{}': {}", .path.display(), .source)]
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    #[error("failed to parse config file '{}': {}", .path.display(), .source)]
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    #[error("config validation error: {0}")]
    Validation(String),
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    discord_token: String,
    /// Brave search subscription token for `!factcheck` and the search tool.
    #[serde(default)]
    search_api: String,
    #[serde(default = "default_prefix")]
    prefix: String,
    /// Seconds between automatic saves of the durable state.
    #[serde(default = "default_auto_save_interval")]
    auto_save_interval: u64,
    #[serde(default)]
    open_router: OpenRouterConfig,
    #[serde(default)]
    rate_limit: RateLimitConfig,
    /// Chance (0.0-1.0) of joining in on a message nobody addressed to the bot.
    #[serde(default = "default_engage_chance")]
    engage_chance: f32,
    /// Directory for state files and logs. Defaults to current directory.
    data_dir: Option<String>,
    /// Channel that receives a copy of the bot's logs.
    log_channel_id: Option<u64>,
}

/// OpenRouter completion settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenRouterConfig {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Size of each channel's conversation window.
    #[serde(default = "default_max_messages_in_context")]
    pub max_messages_in_context: usize,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            system_prompt: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_messages_in_context: default_max_messages_in_context(),
            model: default_model(),
        }
    }
}

/// Per-user message rate limit.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitConfig {
    /// Messages allowed per window.
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    /// Window length in seconds.
    #[serde(default = "default_window")]
    pub window: i64,
    /// Timeout applied to a user who exceeds the limit, in seconds.
    #[serde(default = "default_mute_time")]
    pub mute_time: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window: default_window(),
            mute_time: default_mute_time(),
        }
    }
}

fn default_prefix() -> String {
    "!".to_string()
}

fn default_auto_save_interval() -> u64 {
    60
}

fn default_engage_chance() -> f32 {
    0.1
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_max_messages_in_context() -> usize {
    20
}

fn default_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_max_requests() -> usize {
    10
}

fn default_window() -> i64 {
    60
}

fn default_mute_time() -> i64 {
    60
}

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub search_api_key: String,
    pub prefix: String,
    pub auto_save_interval: u64,
    pub open_router: OpenRouterConfig,
    pub rate_limit: RateLimitConfig,
    pub engage_chance: f32,
    /// Directory for state files (logs, durable state).
    pub data_dir: PathBuf,
    pub log_channel_id: Option<u64>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        // Missing credentials are fatal: the bot cannot do anything without them
        if file.discord_token.trim().is_empty() {
            return Err(ConfigError::Validation("discord_token is required".into()));
        }
        if file.open_router.key.trim().is_empty() {
            return Err(ConfigError::Validation("open_router.key is required".into()));
        }
        if file.rate_limit.max_requests == 0 {
            return Err(ConfigError::Validation("rate_limit.max_requests must be at least 1".into()));
        }
        if file.rate_limit.window <= 0 {
            return Err(ConfigError::Validation("rate_limit.window must be positive".into()));
        }
        if file.auto_save_interval == 0 {
            return Err(ConfigError::Validation("auto_save_interval must be positive".into()));
        }
        if !(0.0..=1.0).contains(&file.engage_chance) {
            return Err(ConfigError::Validation("engage_chance must be between 0 and 1".into()));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            discord_token: file.discord_token,
            search_api_key: file.search_api,
            prefix: file.prefix,
            auto_save_interval: file.auto_save_interval,
            open_router: file.open_router,
            rate_limit: file.rate_limit,
            engage_chance: file.engage_chance,
            data_dir,
            log_channel_id: file.log_channel_id,
        })
    }

    /// Location of the durable state snapshot.
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config_uses_defaults() {
        let file = write_config(r#"{
            "discord_token": "abc.def.ghi",
            "open_router": { "key": "sk-or-123" }
        }"#);
        let config = Config::load(file.path()).expect("should load valid config");
        assert_eq!(config.prefix, "!");
        assert_eq!(config.auto_save_interval, 60);
        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.rate_limit.window, 60);
        assert_eq!(config.rate_limit.mute_time, 60);
        assert_eq!(config.open_router.max_messages_in_context, 20);
        assert_eq!(config.settings_path(), PathBuf::from(".").join(SETTINGS_FILE));
    }

    #[test]
    fn test_overrides() {
        let file = write_config(r#"{
            "discord_token": "abc",
            "search_api": "brave",
            "prefix": "?",
            "auto_save_interval": 15,
            "data_dir": "/var/lib/chad",
            "open_router": { "key": "k", "model": "m", "max_messages_in_context": 5 },
            "rate_limit": { "max_requests": 2, "window": 30, "mute_time": 120 }
        }"#);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.prefix, "?");
        assert_eq!(config.search_api_key, "brave");
        assert_eq!(config.auto_save_interval, 15);
        assert_eq!(config.open_router.model, "m");
        assert_eq!(config.open_router.max_messages_in_context, 5);
        assert_eq!(config.rate_limit.max_requests, 2);
        assert_eq!(config.rate_limit.mute_time, 120);
        assert_eq!(config.settings_path(), PathBuf::from("/var/lib/chad/chad_memory.json"));
    }

    #[test]
    fn test_missing_discord_token() {
        let file = write_config(r#"{ "open_router": { "key": "k" } }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("discord_token"));
    }

    #[test]
    fn test_missing_openrouter_key() {
        let file = write_config(r#"{ "discord_token": "abc" }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("open_router.key"));
    }

    #[test]
    fn test_zero_max_requests() {
        let file = write_config(r#"{
            "discord_token": "abc",
            "open_router": { "key": "k" },
            "rate_limit": { "max_requests": 0 }
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("max_requests"));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/.chad"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
