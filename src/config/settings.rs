//! Application settings

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::channels::{openai, telegram};
use crate::error::ConfigError;
use crate::ingest::MIN_POLL_INTERVAL;
use crate::utils::RetryPolicy;

pub const ENV_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_OPENAI_KEY: &str = "OPENAI_API_KEY";

/// Mail source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    /// Directory of `.eml` files to ingest
    pub spool_dir: String,

    /// Only messages whose From header contains this address are fetched
    pub sender_filter: String,

    /// Seconds between polling cycles
    pub poll_interval_secs: u64,

    /// Maximum messages fetched per cycle
    pub fetch_limit: usize,

    /// Acknowledge processed messages at the source
    pub mark_processed: bool,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            spool_dir: Settings::config_dir()
                .join("spool")
                .to_string_lossy()
                .to_string(),
            sender_filter: "cloud_noreply@kaspersky.com".to_string(),
            poll_interval_secs: 60,
            fetch_limit: 50,
            mark_processed: true,
        }
    }
}

/// Duplicate suppression settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    pub window_secs: u64,
    pub repeat_threshold: u64,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            window_secs: 600,
            repeat_threshold: 3,
        }
    }
}

/// Notification channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    /// Bot token; `TELEGRAM_BOT_TOKEN` overrides it
    pub bot_token: String,
    pub api_base: String,

    /// Chat ids that receive every alert
    pub admin_addresses: Vec<String>,

    pub timeout_secs: u64,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: telegram::DEFAULT_API_BASE.to_string(),
            admin_addresses: Vec::new(),
            timeout_secs: 30,
        }
    }
}

/// Optional text-generation enrichment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub enabled: bool,

    /// API key; `OPENAI_API_KEY` overrides it
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            base_url: openai::DEFAULT_BASE_URL.to_string(),
            timeout_secs: 60,
        }
    }
}

/// Retry policies per collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub source: RetryPolicy,
    pub enrichment: RetryPolicy,
    pub delivery: RetryPolicy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            source: RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(30)),
            enrichment: RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(4)),
            delivery: RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(10)),
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Database file path
    pub database_path: String,

    pub mail: MailSettings,
    pub dedup: DedupSettings,
    pub telegram: TelegramSettings,
    pub llm: LlmSettings,
    pub retry: RetrySettings,

    /// Log level
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: Self::default_db_path().to_string_lossy().to_string(),
            mail: MailSettings::default(),
            dedup: DedupSettings::default(),
            telegram: TelegramSettings::default(),
            llm: LlmSettings::default(),
            retry: RetrySettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from file (defaults when absent), then apply environment overrides
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = path
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_config_path);

        let mut settings = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading {}", config_path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", config_path.display()))?
        } else {
            Self::default()
        };

        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Secrets from the environment win over the file
    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(token) = lookup(ENV_BOT_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.telegram.bot_token = token.trim().to_string();
        }
        if let Some(key) = lookup(ENV_OPENAI_KEY).filter(|v| !v.trim().is_empty()) {
            self.llm.api_key = key.trim().to_string();
        }
    }

    /// Normalize and check settings before the service starts.
    ///
    /// The poll interval is raised to the minimum and admin addresses are de-duplicated in order.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let min = MIN_POLL_INTERVAL.as_secs();
        if self.mail.poll_interval_secs < min {
            self.mail.poll_interval_secs = min;
        }

        let mut admins: Vec<String> = Vec::new();
        for address in &self.telegram.admin_addresses {
            let a = address.trim();
            if !a.is_empty() && !admins.iter().any(|x| x == a) {
                admins.push(a.to_string());
            }
        }
        self.telegram.admin_addresses = admins;

        if self.dedup.window_secs == 0 {
            return Err(ConfigError::Zero {
                field: "dedup.window_secs",
            });
        }
        if self.dedup.repeat_threshold == 0 {
            return Err(ConfigError::Zero {
                field: "dedup.repeat_threshold",
            });
        }
        if self.mail.fetch_limit == 0 {
            return Err(ConfigError::Zero {
                field: "mail.fetch_limit",
            });
        }
        if self.telegram.admin_addresses.is_empty() {
            return Err(ConfigError::NoAdmins);
        }
        if self.telegram.bot_token.trim().is_empty() {
            return Err(ConfigError::MissingBotToken);
        }
        if self.llm.enabled && self.llm.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.mail.poll_interval_secs)
    }

    /// Get default config directory
    pub fn config_dir() -> PathBuf {
        ProjectDirs::from("com", "soc-relay", "soc-relay")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".config")
                    .join("soc-relay")
            })
    }

    /// Get default config file path
    pub fn default_config_path() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    /// Get default database path
    pub fn default_db_path() -> PathBuf {
        Self::config_dir().join("soc-relay.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Settings {
        let mut s = Settings::default();
        s.telegram.bot_token = "123:abc".to_string();
        s.telegram.admin_addresses = vec!["100".to_string()];
        s
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let s: Settings =
            serde_json::from_str(r#"{ "dedup": { "window_secs": 300 }, "retry": { "source": { "max_attempts": 5, "initial_delay_ms": 10, "max_delay_ms": 100 } } }"#)
                .unwrap();
        assert_eq!(s.dedup.window_secs, 300);
        assert_eq!(s.dedup.repeat_threshold, 3);
        assert_eq!(s.llm.model, "gpt-4o-mini");
        assert_eq!(s.retry.source.max_attempts, 5);
        assert_eq!(s.retry.source.initial_delay, Duration::from_millis(10));
        assert_eq!(s.mail.sender_filter, "cloud_noreply@kaspersky.com");
    }

    #[test]
    fn test_validate_clamps_and_dedups() {
        let mut s = valid();
        s.mail.poll_interval_secs = 1;
        s.telegram.admin_addresses = vec!["100".into(), " 200 ".into(), "100".into(), "".into()];
        s.validate().unwrap();
        assert_eq!(s.mail.poll_interval_secs, 5);
        assert_eq!(s.telegram.admin_addresses, vec!["100", "200"]);
    }

    #[test]
    fn test_validate_rejects_misconfiguration() {
        let mut s = valid();
        s.telegram.admin_addresses.clear();
        assert_eq!(s.validate(), Err(ConfigError::NoAdmins));

        let mut s = valid();
        s.dedup.window_secs = 0;
        assert!(matches!(s.validate(), Err(ConfigError::Zero { .. })));

        let mut s = valid();
        s.telegram.bot_token.clear();
        assert_eq!(s.validate(), Err(ConfigError::MissingBotToken));

        let mut s = valid();
        s.llm.enabled = true;
        assert_eq!(s.validate(), Err(ConfigError::MissingApiKey));
    }

    #[test]
    fn test_env_overrides_secrets() {
        let mut s = Settings::default();
        s.telegram.bot_token = "from-file".to_string();
        s.apply_env(|key| match key {
            ENV_BOT_TOKEN => Some("from-env".to_string()),
            ENV_OPENAI_KEY => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(s.telegram.bot_token, "from-env");
        assert!(s.llm.api_key.is_empty());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("absent.json");
        let s = Settings::load(path.to_str()).unwrap();
        assert_eq!(s.dedup.window_secs, 600);
    }
}
