use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub token: String,
    #[serde(default)]
    pub admin_chat_id: Option<i64>,
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    #[serde(default = "default_true")]
    pub serialize_chats: bool,
    #[serde(default)]
    pub sender: SenderConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SenderConfig {
    pub max_message_length: usize,
    pub max_concurrent: usize,
    pub per_priority_limit: usize,
    pub max_attempts: u32,
    pub default_priority: u8,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            max_message_length: 4096,
            max_concurrent: 42,
            per_priority_limit: 8,
            max_attempts: 10,
            default_priority: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct RateLimit {
    pub amount: usize,
    pub period_secs: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub global: RateLimit,
    pub user: RateLimit,
    pub group: RateLimit,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            global: RateLimit {
                amount: 30,
                period_secs: 1.0,
            },
            user: RateLimit {
                amount: 3,
                period_secs: 1.0,
            },
            group: RateLimit {
                amount: 20,
                period_secs: 60.0,
            },
        }
    }
}

/// Shortest message that still leaves room for part numbering.
pub const MIN_MESSAGE_LENGTH: usize = 16;

impl RateLimit {
    fn validate(&self, name: &str) -> Result<()> {
        if self.amount == 0 {
            bail!("limits.{}.amount must be at least 1", name);
        }
        if !self.period_secs.is_finite() || self.period_secs <= 0.0 {
            bail!(
                "limits.{}.period_secs must be a positive number of seconds, got {}",
                name,
                self.period_secs
            );
        }
        Ok(())
    }
}

impl Config {
    /// Rejects settings the sender could not make progress with.
    pub fn validate(&self) -> Result<()> {
        let sender = &self.sender;
        if sender.max_concurrent == 0 {
            bail!("sender.max_concurrent must be at least 1");
        }
        if sender.per_priority_limit == 0 {
            bail!("sender.per_priority_limit must be at least 1");
        }
        if sender.max_attempts == 0 {
            bail!("sender.max_attempts must be at least 1");
        }
        if sender.max_message_length < MIN_MESSAGE_LENGTH {
            bail!(
                "sender.max_message_length must be at least {}",
                MIN_MESSAGE_LENGTH
            );
        }
        self.limits.global.validate("global")?;
        self.limits.user.validate("user")?;
        self.limits.group.validate("group")?;
        Ok(())
    }
}

fn default_data_path() -> PathBuf {
    PathBuf::from("windowbot.json")
}

fn default_true() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("parse config")?;
    config.validate().context("invalid config")?;
    Ok(config)
}
