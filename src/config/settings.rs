use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub telegram_bot_token: String,
    pub database_url: String,
    pub bot_name: String,
    /// Long-poll wait for getUpdates, in seconds.
    pub poll_timeout_secs: u32,
    pub max_retry_attempts: u32,
    /// Process-level mutual exclusion for the polling run.
    pub lock_file: String,
    pub log_level: String,
}

impl Settings {
    pub fn new() -> Result<Self> {
        let telegram_bot_token = env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| anyhow!("TELEGRAM_BOT_TOKEN must be set"))?;

        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "settlebot.db".to_string());

        let bot_name = env::var("BOT_NAME").unwrap_or_else(|_| "SettleBot".to_string());

        let poll_timeout_secs = env::var("POLL_TIMEOUT")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u32>()
            .unwrap_or(30);

        let max_retry_attempts = env::var("MAX_RETRY_ATTEMPTS")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<u32>()
            .unwrap_or(3);

        let lock_file =
            env::var("POLL_LOCK_FILE").unwrap_or_else(|_| "/tmp/settlebot_poll.lock".to_string());

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(Settings {
            telegram_bot_token,
            database_url,
            bot_name,
            poll_timeout_secs,
            max_retry_attempts,
            lock_file,
            log_level,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram_bot_token.is_empty() {
            return Err(anyhow!("Telegram bot token cannot be empty"));
        }

        if self.database_url.is_empty() {
            return Err(anyhow!("Database URL cannot be empty"));
        }

        if self.lock_file.is_empty() {
            return Err(anyhow!("Poll lock file path cannot be empty"));
        }

        if self.max_retry_attempts == 0 {
            return Err(anyhow!("Max retry attempts must be greater than 0"));
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            telegram_bot_token: String::new(),
            database_url: "settlebot.db".to_string(),
            bot_name: "SettleBot".to_string(),
            poll_timeout_secs: 30,
            max_retry_attempts: 3,
            lock_file: "/tmp/settlebot_poll.lock".to_string(),
            log_level: "info".to_string(),
        }
    }
}
