use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Render service
    #[serde(default = "default_render_api_base")]
    pub render_api_base: String,
    #[serde(default)]
    pub render_api_key: String,

    // Poll-confirm payment gateway
    #[serde(default)]
    pub payment_api_base: String,
    #[serde(default)]
    pub payment_api_token: String,
    #[serde(default = "default_currency")]
    pub payment_currency: String,

    // Notifier (Bot API)
    #[serde(default = "default_bot_api_base")]
    pub bot_api_base: String,
    #[serde(default)]
    pub bot_token: String,

    // Job poller: 90 polls x 8 s ~ 12 minutes
    #[serde(default = "default_job_poll_interval_ms")]
    pub job_poll_interval_ms: u64,
    #[serde(default = "default_job_poll_max_attempts")]
    pub job_poll_max_attempts: u32,

    // Payment poller: 30 polls x 10 s = 5 minutes
    #[serde(default = "default_payment_poll_interval_ms")]
    pub payment_poll_interval_ms: u64,
    #[serde(default = "default_payment_poll_max_attempts")]
    pub payment_poll_max_attempts: u32,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_remove_watermark")]
    pub remove_watermark: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            render_api_base: default_render_api_base(),
            render_api_key: String::new(),
            payment_api_base: String::new(),
            payment_api_token: String::new(),
            payment_currency: default_currency(),
            bot_api_base: default_bot_api_base(),
            bot_token: String::new(),
            job_poll_interval_ms: default_job_poll_interval_ms(),
            job_poll_max_attempts: default_job_poll_max_attempts(),
            payment_poll_interval_ms: default_payment_poll_interval_ms(),
            payment_poll_max_attempts: default_payment_poll_max_attempts(),
            http_timeout_secs: default_http_timeout_secs(),
            remove_watermark: default_remove_watermark(),
        }
    }
}

fn default_render_api_base() -> String {
    "https://api.kie.ai".to_string()
}
fn default_bot_api_base() -> String {
    "https://api.telegram.org".to_string()
}
fn default_currency() -> String {
    "RUB".to_string()
}
fn default_job_poll_interval_ms() -> u64 {
    8_000
}
fn default_job_poll_max_attempts() -> u32 {
    90
}
fn default_payment_poll_interval_ms() -> u64 {
    10_000
}
fn default_payment_poll_max_attempts() -> u32 {
    30
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_remove_watermark() -> bool {
    true
}

impl Config {
    /// Load configuration from "config.toml" if present, otherwise defaults.
    /// Secrets can be overridden from the environment with highest priority:
    /// RENDER_API_KEY, PAYMENT_API_TOKEN, BOT_TOKEN.
    pub fn load() -> Result<Self, String> {
        Self::load_from("config.toml")
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let mut cfg = match fs::read_to_string(path) {
            Ok(s) => toml::from_str::<Config>(&s)
                .map_err(|e| format!("invalid config file: {e}"))?,
            Err(_) => Config::default(),
        };

        // ENV overrides have priority
        if let Ok(v) = std::env::var("RENDER_API_KEY") {
            cfg.render_api_key = v;
        }
        if let Ok(v) = std::env::var("PAYMENT_API_TOKEN") {
            cfg.payment_api_token = v;
        }
        if let Ok(v) = std::env::var("BOT_TOKEN") {
            cfg.bot_token = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate configuration consistency and constraints.
    pub fn validate(&self) -> Result<(), String> {
        if self.render_api_base.is_empty() {
            return Err("render_api_base must not be empty".to_string());
        }

        if self.job_poll_interval_ms == 0 {
            return Err("job_poll_interval_ms must be greater than 0".to_string());
        }

        if self.job_poll_max_attempts == 0 {
            return Err("job_poll_max_attempts must be greater than 0".to_string());
        }

        if self.payment_poll_interval_ms == 0 {
            return Err("payment_poll_interval_ms must be greater than 0".to_string());
        }

        if self.payment_poll_max_attempts == 0 {
            return Err("payment_poll_max_attempts must be greater than 0".to_string());
        }

        if self.http_timeout_secs == 0 {
            return Err("http_timeout_secs must be greater than 0".to_string());
        }

        Ok(())
    }
}
