use std::path::PathBuf;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub port: u16,
    pub rust_log: String,
    /// Directory whose `<id>.json` files override the bundled system flows.
    pub flow_templates_dir: Option<PathBuf>,
    /// Upper bound on engine steps taken by one `advance` call.
    pub max_auto_steps: usize,
    pub effect_http_timeout_secs: u64,
    /// Receives e-mail and SMS actions. Without it they are only logged.
    pub notify_webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            flow_templates_dir: optional_env("FLOW_TEMPLATES_DIR").map(PathBuf::from),
            max_auto_steps: parse_env("MAX_AUTO_STEPS", 64)?,
            effect_http_timeout_secs: parse_env("EFFECT_HTTP_TIMEOUT_SECS", 30)?,
            notify_webhook_url: optional_env("NOTIFY_WEBHOOK_URL"),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        None => Ok(default),
    }
}
