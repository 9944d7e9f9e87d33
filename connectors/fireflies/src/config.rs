use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const FIREFLIES_GRAPHQL_URL: &str = "https://api.fireflies.ai/graphql";
pub const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Transport-level ceiling on calls per rolling minute.
pub const CALLS_PER_MINUTE: u32 = 1000;
/// The pagination engine cools down after this many requests.
pub const PAGINATION_REQUESTS_PER_COOLDOWN: u32 = 60;
pub const PAGINATION_COOLDOWN: Duration = Duration::from_secs(60);

pub const MAX_PAGE_SIZE: usize = 50;
pub const RECORD_CEILING: usize = 5000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Missing required config key `{0}`")]
    Missing(&'static str),
    #[error("start_date `{0}` is not an ISO-8601 timestamp")]
    InvalidStartDate(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TimeoutValue {
    Seconds(f64),
    Text(String),
}

#[derive(Clone, Deserialize)]
pub struct TapConfig {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub endpoint_url: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    request_timeout: Option<TimeoutValue>,
}

impl fmt::Debug for TapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TapConfig")
            .field("access_token", &"<redacted>")
            .field("endpoint_url", &self.endpoint_url)
            .field("start_date", &self.start_date)
            .field("request_timeout", &self.request_timeout())
            .finish()
    }
}

impl TapConfig {
    pub fn new(access_token: &str, endpoint_url: &str, start_date: &str) -> Result<Self, ConfigError> {
        let config = Self {
            access_token: access_token.to_string(),
            endpoint_url: endpoint_url.to_string(),
            start_date: start_date.to_string(),
            request_timeout: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: TapConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let var = |name: &str| std::env::var(name).unwrap_or_default();

        let config = Self {
            access_token: var("FIREFLIES_ACCESS_TOKEN"),
            endpoint_url: std::env::var("FIREFLIES_ENDPOINT_URL")
                .unwrap_or_else(|_| FIREFLIES_GRAPHQL_URL.to_string()),
            start_date: var("FIREFLIES_START_DATE"),
            request_timeout: std::env::var("FIREFLIES_REQUEST_TIMEOUT")
                .ok()
                .map(TimeoutValue::Text),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_request_timeout(mut self, seconds: f64) -> Self {
        self.request_timeout = Some(TimeoutValue::Seconds(seconds));
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.access_token.is_empty() {
            return Err(ConfigError::Missing("access_token"));
        }
        if self.endpoint_url.is_empty() {
            return Err(ConfigError::Missing("endpoint_url"));
        }
        if self.start_date.is_empty() {
            return Err(ConfigError::Missing("start_date"));
        }
        self.start_datetime()?;
        Ok(())
    }

    pub fn start_datetime(&self) -> Result<DateTime<Utc>, ConfigError> {
        DateTime::parse_from_rfc3339(&self.start_date)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| ConfigError::InvalidStartDate(self.start_date.clone()))
    }

    /// Zero, unparsable, empty or absent values fall back to the default.
    pub fn request_timeout(&self) -> Duration {
        let seconds = match &self.request_timeout {
            Some(TimeoutValue::Seconds(s)) => *s,
            Some(TimeoutValue::Text(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
            None => 0.0,
        };
        if seconds.is_finite() && seconds > 0.0 {
            Duration::from_secs_f64(seconds)
        } else {
            Duration::from_secs(REQUEST_TIMEOUT_SECS)
        }
    }
}
