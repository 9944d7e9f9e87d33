use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub log_format: LogFormat,
    pub default_filter: String,
}

impl TelemetryConfig {
    pub fn from_env(service_name: &str) -> Self {
        let log_format = match std::env::var("LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Self {
            service_name: service_name.to_string(),
            log_format,
            default_filter: "info".to_string(),
        }
    }
}

/// Installs the global subscriber. Logs always go to stderr: stdout is
/// reserved for Singer messages.
pub fn init_telemetry(config: TelemetryConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    result.map_err(|e| anyhow!("Failed to initialize tracing: {}", e))?;

    tracing::info!(service = %config.service_name, "Telemetry initialized");
    Ok(())
}
