//! # Configuration
//!
//! Settings are layered: `.env` first, then an optional config file, then
//! `ERROR_PIPELINE__*` environment variables. Nested keys use `__`, so
//! `ERROR_PIPELINE__NOTIFY__ACCESS_TOKEN` sets `notify.access_token`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::dispatch::{DispatchTarget, NotificationChannel};
use crate::error::{PipelineError, Result};
use crate::logging::LoggingConfig;
use crate::transport::ChatApiChannel;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "ERROR_PIPELINE";

pub const DEFAULT_ENDPOINT: &str = "https://api.vk.com";
pub const DEFAULT_API_VERSION: &str = "5.199";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Chat endpoint settings
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Base URL; `/method/messages.send` is appended
    pub endpoint: String,
    pub access_token: String,
    pub api_version: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for NotifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyConfig")
            .field("endpoint", &self.endpoint)
            .field("access_token", &"<redacted>")
            .field("api_version", &self.api_version)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl NotifyConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            access_token: access_token.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Chat peer ids; empty means reports go to a callback instead
    pub recipients: Vec<i64>,
    pub path_filters: Vec<String>,
    pub snippet_padding: u32,
    pub notify: Option<NotifyConfig>,
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Builds the notification target described by this configuration.
    ///
    /// Fails when no recipients are configured or the endpoint settings are
    /// missing.
    pub fn into_target(&self) -> Result<DispatchTarget> {
        if self.recipients.is_empty() {
            return Err(PipelineError::configuration("no recipients configured"));
        }
        let notify = self
            .notify
            .as_ref()
            .ok_or_else(|| PipelineError::configuration("recipients configured without notify settings"))?;

        let channel: Arc<dyn NotificationChannel> = Arc::new(ChatApiChannel::new(notify.clone())?);
        Ok(DispatchTarget::recipients(self.recipients.iter().copied(), channel))
    }
}

/// Loads configuration from `.env`, an optional file and the environment
pub fn load_config(path: Option<&str>) -> Result<PipelineConfig> {
    dotenv::dotenv().ok();

    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::with_name(path).required(false));
    }
    let cfg = builder
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    let config = PipelineConfig::try_from(cfg)?;
    tracing::debug!(
        recipients = config.recipients.len(),
        path_filters = config.path_filters.len(),
        notify = config.notify.is_some(),
        "Pipeline configuration loaded"
    );
    Ok(config)
}

impl TryFrom<Config> for NotifyConfig {
    type Error = PipelineError;

    fn try_from(cfg: Config) -> std::result::Result<Self, Self::Error> {
        let access_token = cfg
            .get::<String>("notify.access_token")
            .map_err(|_| PipelineError::configuration("notify.access_token is required"))?;

        let mut base = NotifyConfig::new(access_token);
        if let Ok(endpoint) = cfg.get::<String>("notify.endpoint") {
            base.endpoint = endpoint.trim_end_matches('/').to_string();
        }
        if let Ok(api_version) = cfg.get::<String>("notify.api_version") {
            base.api_version = api_version;
        }
        if let Ok(timeout_secs) = cfg.get::<u64>("notify.timeout_secs") {
            base.timeout_secs = timeout_secs;
        }

        Ok(base)
    }
}

impl TryFrom<Config> for PipelineConfig {
    type Error = PipelineError;

    fn try_from(cfg: Config) -> std::result::Result<Self, Self::Error> {
        let mut base = PipelineConfig::default();

        base.recipients = get_list(&cfg, "recipients")?;
        base.path_filters = get_list(&cfg, "path_filters")?;
        if let Ok(padding) = cfg.get::<u32>("snippet_padding") {
            base.snippet_padding = padding;
        }
        if cfg.get::<String>("notify.access_token").is_ok() {
            base.notify = Some(NotifyConfig::try_from(cfg.clone())?);
        }
        base.logging = LoggingConfig::try_from(cfg)?;

        Ok(base)
    }
}

// Accepts either an array or a comma-separated string
fn get_list<T>(cfg: &Config, key: &str) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: Vec<String> = match cfg.get::<Vec<String>>(key) {
        Ok(items) => items,
        Err(_) => match cfg.get::<String>(key) {
            Ok(joined) => joined.split(',').map(str::to_string).collect(),
            Err(_) => return Ok(Vec::new()),
        },
    };

    raw.iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<T>()
                .map_err(|e| PipelineError::configuration(format!("invalid {} entry '{}': {}", key, item, e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn from_overrides(pairs: &[(&str, &str)]) -> Result<PipelineConfig> {
        let mut builder = Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(*key, *value).unwrap();
        }
        PipelineConfig::try_from(builder.build().unwrap())
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = from_overrides(&[]).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert!(config.into_target().is_err());
    }

    #[test]
    fn test_comma_separated_lists() {
        let config = from_overrides(&[("recipients", "111, 222"), ("path_filters", "/srv/app,/home/ci")]).unwrap();
        assert_eq!(config.recipients, vec![111, 222]);
        assert_eq!(config.path_filters, vec!["/srv/app", "/home/ci"]);
    }

    #[test]
    fn test_invalid_recipient_rejected() {
        let err = from_overrides(&[("recipients", "111,abc")]).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(msg) if msg.contains("abc")));
    }

    #[test]
    fn test_notify_section() {
        let config = from_overrides(&[
            ("recipients", "5"),
            ("notify.access_token", "secret"),
            ("notify.endpoint", "http://localhost:9000/"),
            ("notify.timeout_secs", "3"),
        ])
        .unwrap();

        let notify = config.notify.clone().unwrap();
        assert_eq!(notify.endpoint, "http://localhost:9000");
        assert_eq!(notify.api_version, DEFAULT_API_VERSION);
        assert_eq!(notify.timeout(), Duration::from_secs(3));
        assert!(!format!("{:?}", notify).contains("secret"));

        let target = config.into_target().unwrap();
        assert!(matches!(target, DispatchTarget::Notify { ref recipients, .. } if recipients == &[5]));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "recipients = [10, 20]\nsnippet_padding = 2\n\n[logging]\nlevel = \"debug\"\njson_format = false"
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.recipients, vec![10, 20]);
        assert_eq!(config.snippet_padding, 2);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.json_format);
    }
}
