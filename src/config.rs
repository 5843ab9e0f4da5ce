use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::Deserialize;

use crate::cipher::{FrameCipher, BM6_KEY};
use crate::metrics::ThingSpeakClient;
use crate::session::SessionSettings;

/// Service configuration, loaded once at startup.
///
/// Read from a TOML file, with environment variables prefixed `BM6READ_`
/// taking precedence (e.g. `BM6READ_METRICS__API_KEY`, or
/// `BM6READ_DEVICES=addr1,addr2`).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Device addresses. The order determines the report slots.
    ///
    /// MAC addresses on Linux, platform device ids on macOS and Windows.
    pub devices: Vec<String>,
    /// Override of the frame key, as 32 hex digits
    #[serde(default)]
    pub cipher_key: Option<String>,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "MetricsConfig::default_url")]
    pub url: String,
    pub api_key: String,
    #[serde(default = "MetricsConfig::default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_seconds: u64,
    pub run_immediately: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub connect_timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub connect_retries: u32,
    pub parallel: bool,
}

impl Config {
    const ENV_PREFIX: &'static str = "BM6READ";

    /// Load configuration from a TOML file and the environment
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(Self::environment())
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        Self::from_settings(settings)
    }

    /// Load configuration from TOML text, ignoring the environment
    pub fn from_toml(toml: &str) -> anyhow::Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from_str(toml, ::config::FileFormat::Toml))
            .build()?;

        Self::from_settings(settings)
    }

    fn environment() -> ::config::Environment {
        ::config::Environment::with_prefix(Self::ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("devices")
            .try_parsing(true)
    }

    fn from_settings(settings: ::config::Config) -> anyhow::Result<Self> {
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.devices.is_empty() {
            return Err(anyhow!("No devices configured"));
        }
        if self.schedule.interval_seconds == 0 {
            return Err(anyhow!("schedule.interval_seconds must be greater than zero"));
        }
        if self.session.poll_interval_ms == 0 {
            return Err(anyhow!("session.poll_interval_ms must be greater than zero"));
        }
        self.cipher()?;
        Ok(())
    }

    pub fn cipher(&self) -> anyhow::Result<FrameCipher> {
        let Some(key) = &self.cipher_key else {
            return Ok(FrameCipher::new(BM6_KEY));
        };
        let key: [u8; 16] = hex::decode(key)
            .context("cipher_key is not valid hex")?
            .try_into()
            .map_err(|key: Vec<u8>| anyhow!("cipher_key must be 16 bytes, got {}", key.len()))?;
        Ok(FrameCipher::new(key))
    }
}

impl MetricsConfig {
    fn default_url() -> String {
        ThingSpeakClient::DEFAULT_URL.to_string()
    }

    fn default_timeout_seconds() -> u64 {
        10
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { interval_seconds: 15 * 60, run_immediately: true }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let settings = SessionSettings::default();
        Self {
            connect_timeout_seconds: settings.connect_timeout.as_secs(),
            poll_interval_ms: settings.poll_interval.as_millis() as u64,
            max_poll_attempts: settings.max_poll_attempts,
            connect_retries: 2,
            parallel: false,
        }
    }
}

impl SessionConfig {
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_seconds),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_poll_attempts: self.max_poll_attempts,
        }
    }
}
