use crate::core::ChatError;
use crate::scroll::ScrollOptions;
use clap::ValueEnum;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

include!(concat!(env!("OUT_DIR"), "/config_embedded.rs"));

/// Prefix of environment variables that override file settings,
/// e.g. `AGENT_CHAT_SERVER__BASE_URL`.
const ENV_PREFIX: &str = "AGENT_CHAT";

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScrollConfig {
    pub threshold: f64,
    pub scroll_delay_ms: u64,
    pub retry_delays_ms: Vec<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[value(name = "text")]
    Text,
    #[value(name = "json")]
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub scroll: ScrollConfig,
    pub output: OutputConfig,
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("Invalid default config")
    }
}

impl Config {
    /// Loads `config.toml` from the working directory on top of the embedded
    /// defaults, then applies `AGENT_CHAT_*` environment overrides.
    pub fn load() -> Result<Self, ChatError> {
        Self::load_from(Path::new("config.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self, ChatError> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from_str(
                DEFAULT_CONFIG,
                ::config::FileFormat::Toml,
            ))
            .add_source(::config::File::from(path).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        settings
            .try_deserialize()
            .map_err(|e| ChatError::ConfigError(format!("Failed to parse config file: {e}")))
    }

    pub fn update_format(&mut self, format: OutputFormat) {
        self.output.format = format;
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.server.timeout_secs)
    }

    pub fn scroll_options(&self) -> ScrollOptions {
        ScrollOptions {
            threshold: self.scroll.threshold,
            scroll_delay: Duration::from_millis(self.scroll.scroll_delay_ms),
            retry_delays: self
                .scroll
                .retry_delays_ms
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
        }
    }
}
