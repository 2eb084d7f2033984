//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The processor token is loaded from PROCESSOR_TOKEN or processor_token_file,
//! never stored in the TOML directly.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub dispatch: DispatchConfig,
}

/// Listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Admin API listener, kept off the public port
    pub admin_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Credential pool and scheduler settings
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    /// Directory holding one `<category>.json` per category
    pub data_dir: PathBuf,
    /// Categories accepted by trigger-job; each gets one scheduler worker
    pub categories: Vec<String>,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_ban_threshold")]
    pub ban_threshold: u32,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

/// Outbound hand-off to the job processor
#[derive(Debug, Deserialize)]
pub struct DispatchConfig {
    pub processor_url: String,
    /// Advertised to the processor as `cookies_release_url`
    pub release_url: String,
    /// Advertised to the processor as `trigger_job_url`
    pub trigger_job_url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(skip)]
    pub processor_token: Option<Secret<String>>,
    /// Path to a file containing the bearer token (alternative to PROCESSOR_TOKEN)
    #[serde(default)]
    pub processor_token_file: Option<PathBuf>,
}

fn default_max_connections() -> usize {
    1000
}

fn default_retry_interval() -> u64 {
    60
}

fn default_ban_threshold() -> u32 {
    lease_pool::DEFAULT_BAN_THRESHOLD
}

fn default_report_interval() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_read_timeout() -> u64 {
    3
}

impl PoolConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

impl DispatchConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Processor token resolution order:
    /// 1. PROCESSOR_TOKEN env var
    /// 2. processor_token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("PROCESSOR_URL") {
            config.dispatch.processor_url = url;
        }

        // Platform names arrive lowercased on the webhook
        for category in &mut config.pool.categories {
            *category = category.trim().to_lowercase();
        }

        config.validate()?;

        if let Ok(token) = std::env::var("PROCESSOR_TOKEN") {
            let token = Secret::from(token);
            if !token.is_empty() {
                config.dispatch.processor_token = Some(token);
            }
        } else if let Some(ref token_file) = config.dispatch.processor_token_file {
            let token = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read processor_token_file {}: {e}",
                    token_file.display()
                ))
            })?;
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.dispatch.processor_token = Some(token.into());
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        for (field, url) in [
            ("dispatch.processor_url", &self.dispatch.processor_url),
            ("dispatch.release_url", &self.dispatch.release_url),
            ("dispatch.trigger_job_url", &self.dispatch.trigger_job_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::invalid(
                    field,
                    format!("must start with http:// or https://, got: {url}"),
                ));
            }
        }

        if self.server.max_connections == 0 {
            return Err(common::Error::invalid(
                "server.max_connections",
                "must be greater than 0",
            ));
        }
        if self.pool.categories.is_empty() {
            return Err(common::Error::invalid("pool.categories", "must not be empty"));
        }
        if let Some(bad) = self.pool.categories.iter().find(|c| !valid_category(c)) {
            return Err(common::Error::invalid(
                "pool.categories",
                format!("entries must match [a-z0-9_-]+, got: {bad:?}"),
            ));
        }
        if self.pool.ban_threshold == 0 {
            return Err(common::Error::invalid(
                "pool.ban_threshold",
                "must be greater than 0",
            ));
        }
        for (field, secs) in [
            ("pool.retry_interval_secs", self.pool.retry_interval_secs),
            ("pool.report_interval_secs", self.pool.report_interval_secs),
            ("dispatch.connect_timeout_secs", self.dispatch.connect_timeout_secs),
            ("dispatch.read_timeout_secs", self.dispatch.read_timeout_secs),
        ] {
            if secs == 0 {
                return Err(common::Error::invalid(field, "must be greater than 0"));
            }
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("cookie-broker.toml")
    }
}

fn valid_category(category: &str) -> bool {
    !category.is_empty()
        && category
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
}
