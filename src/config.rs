use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::browser::{ChromeOptions, DEFAULT_ARGS, DEFAULT_LAUNCH_TIMEOUT};
use crate::error::{PrintdError, Result};
use crate::pool::{self, PoolConfig};
use crate::server::{ServeOptions, DEFAULT_BODY_LIMIT, DEFAULT_DRAIN_GRACE};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub pool: PoolSettings,
    pub server: ServerSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    pub min: usize,
    pub max: usize,
    /// Zero waits indefinitely.
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    pub max_waiting_clients: usize,
    pub browser_args: Vec<String>,
    pub browser_path: Option<PathBuf>,
    #[serde(with = "humantime_serde")]
    pub launch_timeout: Duration,
    pub eager: bool,
    pub validate_on_borrow: bool,
    #[serde(with = "humantime_serde")]
    pub drain_grace: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min: pool::DEFAULT_MIN,
            max: pool::DEFAULT_MAX,
            acquire_timeout: pool::DEFAULT_ACQUIRE_TIMEOUT,
            max_waiting_clients: pool::DEFAULT_MAX_WAITING_CLIENTS,
            browser_args: DEFAULT_ARGS.iter().map(|a| a.to_string()).collect(),
            browser_path: None,
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
            eager: true,
            validate_on_borrow: false,
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub body_limit: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = PrintdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(PrintdError::config(format!(
                "unknown log format '{other}' (expected compact or json)"
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Compact => f.write_str("compact"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

fn parse_env<T: FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| PrintdError::config(format!("{name}={raw:?} is invalid: {e}")))
}

impl Config {
    /// `~/.config/printd/config.toml`, when a home directory is known.
    pub fn central_config_path() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".config").join("printd").join("config.toml"))
    }

    /// Priority: explicit path > central config > defaults.
    /// Returns the config together with the file it came from, if any.
    pub fn load(path: Option<&Path>) -> Result<(Config, Option<PathBuf>)> {
        let source = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Config::central_config_path().filter(|p| p.is_file()),
        };
        let Some(source) = source else {
            return Ok((Config::default(), None));
        };

        let text = std::fs::read_to_string(&source).map_err(|e| {
            PrintdError::config(format!("failed to read {}: {e}", source.display()))
        })?;
        let config = Config::from_toml_str(&text).map_err(|e| {
            PrintdError::config(format!("{}: {}", source.display(), e.reason()))
        })?;
        Ok((config, Some(source)))
    }

    pub fn from_toml_str(text: &str) -> Result<Config> {
        toml::from_str(text).map_err(|e| PrintdError::config(e.to_string()))
    }

    /// Applies `PRINTD_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(raw) = var("PRINTD_POOL_MIN") {
            self.pool.min = parse_env("PRINTD_POOL_MIN", &raw)?;
        }
        if let Some(raw) = var("PRINTD_POOL_MAX") {
            self.pool.max = parse_env("PRINTD_POOL_MAX", &raw)?;
        }
        if let Some(raw) = var("PRINTD_POOL_ACQUIRE_TIMEOUT_MS") {
            let ms: u64 = parse_env("PRINTD_POOL_ACQUIRE_TIMEOUT_MS", &raw)?;
            self.pool.acquire_timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = var("PRINTD_POOL_MAX_WAITING_CLIENTS") {
            self.pool.max_waiting_clients = parse_env("PRINTD_POOL_MAX_WAITING_CLIENTS", &raw)?;
        }
        if let Some(raw) = var("PRINTD_BROWSER_ARGS") {
            self.pool.browser_args = raw
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(raw) = var("PRINTD_BROWSER_PATH").or_else(|| var("CHROME_PATH")) {
            self.pool.browser_path = Some(PathBuf::from(raw.trim()));
        }
        if let Some(raw) = var("PRINTD_HOST") {
            self.server.host = raw.trim().to_string();
        }
        if let Some(raw) = var("PRINTD_PORT") {
            self.server.port = parse_env("PRINTD_PORT", &raw)?;
        }
        if let Some(raw) = var("PRINTD_LOG_LEVEL") {
            self.logging.level = raw.trim().to_string();
        }
        if let Some(raw) = var("PRINTD_LOG_FORMAT") {
            self.logging.format = raw.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool.max == 0 {
            return Err(PrintdError::config("pool.max must be at least 1"));
        }
        if self.pool.min > self.pool.max {
            return Err(PrintdError::config(format!(
                "pool.min ({}) must not exceed pool.max ({})",
                self.pool.min, self.pool.max
            )));
        }
        if self.server.host.trim().is_empty() {
            return Err(PrintdError::config("server.host must not be empty"));
        }
        if self.server.body_limit == 0 {
            return Err(PrintdError::config("server.body_limit must be positive"));
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min: self.pool.min,
            max: self.pool.max,
            acquire_timeout: (!self.pool.acquire_timeout.is_zero())
                .then_some(self.pool.acquire_timeout),
            max_waiting_clients: self.pool.max_waiting_clients,
            eager: self.pool.eager,
            validate_on_borrow: self.pool.validate_on_borrow,
        }
    }

    pub fn chrome_options(&self) -> ChromeOptions {
        ChromeOptions {
            executable: self.pool.browser_path.clone(),
            args: self.pool.browser_args.clone(),
            launch_timeout: self.pool.launch_timeout,
        }
    }

    pub fn serve_options(&self) -> ServeOptions {
        ServeOptions {
            body_limit: self.server.body_limit,
            drain_grace: self.pool.drain_grace,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// One-line description of the effective settings, logged at startup.
    pub fn summary(&self, source: Option<&Path>) -> String {
        let source = source
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "defaults".to_string());
        let browser = self
            .pool
            .browser_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "auto".to_string());
        format!(
            "Effective config [{source}]: listen={}, pool: min={}, max={}, acquire-timeout={}ms, max-waiting={}, eager={}, validate-on-borrow={}, browser={browser}, args=[{}], logging: {}/{}",
            self.bind_addr(),
            self.pool.min,
            self.pool.max,
            self.pool.acquire_timeout.as_millis(),
            self.pool.max_waiting_clients,
            self.pool.eager,
            self.pool.validate_on_borrow,
            self.pool.browser_args.join(" "),
            self.logging.level,
            self.logging.format,
        )
    }
}
