//! Configuration for the Vigil live debugger.
//!
//! Config is read from TOML. Every section is optional; missing sections fall
//! back to defaults, unknown keys are rejected so typos surface immediately.
//!
//! ```toml
//! [logging]
//! level = "debug"
//! json = false
//!
//! [server]
//! host = "127.0.0.1"
//! port = 19287
//! password = "hunter2"
//!
//! [store]
//! dir = ".vigil"
//!
//! [sandbox]
//! max_steps = 10000
//! ```

mod logging;
mod sanitize;

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub use crate::logging::init_tracing;
pub use crate::sanitize::sanitize_error_message;

/// Environment variable naming a config file, used when no explicit path is given.
pub const CONFIG_ENV_VAR: &str = "VIGIL_CONFIG";

/// Environment variable holding the shared secret clients must present.
///
/// Takes precedence over `server.password`.
pub const PASSWORD_ENV_VAR: &str = "VIGIL_PASSWORD";

/// Name of the hidden per-working-directory store folder.
pub const DEFAULT_STORE_DIR_NAME: &str = ".vigil";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VigilConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Either a simple level (`info`, `debug`, ...) or a full `EnvFilter`
    /// directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    /// Mirror logs to stderr.
    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to the given file path.
    ///
    /// If the file cannot be opened, file logging is disabled while stderr
    /// logging stays active.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Capture and include backtraces when logging panics.
    #[serde(default)]
    pub include_backtrace: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            // Anything else is treated as an `EnvFilter` directive string.
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// Create the effective `EnvFilter`.
    ///
    /// If `RUST_LOG` is set, it is merged into the configured directives.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
            include_backtrace: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,

    /// TCP port for the control protocol. `0` binds an ephemeral port.
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,

    /// Shared secret required as the `password` query parameter.
    #[serde(default)]
    pub password: Option<String>,
}

impl ServerConfig {
    pub const DEFAULT_PORT: u16 = 19287;

    fn default_host() -> String {
        "127.0.0.1".to_owned()
    }

    fn default_port() -> u16 {
        Self::DEFAULT_PORT
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            password: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Directory holding `db.sqlite`. Defaults to `.vigil` under the current
    /// working directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// SQLite busy timeout applied to every connection.
    #[serde(default = "StoreConfig::default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Additional retries (with backoff) after SQLite reports the database as
    /// busy or locked.
    #[serde(default = "StoreConfig::default_max_busy_retries")]
    pub max_busy_retries: u32,
}

impl StoreConfig {
    fn default_busy_timeout_ms() -> u64 {
        5_000
    }

    fn default_max_busy_retries() -> u32 {
        32
    }

    /// The configured directory, or `<cwd>/.vigil`.
    pub fn resolved_dir(&self) -> PathBuf {
        match &self.dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(DEFAULT_STORE_DIR_NAME),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: None,
            busy_timeout_ms: Self::default_busy_timeout_ms(),
            max_busy_retries: Self::default_max_busy_retries(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxConfig {
    /// Maximum number of instructions a single evaluation may execute.
    #[serde(default = "SandboxConfig::default_max_steps")]
    pub max_steps: usize,

    /// Maximum length of any string or collection an evaluation produces.
    #[serde(default = "SandboxConfig::default_max_collection_len")]
    pub max_collection_len: usize,
}

impl SandboxConfig {
    fn default_max_steps() -> usize {
        10_000
    }

    fn default_max_collection_len() -> usize {
        100_000
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_steps: Self::default_max_steps(),
            max_collection_len: Self::default_max_collection_len(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` includes a source snippet, which may contain the
        // shared secret. Keep only the sanitized message.
        ConfigError::Toml(sanitize_error_message(err.message()))
    }
}

impl VigilConfig {
    /// Load a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply overrides from the process environment (see [`PASSWORD_ENV_VAR`]).
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(password) = lookup(PASSWORD_ENV_VAR) {
            self.server.password = Some(password);
        }
    }
}

/// Pick the config file to load: the explicit path if any, then
/// [`CONFIG_ENV_VAR`].
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
}
