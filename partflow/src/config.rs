//! Configuration.
//!
//! [`LoaderConfig`] is what a single loader needs at construction time.
//! [`ConfigFile`] is the on-disk INI file the CLI reads, with one
//! [`ConfigKey`] per setting:
//!
//! ```text
//! [loader]
//! ordered = false
//! standalone_limit = 1M
//! max_part_count = 4000
//! part_size = 0
//!
//! [retry]
//! policy = exponential
//! max_attempts = 5
//! delay_ms = 100
//!
//! [resources]
//! total_limit = 8M
//!
//! [logging]
//! level = info
//! directory =
//! ```
//!
//! Sizes accept `K`, `M` and `G` suffixes (powers of 1024).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::logging::LoggingConfig;
use crate::parts::DEFAULT_MAX_PART_COUNT;
use crate::policy::{Backoff, RetryPolicy};

// =============================================================================
// Defaults
// =============================================================================

/// In-flight budget of a loader without a resource manager (1 MiB).
pub const DEFAULT_STANDALONE_LIMIT: u64 = 1024 * 1024;

/// Budget shared by all loaders of one resource manager (8 MiB).
pub const DEFAULT_TOTAL_LIMIT: u64 = 8 * 1024 * 1024;

/// Attempts allowed for a part whose start keeps failing.
pub const DEFAULT_START_ATTEMPTS: u32 = 5;

/// Base delay between start attempts.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 100;

const CONFIG_DIR_NAME: &str = "partflow";
const CONFIG_FILE_NAME: &str = "config.ini";

// =============================================================================
// Errors
// =============================================================================

/// Errors from reading, writing or editing the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("failed to write config file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),
}

// =============================================================================
// Loader Config
// =============================================================================

/// Settings of one loader, fixed before it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    /// Deliver part results to `process_part` in ascending part order.
    pub ordered: bool,
    /// In-flight byte budget while no resource manager is attached.
    pub standalone_limit: u64,
    /// Backoff for parts whose start fails with a network error.
    pub start_retry: RetryPolicy,
    /// Cap on the number of parts.
    pub max_part_count: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            ordered: false,
            standalone_limit: DEFAULT_STANDALONE_LIMIT,
            start_retry: RetryPolicy::exponential(DEFAULT_START_ATTEMPTS),
            max_part_count: DEFAULT_MAX_PART_COUNT,
        }
    }
}

impl LoaderConfig {
    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    pub fn with_standalone_limit(mut self, limit: u64) -> Self {
        self.standalone_limit = limit;
        self
    }

    pub fn with_start_retry(mut self, policy: RetryPolicy) -> Self {
        self.start_retry = policy;
        self
    }

    pub fn with_max_part_count(mut self, max_part_count: usize) -> Self {
        self.max_part_count = max_part_count;
        self
    }
}

// =============================================================================
// Config File
// =============================================================================

/// Kind of backoff configured in `[retry]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    None,
    Fixed,
    Exponential,
}

impl fmt::Display for RetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RetryKind::None => "none",
            RetryKind::Fixed => "fixed",
            RetryKind::Exponential => "exponential",
        })
    }
}

impl FromStr for RetryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(RetryKind::None),
            "fixed" => Ok(RetryKind::Fixed),
            "exponential" => Ok(RetryKind::Exponential),
            _ => Err("expected none, fixed or exponential".to_string()),
        }
    }
}

/// Contents of the INI config file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub ordered: bool,
    pub standalone_limit: u64,
    pub max_part_count: usize,
    /// Part size for transfers; zero picks one from the file size.
    pub part_size: u64,

    pub retry_kind: RetryKind,
    pub retry_max_attempts: u32,
    pub retry_delay_ms: u64,

    pub total_limit: u64,

    pub logging: LoggingConfig,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            ordered: false,
            standalone_limit: DEFAULT_STANDALONE_LIMIT,
            max_part_count: DEFAULT_MAX_PART_COUNT,
            part_size: 0,
            retry_kind: RetryKind::Exponential,
            retry_max_attempts: DEFAULT_START_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            total_limit: DEFAULT_TOTAL_LIMIT,
            logging: LoggingConfig::default(),
        }
    }
}

/// Default location of the config file.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
        .join(CONFIG_FILE_NAME)
}

impl ConfigFile {
    /// Loads the file at [`config_file_path`]; a missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Loads a specific file; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if !path.exists() {
            return Ok(config);
        }

        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        for key in ConfigKey::all() {
            if let Some(value) = ini.get_from(Some(key.section()), key.key_name()) {
                key.set(&mut config, value)?;
            }
        }
        Ok(config)
    }

    /// Saves to [`config_file_path`].
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Saves to a specific file, creating its directory.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            ini.with_section(Some(key.section()))
                .set(key.key_name(), key.get(self));
        }
        ini.write_to_file(path).map_err(write_err)
    }

    /// Retry policy described by `[retry]`.
    pub fn retry_policy(&self) -> RetryPolicy {
        let delay = Duration::from_millis(self.retry_delay_ms);
        match self.retry_kind {
            RetryKind::None => RetryPolicy::never(),
            RetryKind::Fixed => RetryPolicy::constant(self.retry_max_attempts, delay),
            RetryKind::Exponential => {
                RetryPolicy::new(self.retry_max_attempts, Backoff::exponential(delay))
            }
        }
    }

    /// Loader settings described by `[loader]` and `[retry]`.
    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            ordered: self.ordered,
            standalone_limit: self.standalone_limit,
            start_retry: self.retry_policy(),
            max_part_count: self.max_part_count,
        }
    }
}

// =============================================================================
// Config Keys
// =============================================================================

/// One setting, addressed as `section.key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    LoaderOrdered,
    LoaderStandaloneLimit,
    LoaderMaxPartCount,
    LoaderPartSize,
    RetryPolicy,
    RetryMaxAttempts,
    RetryDelayMs,
    ResourcesTotalLimit,
    LoggingLevel,
    LoggingDirectory,
}

const ALL_KEYS: &[ConfigKey] = &[
    ConfigKey::LoaderOrdered,
    ConfigKey::LoaderStandaloneLimit,
    ConfigKey::LoaderMaxPartCount,
    ConfigKey::LoaderPartSize,
    ConfigKey::RetryPolicy,
    ConfigKey::RetryMaxAttempts,
    ConfigKey::RetryDelayMs,
    ConfigKey::ResourcesTotalLimit,
    ConfigKey::LoggingLevel,
    ConfigKey::LoggingDirectory,
];

impl ConfigKey {
    /// Every key, grouped by section.
    pub fn all() -> &'static [ConfigKey] {
        ALL_KEYS
    }

    pub fn section(&self) -> &'static str {
        match self {
            ConfigKey::LoaderOrdered
            | ConfigKey::LoaderStandaloneLimit
            | ConfigKey::LoaderMaxPartCount
            | ConfigKey::LoaderPartSize => "loader",
            ConfigKey::RetryPolicy | ConfigKey::RetryMaxAttempts | ConfigKey::RetryDelayMs => {
                "retry"
            }
            ConfigKey::ResourcesTotalLimit => "resources",
            ConfigKey::LoggingLevel | ConfigKey::LoggingDirectory => "logging",
        }
    }

    pub fn key_name(&self) -> &'static str {
        match self {
            ConfigKey::LoaderOrdered => "ordered",
            ConfigKey::LoaderStandaloneLimit => "standalone_limit",
            ConfigKey::LoaderMaxPartCount => "max_part_count",
            ConfigKey::LoaderPartSize => "part_size",
            ConfigKey::RetryPolicy => "policy",
            ConfigKey::RetryMaxAttempts => "max_attempts",
            ConfigKey::RetryDelayMs => "delay_ms",
            ConfigKey::ResourcesTotalLimit => "total_limit",
            ConfigKey::LoggingLevel => "level",
            ConfigKey::LoggingDirectory => "directory",
        }
    }

    /// Full `section.key` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value rendered as text; empty when unset.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            ConfigKey::LoaderOrdered => config.ordered.to_string(),
            ConfigKey::LoaderStandaloneLimit => format_size(config.standalone_limit),
            ConfigKey::LoaderMaxPartCount => config.max_part_count.to_string(),
            ConfigKey::LoaderPartSize => format_size(config.part_size),
            ConfigKey::RetryPolicy => config.retry_kind.to_string(),
            ConfigKey::RetryMaxAttempts => config.retry_max_attempts.to_string(),
            ConfigKey::RetryDelayMs => config.retry_delay_ms.to_string(),
            ConfigKey::ResourcesTotalLimit => format_size(config.total_limit),
            ConfigKey::LoggingLevel => config.logging.level.clone(),
            ConfigKey::LoggingDirectory => config
                .logging
                .directory
                .as_ref()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
        }
    }

    /// Parses and stores a value.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        let invalid = |reason: &str| ConfigError::InvalidValue {
            key: self.name(),
            value: value.to_string(),
            reason: reason.to_string(),
        };

        match self {
            ConfigKey::LoaderOrdered => {
                config.ordered = value.parse().map_err(|_| invalid("expected true or false"))?;
            }
            ConfigKey::LoaderStandaloneLimit => {
                config.standalone_limit = parse_size(value).map_err(|e| invalid(&e))?;
            }
            ConfigKey::LoaderMaxPartCount => {
                let count: usize = value.parse().map_err(|_| invalid("expected a number"))?;
                if count == 0 {
                    return Err(invalid("must be at least 1"));
                }
                config.max_part_count = count;
            }
            ConfigKey::LoaderPartSize => {
                config.part_size = parse_size(value).map_err(|e| invalid(&e))?;
            }
            ConfigKey::RetryPolicy => {
                config.retry_kind = value.parse().map_err(|e: String| invalid(&e))?;
            }
            ConfigKey::RetryMaxAttempts => {
                config.retry_max_attempts =
                    value.parse().map_err(|_| invalid("expected a number"))?;
            }
            ConfigKey::RetryDelayMs => {
                config.retry_delay_ms = value.parse().map_err(|_| invalid("expected milliseconds"))?;
            }
            ConfigKey::ResourcesTotalLimit => {
                config.total_limit = parse_size(value).map_err(|e| invalid(&e))?;
            }
            ConfigKey::LoggingLevel => {
                if value.is_empty() {
                    return Err(invalid("must not be empty"));
                }
                config.logging.level = value.to_string();
            }
            ConfigKey::LoggingDirectory => {
                config.logging.directory = (!value.is_empty()).then(|| PathBuf::from(value));
            }
        }
        Ok(())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigKey::all()
            .iter()
            .copied()
            .find(|key| key.name() == s)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

// =============================================================================
// Size Helpers
// =============================================================================

/// Parses a byte count with an optional `K`, `M` or `G` suffix.
pub fn parse_size(value: &str) -> Result<u64, String> {
    let value = value.trim();
    let (digits, multiplier) = match value.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&value[..value.len() - 1], 1024),
        Some('M') => (&value[..value.len() - 1], 1024 * 1024),
        Some('G') => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        _ => (value, 1),
    };
    let number: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a size", value))?;
    number
        .checked_mul(multiplier)
        .ok_or_else(|| format!("'{}' is too large", value))
}

/// Renders a byte count with the largest exact suffix.
pub fn format_size(size: u64) -> String {
    const UNITS: [(u64, &str); 3] = [(1024 * 1024 * 1024, "G"), (1024 * 1024, "M"), (1024, "K")];
    for (unit, suffix) in UNITS {
        if size >= unit && size % unit == 0 {
            return format!("{}{}", size / unit, suffix);
        }
    }
    size.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512"), Ok(512));
        assert_eq!(parse_size("4K"), Ok(4096));
        assert_eq!(parse_size("2m"), Ok(2 * 1024 * 1024));
        assert_eq!(parse_size("1G"), Ok(1024 * 1024 * 1024));
        assert!(parse_size("lots").is_err());
        assert!(parse_size("99999999999999G").is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0");
        assert_eq!(format_size(1536), "1536");
        assert_eq!(format_size(8 * 1024 * 1024), "8M");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = ConfigFile::load_from(&temp.path().join("absent.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.ini");

        let mut config = ConfigFile::default();
        ConfigKey::LoaderOrdered.set(&mut config, "true").unwrap();
        ConfigKey::ResourcesTotalLimit.set(&mut config, "16M").unwrap();
        ConfigKey::RetryPolicy.set(&mut config, "fixed").unwrap();
        ConfigKey::LoggingDirectory.set(&mut config, "/var/log/partflow").unwrap();
        config.save_to(&path).unwrap();

        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.ordered);
        assert_eq!(loaded.total_limit, 16 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_value_in_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(&path, "[loader]\nordered = maybe\n").unwrap();

        let result = ConfigFile::load_from(&path);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_key_lookup() {
        let key: ConfigKey = "retry.max_attempts".parse().unwrap();
        assert_eq!(key, ConfigKey::RetryMaxAttempts);
        assert_eq!(key.section(), "retry");
        assert!("retry.nope".parse::<ConfigKey>().is_err());
        assert!(ConfigKey::all().iter().all(|k| k.name().parse::<ConfigKey>().is_ok()));
    }

    #[test]
    fn test_loader_config_from_file() {
        let mut config = ConfigFile::default();
        ConfigKey::RetryPolicy.set(&mut config, "none").unwrap();
        ConfigKey::LoaderStandaloneLimit.set(&mut config, "256K").unwrap();

        let loader = config.loader_config();
        assert_eq!(loader.start_retry, RetryPolicy::never());
        assert_eq!(loader.standalone_limit, 256 * 1024);
        assert!(!loader.ordered);
    }

    #[test]
    fn test_retry_delay_reaches_policy() {
        let mut config = ConfigFile::default();
        ConfigKey::RetryPolicy.set(&mut config, "fixed").unwrap();
        ConfigKey::RetryMaxAttempts.set(&mut config, "3").unwrap();
        ConfigKey::RetryDelayMs.set(&mut config, "250").unwrap();
        let policy = config.retry_policy();
        assert_eq!(policy.pause_after(2), Some(Duration::from_millis(250)));
        assert_eq!(policy.pause_after(3), None);

        ConfigKey::RetryPolicy.set(&mut config, "exponential").unwrap();
        let policy = config.retry_policy();
        assert_eq!(policy.pause_after(1), Some(Duration::from_millis(250)));
        assert_eq!(policy.pause_after(2), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_zero_part_count_rejected() {
        let mut config = ConfigFile::default();
        assert!(ConfigKey::LoaderMaxPartCount.set(&mut config, "0").is_err());
    }
}
