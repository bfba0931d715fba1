//! Daemon configuration.
//!
//! Values are resolved in this order, first match wins:
//! 1. command line flags
//! 2. environment (`CALLBELL_PORT`, `CALLBELL_DIRECTORY`)
//! 3. TOML config file
//! 4. built-in defaults
//!
//! Example config file:
//!
//! ```toml
//! port = 8080
//! directory = "/etc/callbell/devices.csv"
//! worker_threads = 10
//! connect_timeout_ms = 5000
//! retry_delay_ms = 5000
//! max_connect_attempts = 5
//! heartbeat_interval_ms = 5000
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default TCP port of the call-button devices.
pub const DEFAULT_PORT: u16 = 8080;

/// Default size of the worker pool running all device tasks.
pub const DEFAULT_WORKER_THREADS: usize = 10;

/// Environment variable overriding the device port.
pub const PORT_ENV: &str = "CALLBELL_PORT";

/// Environment variable overriding the directory path.
pub const DIRECTORY_ENV: &str = "CALLBELL_DIRECTORY";

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ============================================================================
// Supervisor Configuration
// ============================================================================

/// Timing and sizing knobs of the connection supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Process-wide device port
    pub port: u16,

    /// Upper bound for a single connect attempt
    pub connect_timeout: Duration,

    /// Pause between two failed connect attempts
    pub retry_delay: Duration,

    /// Attempts made by the initial connect before the device is dropped
    pub max_connect_attempts: u32,

    /// Attempts made by the reconnect loop; `None` retries forever
    pub max_reconnect_attempts: Option<u32>,

    /// Cadence of the heartbeat byte
    pub heartbeat_interval: Duration,

    /// Sentinel byte written as heartbeat
    pub heartbeat_byte: u8,

    /// Size of a single listener read
    pub read_buffer_size: usize,

    /// Upper bound for one write plus flush
    pub write_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_secs(5),
            max_connect_attempts: 5,
            max_reconnect_attempts: None,
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_byte: 0x00,
            read_buffer_size: 1024,
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl SupervisorConfig {
    /// Rejects values that would make the supervisor spin or stall.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            }
        }

        if self.port == 0 {
            return Err(invalid("port", "must be between 1 and 65535"));
        }
        if self.connect_timeout.is_zero() {
            return Err(invalid("connect_timeout", "must be greater than zero"));
        }
        if self.retry_delay.is_zero() {
            return Err(invalid("retry_delay", "must be greater than zero"));
        }
        if self.max_connect_attempts == 0 {
            return Err(invalid("max_connect_attempts", "must be at least 1"));
        }
        if self.max_reconnect_attempts == Some(0) {
            return Err(invalid("max_reconnect_attempts", "must be at least 1"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(invalid("heartbeat_interval", "must be greater than zero"));
        }
        if self.read_buffer_size == 0 {
            return Err(invalid("read_buffer_size", "must be greater than zero"));
        }
        if self.write_timeout.is_zero() {
            return Err(invalid("write_timeout", "must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// File Configuration
// ============================================================================

/// Raw contents of the TOML config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub directory: Option<PathBuf>,
    pub worker_threads: Option<usize>,
    pub connect_timeout_ms: Option<u64>,
    pub retry_delay_ms: Option<u64>,
    pub max_connect_attempts: Option<u32>,
    pub max_reconnect_attempts: Option<u32>,
    pub heartbeat_interval_ms: Option<u64>,
    pub heartbeat_byte: Option<u8>,
    pub read_buffer_size: Option<usize>,
    pub write_timeout_ms: Option<u64>,
}

impl FileConfig {
    /// Reads and parses a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Default location: `<config dir>/callbell/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("callbell").join("config.toml"))
    }
}

// ============================================================================
// Overrides
// ============================================================================

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub port: Option<u16>,
    pub directory: Option<PathBuf>,
}

impl Overrides {
    /// Reads `CALLBELL_PORT` and `CALLBELL_DIRECTORY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match env::var(PORT_ENV) {
            Ok(raw) => Some(raw.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                field: "port",
                reason: format!("{PORT_ENV}={raw}: {e}"),
            })?),
            Err(_) => None,
        };
        let directory = env::var_os(DIRECTORY_ENV).map(PathBuf::from);
        Ok(Self { port, directory })
    }

    /// Layers `self` over `fallback`; values present in `self` win.
    pub fn or(self, fallback: Overrides) -> Overrides {
        Overrides {
            port: self.port.or(fallback.port),
            directory: self.directory.or(fallback.directory),
        }
    }
}

// ============================================================================
// Daemon Configuration
// ============================================================================

/// Fully resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Device directory CSV; `None` starts with no devices
    pub directory: Option<PathBuf>,

    /// Worker pool size of the runtime
    pub worker_threads: usize,

    pub supervisor: SupervisorConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            directory: None,
            worker_threads: DEFAULT_WORKER_THREADS,
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Merges overrides over the file config over defaults, then validates.
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Result<Self, ConfigError> {
        let defaults = SupervisorConfig::default();
        let ms = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };

        let supervisor = SupervisorConfig {
            port: overrides.port.or(file.port).unwrap_or(defaults.port),
            connect_timeout: ms(file.connect_timeout_ms, defaults.connect_timeout),
            retry_delay: ms(file.retry_delay_ms, defaults.retry_delay),
            max_connect_attempts: file
                .max_connect_attempts
                .unwrap_or(defaults.max_connect_attempts),
            max_reconnect_attempts: file.max_reconnect_attempts,
            heartbeat_interval: ms(file.heartbeat_interval_ms, defaults.heartbeat_interval),
            heartbeat_byte: file.heartbeat_byte.unwrap_or(defaults.heartbeat_byte),
            read_buffer_size: file.read_buffer_size.unwrap_or(defaults.read_buffer_size),
            write_timeout: ms(file.write_timeout_ms, defaults.write_timeout),
        };
        supervisor.validate()?;

        let worker_threads = file.worker_threads.unwrap_or(DEFAULT_WORKER_THREADS);
        if worker_threads == 0 {
            return Err(ConfigError::Invalid {
                field: "worker_threads",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            directory: overrides.directory.or(file.directory),
            worker_threads,
            supervisor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert_eq!(config.max_connect_attempts, 5);
        assert_eq!(config.max_reconnect_attempts, None);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.heartbeat_byte, 0);
        assert_eq!(config.read_buffer_size, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zeroes() {
        let cases = [
            SupervisorConfig {
                port: 0,
                ..Default::default()
            },
            SupervisorConfig {
                max_connect_attempts: 0,
                ..Default::default()
            },
            SupervisorConfig {
                max_reconnect_attempts: Some(0),
                ..Default::default()
            },
            SupervisorConfig {
                heartbeat_interval: Duration::ZERO,
                ..Default::default()
            },
            SupervisorConfig {
                read_buffer_size: 0,
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid { .. })),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_file_config() {
        let file: FileConfig = toml::from_str(
            r#"
            port = 4001
            directory = "/etc/callbell/devices.csv"
            retry_delay_ms = 250
            max_reconnect_attempts = 20
            heartbeat_byte = 255
            "#,
        )
        .unwrap();

        assert_eq!(file.port, Some(4001));
        assert_eq!(
            file.directory,
            Some(PathBuf::from("/etc/callbell/devices.csv"))
        );
        assert_eq!(file.retry_delay_ms, Some(250));
        assert_eq!(file.max_reconnect_attempts, Some(20));
        assert_eq!(file.heartbeat_byte, Some(255));
        assert_eq!(file.connect_timeout_ms, None);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<FileConfig, _> = toml::from_str("prot = 4001\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_layers() {
        let file = FileConfig {
            port: Some(4001),
            directory: Some(PathBuf::from("/from/file.csv")),
            retry_delay_ms: Some(250),
            ..Default::default()
        };
        let overrides = Overrides {
            port: Some(5005),
            directory: None,
        };

        let config = DaemonConfig::resolve(file, overrides).unwrap();
        assert_eq!(config.supervisor.port, 5005);
        assert_eq!(config.directory, Some(PathBuf::from("/from/file.csv")));
        assert_eq!(config.supervisor.retry_delay, Duration::from_millis(250));
        assert_eq!(config.supervisor.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.worker_threads, DEFAULT_WORKER_THREADS);
    }

    #[test]
    fn test_resolve_rejects_zero_workers() {
        let file = FileConfig {
            worker_threads: Some(0),
            ..Default::default()
        };
        let result = DaemonConfig::resolve(file, Overrides::default());
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "worker_threads",
                ..
            })
        ));
    }

    #[test]
    fn test_overrides_or() {
        let cli = Overrides {
            port: None,
            directory: Some(PathBuf::from("/cli.csv")),
        };
        let env = Overrides {
            port: Some(9000),
            directory: Some(PathBuf::from("/env.csv")),
        };

        let merged = cli.or(env);
        assert_eq!(merged.port, Some(9000));
        assert_eq!(merged.directory, Some(PathBuf::from("/cli.csv")));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 4001").unwrap();
        writeln!(file, "worker_threads = 4").unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.port, Some(4001));
        assert_eq!(config.worker_threads, Some(4));
    }

    #[test]
    fn test_load_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let result = FileConfig::load(&tmp.path().join("config.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"eighty\"").unwrap();

        let result = FileConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
