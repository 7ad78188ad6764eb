//! Configuration system for the natprobe CLI.

use natprobe_discovery::detector::{DEFAULT_STUN_HOST, DEFAULT_STUN_PORT};
use natprobe_discovery::probe::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_INTERVAL};
use natprobe_discovery::sampler::{DEFAULT_RETRY_CAP, DEFAULT_SAMPLE_COUNT};
use natprobe_discovery::{DetectOptions, ProbeConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// natprobe configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Reflector configuration
    #[serde(default)]
    pub stun: StunConfig,
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Probe retry configuration
    #[serde(default)]
    pub probe: ProbeSection,
    /// Sampling configuration
    #[serde(default)]
    pub sampling: SamplingConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reflector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StunConfig {
    /// Reflector host name or IPv4 address
    #[serde(default = "default_stun_host")]
    pub host: String,
    /// Reflector port
    #[serde(default = "default_stun_port")]
    pub port: u16,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Local bind address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

/// Probe retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSection {
    /// Wait before each retransmission, in milliseconds
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Retransmissions after the initial send
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Number of samples
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,
    /// Re-runs per sample after a transient outcome
    #[serde(default = "default_retry_cap")]
    pub retry_cap: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_stun_host() -> String {
    DEFAULT_STUN_HOST.to_string()
}

fn default_stun_port() -> u16 {
    DEFAULT_STUN_PORT
}

fn default_bind_addr() -> String {
    "0.0.0.0:0".to_string()
}

fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL.as_millis() as u64
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_sample_count() -> usize {
    DEFAULT_SAMPLE_COUNT
}

fn default_retry_cap() -> usize {
    DEFAULT_RETRY_CAP
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StunConfig {
    fn default() -> Self {
        Self {
            host: default_stun_host(),
            port: default_stun_port(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_count: default_sample_count(),
            retry_cap: default_retry_cap(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("natprobe/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if an existing config cannot be read or parsed.
    pub fn load_or_default() -> anyhow::Result<Self> {
        Self::load_or_default_at(&Self::default_path())
    }

    /// Load config from `path`, writing the defaults there if it doesn't exist
    ///
    /// A default config that cannot be written (read-only config directory)
    /// is logged and the defaults are used as is.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing config cannot be read or parsed.
    pub fn load_or_default_at(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        let config = Self::default();
        if let Err(e) = config.save(path) {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "could not write default config, using defaults"
            );
        }
        Ok(config)
    }

    /// Parse bind address as `SocketAddrV4`
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not an IPv4 socket address.
    pub fn parse_bind_addr(&self) -> anyhow::Result<SocketAddrV4> {
        self.network.bind_addr.parse().map_err(|_| {
            anyhow::anyhow!(
                "Invalid bind address: {} (expected IPv4 ip:port)",
                self.network.bind_addr
            )
        })
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.parse_bind_addr()?;

        if self.stun.host.trim().is_empty() {
            anyhow::bail!("STUN host must not be empty");
        }

        if self.stun.port == 0 {
            anyhow::bail!("STUN port must not be 0");
        }

        if self.probe.retry_interval_ms == 0 {
            anyhow::bail!("Retry interval must be at least 1 ms");
        }

        if self.sampling.sample_count == 0 {
            anyhow::bail!("Sample count must be at least 1");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Build detector options from this configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address cannot be parsed.
    pub fn detect_options(&self) -> anyhow::Result<DetectOptions> {
        Ok(DetectOptions {
            sample_count: self.sampling.sample_count,
            stun_host: self.stun.host.clone(),
            stun_port: self.stun.port,
            logging_enabled: true,
            bind_addr: self.parse_bind_addr()?,
            probe: ProbeConfig {
                retry_interval: Duration::from_millis(self.probe.retry_interval_ms),
                max_attempts: self.probe.max_attempts,
            },
            retry_cap: self.sampling.retry_cap,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.stun.host, "stun.sipgate.net");
        assert_eq!(config.stun.port, 3478);
        assert_eq!(config.network.bind_addr, "0.0.0.0:0");
        assert_eq!(config.probe.retry_interval_ms, 5000);
        assert_eq!(config.probe.max_attempts, 3);
        assert_eq!(config.sampling.sample_count, 20);
        assert_eq!(config.sampling.retry_cap, 5);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.network.bind_addr = "[::1]:0".to_string();
        assert!(config.validate().is_err());

        config.network.bind_addr = "0.0.0.0:0".to_string();
        config.sampling.sample_count = 0;
        assert!(config.validate().is_err());

        config.sampling.sample_count = 20;
        config.probe.retry_interval_ms = 0;
        assert!(config.validate().is_err());

        config.probe.retry_interval_ms = 5000;
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.stun.host, deserialized.stun.host);
        assert_eq!(config.probe.retry_interval_ms, deserialized.probe.retry_interval_ms);
        assert_eq!(config.sampling.sample_count, deserialized.sampling.sample_count);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[stun]\nhost = \"198.51.100.7\"\n").unwrap();
        assert_eq!(config.stun.host, "198.51.100.7");
        assert_eq!(config.stun.port, 3478);
        assert_eq!(config.sampling.sample_count, 20);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("natprobe/config.toml");

        let mut config = Config::default();
        config.sampling.sample_count = 7;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.sampling.sample_count, 7);
    }

    #[test]
    fn test_load_or_default_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("natprobe/config.toml");

        let config = Config::load_or_default_at(&path).unwrap();
        assert_eq!(config.sampling.sample_count, 20);
        assert!(path.exists());

        fs::write(&path, "[sampling]\nsample_count = 3\n").unwrap();
        let config = Config::load_or_default_at(&path).unwrap();
        assert_eq!(config.sampling.sample_count, 3);
    }

    #[test]
    fn test_load_or_default_survives_unwritable_dir() {
        // A regular file where the config directory should be makes
        // create_dir_all fail.
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        let path = blocker.join("natprobe/config.toml");

        let config = Config::load_or_default_at(&path).unwrap();
        assert_eq!(config.sampling.sample_count, 20);
        assert_eq!(config.stun.host, "stun.sipgate.net");
        assert!(!path.exists());
    }

    #[test]
    fn test_load_or_default_rejects_bad_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[sampling\n").unwrap();

        assert!(Config::load_or_default_at(&path).is_err());
    }

    #[test]
    fn test_detect_options() {
        let mut config = Config::default();
        config.probe.retry_interval_ms = 250;
        config.network.bind_addr = "127.0.0.1:0".to_string();

        let options = config.detect_options().unwrap();
        assert_eq!(options.probe.retry_interval, Duration::from_millis(250));
        assert_eq!(options.bind_addr, "127.0.0.1:0".parse().unwrap());
        assert_eq!(options.sample_count, 20);
    }
}
