//! YAML configuration loading and validation

use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Target probed through the tunnel unless configured otherwise
pub const DEFAULT_PROBE_URL: &str = "http://192.168.0.1";

/// Seconds between health probes unless configured otherwise
pub const DEFAULT_SSH_PROBE_PERIOD_SECS: u64 = 60;

/// Longest accepted probe period, one day
pub const MAX_SSH_PROBE_PERIOD_SECS: u64 = 24 * 60 * 60;

/// Host used when `listen_at` names only a port (`":8080"`)
const LISTEN_ALL_HOST: &str = "0.0.0.0";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Missing required config field: {0}")]
    MissingField(&'static str),

    #[error("Invalid address for {field}: {value:?} ({reason})")]
    InvalidAddress {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("ssh_probe_period must be between 1 and {max} seconds, got {value}")]
    InvalidProbePeriod { value: u64, max: u64 },

    #[error("probe_url must start with http:// or https://, got {0:?}")]
    InvalidProbeUrl(String),
}

/// Tunnel configuration file format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Public address the proxy listens on (host:port, or :port for all
    /// interfaces)
    #[serde(default)]
    pub listen_at: String,

    /// Local SOCKS endpoint the tunnel binds, and the proxy's forward target
    #[serde(default)]
    pub local_ssh_bind_to: String,

    /// Host passed to ssh
    #[serde(default)]
    pub ssh_host: String,

    /// Discard the tunnel process's standard streams
    #[serde(default)]
    pub silent_ssh_process: bool,

    #[serde(default)]
    pub debug: bool,

    /// Seconds between health probes
    #[serde(default = "default_ssh_probe_period")]
    pub ssh_probe_period: u64,

    /// URL fetched through the tunnel by each health probe
    #[serde(default = "default_probe_url")]
    pub probe_url: String,
}

fn default_ssh_probe_period() -> u64 {
    DEFAULT_SSH_PROBE_PERIOD_SECS
}

fn default_probe_url() -> String {
    DEFAULT_PROBE_URL.to_string()
}

impl Config {
    /// Load config from a specific file path
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config = Self::parse(&content)?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Parse config from YAML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_host_port("listen_at", &self.listen_at, true)?;
        validate_host_port("local_ssh_bind_to", &self.local_ssh_bind_to, false)?;

        if self.ssh_host.trim().is_empty() {
            return Err(ConfigError::MissingField("ssh_host"));
        }

        if !(1..=MAX_SSH_PROBE_PERIOD_SECS).contains(&self.ssh_probe_period) {
            return Err(ConfigError::InvalidProbePeriod {
                value: self.ssh_probe_period,
                max: MAX_SSH_PROBE_PERIOD_SECS,
            });
        }

        if !(self.probe_url.starts_with("http://") || self.probe_url.starts_with("https://")) {
            return Err(ConfigError::InvalidProbeUrl(self.probe_url.clone()));
        }

        Ok(())
    }

    pub fn probe_period(&self) -> Duration {
        Duration::from_secs(self.ssh_probe_period)
    }

    /// Address to bind the proxy on. A bare `:port` listens on all
    /// interfaces.
    pub fn listen_addr(&self) -> String {
        match self.listen_at.strip_prefix(':') {
            Some(port) => format!("{}:{}", LISTEN_ALL_HOST, port),
            None => self.listen_at.clone(),
        }
    }
}

/// Accepts `host:port` (exactly one colon) or `[ipv6]:port`. With
/// `allow_empty_host`, `:port` is accepted too.
fn validate_host_port(
    field: &'static str,
    value: &str,
    allow_empty_host: bool,
) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(field));
    }

    let invalid = |reason: &str| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = if let Some(rest) = value.strip_prefix('[') {
        let (host, port) = rest
            .split_once("]:")
            .ok_or_else(|| invalid("expected [ipv6]:port"))?;
        host.parse::<Ipv6Addr>()
            .map_err(|_| invalid("invalid IPv6 address"))?;
        (host, port)
    } else {
        match value.split(':').collect::<Vec<_>>()[..] {
            [host, port] => (host, port),
            [_] => return Err(invalid("missing port")),
            _ => return Err(invalid("too many colons, use [ipv6]:port")),
        }
    };

    if host.is_empty() && !allow_empty_host {
        return Err(invalid("empty host"));
    }

    port.parse::<u16>()
        .map_err(|_| invalid("port must be a number between 0 and 65535"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
listen_at: "0.0.0.0:8080"
local_ssh_bind_to: "127.0.0.1:9100"
ssh_host: "gateway"
"#;

    #[test]
    fn test_defaults_applied() {
        let config = Config::parse(MINIMAL).unwrap();

        assert_eq!(config.listen_at, "0.0.0.0:8080");
        assert_eq!(config.local_ssh_bind_to, "127.0.0.1:9100");
        assert_eq!(config.ssh_host, "gateway");
        assert!(!config.silent_ssh_process);
        assert!(!config.debug);
        assert_eq!(config.ssh_probe_period, 60);
        assert_eq!(config.probe_period(), Duration::from_secs(60));
        assert_eq!(config.probe_url, "http://192.168.0.1");
    }

    #[test]
    fn test_host_port_accepted() {
        for value in ["127.0.0.1:80", "localhost:0", "[::1]:9100", "example.com:65535"] {
            assert!(
                validate_host_port("local_ssh_bind_to", value, false).is_ok(),
                "{} should be accepted",
                value
            );
        }
    }

    #[test]
    fn test_port_only_listen_address() {
        assert!(validate_host_port("listen_at", ":8080", true).is_ok());

        let yaml = MINIMAL.replace("\"0.0.0.0:8080\"", "\":8080\"");
        let config = Config::parse(&yaml).unwrap();
        assert_eq!(config.listen_at, ":8080");
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");

        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_host_port_rejected() {
        for value in [
            "127.0.0.1",
            ":8080",
            "host:port",
            "host:70000",
            "::1:80",
            "[::1]",
            "[not-ipv6]:80",
            "[::1]:",
            "[]:80",
        ] {
            assert!(
                matches!(
                    validate_host_port("local_ssh_bind_to", value, false),
                    Err(ConfigError::InvalidAddress { .. })
                ),
                "{} should be rejected",
                value
            );
        }
    }

    #[test]
    fn test_port_only_forward_target_rejected() {
        let yaml = MINIMAL.replace("\"127.0.0.1:9100\"", "\":9100\"");
        match Config::parse(&yaml) {
            Err(ConfigError::InvalidAddress { field, reason, .. }) => {
                assert_eq!(field, "local_ssh_bind_to");
                assert_eq!(reason, "empty host");
            }
            other => panic!("expected InvalidAddress, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_address_is_missing() {
        assert!(matches!(
            validate_host_port("local_ssh_bind_to", "  ", false),
            Err(ConfigError::MissingField("local_ssh_bind_to"))
        ));
    }

    #[test]
    fn test_zero_probe_period_rejected() {
        let yaml = format!("{}ssh_probe_period: 0\n", MINIMAL);
        assert!(matches!(
            Config::parse(&yaml),
            Err(ConfigError::InvalidProbePeriod { value: 0, .. })
        ));
    }

    #[test]
    fn test_probe_period_upper_bound() {
        let yaml = format!("{}ssh_probe_period: 18446744073709551615\n", MINIMAL);
        match Config::parse(&yaml) {
            Err(ConfigError::InvalidProbePeriod { value, max }) => {
                assert_eq!(value, u64::MAX);
                assert_eq!(max, MAX_SSH_PROBE_PERIOD_SECS);
            }
            other => panic!("expected InvalidProbePeriod, got {:?}", other),
        }

        let yaml = format!("{}ssh_probe_period: {}\n", MINIMAL, MAX_SSH_PROBE_PERIOD_SECS);
        let config = Config::parse(&yaml).unwrap();
        assert_eq!(config.probe_period(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_probe_url_scheme() {
        let yaml = format!("{}probe_url: \"ftp://192.168.0.1\"\n", MINIMAL);
        assert!(matches!(
            Config::parse(&yaml),
            Err(ConfigError::InvalidProbeUrl(_))
        ));

        let yaml = format!("{}probe_url: \"https://intranet.local/health\"\n", MINIMAL);
        let config = Config::parse(&yaml).unwrap();
        assert_eq!(config.probe_url, "https://intranet.local/health");
    }
}
