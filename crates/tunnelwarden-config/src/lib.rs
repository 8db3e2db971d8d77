//! Configuration file support for tunnelwarden
//!
//! A single YAML file describes the public listen address, the local SOCKS
//! endpoint the tunnel binds, the ssh host to tunnel through, and how the
//! tunnel is supervised.

pub mod config;

pub use config::{
    Config, ConfigError, DEFAULT_PROBE_URL, DEFAULT_SSH_PROBE_PERIOD_SECS,
    MAX_SSH_PROBE_PERIOD_SECS,
};
