//! tunnelwarden: a self-healing TCP forward over an ssh SOCKS tunnel
//!
//! The binary wires three pieces together around one cancellation token:
//! the TCP proxy (`tunnelwarden-proxy`), the tunnel supervisor and its health
//! probe (`tunnelwarden-supervisor`), and the YAML config
//! (`tunnelwarden-config`).

pub mod app;
pub mod logging;

pub use tunnelwarden_config::{Config, ConfigError};
