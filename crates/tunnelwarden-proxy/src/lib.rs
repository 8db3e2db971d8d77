//! TCP Proxy Server
//!
//! This crate implements the public-facing side of the tunnel: a TCP listener
//! that forwards every accepted connection to the tunnel's local SOCKS endpoint.
//! Bytes are copied verbatim in both directions; nothing is parsed.

mod connections;
mod half_close;
mod server;

pub use connections::ActiveConnections;
pub use half_close::HalfClose;
pub use server::{
    BoundTcpProxyServer, ForwardError, TcpProxyServer, TcpProxyServerConfig, TcpProxyServerError,
};
