//! TCP Proxy Server Implementation
//!
//! Listens on the public address and forwards every accepted connection to
//! the tunnel's local endpoint. Each connection gets its own task, and each
//! direction of a connection gets its own copy task.

use crate::connections::ActiveConnections;
use crate::half_close::HalfClose;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default timeout for dialing the tunnel endpoint
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default period of the active-connection report
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum TcpProxyServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  - Check if another process is using this port: lsof -i\n  - Try using a different address or port")]
    BindError { address: String, reason: String },

    #[error("Failed to accept connection on {address}: {source}")]
    AcceptError {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors confined to a single forwarded connection
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Failed to connect to target {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out connecting to target {address} after {timeout:?}")]
    DialTimeout { address: String, timeout: Duration },
}

#[derive(Debug, Clone)]
pub struct TcpProxyServerConfig {
    /// Public address to listen on (host:port)
    pub bind_addr: String,
    /// Tunnel endpoint every connection is forwarded to (host:port)
    pub target_addr: String,
    /// Enables per-connection logging and the periodic connection report
    pub debug: bool,
    pub connect_timeout: Duration,
    pub stats_interval: Duration,
}

impl TcpProxyServerConfig {
    pub fn new(bind_addr: impl Into<String>, target_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            target_addr: target_addr.into(),
            debug: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

pub struct TcpProxyServer {
    config: TcpProxyServerConfig,
    connections: ActiveConnections,
}

impl TcpProxyServer {
    pub fn new(config: TcpProxyServerConfig) -> Self {
        Self {
            config,
            connections: ActiveConnections::new(),
        }
    }

    /// Handle on the set of connections this server is forwarding
    pub fn active_connections(&self) -> ActiveConnections {
        self.connections.clone()
    }

    /// Bind the public listener without accepting yet.
    ///
    /// Fails right away if the address is taken or cannot be resolved.
    pub async fn bind(self) -> Result<BoundTcpProxyServer, TcpProxyServerError> {
        let listener = TcpListener::bind(self.config.bind_addr.as_str())
            .await
            .map_err(|e| TcpProxyServerError::BindError {
                address: self.config.bind_addr.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;

        Ok(BoundTcpProxyServer {
            config: self.config,
            connections: self.connections,
            listener,
            local_addr,
        })
    }

    /// Bind and serve until `cancel` fires
    pub async fn start(self, cancel: CancellationToken) -> Result<(), TcpProxyServerError> {
        self.bind().await?.serve(cancel).await
    }
}

/// A proxy server whose listener is bound and ready to accept
pub struct BoundTcpProxyServer {
    config: TcpProxyServerConfig,
    connections: ActiveConnections,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BoundTcpProxyServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn active_connections(&self) -> ActiveConnections {
        self.connections.clone()
    }

    /// Run the accept loop.
    ///
    /// Returns `Ok(())` once `cancel` fires and the listener is closed.
    /// Connections already being forwarded are left to drain on their own.
    pub async fn serve(self, cancel: CancellationToken) -> Result<(), TcpProxyServerError> {
        let BoundTcpProxyServer {
            config,
            connections,
            listener,
            local_addr,
        } = self;

        info!(
            "Proxy listening on {}, forwarding to {}",
            local_addr, config.target_addr
        );

        let reporter = tokio::spawn(report_active_connections(
            connections.clone(),
            config.clone(),
            local_addr,
            cancel.clone(),
        ));

        let result = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Proxy on {} shutting down", local_addr);
                    break Ok(());
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let config = config.clone();
                        let connections = connections.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer_addr, config, connections).await;
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection on {}: {}", local_addr, e);
                        break Err(TcpProxyServerError::AcceptError {
                            address: local_addr.to_string(),
                            source: e,
                        });
                    }
                },
            }
        };

        drop(listener);
        reporter.abort();

        result
    }
}

async fn handle_connection(
    client: TcpStream,
    peer_addr: SocketAddr,
    config: TcpProxyServerConfig,
    connections: ActiveConnections,
) {
    let connection_id = connections.insert(&peer_addr, &config.target_addr);
    if config.debug {
        debug!("New connection from {}", peer_addr);
    }

    match forward(client, &config, &connection_id).await {
        Ok((to_target, to_client)) => {
            if config.debug {
                debug!(
                    connection = %connection_id,
                    bytes_to_target = to_target,
                    bytes_to_client = to_client,
                    "Connection closed"
                );
            }
        }
        Err(e) => {
            // Dropping the client stream closes it
            warn!("Failed to forward connection from {}: {}", peer_addr, e);
        }
    }

    connections.remove(&connection_id);
}

/// Dial the target and copy bytes both ways until each side reaches EOF.
///
/// Returns (bytes_to_target, bytes_to_client).
async fn forward(
    client: TcpStream,
    config: &TcpProxyServerConfig,
    connection_id: &str,
) -> Result<(u64, u64), ForwardError> {
    let target = match tokio::time::timeout(
        config.connect_timeout,
        TcpStream::connect(config.target_addr.as_str()),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(ForwardError::Dial {
                address: config.target_addr.clone(),
                source: e,
            })
        }
        Err(_) => {
            return Err(ForwardError::DialTimeout {
                address: config.target_addr.clone(),
                timeout: config.connect_timeout,
            })
        }
    };
    target.set_nodelay(true).ok();

    if config.debug {
        debug!("Connected to target {} ({})", config.target_addr, connection_id);
    }

    let (client_read, client_write) = client.into_split();
    let (target_read, target_write) = target.into_split();

    let client_to_target = tokio::spawn(pipe(
        client_read,
        target_write,
        "client -> target",
        connection_id.to_string(),
    ));
    let target_to_client = tokio::spawn(pipe(
        target_read,
        client_write,
        "target -> client",
        connection_id.to_string(),
    ));

    let (to_target, to_client) = tokio::join!(client_to_target, target_to_client);

    Ok((to_target.unwrap_or(0), to_client.unwrap_or(0)))
}

/// Copy `reader` into `writer` until EOF, then half-close `writer` so the
/// peer sees the end of this direction while the other one keeps flowing.
async fn pipe<R, W>(
    mut reader: R,
    mut writer: W,
    direction: &'static str,
    connection_id: String,
) -> u64
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + HalfClose + Unpin + Send,
{
    let copied = match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(n) => n,
        Err(e) => {
            warn!("{} copy error ({}): {}", direction, connection_id, e);
            0
        }
    };

    if writer.supports_half_close() {
        if let Err(e) = writer.close_write().await {
            debug!("{} half-close failed ({}): {}", direction, connection_id, e);
        }
    }

    copied
}

async fn report_active_connections(
    connections: ActiveConnections,
    config: TcpProxyServerConfig,
    local_addr: SocketAddr,
    cancel: CancellationToken,
) {
    let period = config.stats_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if config.debug {
                    debug!(
                        "Proxy {} -> {}: {} active connection(s)",
                        local_addr,
                        config.target_addr,
                        connections.len()
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_proxy_server_config() {
        let config = TcpProxyServerConfig::new("127.0.0.1:9000", "127.0.0.1:9100");
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.target_addr, "127.0.0.1:9100");
        assert!(!config.debug);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.stats_interval, Duration::from_secs(60));

        let config = config.with_debug(true);
        assert!(config.debug);
    }

    #[test]
    fn test_bind_error_display() {
        let err = TcpProxyServerError::BindError {
            address: "127.0.0.1:9000".to_string(),
            reason: "Address already in use".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("127.0.0.1:9000"));
        assert!(message.contains("Address already in use"));
    }

    #[tokio::test]
    async fn test_bind_rejects_unparsable_address() {
        let config = TcpProxyServerConfig::new("not-an-address", "127.0.0.1:1");
        let result = TcpProxyServer::new(config).bind().await;
        assert!(matches!(result, Err(TcpProxyServerError::BindError { .. })));
    }

    #[tokio::test]
    async fn test_pipe_counts_bytes_and_half_closes() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (_read_half, write_half) = stream.into_split();

        let (mut source, sink) = tokio::io::duplex(64);
        source.write_all(b"hello tunnel").await.unwrap();
        drop(source);

        let copied = pipe(sink, write_half, "test", "conn".to_string()).await;
        assert_eq!(copied, 12);
        assert_eq!(server.await.unwrap(), b"hello tunnel");
    }
}
