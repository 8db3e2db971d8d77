//! Half-close capability for write halves of forwarded streams

use async_trait::async_trait;
use std::io;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;

/// A write side that can signal "no more data" to its peer while the read
/// side of the same connection stays open.
#[async_trait]
pub trait HalfClose: Send {
    /// Whether `close_write` leaves the opposite direction usable.
    ///
    /// Transports that can only close both directions at once return false
    /// and are left alone until the whole connection is dropped.
    fn supports_half_close(&self) -> bool {
        true
    }

    /// Shut down the write direction only.
    async fn close_write(&mut self) -> io::Result<()>;
}

#[async_trait]
impl HalfClose for OwnedWriteHalf {
    async fn close_write(&mut self) -> io::Result<()> {
        // shutdown(Write) on the underlying socket, sends FIN
        self.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn test_close_write_keeps_read_side_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            socket.read_to_end(&mut request).await.unwrap();
            socket.write_all(b"reply").await.unwrap();
            request
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut read_half, mut write_half) = stream.into_split();
        assert!(write_half.supports_half_close());

        write_half.write_all(b"request").await.unwrap();
        write_half.close_write().await.unwrap();

        let mut reply = Vec::new();
        read_half.read_to_end(&mut reply).await.unwrap();

        assert_eq!(reply, b"reply");
        assert_eq!(server.await.unwrap(), b"request");
    }
}
