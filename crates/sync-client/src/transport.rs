//! Byte-pipe acquisition: how a [`crate::connection::ClientConnection`]
//! gets (and, on reconnect, re-gets) a duplex stream to a host. Kept as a
//! trait so tests can substitute an in-memory pipe (`tokio::io::duplex`)
//! for a real TCP socket.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Anything that behaves like a duplex byte-pipe and can be handed to
/// [`sync_core::framed::FramedConnection::spawn`].
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> DuplexStream for T {}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str) -> io::Result<Box<dyn DuplexStream>>;
}

/// Connects over plain TCP; `host` is an `addr:port` string.
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str) -> io::Result<Box<dyn DuplexStream>> {
        let stream = TcpStream::connect(host).await?;
        stream.set_nodelay(true).ok();
        Ok(Box::new(stream))
    }
}
