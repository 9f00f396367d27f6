//! TCP accept loop (spec §4.5 "Listener"): binds `config.bind_addr` and
//! spawns one [`crate::session::run_session`] task per accepted
//! connection. The HTTP file-serving side of a production listener is out
//! of scope (spec §1) — this is the raw framed-protocol socket only.

use crate::config::ServerConfig;
use crate::session::{run_session, ServerState};
use std::sync::Arc;
use sync_core::Result;
use tokio::net::TcpListener;
use tracing::info;

pub struct Listener {
    tcp: TcpListener,
    config: ServerConfig,
}

impl Listener {
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let tcp = TcpListener::bind(&config.bind_addr).await?;
        Ok(Self { tcp, config })
    }

    /// The address actually bound to — useful when `bind_addr` used port 0.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.tcp.local_addr()
    }

    /// Accepts connections forever, spawning a session per connection.
    /// Returns only on a fatal accept error.
    pub async fn serve(self, state: Arc<ServerState>) -> Result<()> {
        loop {
            let (stream, peer) = self.tcp.accept().await?;
            stream.set_nodelay(true).ok();
            info!(%peer, "accepted connection");
            let state = state.clone();
            let framed_config = self.config.framed.clone();
            tokio::spawn(async move {
                run_session(stream, framed_config, state).await;
            });
        }
    }

    /// Accepts exactly one connection and spawns its session. Convenient
    /// for tests that drive a single client against a single server.
    pub async fn accept_one(&self, state: Arc<ServerState>) -> Result<()> {
        let (stream, peer) = self.tcp.accept().await?;
        stream.set_nodelay(true).ok();
        info!(%peer, "accepted connection");
        let framed_config = self.config.framed.clone();
        tokio::spawn(async move {
            run_session(stream, framed_config, state).await;
        });
        Ok(())
    }
}
