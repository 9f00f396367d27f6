//! Server-side tunables (spec §4.1 framing config, §6 bind address).

use sync_core::framed::FramedConnectionConfig;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// `addr:port` to bind, or a loopback-only address for local mode
    /// (spec §6).
    pub bind_addr: String,
    pub framed: FramedConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: "127.0.0.1:0".to_string(), framed: FramedConnectionConfig::default() }
    }
}
