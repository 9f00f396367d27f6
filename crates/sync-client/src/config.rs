//! Client-side tunables (spec §4.4 reconnection, §9 ticker abstraction).

use std::time::Duration;
use sync_core::framed::FramedConnectionConfig;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Delay before the single reconnect attempt after a connection drop.
    /// Spec default: 3s.
    pub reconnect_delay: Duration,
    pub framed: FramedConnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { reconnect_delay: Duration::from_secs(3), framed: FramedConnectionConfig::default() }
    }
}
