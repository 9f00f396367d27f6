//! Resource & Subscription Manager (C4): the client side of the
//! synchronization protocol. [`SyncClient`] owns one [`connection::ClientConnection`]
//! per `hostSpec`, each multiplexing subscriptions, writes and
//! authentication over a single framed connection, with automatic
//! reconnection and resubmission.

pub mod config;
pub mod connection;
pub mod manager;
pub mod observer;
pub mod pending;
pub mod subscription;
pub mod ticker;
pub mod transport;

pub use config::ClientConfig;
pub use connection::ClientConnection;
pub use manager::SyncClient;
pub use observer::{ConnectionObserver, ConnectionStateCode, NullObserver, ResourceConsumer, StatusWatcher};
pub use subscription::Subscription;
pub use transport::{Connector, DuplexStream, TcpConnector};
