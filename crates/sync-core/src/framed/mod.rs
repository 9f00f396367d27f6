//! The framed connection (C1): fixed-width headers, segmentation,
//! reassembly, pooled flushing, reply routing. See spec §4.1.

pub mod connection;
pub mod header;

pub use connection::{ConnectionEvent, FramedConnection, FramedConnectionConfig, InboundMessage, ReplyResult};
pub use header::{AckBody, Header, Segment, CURRENT_VERSION, HEADER_LEN};
