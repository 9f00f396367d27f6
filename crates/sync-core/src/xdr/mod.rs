//! The XDR codec (C3): in-memory `Value` ↔ wire JSON, template/index ID
//! declaration and translation, and the file-export variant of the same
//! codec. See spec §4.3.

pub mod codec;
pub mod memory;
pub mod order;
pub mod wire;

pub use codec::XdrCodec;
pub use order::DefEntry;
