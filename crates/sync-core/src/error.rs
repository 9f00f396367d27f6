//! Stable error domain shared by the framing, registry and codec layers.
//!
//! Every variant carries a stable `&'static str` code (see [`codes`]) so
//! callers can branch on failure kind without parsing `Display` output —
//! useful for deciding whether to reconnect, resubmit, or surface an error
//! to the application. A single flat enum is enough here: every caller in
//! this workspace already knows which layer raised the error, so there is
//! no separate domain/impl split to maintain.

use std::io;

/// Stable error code, used by consumers for automated handling (retry,
/// reconnect, surface-to-user) without parsing `Display` output.
pub type ErrorCode = &'static str;

pub mod codes {
    pub const FRAMING_HEADER: &str = "framing.bad_header";
    pub const FRAMING_VERSION_MISMATCH: &str = "framing.version_mismatch";
    pub const FRAMING_OUT_OF_ORDER: &str = "framing.out_of_order_segment";
    pub const FRAMING_IO: &str = "framing.io";
    pub const FRAMING_REPLY_TIMEOUT: &str = "framing.reply_timeout";
    pub const CODEC_DECODE: &str = "codec.decode";
    pub const CODEC_UNDECLARED_ID: &str = "codec.undeclared_id";
    pub const REGISTRY_CONFLICT: &str = "registry.conflict";
    pub const UNKNOWN_RESOURCE: &str = "resource.unknown";
    pub const AUTH_FAILED: &str = "auth.failed";
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("[{code}] malformed frame header: {detail}")]
    BadHeader {
        code: ErrorCode,
        detail: String,
    },

    #[error("[{code}] protocol version mismatch: peer sent {peer_version}, expected {expected}")]
    VersionMismatch {
        code: ErrorCode,
        peer_version: u16,
        expected: u16,
    },

    #[error("[{code}] out-of-order segment for sequence {sequence_nr}")]
    OutOfOrderSegment {
        code: ErrorCode,
        sequence_nr: u64,
    },

    #[error("[{code}] i/o error: {source}")]
    Io {
        code: ErrorCode,
        #[source]
        source: io::Error,
    },

    #[error("[{code}] timed out waiting for reply to sequence {sequence_nr}")]
    ReplyTimeout {
        code: ErrorCode,
        sequence_nr: u64,
    },

    #[error("[{code}] failed to decode value: {detail}")]
    Decode {
        code: ErrorCode,
        detail: String,
    },

    #[error("[{code}] reference to undeclared id {id} ({kind})")]
    UndeclaredId {
        code: ErrorCode,
        kind: &'static str,
        id: u64,
    },

    #[error("[{code}] registry conflict: {detail}")]
    RegistryConflict {
        code: ErrorCode,
        detail: String,
    },

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("[{code}] unknown resource {resource_id}")]
    UnknownResource {
        code: ErrorCode,
        resource_id: u64,
    },

    #[error("[{code}] authentication failed: {detail}")]
    AuthFailed {
        code: ErrorCode,
        detail: String,
    },
}

impl SyncError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BadHeader { code, .. }
            | Self::VersionMismatch { code, .. }
            | Self::OutOfOrderSegment { code, .. }
            | Self::Io { code, .. }
            | Self::ReplyTimeout { code, .. }
            | Self::Decode { code, .. }
            | Self::UndeclaredId { code, .. }
            | Self::RegistryConflict { code, .. }
            | Self::UnknownResource { code, .. }
            | Self::AuthFailed { code, .. } => code,
            Self::Closed(_) => "connection.closed",
        }
    }

    pub fn bad_header(detail: impl Into<String>) -> Self {
        Self::BadHeader { code: codes::FRAMING_HEADER, detail: detail.into() }
    }

    pub fn version_mismatch(peer_version: u16, expected: u16) -> Self {
        Self::VersionMismatch { code: codes::FRAMING_VERSION_MISMATCH, peer_version, expected }
    }

    pub fn out_of_order_segment(sequence_nr: u64) -> Self {
        Self::OutOfOrderSegment { code: codes::FRAMING_OUT_OF_ORDER, sequence_nr }
    }

    pub fn reply_timeout(sequence_nr: u64) -> Self {
        Self::ReplyTimeout { code: codes::FRAMING_REPLY_TIMEOUT, sequence_nr }
    }

    pub fn decode(detail: impl Into<String>) -> Self {
        Self::Decode { code: codes::CODEC_DECODE, detail: detail.into() }
    }

    pub fn undeclared_id(kind: &'static str, id: u64) -> Self {
        Self::UndeclaredId { code: codes::CODEC_UNDECLARED_ID, kind, id }
    }

    pub fn registry_conflict(detail: impl Into<String>) -> Self {
        Self::RegistryConflict { code: codes::REGISTRY_CONFLICT, detail: detail.into() }
    }

    pub fn unknown_resource(resource_id: u64) -> Self {
        Self::UnknownResource { code: codes::UNKNOWN_RESOURCE, resource_id }
    }

    pub fn auth_failed(detail: impl Into<String>) -> Self {
        Self::AuthFailed { code: codes::AUTH_FAILED, detail: detail.into() }
    }
}

impl From<io::Error> for SyncError {
    fn from(source: io::Error) -> Self {
        Self::Io { code: codes::FRAMING_IO, source }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
