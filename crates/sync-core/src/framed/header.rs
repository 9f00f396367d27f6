//! Fixed-width ASCII frame header and acknowledgement body (spec §4.1).
//!
//! `version(2) | segmentIndicator(1) | resourceId(8) | sequenceNr(10) |
//! totalLength(12)`, zero-padded, ASCII digits only — no endianness
//! concerns since the header never carries binary integers.

use crate::error::{Result, SyncError};

pub const HEADER_LEN: usize = 2 + 1 + 8 + 10 + 12;
pub const ACK_BODY_LEN: usize = 10 + 12 + 12;
pub const CURRENT_VERSION: u16 = 1;

/// `sequenceNr == 0` marks a service (acknowledgement) message.
pub const SERVICE_SEQUENCE_NR: u64 = 0;

/// Where in a multi-buffer message the current buffer sits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Segment {
    Whole,
    First,
    Middle,
    Last,
}

impl Segment {
    fn to_char(self) -> char {
        match self {
            Segment::Whole => '-',
            Segment::First => '[',
            Segment::Middle => '+',
            Segment::Last => ']',
        }
    }

    fn from_char(c: char) -> Result<Self> {
        match c {
            '-' => Ok(Segment::Whole),
            '[' => Ok(Segment::First),
            '+' => Ok(Segment::Middle),
            ']' => Ok(Segment::Last),
            other => Err(SyncError::bad_header(format!("unknown segment indicator {other:?}"))),
        }
    }
}

/// One parsed frame header. `total_length` is the length of the body
/// carried by *this physical buffer* for `First`/`Middle`/`Whole`
/// segments; for `Last` it is the chunk length of the tail. Reassembling
/// the overall message length is the reader's job (it is the sum of
/// chunks observed, which the acknowledgement's `totalLength` also
/// reports once assembly completes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub segment: Segment,
    pub resource_id: u64,
    pub sequence_nr: u64,
    pub total_length: u64,
}

impl Header {
    pub fn new(version: u16, segment: Segment, resource_id: u64, sequence_nr: u64, total_length: u64) -> Self {
        Self { version, segment, resource_id, sequence_nr, total_length }
    }

    pub fn format(&self) -> String {
        format!(
            "{:02}{}{:08}{:010}{:012}",
            self.version,
            self.segment.to_char(),
            self.resource_id,
            self.sequence_nr,
            self.total_length,
        )
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(SyncError::bad_header(format!(
                "short header: got {} bytes, need {HEADER_LEN}",
                bytes.len()
            )));
        }
        let text = std::str::from_utf8(&bytes[..HEADER_LEN])
            .map_err(|e| SyncError::bad_header(format!("non-utf8 header: {e}")))?;

        let version = parse_field(&text[0..2], "version")?;
        let segment = Segment::from_char(
            text.chars().nth(2).ok_or_else(|| SyncError::bad_header("missing segment indicator"))?,
        )?;
        let resource_id = parse_field(&text[3..11], "resourceId")?;
        let sequence_nr = parse_field(&text[11..21], "sequenceNr")?;
        let total_length = parse_field(&text[21..33], "totalLength")?;

        Ok(Self { version, segment, resource_id, sequence_nr, total_length })
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, name: &'static str) -> Result<T> {
    field.parse::<T>().map_err(|_| SyncError::bad_header(format!("non-numeric {name} field {field:?}")))
}

/// Acknowledgement body: `ackedSequenceNr(10) | receivedSoFar(12) |
/// totalLength(12)`. `totalLength` here is the overall reassembled
/// message length (unlike [`Header::total_length`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AckBody {
    pub acked_sequence_nr: u64,
    pub received_so_far: u64,
    pub total_length: u64,
}

impl AckBody {
    pub fn format(&self) -> String {
        format!("{:010}{:012}{:012}", self.acked_sequence_nr, self.received_so_far, self.total_length)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ACK_BODY_LEN {
            return Err(SyncError::bad_header(format!(
                "short ack body: got {} bytes, need {ACK_BODY_LEN}",
                bytes.len()
            )));
        }
        let text = std::str::from_utf8(&bytes[..ACK_BODY_LEN])
            .map_err(|e| SyncError::bad_header(format!("non-utf8 ack body: {e}")))?;
        let acked_sequence_nr = parse_field(&text[0..10], "ackedSequenceNr")?;
        let received_so_far = parse_field(&text[10..22], "receivedSoFar")?;
        let total_length = parse_field(&text[22..34], "totalLength")?;
        Ok(Self { acked_sequence_nr, received_so_far, total_length })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let h = Header::new(CURRENT_VERSION, Segment::First, 12345678, 42, 100000);
        let formatted = h.format();
        assert_eq!(formatted.len(), HEADER_LEN);
        let parsed = Header::parse(formatted.as_bytes()).unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn ack_body_round_trip() {
        let ack = AckBody { acked_sequence_nr: 7, received_so_far: 16000, total_length: 40000 };
        let formatted = ack.format();
        assert_eq!(formatted.len(), ACK_BODY_LEN);
        assert_eq!(AckBody::parse(formatted.as_bytes()).unwrap(), ack);
    }

    #[test]
    fn version_mismatch_is_structurally_valid() {
        // A header with a non-current version must still parse cleanly —
        // rejecting on version is a connection-level policy decision, not
        // a framing error (scenario F, spec §8).
        let h = Header::new(99, Segment::Whole, 1, 1, 10);
        let parsed = Header::parse(h.format().as_bytes()).unwrap();
        assert_eq!(parsed.version, 99);
    }

    #[test]
    fn bad_segment_indicator_is_rejected() {
        let mut bytes = Header::new(CURRENT_VERSION, Segment::Whole, 1, 1, 10).format().into_bytes();
        bytes[2] = b'?';
        assert!(Header::parse(&bytes).is_err());
    }
}
