//! Frame codec for the reliability protocol.
//!
//! Every frame is `type: u8 | id: u64 big-endian | payload: bytes`. The id
//! field is always present, even for control frames without application
//! data, because it correlates control frames with their initiating
//! message. Byte-identical compatibility with existing clients is required.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Fixed header: one type byte plus the 8-byte big-endian id.
pub const HEADER_LEN: usize = 1 + 8;

// ---------------------------------------------------------------------------
// Frame types
// ---------------------------------------------------------------------------

/// Wire frame discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Application payload.
    Data = 0x00,
    /// QoS-1 acknowledgement of a DATA frame.
    Ack = 0x01,
    /// QoS-2 phase one: announce an id.
    Prepare = 0x02,
    /// QoS-2 phase one response.
    PrepareAck = 0x03,
    /// QoS-2 phase two: commit the announced id.
    Commit = 0x04,
    /// QoS-2 terminal response; unconditionally clears sender state.
    Complete = 0x05,
}

impl FrameType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(Self::Data),
            0x01 => Some(Self::Ack),
            0x02 => Some(Self::Prepare),
            0x03 => Some(Self::PrepareAck),
            0x04 => Some(Self::Commit),
            0x05 => Some(Self::Complete),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Data => "DATA",
            Self::Ack => "ACK",
            Self::Prepare => "PREPARE",
            Self::PrepareAck => "PREPARE_ACK",
            Self::Commit => "COMMIT",
            Self::Complete => "COMPLETE",
        }
    }
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

/// A decoded frame. The payload borrows nothing; short control frames
/// carry an empty payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub id: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too short: {0} bytes")]
    Truncated(usize),
    #[error("unknown frame type 0x{0:02x}")]
    UnknownType(u8),
}

/// Encode a frame, reserving exactly `HEADER_LEN + payload.len()` bytes.
pub fn encode(frame_type: FrameType, id: u64, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(frame_type as u8);
    buf.put_u64(id);
    buf.put_slice(payload);
    buf.freeze()
}

/// Decode a frame. Fails fast on anything shorter than the header; callers
/// drop such frames with a warning and never ack them.
pub fn decode(buf: &[u8]) -> Result<Frame, FrameError> {
    if buf.len() < HEADER_LEN {
        return Err(FrameError::Truncated(buf.len()));
    }
    let frame_type = FrameType::from_u8(buf[0]).ok_or(FrameError::UnknownType(buf[0]))?;
    let mut id_bytes = [0u8; 8];
    id_bytes.copy_from_slice(&buf[1..HEADER_LEN]);
    Ok(Frame {
        frame_type,
        id: u64::from_be_bytes(id_bytes),
        payload: buf[HEADER_LEN..].to_vec(),
    })
}
