//! Byte-at-a-time frame decoder.
//!
//! The decoder is a tagged state machine: each [`DecoderState`] variant holds
//! only what has been read so far for the frame in progress, and [`advance`]
//! maps `(state, byte)` to the next state plus, when the checksum byte has
//! been consumed, the decoded [`Frame`]. Garbage between frames is skipped
//! until the next `$`.

use crate::checksum::{crc8_dvb_s2, crc8_dvb_s2_update, xor8_update};
use crate::constants::*;
use crate::frame::{Direction, Frame, ProtocolVersion};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

/// Direction byte contents, carried through the rest of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub direction: Direction,
    pub unsupported: bool,
}

impl Header {
    fn parse(byte: u8) -> Self {
        let mut header = Header::default();
        match byte {
            DIRECTION_UNSUPPORTED => header.unsupported = true,
            b => match Direction::try_from(b) {
                Ok(direction) => header.direction = direction,
                // anything else is treated as a device reply
                Err(_) => debug!(byte = b, "unknown direction byte, assuming from device"),
            },
        }
        header
    }
}

/// A frame whose size is known and whose payload is being collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialFrame {
    pub header: Header,
    pub code: u16,
    pub expected: usize,
    pub payload: BytesMut,
    /// Running XOR (v1) or CRC-8/DVB-S2 (v2) over everything after the header.
    pub checksum: u8,
}

impl PartialFrame {
    fn new(header: Header, code: u16, expected: usize, checksum: u8) -> Self {
        Self {
            header,
            code,
            expected,
            payload: BytesMut::with_capacity(expected),
            checksum,
        }
    }

    fn is_complete(&self) -> bool {
        self.payload.len() == self.expected
    }

    fn finish(self, version: ProtocolVersion, received: u8) -> Frame {
        let valid = self.checksum == received;
        if valid {
            debug!(%version, code = self.code, len = self.expected, "frame decoded");
        } else {
            warn!(
                %version,
                code = self.code,
                expected = self.checksum,
                received,
                "checksum mismatch"
            );
        }
        if self.header.unsupported {
            warn!(code = self.code, "device reports unsupported command");
        }

        Frame {
            version,
            direction: self.header.direction,
            unsupported: self.header.unsupported,
            code: self.code,
            payload: if valid { self.payload.freeze() } else { Bytes::new() },
            valid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DecoderState {
    #[default]
    Idle,
    ProtoIdentifier,
    DirectionV1,
    DirectionV2,
    FlagV2 { header: Header },
    PayloadLengthV1 { header: Header },
    CodeV1 { header: Header, length: u8 },
    CodeJumboV1 { header: Header },
    PayloadLengthJumboLow { header: Header, code: u8 },
    PayloadLengthJumboHigh { header: Header, code: u8, low: u8 },
    CodeV2Low { header: Header },
    CodeV2High { header: Header, low: u8 },
    PayloadLengthV2Low { header: Header, code: u16 },
    PayloadLengthV2High { header: Header, code: u16, low: u8 },
    PayloadV1(PartialFrame),
    PayloadV2(PartialFrame),
    ChecksumV1(PartialFrame),
    ChecksumV2(PartialFrame),
}

impl DecoderState {
    /// Bytes collected for the payload of the frame in progress.
    pub fn bytes_received(&self) -> usize {
        match self {
            DecoderState::PayloadV1(p)
            | DecoderState::PayloadV2(p)
            | DecoderState::ChecksumV1(p)
            | DecoderState::ChecksumV2(p) => p.payload.len(),
            _ => 0,
        }
    }
}

/// Consume one byte. Returns the next state and, after a checksum byte, the frame.
pub fn advance(state: DecoderState, byte: u8) -> (DecoderState, Option<Frame>) {
    use DecoderState::*;

    let next = match state {
        Idle => {
            if byte == PREAMBLE {
                ProtoIdentifier
            } else {
                trace!(byte, "discarding byte outside frame");
                Idle
            }
        }
        ProtoIdentifier => match ProtocolVersion::try_from(byte) {
            Ok(ProtocolVersion::V1) => DirectionV1,
            Ok(ProtocolVersion::V2) => DirectionV2,
            Err(_) => {
                debug!(byte, "unknown protocol identifier, resyncing");
                Idle
            }
        },
        DirectionV1 => PayloadLengthV1 {
            header: Header::parse(byte),
        },
        DirectionV2 => FlagV2 {
            header: Header::parse(byte),
        },
        FlagV2 { header } => CodeV2Low { header },
        PayloadLengthV1 { header } => {
            if byte == JUMBO_FRAME_SIZE_LIMIT {
                CodeJumboV1 { header }
            } else {
                CodeV1 { header, length: byte }
            }
        }
        CodeV1 { header, length } => {
            let checksum = xor8_update(length, byte);
            let partial = PartialFrame::new(header, byte.into(), length.into(), checksum);
            if length > 0 {
                PayloadV1(partial)
            } else {
                ChecksumV1(partial)
            }
        }
        CodeJumboV1 { header } => PayloadLengthJumboLow { header, code: byte },
        PayloadLengthJumboLow { header, code } => PayloadLengthJumboHigh { header, code, low: byte },
        PayloadLengthJumboHigh { header, code, low } => {
            let expected = u16::from_le_bytes([low, byte]) as usize;
            let checksum = JUMBO_FRAME_SIZE_LIMIT ^ code ^ low ^ byte;
            let partial = PartialFrame::new(header, code.into(), expected, checksum);
            if expected > 0 {
                PayloadV1(partial)
            } else {
                ChecksumV1(partial)
            }
        }
        CodeV2Low { header } => CodeV2High { header, low: byte },
        CodeV2High { header, low } => PayloadLengthV2Low {
            header,
            code: u16::from_le_bytes([low, byte]),
        },
        PayloadLengthV2Low { header, code } => PayloadLengthV2High { header, code, low: byte },
        PayloadLengthV2High { header, code, low } => {
            let expected = u16::from_le_bytes([low, byte]) as usize;
            let [code_low, code_high] = code.to_le_bytes();
            // flag byte is always folded in as zero
            let checksum = crc8_dvb_s2(&[0, code_low, code_high, low, byte]);
            let partial = PartialFrame::new(header, code, expected, checksum);
            if expected > 0 {
                PayloadV2(partial)
            } else {
                ChecksumV2(partial)
            }
        }
        PayloadV1(mut partial) => {
            partial.payload.put_u8(byte);
            partial.checksum = xor8_update(partial.checksum, byte);
            if partial.is_complete() {
                ChecksumV1(partial)
            } else {
                PayloadV1(partial)
            }
        }
        PayloadV2(mut partial) => {
            partial.payload.put_u8(byte);
            partial.checksum = crc8_dvb_s2_update(partial.checksum, byte);
            if partial.is_complete() {
                ChecksumV2(partial)
            } else {
                PayloadV2(partial)
            }
        }
        ChecksumV1(partial) => return (Idle, Some(partial.finish(ProtocolVersion::V1, byte))),
        ChecksumV2(partial) => return (Idle, Some(partial.finish(ProtocolVersion::V2, byte))),
    };

    (next, None)
}

/// Owns the decoder state for one link.
#[derive(Debug, Default)]
pub struct Decoder {
    state: DecoderState,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one byte, returning a frame once its checksum byte has been read.
    pub fn feed(&mut self, byte: u8) -> Option<Frame> {
        let state = std::mem::take(&mut self.state);
        let (next, frame) = advance(state, byte);
        self.state = next;
        frame
    }

    /// Consume a chunk, returning every frame it completes in order.
    pub fn feed_all(&mut self, data: &[u8]) -> Vec<Frame> {
        data.iter().filter_map(|&b| self.feed(b)).collect()
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == DecoderState::Idle
    }

    /// Drop any frame in progress.
    pub fn reset(&mut self) {
        self.state = DecoderState::Idle;
    }
}
