//! Outbound frame construction.
//!
//! ```text
//! v1:       $ M <dir> len:u8 code:u8 payload.. xor
//! v1 jumbo: $ M <dir> 0xFF code:u8 len:u16le payload.. xor
//! v2:       $ X <dir> flag:u8 code:u16le len:u16le payload.. crc8
//! ```

use crate::checksum::{crc8_dvb_s2, xor8};
use crate::constants::*;
use crate::error::LinkError;
use crate::frame::{Direction, ProtocolVersion};
use bytes::{BufMut, Bytes, BytesMut};

/// Build a v1 request frame. Payloads of 255 bytes or more use the jumbo form.
pub fn encode_v1(code: u8, payload: &[u8]) -> Result<Bytes, LinkError> {
    encode_frame(ProtocolVersion::V1, Direction::ToDevice, code.into(), payload)
}

/// Build a v2 request frame. Valid for every code.
pub fn encode_v2(code: u16, payload: &[u8]) -> Result<Bytes, LinkError> {
    encode_frame(ProtocolVersion::V2, Direction::ToDevice, code, payload)
}

/// Build a request frame, using v1 for codes up to 254 and v2 above.
pub fn encode(code: u16, payload: &[u8]) -> Result<Bytes, LinkError> {
    encode_frame(version_for(code), Direction::ToDevice, code, payload)
}

/// The framing `encode` picks for a code.
pub fn version_for(code: u16) -> ProtocolVersion {
    if code <= MAX_V1_CODE {
        ProtocolVersion::V1
    } else {
        ProtocolVersion::V2
    }
}

/// Build a frame of any version and direction.
pub fn encode_frame(
    version: ProtocolVersion,
    direction: Direction,
    code: u16,
    payload: &[u8],
) -> Result<Bytes, LinkError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(LinkError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    match version {
        ProtocolVersion::V1 => {
            if code > MAX_V1_CODE {
                return Err(LinkError::CodeOutOfRange {
                    code,
                    max: MAX_V1_CODE,
                });
            }
            Ok(encode_v1_body(direction, code as u8, payload))
        }
        ProtocolVersion::V2 => Ok(encode_v2_body(direction, code, payload)),
    }
}

fn encode_v1_body(direction: Direction, code: u8, payload: &[u8]) -> Bytes {
    let jumbo = payload.len() >= JUMBO_FRAME_SIZE_LIMIT as usize;
    let overhead = if jumbo { V1_JUMBO_OVERHEAD } else { V1_OVERHEAD };
    let mut buf = BytesMut::with_capacity(overhead + payload.len());

    buf.put_u8(PREAMBLE);
    buf.put_u8(PROTO_V1);
    buf.put_u8(direction.into());
    if jumbo {
        buf.put_u8(JUMBO_FRAME_SIZE_LIMIT);
        buf.put_u8(code);
        buf.put_u16_le(payload.len() as u16);
    } else {
        buf.put_u8(payload.len() as u8);
        buf.put_u8(code);
    }
    buf.put_slice(payload);

    let checksum = xor8(&buf[HEADER_SIZE..]);
    buf.put_u8(checksum);
    buf.freeze()
}

fn encode_v2_body(direction: Direction, code: u16, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(V2_OVERHEAD + payload.len());

    buf.put_u8(PREAMBLE);
    buf.put_u8(PROTO_V2);
    buf.put_u8(direction.into());
    buf.put_u8(0); // flag
    buf.put_u16_le(code);
    buf.put_u16_le(payload.len() as u16);
    buf.put_slice(payload);

    let crc = crc8_dvb_s2(&buf[HEADER_SIZE..]);
    buf.put_u8(crc);
    buf.freeze()
}
