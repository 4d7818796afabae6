use crate::constants::{DIRECTION_FROM_DEVICE, DIRECTION_TO_DEVICE, PROTO_V1, PROTO_V2};
use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Wire protocol version, identified by the byte following `$`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum ProtocolVersion {
    #[strum(to_string = "MSPv1")]
    V1 = PROTO_V1,
    #[strum(to_string = "MSPv2")]
    V2 = PROTO_V2,
}

/// Which side of the link a frame is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum Direction {
    /// `>`: a response or unsolicited message from the device.
    #[default]
    #[strum(to_string = "from device")]
    FromDevice = DIRECTION_FROM_DEVICE,
    /// `<`: a request from the host.
    #[strum(to_string = "to device")]
    ToDevice = DIRECTION_TO_DEVICE,
}

/// One decoded frame.
///
/// `valid` is false when the checksum byte did not match; such frames carry an
/// empty payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: ProtocolVersion,
    pub direction: Direction,
    /// The device answered with `!`: it does not know this command.
    pub unsupported: bool,
    pub code: u16,
    pub payload: Bytes,
    pub valid: bool,
}

impl Frame {
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// What a pending request's completion receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub payload: Bytes,
    pub valid: bool,
    pub unsupported: bool,
}

impl From<&Frame> for Response {
    fn from(frame: &Frame) -> Self {
        Self {
            code: frame.code,
            payload: frame.payload.clone(),
            valid: frame.valid,
            unsupported: frame.unsupported,
        }
    }
}

impl From<Frame> for Response {
    fn from(frame: Frame) -> Self {
        Self {
            code: frame.code,
            payload: frame.payload,
            valid: frame.valid,
            unsupported: frame.unsupported,
        }
    }
}
