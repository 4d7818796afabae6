// Wire constants for MSP v1/v2 framing

/// Every frame starts with `$`.
pub const PREAMBLE: u8 = b'$';

/// Protocol identifier byte for MSP v1 frames.
pub const PROTO_V1: u8 = b'M';

/// Protocol identifier byte for MSP v2 frames.
pub const PROTO_V2: u8 = b'X';

/// Direction byte for frames sent by the device.
pub const DIRECTION_FROM_DEVICE: u8 = b'>';

/// Direction byte for frames sent to the device.
pub const DIRECTION_TO_DEVICE: u8 = b'<';

/// Direction byte the device uses to mark a command it does not support.
pub const DIRECTION_UNSUPPORTED: u8 = b'!';

/// V1 length byte announcing a jumbo frame with a 16-bit length extension.
pub const JUMBO_FRAME_SIZE_LIMIT: u8 = 255;

/// Highest command code that fits a v1 frame.
pub const MAX_V1_CODE: u16 = 254;

/// Largest payload either protocol version can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Size of the `$`, identifier and direction bytes.
pub const HEADER_SIZE: usize = 3;

/// V1: length + code + checksum.
pub const V1_OVERHEAD: usize = HEADER_SIZE + 3;

/// V1 jumbo: sentinel + code + 16-bit length + checksum.
pub const V1_JUMBO_OVERHEAD: usize = HEADER_SIZE + 5;

/// V2: flag + 16-bit code + 16-bit length + checksum.
pub const V2_OVERHEAD: usize = HEADER_SIZE + 6;

/// Polynomial of CRC-8/DVB-S2.
pub const CRC8_DVB_S2_POLY: u8 = 0xD5;

/// Lower bound of the adaptive request timeout, in milliseconds.
pub const MIN_TIMEOUT_MS: u64 = 100;

/// Upper bound of the adaptive request timeout, in milliseconds.
pub const MAX_TIMEOUT_MS: u64 = 2000;

/// Starting value of the adaptive request timeout, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 200;
