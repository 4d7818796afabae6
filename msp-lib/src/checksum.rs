//! Frame checksums.
//!
//! MSP v1 protects a frame with a plain XOR over length, code and payload.
//! MSP v2 uses CRC-8/DVB-S2 (polynomial `0xD5`, no reflection, no final XOR)
//! over flag, code, length and payload.

use crate::constants::CRC8_DVB_S2_POLY;

/// Fold one byte into a running XOR checksum.
#[inline]
pub fn xor8_update(acc: u8, byte: u8) -> u8 {
    acc ^ byte
}

/// XOR checksum of a byte range, seeded at zero.
pub fn xor8(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, &b| xor8_update(acc, b))
}

/// Fold one byte into a running CRC-8/DVB-S2.
#[inline]
pub fn crc8_dvb_s2_update(mut crc: u8, byte: u8) -> u8 {
    crc ^= byte;
    for _ in 0..8 {
        if crc & 0x80 != 0 {
            crc = (crc << 1) ^ CRC8_DVB_S2_POLY;
        } else {
            crc <<= 1;
        }
    }
    crc
}

/// CRC-8/DVB-S2 of a byte range, continuing from `seed`.
pub fn crc8_dvb_s2_with_seed(seed: u8, data: &[u8]) -> u8 {
    data.iter().fold(seed, |crc, &b| crc8_dvb_s2_update(crc, b))
}

/// CRC-8/DVB-S2 of a byte range, seeded at zero.
pub fn crc8_dvb_s2(data: &[u8]) -> u8 {
    crc8_dvb_s2_with_seed(0, data)
}
