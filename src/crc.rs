//! Modbus CRC16.
//!
//! Reflected polynomial 0xA001 (0x8005 bit-reversed), initial value 0xFFFF,
//! processed LSB first one bit at a time. The result goes on the wire low
//! byte first.

const POLY: u16 = 0xA001;
const INIT: u16 = 0xFFFF;

/// Checksum of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = INIT;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Checksum of `data` in wire order: `[low, high]`.
pub fn crc16_le_bytes(data: &[u8]) -> [u8; 2] {
    crc16(data).to_le_bytes()
}

/// True if the last two bytes of `frame` are the checksum of the rest.
pub fn verify(frame: &[u8]) -> bool {
    match frame.len().checked_sub(2) {
        Some(split) => {
            let (payload, trailer) = frame.split_at(split);
            crc16_le_bytes(payload) == [trailer[0], trailer[1]]
        }
        None => false,
    }
}
