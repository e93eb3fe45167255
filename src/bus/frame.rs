//! Modbus RTU framing for "read holding registers" (function 0x03)
//!
//! Request: `[addr, 0x03, start_hi, start_lo, count_hi, count_lo, crc_lo, crc_hi]`
//! Response: `[addr, 0x03, byte_count, data..., crc_lo, crc_hi]`
//! Exception: `[addr, 0x83, code, crc_lo, crc_hi]`
use crate::error::TransportError;
use crate::models::RegisterSpec;

pub const READ_HOLDING_REGISTERS: u8 = 0x03;
const EXCEPTION_FLAG: u8 = 0x80;

/// Bytes before the payload: address, function, byte count
pub const HEADER_LEN: usize = 3;
pub const CRC_LEN: usize = 2;

/// CRC-16/MODBUS (reflected poly 0xA001, init 0xFFFF)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

pub fn encode_read_request(address: u8, spec: RegisterSpec) -> [u8; 8] {
    let start = spec.start.to_be_bytes();
    let count = spec.count.to_be_bytes();
    let mut frame = [
        address,
        READ_HOLDING_REGISTERS,
        start[0],
        start[1],
        count[0],
        count[1],
        0,
        0,
    ];
    let crc = crc16(&frame[..6]).to_le_bytes();
    frame[6] = crc[0];
    frame[7] = crc[1];
    frame
}

/// How many more bytes to read after the 3-byte header
///
/// For an exception frame the third byte is the exception code, so only the
/// CRC follows.
pub fn remaining_len(header: &[u8; HEADER_LEN]) -> usize {
    if header[1] & EXCEPTION_FLAG != 0 {
        CRC_LEN
    } else {
        header[2] as usize + CRC_LEN
    }
}

/// Validate a complete response frame and extract its register words
pub fn decode_read_response(
    address: u8,
    spec: RegisterSpec,
    frame: &[u8],
) -> Result<Vec<u16>, TransportError> {
    if frame.len() < HEADER_LEN + CRC_LEN {
        return Err(TransportError::Malformed {
            address,
            reason: format!("frame too short ({} bytes)", frame.len()),
        });
    }

    let (body, crc_bytes) = frame.split_at(frame.len() - CRC_LEN);
    let expected = crc16(body);
    let actual = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    if expected != actual {
        return Err(TransportError::Checksum {
            address,
            expected,
            actual,
        });
    }

    if body[0] != address {
        return Err(TransportError::Malformed {
            address,
            reason: format!("reply from unexpected address {}", body[0]),
        });
    }

    let function = body[1];
    if function == READ_HOLDING_REGISTERS | EXCEPTION_FLAG {
        return Err(TransportError::Exception {
            address,
            code: body[2],
        });
    }
    if function != READ_HOLDING_REGISTERS {
        return Err(TransportError::Malformed {
            address,
            reason: format!("unexpected function code {:#04x}", function),
        });
    }

    let byte_count = body[2] as usize;
    let payload = &body[HEADER_LEN..];
    if byte_count != payload.len() || byte_count != spec.count as usize * 2 {
        return Err(TransportError::Malformed {
            address,
            reason: format!(
                "byte count {} does not match {} requested registers",
                byte_count, spec.count
            ),
        });
    }

    Ok(payload
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Build the response a well-behaved sensor would send for `words`
#[cfg(test)]
pub fn encode_read_response(address: u8, words: &[u16]) -> Vec<u8> {
    let mut frame = vec![address, READ_HOLDING_REGISTERS, (words.len() * 2) as u8];
    for w in words {
        frame.extend_from_slice(&w.to_be_bytes());
    }
    let crc = crc16(&frame).to_le_bytes();
    frame.extend_from_slice(&crc);
    frame
}
