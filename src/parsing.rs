//! Hex field readers, checksum and framing for the ASCII-hex wire format

use crate::error::Error;
use crate::packets::{Mac, MESSAGE_FOOTER, MESSAGE_HEADER};
use crate::Result;

/// Length in characters of the trailing checksum
pub const CRC_LEN: usize = 4;

/// CRC-16/XMODEM (poly 0x1021, init 0x0000)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Wrap a message body in header, checksum and footer
pub fn frame_message(body: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MESSAGE_HEADER.len() + body.len() + CRC_LEN + 2);
    frame.extend_from_slice(MESSAGE_HEADER);
    frame.extend_from_slice(body.as_bytes());
    frame.extend_from_slice(format!("{:04X}", crc16(body.as_bytes())).as_bytes());
    frame.extend_from_slice(MESSAGE_FOOTER);
    frame
}

/// Check the trailing checksum of a frame's content (everything between header and
/// footer) and return the body without it
pub fn verify_frame(content: &[u8]) -> Result<&str> {
    let text = std::str::from_utf8(content)
        .map_err(|_| Error::protocol("Frame contains non-ASCII data"))?;
    if text.len() < CRC_LEN || !text.is_ascii() {
        return Err(Error::protocol(format!("Frame too short: {} bytes", text.len())));
    }
    let (body, crc_text) = text.split_at(text.len() - CRC_LEN);
    let expected = read_hex_u16(crc_text, 0)
        .map_err(|_| Error::protocol(format!("Invalid checksum field '{}'", crc_text)))?;
    let actual = crc16(body.as_bytes());
    if expected != actual {
        return Err(Error::protocol(format!(
            "Checksum mismatch: expected {:04X}, calculated {:04X}",
            expected, actual
        )));
    }
    Ok(body)
}

fn hex_slice(data: &str, offset: usize, len: usize) -> Result<&str> {
    data.get(offset..offset + len).ok_or_else(|| {
        Error::protocol(format!(
            "Buffer too short for {} hex chars at offset {}",
            len, offset
        ))
    })
}

/// Decode `N` big-endian bytes from `2 * N` hex characters at `offset`
fn read_hex_bytes<const N: usize>(data: &str, offset: usize) -> Result<[u8; N]> {
    let slice = hex_slice(data, offset, N * 2)?;
    let mut bytes = [0u8; N];
    hex::decode_to_slice(slice, &mut bytes)
        .map_err(|_| Error::protocol(format!("Invalid hex field '{}'", slice)))?;
    Ok(bytes)
}

/// Read a 2-character hex u8
pub fn read_hex_u8(data: &str, offset: usize) -> Result<u8> {
    read_hex_bytes::<1>(data, offset).map(|[byte]| byte)
}

/// Read a 4-character hex u16
pub fn read_hex_u16(data: &str, offset: usize) -> Result<u16> {
    read_hex_bytes(data, offset).map(u16::from_be_bytes)
}

/// Read an 8-character hex u32
pub fn read_hex_u32(data: &str, offset: usize) -> Result<u32> {
    read_hex_bytes(data, offset).map(u32::from_be_bytes)
}

/// Read an 8-character hex IEEE-754 float
pub fn read_hex_f32(data: &str, offset: usize) -> Result<f32> {
    read_hex_u32(data, offset).map(f32::from_bits)
}

/// Read a 16-character MAC
pub fn read_mac(data: &str, offset: usize) -> Result<Mac> {
    Mac::parse(hex_slice(data, offset, 16)?)
}
