//! Variable-byte integer encoding
//!
//! Seven data bits per byte, least significant group first. The final byte
//! of every value has its high bit set; all preceding bytes have it clear.

use std::io;

/// Largest number of bytes a u64 can occupy
pub const MAX_VBYTE_LEN: usize = 10;

/// Append the encoding of `value` to `output`
pub fn encode_vbyte(value: u64, output: &mut Vec<u8>) {
    let mut v = value;
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            output.push(byte | 0x80);
            break;
        } else {
            output.push(byte);
        }
    }
}

/// Decode one value starting at `*pos`, advancing `pos` past it
pub fn decode_vbyte(input: &[u8], pos: &mut usize) -> io::Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;

    loop {
        let byte = match input.get(*pos) {
            Some(&b) => b,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "Unexpected end of vbyte",
                ))
            }
        };
        *pos += 1;

        result |= ((byte & 0x7F) as u64) << shift;

        if byte & 0x80 != 0 {
            return Ok(result);
        }

        shift += 7;
        if shift >= 64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "VByte value too large",
            ));
        }
    }
}

/// Decode a value that must fit in 32 bits
pub fn decode_vbyte_u32(input: &[u8], pos: &mut usize) -> io::Result<u32> {
    let value = decode_vbyte(input, pos)?;
    u32::try_from(value).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("VByte value {} exceeds u32", value),
        )
    })
}

/// Number of bytes `value` occupies when encoded
pub fn vbyte_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Read a little-endian u64 at `*pos`
pub fn read_u64_le(input: &[u8], pos: &mut usize) -> io::Result<u64> {
    let end = *pos + 8;
    let bytes = input.get(*pos..end).ok_or_else(|| {
        io::Error::new(io::ErrorKind::UnexpectedEof, "Unexpected end of u64")
    })?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    *pos = end;
    Ok(u64::from_le_bytes(buf))
}
