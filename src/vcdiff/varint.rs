// VCDIFF variable-length integers (RFC 3284, Section 2).
//
// Base-128, big-endian: most-significant group first.
// Each byte has bit 7 set except the final byte.

use std::io::{self, Read, Write};

/// Maximum encoded length for a 64-bit value (ceil(64/7) = 10).
pub const MAX_VARINT_LEN: usize = 10;

/// Overflow guard for the accumulator: if these bits are set before a
/// shift, the next `<< 7` would overflow.
const U64_OVERFLOW_MASK: u64 = 0xFE00_0000_0000_0000;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a `u64` into the tail of `buf`.
/// Returns the number of bytes written (1..=10); the encoding occupies
/// `buf[MAX_VARINT_LEN - len..]`.
#[inline]
pub fn encode_u64(mut num: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut i = MAX_VARINT_LEN;
    loop {
        i -= 1;
        buf[i] = (num as u8 & 0x7F) | 0x80;
        num >>= 7;
        if num == 0 {
            break;
        }
    }
    buf[MAX_VARINT_LEN - 1] &= 0x7F;
    MAX_VARINT_LEN - i
}

/// Encode a `u64` and write to a `Write` sink.
pub fn write_u64<W: Write>(w: &mut W, num: u64) -> io::Result<()> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode_u64(num, &mut buf);
    w.write_all(&buf[MAX_VARINT_LEN - len..])
}

/// Encode a `usize` and write to a `Write` sink.
pub fn write_usize<W: Write>(w: &mut W, num: usize) -> io::Result<()> {
    write_u64(w, num as u64)
}

// ---------------------------------------------------------------------------
// Decoding from byte slices
// ---------------------------------------------------------------------------

/// Decode a `u64` from the front of `data`.
/// Returns `(value, bytes_consumed)`.
pub fn read_u64(data: &[u8]) -> Result<(u64, usize), VarIntError> {
    let mut val: u64 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if val & U64_OVERFLOW_MASK != 0 {
            return Err(VarIntError::Overflow);
        }
        val = (val << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok((val, i + 1));
        }
    }
    Err(VarIntError::Underflow)
}

/// Decode a `usize` from the front of `data`.
pub fn read_usize(data: &[u8]) -> Result<(usize, usize), VarIntError> {
    let (val, len) = read_u64(data)?;
    let val = usize::try_from(val).map_err(|_| VarIntError::Overflow)?;
    Ok((val, len))
}

// ---------------------------------------------------------------------------
// Decoding from `Read`
// ---------------------------------------------------------------------------

/// Read a `u64` varint from a streaming source.
///
/// A stream that ends inside the integer yields `UnexpectedEof`.
pub fn stream_read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut val: u64 = 0;
    let mut buf = [0u8; 1];
    loop {
        r.read_exact(&mut buf)?;
        let byte = buf[0];
        if val & U64_OVERFLOW_MASK != 0 {
            return Err(VarIntError::Overflow.into());
        }
        val = (val << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok(val);
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VarIntError {
    /// Not enough input bytes to complete the integer.
    #[error("varint underflow (truncated input)")]
    Underflow,
    /// Value would overflow the target integer type.
    #[error("varint overflow")]
    Overflow,
}

impl From<VarIntError> for io::Error {
    fn from(e: VarIntError) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
