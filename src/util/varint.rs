//! Variable-length integer encoding utilities.
//!
//! Every count, delta and tail-block value of the postings format is written as a
//! VInt (`u32`) or VLong (`u64`): 7 bits per byte, least significant group first,
//! high bit set on every byte except the last. Signed values (impact norm deltas)
//! are first mapped through zig-zag so that small negative numbers stay short.

use crate::error::{Result, SarissaError};

/// Maximum encoded length of a `u32`.
pub const MAX_VINT_LEN: usize = 5;

/// Maximum encoded length of a `u64`.
pub const MAX_VLONG_LEN: usize = 10;

/// Encode `value` into the front of `buf`, returning the number of bytes used.
///
/// `buf` must hold at least [`MAX_VLONG_LEN`] bytes.
pub fn encode_u64_to_slice(mut value: u64, buf: &mut [u8]) -> usize {
    let mut written = 0;
    while value >= 0x80 {
        buf[written] = (value as u8) | 0x80;
        value >>= 7;
        written += 1;
    }
    buf[written] = value as u8;
    written + 1
}

/// Decode up to `bits` bits pulling one byte at a time from `next`.
///
/// Errors from `next` are returned unchanged. A value wider than `bits` is an
/// [`SarissaError::Other`], which callers that know the resource turn into a
/// corruption error.
fn read_bits_from<F>(bits: u32, mut next: F) -> Result<u64>
where
    F: FnMut() -> Result<u8>,
{
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = next()?;
        let payload = (byte & 0x7F) as u64;
        if shift >= bits || (bits - shift < 7 && payload >> (bits - shift) != 0) {
            return Err(SarissaError::other(format!("VarInt overflow ({bits} bits)")));
        }
        result |= payload << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// Decode a VInt pulling one byte at a time from `next`.
pub fn read_u32_from<F>(next: F) -> Result<u32>
where
    F: FnMut() -> Result<u8>,
{
    read_bits_from(32, next).map(|value| value as u32)
}

/// Decode a VLong pulling one byte at a time from `next`.
pub fn read_u64_from<F>(next: F) -> Result<u64>
where
    F: FnMut() -> Result<u8>,
{
    read_bits_from(64, next)
}

/// Map a signed value onto an unsigned one so that small magnitudes stay small.
#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
#[inline]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
