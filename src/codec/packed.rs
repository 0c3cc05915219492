//! Fixed-width packing of 128-integer blocks.
//!
//! A block is written as a single header byte followed by its payload:
//!
//! - `0` followed by a VInt: all 128 values are equal to that VInt.
//! - `b` in `1..=32` followed by `16 * b` bytes: the 128 values packed at `b`
//!   bits each, least significant bit first, value `i` occupying bits
//!   `[i * b, (i + 1) * b)` of the byte stream.
//!
//! Any other header byte is a corrupt block.

use crate::error::{Result, SarissaError};
use crate::storage::structured::{DataInput, DataOutput};

/// Number of integers in a packed block.
pub const BLOCK_SIZE: usize = 128;

/// Widest supported bit width.
pub const MAX_BITS: u32 = 32;

/// Payload size of the widest block.
pub const MAX_ENCODED_SIZE: usize = encoded_size(MAX_BITS);

/// Number of bits needed to represent `value` (0 for 0).
#[inline]
pub fn bits_required(value: u32) -> u32 {
    u32::BITS - value.leading_zeros()
}

/// Payload size in bytes of a block packed at `bits` bits per value.
#[inline]
pub const fn encoded_size(bits: u32) -> usize {
    bits as usize * BLOCK_SIZE / 8
}

/// Pack `values` at `bits` bits each into `out`.
///
/// `out` must hold at least [`encoded_size`]`(bits)` bytes and every value must
/// fit in `bits` bits.
pub fn pack(values: &[u32; BLOCK_SIZE], bits: u32, out: &mut [u8]) {
    debug_assert!((1..=MAX_BITS).contains(&bits));
    debug_assert!(values.iter().all(|&v| bits_required(v) <= bits));

    let mut acc = 0u64;
    let mut pending = 0u32;
    let mut upto = 0;

    for &value in values {
        acc |= (value as u64) << pending;
        pending += bits;
        while pending >= 8 {
            out[upto] = acc as u8;
            upto += 1;
            acc >>= 8;
            pending -= 8;
        }
    }

    debug_assert_eq!(pending, 0);
    debug_assert_eq!(upto, encoded_size(bits));
}

/// Unpack a block packed at `bits` bits per value from `bytes`.
pub fn unpack(bytes: &[u8], bits: u32, values: &mut [u32; BLOCK_SIZE]) {
    let mut i = 0;
    for_each_unpacked(bytes, bits, |value| {
        values[i] = value;
        i += 1;
    });
}

fn for_each_unpacked<F: FnMut(u32)>(bytes: &[u8], bits: u32, mut f: F) {
    debug_assert!(bytes.len() >= encoded_size(bits));

    let mask = if bits == MAX_BITS {
        u32::MAX as u64
    } else {
        (1u64 << bits) - 1
    };

    let mut acc = 0u64;
    let mut available = 0u32;
    let mut upto = 0;

    for _ in 0..BLOCK_SIZE {
        while available < bits {
            acc |= (bytes[upto] as u64) << available;
            upto += 1;
            available += 8;
        }
        f((acc & mask) as u32);
        acc >>= bits;
        available -= bits;
    }
}

/// Encoder and decoder for packed blocks.
///
/// Holds a scratch buffer so that repeated block reads do not allocate.
#[derive(Debug, Clone)]
pub struct PackedCodec {
    scratch: Vec<u8>,
}

impl Default for PackedCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl PackedCodec {
    /// Create a codec with its scratch space allocated.
    pub fn new() -> Self {
        PackedCodec {
            scratch: vec![0u8; MAX_ENCODED_SIZE],
        }
    }

    /// Write one block of 128 values.
    pub fn encode<O: DataOutput + ?Sized>(
        &mut self,
        values: &[u32; BLOCK_SIZE],
        out: &mut O,
    ) -> Result<()> {
        let first = values[0];
        if values.iter().all(|&v| v == first) {
            out.write_byte(0)?;
            return out.write_vint(first);
        }

        let max = values.iter().copied().max().unwrap_or(0);
        let bits = bits_required(max);
        let size = encoded_size(bits);
        pack(values, bits, &mut self.scratch[..size]);

        out.write_byte(bits as u8)?;
        out.write_bytes(&self.scratch[..size])
    }

    /// Read one block of 128 values.
    pub fn decode<I: DataInput + ?Sized>(
        &mut self,
        input: &mut I,
        values: &mut [u32; BLOCK_SIZE],
    ) -> Result<()> {
        let bits = read_bits(input)?;
        if bits == 0 {
            let value = input.read_vint()?;
            values.fill(value);
            return Ok(());
        }

        let size = encoded_size(bits);
        input.read_bytes(&mut self.scratch[..size])?;
        unpack(&self.scratch[..size], bits, values);
        Ok(())
    }

    /// Sum the 128 values of the next block without storing them.
    pub fn bulk_sum<I: DataInput + ?Sized>(&mut self, input: &mut I) -> Result<u64> {
        let bits = read_bits(input)?;
        if bits == 0 {
            let value = input.read_vint()?;
            return Ok(value as u64 * BLOCK_SIZE as u64);
        }

        let size = encoded_size(bits);
        input.read_bytes(&mut self.scratch[..size])?;
        let mut sum = 0u64;
        for_each_unpacked(&self.scratch[..size], bits, |value| sum += value as u64);
        Ok(sum)
    }

    /// Advance `input` past the next block.
    pub fn skip<I: DataInput + ?Sized>(input: &mut I) -> Result<()> {
        let bits = read_bits(input)?;
        if bits == 0 {
            input.read_vint()?;
            Ok(())
        } else {
            input.skip_bytes(encoded_size(bits) as u64)
        }
    }
}

fn read_bits<I: DataInput + ?Sized>(input: &mut I) -> Result<u32> {
    let bits = input.read_byte()? as u32;
    if bits > MAX_BITS {
        return Err(SarissaError::corrupt(
            input.resource(),
            format!("invalid packed block bit width {bits}"),
        ));
    }
    Ok(bits)
}
