//! Structured index I/O on top of raw storage streams.
//!
//! [`IndexOutput`] and [`IndexInput`] add the primitives the postings codec is
//! written in (VInt, VLong, ZLong, big-endian ints and longs, length-prefixed
//! strings) plus file-pointer tracking and a running CRC32 on the write side.
//! [`ByteBuffer`] and [`ByteSliceReader`] provide the same primitives over
//! in-memory bytes for skip levels, impacts and term metadata.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::{BigEndian, ByteOrder};
use crc32fast::Hasher;

use crate::error::{Result, SarissaError};
use crate::storage::{Storage, StorageInput, StorageOutput};
use crate::util::varint::{
    MAX_VLONG_LEN, encode_u64_to_slice, read_u32_from, read_u64_from, zigzag_decode,
    zigzag_encode,
};

/// A sink for index primitives.
pub trait DataOutput {
    /// Write a single byte.
    fn write_byte(&mut self, value: u8) -> Result<()>;

    /// Write raw bytes without length prefix.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    /// Write a variable-length u32.
    fn write_vint(&mut self, value: u32) -> Result<()> {
        self.write_vlong(value as u64)
    }

    /// Write a variable-length u64.
    fn write_vlong(&mut self, value: u64) -> Result<()> {
        let mut buf = [0u8; MAX_VLONG_LEN];
        let len = encode_u64_to_slice(value, &mut buf);
        self.write_bytes(&buf[..len])
    }

    /// Write a zig-zag encoded variable-length i64.
    fn write_zlong(&mut self, value: i64) -> Result<()> {
        self.write_vlong(zigzag_encode(value))
    }

    /// Write a big-endian i32.
    fn write_int(&mut self, value: i32) -> Result<()> {
        let mut buf = [0u8; 4];
        BigEndian::write_i32(&mut buf, value);
        self.write_bytes(&buf)
    }

    /// Write a big-endian i64.
    fn write_long(&mut self, value: i64) -> Result<()> {
        let mut buf = [0u8; 8];
        BigEndian::write_i64(&mut buf, value);
        self.write_bytes(&buf)
    }

    /// Write a string as VInt byte length followed by UTF-8 bytes.
    fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_vint(value.len() as u32)?;
        self.write_bytes(value.as_bytes())
    }
}

/// A source of index primitives.
///
/// Running off the end of the data is reported as a corrupt index naming
/// [`DataInput::resource`].
pub trait DataInput {
    /// Read a single byte.
    fn read_byte(&mut self) -> Result<u8>;

    /// Fill `buf` completely.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Advance over `count` bytes without reading them.
    fn skip_bytes(&mut self, count: u64) -> Result<()>;

    /// Human-readable name and position used in error messages.
    fn resource(&self) -> String;

    /// Read a variable-length u32.
    fn read_vint(&mut self) -> Result<u32> {
        match read_u32_from(|| self.read_byte()) {
            Err(SarissaError::Other(msg)) => Err(SarissaError::corrupt(self.resource(), msg)),
            other => other,
        }
    }

    /// Read a variable-length u64.
    fn read_vlong(&mut self) -> Result<u64> {
        match read_u64_from(|| self.read_byte()) {
            Err(SarissaError::Other(msg)) => Err(SarissaError::corrupt(self.resource(), msg)),
            other => other,
        }
    }

    /// Read a zig-zag encoded variable-length i64.
    fn read_zlong(&mut self) -> Result<i64> {
        Ok(zigzag_decode(self.read_vlong()?))
    }

    /// Read a big-endian i32.
    fn read_int(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(BigEndian::read_i32(&buf))
    }

    /// Read a big-endian i64.
    fn read_long(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.read_bytes(&mut buf)?;
        Ok(BigEndian::read_i64(&buf))
    }

    /// Read a string written by [`DataOutput::write_string`].
    fn read_string(&mut self) -> Result<String> {
        let len = self.read_vint()? as usize;
        let mut bytes = vec![0u8; len];
        self.read_bytes(&mut bytes)?;
        String::from_utf8(bytes)
            .map_err(|e| SarissaError::corrupt(self.resource(), format!("invalid UTF-8: {e}")))
    }
}

/// A checksummed, append-only index file writer.
pub struct IndexOutput {
    name: String,
    output: Box<dyn StorageOutput>,
    hasher: Hasher,
    file_pointer: u64,
}

impl IndexOutput {
    /// Wrap an opened storage output.
    pub fn new<S: Into<String>>(name: S, output: Box<dyn StorageOutput>) -> Self {
        IndexOutput {
            name: name.into(),
            output,
            hasher: Hasher::new(),
            file_pointer: 0,
        }
    }

    /// Create `name` in `storage` and wrap it.
    pub fn create(storage: &dyn Storage, name: &str) -> Result<Self> {
        Ok(Self::new(name, storage.create_output(name)?))
    }

    /// The file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of bytes written so far.
    pub fn file_pointer(&self) -> u64 {
        self.file_pointer
    }

    /// CRC32 of every byte written so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Flush, sync and close the underlying output.
    pub fn close(&mut self) -> Result<()> {
        self.output.close()
    }
}

impl std::fmt::Debug for IndexOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexOutput")
            .field("name", &self.name)
            .field("file_pointer", &self.file_pointer)
            .finish()
    }
}

impl DataOutput for IndexOutput {
    fn write_byte(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.output.write_all(bytes)?;
        self.hasher.update(bytes);
        self.file_pointer += bytes.len() as u64;
        Ok(())
    }
}

/// A random-access index file reader.
///
/// Clones made with [`IndexInput::try_clone`] own their position but share the
/// underlying bytes and the [`IndexInput::bytes_read`] counter.
#[derive(Debug)]
pub struct IndexInput {
    name: String,
    input: Box<dyn StorageInput>,
    length: u64,
    position: u64,
    bytes_read: Arc<AtomicU64>,
}

impl IndexInput {
    /// Wrap an opened storage input.
    pub fn new<S: Into<String>>(name: S, input: Box<dyn StorageInput>) -> Result<Self> {
        let length = input.size()?;
        Ok(IndexInput {
            name: name.into(),
            input,
            length,
            position: 0,
            bytes_read: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Open `name` in `storage` and wrap it.
    pub fn open(storage: &dyn Storage, name: &str) -> Result<Self> {
        Self::new(name, storage.open_input(name)?)
    }

    /// The file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total file length in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Current read position.
    pub fn file_pointer(&self) -> u64 {
        self.position
    }

    /// Total bytes read by this input and all of its clones.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Move the read position to `pos`.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.length {
            return Err(SarissaError::corrupt(
                self.resource(),
                format!("seek to {pos} past EOF (length={})", self.length),
            ));
        }
        if pos != self.position {
            self.input.seek(SeekFrom::Start(pos))?;
            self.position = pos;
        }
        Ok(())
    }

    /// Clone this input, keeping the current position.
    pub fn try_clone(&self) -> Result<Self> {
        let mut input = self.input.clone_input()?;
        if self.position != 0 {
            input.seek(SeekFrom::Start(self.position))?;
        }
        Ok(IndexInput {
            name: self.name.clone(),
            input,
            length: self.length,
            position: self.position,
            bytes_read: Arc::clone(&self.bytes_read),
        })
    }

    /// Append `count` bytes to `dst`.
    ///
    /// A length decoded from a damaged file fails here before `dst` grows.
    pub fn read_appending(&mut self, dst: &mut Vec<u8>, count: u64) -> Result<()> {
        self.check_remaining(count)?;
        let start = dst.len();
        dst.resize(start + count as usize, 0);
        self.read_bytes(&mut dst[start..])
    }

    fn check_remaining(&self, count: u64) -> Result<()> {
        if count > self.length - self.position {
            return Err(SarissaError::corrupt(
                self.resource(),
                format!("read past EOF: {count} bytes requested, length={}", self.length),
            ));
        }
        Ok(())
    }
}

impl DataInput for IndexInput {
    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_bytes(&mut buf)?;
        Ok(buf[0])
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let count = buf.len() as u64;
        self.check_remaining(count)?;
        self.input.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SarissaError::corrupt(self.resource(), "unexpected EOF")
            } else {
                SarissaError::from(e)
            }
        })?;
        self.position += count;
        self.bytes_read.fetch_add(count, Ordering::Relaxed);
        Ok(())
    }

    fn skip_bytes(&mut self, count: u64) -> Result<()> {
        self.check_remaining(count)?;
        self.seek(self.position + count)
    }

    fn resource(&self) -> String {
        format!("{} offset={}", self.name, self.position)
    }
}

/// A growable in-memory output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    bytes: Vec<u8>,
}

impl ByteBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes buffered.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The buffered bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Drop the contents, keeping the allocation.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Copy the buffered bytes to `out`.
    pub fn write_to(&self, out: &mut dyn DataOutput) -> Result<()> {
        out.write_bytes(&self.bytes)
    }

    /// Take the buffered bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

impl DataOutput for ByteBuffer {
    fn write_byte(&mut self, value: u8) -> Result<()> {
        self.bytes.push(value);
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }
}

/// A [`DataInput`] over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct ByteSliceReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ByteSliceReader<'a> {
    /// Read from the start of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        ByteSliceReader { bytes, position: 0 }
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Whether every byte has been consumed.
    pub fn eof(&self) -> bool {
        self.position >= self.bytes.len()
    }
}

impl DataInput for ByteSliceReader<'_> {
    fn read_byte(&mut self) -> Result<u8> {
        let byte = *self
            .bytes
            .get(self.position)
            .ok_or_else(|| SarissaError::corrupt(self.resource(), "unexpected end of buffer"))?;
        self.position += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let end = self.position + buf.len();
        if end > self.bytes.len() {
            return Err(SarissaError::corrupt(self.resource(), "unexpected end of buffer"));
        }
        buf.copy_from_slice(&self.bytes[self.position..end]);
        self.position = end;
        Ok(())
    }

    fn skip_bytes(&mut self, count: u64) -> Result<()> {
        let end = self.position + count as usize;
        if end > self.bytes.len() {
            return Err(SarissaError::corrupt(self.resource(), "unexpected end of buffer"));
        }
        self.position = end;
        Ok(())
    }

    fn resource(&self) -> String {
        format!("buffer offset={}", self.position)
    }
}
