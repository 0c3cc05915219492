//! Index headers and checksum footers.
//!
//! Every postings file starts with an index header and ends with a 16-byte
//! footer:
//!
//! ```text
//! header: Magic(BE i32) CodecName(VInt len + UTF-8) Version(BE i32) ObjectId(16 bytes) Suffix(u8 len + bytes)
//! footer: FooterMagic(BE i32) AlgorithmId(BE i32 = 0) Checksum(BE i64, CRC32 of every preceding byte)
//! ```

use log::{debug, warn};

use crate::error::{Result, SarissaError};
use crate::storage::structured::{DataInput, DataOutput, IndexInput, IndexOutput};

/// Magic number at the start of every index header.
pub const CODEC_MAGIC: i32 = 0x3fd76c17;

/// Magic number at the start of every footer.
pub const FOOTER_MAGIC: i32 = !CODEC_MAGIC;

/// Length of the object id written into every header.
pub const ID_LENGTH: usize = 16;

/// Length of the checksum footer in bytes.
pub const FOOTER_LENGTH: u64 = 16;

const CHECKSUM_CHUNK: usize = 8192;

/// Write an index header to `out`.
pub fn write_index_header(
    out: &mut dyn DataOutput,
    codec: &str,
    version: i32,
    id: &[u8; ID_LENGTH],
    suffix: &str,
) -> Result<()> {
    if !codec.is_ascii() || codec.len() >= 128 {
        return Err(SarissaError::invalid_argument(format!(
            "codec name must be simple ASCII shorter than 128 bytes: {codec}"
        )));
    }
    if suffix.len() > u8::MAX as usize {
        return Err(SarissaError::invalid_argument(format!(
            "suffix must be at most 255 bytes: {suffix}"
        )));
    }

    out.write_int(CODEC_MAGIC)?;
    out.write_string(codec)?;
    out.write_int(version)?;
    out.write_bytes(id)?;
    out.write_byte(suffix.len() as u8)?;
    out.write_bytes(suffix.as_bytes())
}

/// Byte length of the header [`write_index_header`] writes.
pub fn index_header_length(codec: &str, suffix: &str) -> u64 {
    (4 + 1 + codec.len() + 4 + ID_LENGTH + 1 + suffix.len()) as u64
}

/// Read and validate an index header, returning the version found.
pub fn check_index_header(
    input: &mut dyn DataInput,
    codec: &str,
    min_version: i32,
    max_version: i32,
    expected_id: &[u8; ID_LENGTH],
    expected_suffix: &str,
) -> Result<i32> {
    let magic = input.read_int()?;
    if magic != CODEC_MAGIC {
        return Err(SarissaError::corrupt(
            input.resource(),
            format!("codec header mismatch: actual header={magic:#x} vs expected header={CODEC_MAGIC:#x}"),
        ));
    }

    let actual_codec = input.read_string()?;
    if actual_codec != codec {
        return Err(SarissaError::corrupt(
            input.resource(),
            format!("codec mismatch: actual codec={actual_codec} vs expected codec={codec}"),
        ));
    }

    let version = input.read_int()?;
    if version < min_version || version > max_version {
        return Err(SarissaError::unsupported_version(
            input.resource(),
            version,
            min_version,
            max_version,
        ));
    }

    let mut id = [0u8; ID_LENGTH];
    input.read_bytes(&mut id)?;
    if &id != expected_id {
        return Err(SarissaError::corrupt(
            input.resource(),
            format!(
                "file mismatch, expected id={}, got={}",
                hex(expected_id),
                hex(&id)
            ),
        ));
    }

    let suffix_len = input.read_byte()? as usize;
    let mut suffix = vec![0u8; suffix_len];
    input.read_bytes(&mut suffix)?;
    if suffix != expected_suffix.as_bytes() {
        return Err(SarissaError::corrupt(
            input.resource(),
            format!(
                "file mismatch, expected suffix={expected_suffix}, got={}",
                String::from_utf8_lossy(&suffix)
            ),
        ));
    }

    Ok(version)
}

/// Write the checksum footer and leave the output ready to close.
pub fn write_footer(out: &mut IndexOutput) -> Result<()> {
    out.write_int(FOOTER_MAGIC)?;
    out.write_int(0)?;
    let checksum = out.checksum();
    out.write_long(checksum as i64)?;
    debug!(
        "Wrote footer for {} (length={}, checksum={checksum:#010x})",
        out.name(),
        out.file_pointer()
    );
    Ok(())
}

/// Read the footer at the end of `input` and return the stored checksum.
///
/// The footer structure is validated but the checksum is not recomputed.
pub fn retrieve_checksum(input: &mut IndexInput) -> Result<u64> {
    if input.length() < FOOTER_LENGTH {
        return Err(SarissaError::corrupt(
            input.resource(),
            format!(
                "misplaced codec footer (file truncated?): length={} but footer length={FOOTER_LENGTH}",
                input.length()
            ),
        ));
    }
    input.seek(input.length() - FOOTER_LENGTH)?;
    read_footer(input)
}

/// Recompute the CRC32 of `input` and compare it with its footer.
///
/// Works on a clone, so the caller's position is left untouched.
pub fn checksum_entire_file(input: &IndexInput) -> Result<u64> {
    let mut clone = input.try_clone()?;
    let expected = retrieve_checksum(&mut clone)?;

    clone.seek(0)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut remaining = clone.length() - 8;
    let mut chunk = vec![0u8; CHECKSUM_CHUNK];
    while remaining > 0 {
        let len = remaining.min(CHECKSUM_CHUNK as u64) as usize;
        clone.read_bytes(&mut chunk[..len])?;
        hasher.update(&chunk[..len]);
        remaining -= len as u64;
    }
    let actual = hasher.finalize() as u64;

    if actual != expected {
        warn!(
            "Checksum mismatch in {}: expected={expected:#x} actual={actual:#x}",
            input.name()
        );
        return Err(SarissaError::corrupt(
            input.name(),
            format!("checksum failed (hardware problem?) : expected={expected:#x} actual={actual:#x}"),
        ));
    }

    debug!("Verified checksum of {} ({actual:#010x})", input.name());
    Ok(actual)
}

fn read_footer(input: &mut IndexInput) -> Result<u64> {
    let magic = input.read_int()?;
    if magic != FOOTER_MAGIC {
        return Err(SarissaError::corrupt(
            input.resource(),
            format!("codec footer mismatch (file truncated?): actual footer={magic:#x} vs expected footer={FOOTER_MAGIC:#x}"),
        ));
    }

    let algorithm = input.read_int()?;
    if algorithm != 0 {
        return Err(SarissaError::corrupt(
            input.resource(),
            format!("codec footer mismatch: unknown algorithmID: {algorithm}"),
        ));
    }

    let checksum = input.read_long()? as u64;
    if checksum & 0xFFFF_FFFF_0000_0000 != 0 {
        return Err(SarissaError::corrupt(
            input.resource(),
            format!("Illegal CRC-32 checksum: {checksum}"),
        ));
    }
    Ok(checksum)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
