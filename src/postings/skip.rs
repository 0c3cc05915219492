//! Skip entries of the postings format.
//!
//! A level-0 entry is written after every full block of 128 docs except the
//! last one:
//!
//! ```text
//! DocSkip(VInt) DocFPSkip(VLong)
//!   [PosFPSkip(VLong) PosBlockOffset(VInt) [PayloadByteUpto(VInt)] [PayFPSkip(VLong)]]
//!   ImpactLength(VInt) Impacts(ImpactLength bytes)
//! ```
//!
//! All pointers are deltas against the previous entry of the same level.
//! The position fields are present when the field indexes positions, the
//! payload byte cursor when it stores payloads, and the `.pay` pointer when it
//! stores payloads or offsets.

use crate::error::Result;
use crate::postings::impact::{CompetitiveImpactAccumulator, Impact, read_impacts, write_impacts};
use crate::postings::multi_level_skip::{
    MultiLevelSkipReader, MultiLevelSkipWriter, SkipEntryReader, SkipEntryWriter,
};
use crate::postings::{BLOCK_SIZE, FieldInfo};
use crate::storage::structured::{ByteBuffer, DataInput, DataOutput, IndexInput, IndexOutput};

/// Where the postings stood when a doc block was completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipPoint {
    /// Last doc of the completed block.
    pub doc: u32,
    /// `.doc` pointer after the completed block.
    pub doc_fp: u64,
    /// `.pos` pointer of the block holding the next doc's first position.
    pub pos_fp: u64,
    /// `.pay` pointer matching `pos_fp`.
    pub pay_fp: u64,
    /// Index of the next doc's first position inside its position block.
    pub pos_buffer_upto: u32,
    /// Payload byte cursor matching `pos_buffer_upto`.
    pub payload_byte_upto: u32,
}

#[derive(Debug)]
struct SkipEntryEncoder {
    has_positions: bool,
    has_payloads: bool,
    has_pay_pointer: bool,
    write_impacts: bool,
    num_levels: usize,
    current: SkipPoint,
    last_doc: Vec<u32>,
    last_doc_fp: Vec<u64>,
    last_pos_fp: Vec<u64>,
    last_pay_fp: Vec<u64>,
    competitive: Vec<CompetitiveImpactAccumulator>,
    impact_bytes: ByteBuffer,
}

impl SkipEntryWriter for SkipEntryEncoder {
    fn write_skip_data(&mut self, level: usize, buffer: &mut ByteBuffer) -> Result<()> {
        let current = self.current;

        buffer.write_vint(current.doc - self.last_doc[level])?;
        self.last_doc[level] = current.doc;

        buffer.write_vlong(current.doc_fp - self.last_doc_fp[level])?;
        self.last_doc_fp[level] = current.doc_fp;

        if self.has_positions {
            buffer.write_vlong(current.pos_fp - self.last_pos_fp[level])?;
            self.last_pos_fp[level] = current.pos_fp;
            buffer.write_vint(current.pos_buffer_upto)?;

            if self.has_payloads {
                buffer.write_vint(current.payload_byte_upto)?;
            }
            if self.has_pay_pointer {
                buffer.write_vlong(current.pay_fp - self.last_pay_fp[level])?;
                self.last_pay_fp[level] = current.pay_fp;
            }
        }

        if level + 1 < self.num_levels {
            let (lower, upper) = self.competitive.split_at_mut(level + 1);
            upper[0].add_all(&lower[level]);
        }

        if self.write_impacts {
            debug_assert!(!self.competitive[level].is_empty());
            self.impact_bytes.clear();
            write_impacts(&self.competitive[level].competitive_set(), &mut self.impact_bytes)?;
            buffer.write_vint(self.impact_bytes.len() as u32)?;
            self.impact_bytes.write_to(buffer)?;
        } else {
            buffer.write_vint(0)?;
        }
        self.competitive[level].clear();
        Ok(())
    }
}

/// Buffers skip entries for one term at a time.
#[derive(Debug)]
pub struct SkipWriter {
    levels: MultiLevelSkipWriter,
    encoder: SkipEntryEncoder,
    initialized: bool,
    base_doc_fp: u64,
    base_pos_fp: u64,
    base_pay_fp: u64,
}

impl SkipWriter {
    pub fn new(max_levels: usize, write_impacts: bool) -> Self {
        let levels = MultiLevelSkipWriter::new(BLOCK_SIZE, BLOCK_SIZE, max_levels);
        let num_levels = levels.num_levels();
        SkipWriter {
            levels,
            encoder: SkipEntryEncoder {
                has_positions: false,
                has_payloads: false,
                has_pay_pointer: false,
                write_impacts,
                num_levels,
                current: SkipPoint::default(),
                last_doc: vec![0; num_levels],
                last_doc_fp: vec![0; num_levels],
                last_pos_fp: vec![0; num_levels],
                last_pay_fp: vec![0; num_levels],
                competitive: vec![CompetitiveImpactAccumulator::new(); num_levels],
                impact_bytes: ByteBuffer::new(),
            },
            initialized: false,
            base_doc_fp: 0,
            base_pos_fp: 0,
            base_pay_fp: 0,
        }
    }

    /// Select which entry fields are written for the terms of `field`.
    pub fn set_field(&mut self, field: &FieldInfo) {
        let options = field.index_options;
        self.encoder.has_positions = options.has_positions();
        self.encoder.has_payloads = field.stores_payloads();
        self.encoder.has_pay_pointer = field.stores_payloads() || options.has_offsets();
    }

    /// Start a new term whose postings begin at the given file pointers.
    ///
    /// Buffers are cleared lazily on the first entry, so terms without skip
    /// data cost nothing here.
    pub fn reset_skip(&mut self, doc_fp: u64, pos_fp: u64, pay_fp: u64) {
        self.base_doc_fp = doc_fp;
        self.base_pos_fp = pos_fp;
        self.base_pay_fp = pay_fp;
        self.initialized = false;
    }

    fn init_skip(&mut self) {
        if self.initialized {
            return;
        }
        self.levels.reset();
        let encoder = &mut self.encoder;
        encoder.last_doc.fill(0);
        encoder.last_doc_fp.fill(self.base_doc_fp);
        encoder.last_pos_fp.fill(self.base_pos_fp);
        encoder.last_pay_fp.fill(self.base_pay_fp);
        for acc in &mut encoder.competitive {
            acc.clear();
        }
        self.initialized = true;
    }

    /// Buffer the entry for the block ending at `point`, where `num_docs` docs
    /// have been written so far.
    pub fn buffer_skip(
        &mut self,
        point: SkipPoint,
        competitive: &CompetitiveImpactAccumulator,
        num_docs: u32,
    ) -> Result<()> {
        self.init_skip();
        self.encoder.current = point;
        self.encoder.competitive[0].add_all(competitive);
        self.levels.buffer_skip(&mut self.encoder, num_docs as u64)
    }

    /// Write the buffered skip data, returning its start pointer.
    pub fn write_skip(&mut self, out: &mut IndexOutput) -> Result<u64> {
        self.init_skip();
        self.levels.write_skip(out)
    }
}

/// Per-level state of the skip reader.
#[derive(Debug)]
pub struct SkipEntryDecoder {
    has_positions: bool,
    has_payloads: bool,
    has_pay_pointer: bool,
    keep_impacts: bool,
    doc_pointer: Vec<u64>,
    pos_pointer: Vec<u64>,
    pay_pointer: Vec<u64>,
    pos_buffer_upto: Vec<u32>,
    payload_byte_upto: Vec<u32>,
    impact_data: Vec<Vec<u8>>,
    last_doc_pointer: u64,
    last_pos_pointer: u64,
    last_pay_pointer: u64,
    last_pos_buffer_upto: u32,
    last_payload_byte_upto: u32,
}

impl SkipEntryReader for SkipEntryDecoder {
    fn read_skip_data(&mut self, level: usize, input: &mut IndexInput) -> Result<u32> {
        let delta = input.read_vint()?;
        self.doc_pointer[level] += input.read_vlong()?;

        if self.has_positions {
            self.pos_pointer[level] += input.read_vlong()?;
            self.pos_buffer_upto[level] = input.read_vint()?;
            if self.has_payloads {
                self.payload_byte_upto[level] = input.read_vint()?;
            }
            if self.has_pay_pointer {
                self.pay_pointer[level] += input.read_vlong()?;
            }
        }

        let length = input.read_vint()? as u64;
        if self.keep_impacts {
            let data = &mut self.impact_data[level];
            data.clear();
            input.read_appending(data, length)?;
        } else {
            input.skip_bytes(length)?;
        }
        Ok(delta)
    }

    fn set_last_skip_data(&mut self, level: usize) {
        self.last_doc_pointer = self.doc_pointer[level];
        self.last_pos_pointer = self.pos_pointer[level];
        self.last_pay_pointer = self.pay_pointer[level];
        self.last_pos_buffer_upto = self.pos_buffer_upto[level];
        self.last_payload_byte_upto = self.payload_byte_upto[level];
    }

    fn seek_child(&mut self, level: usize) {
        self.doc_pointer[level] = self.last_doc_pointer;
        self.pos_pointer[level] = self.last_pos_pointer;
        self.pay_pointer[level] = self.last_pay_pointer;
        self.pos_buffer_upto[level] = self.last_pos_buffer_upto;
        self.payload_byte_upto[level] = self.last_payload_byte_upto;
    }
}

/// Reads the skip data of one term.
///
/// After [`SkipReader::skip_to`] the accessors describe the last skipped
/// entry: the postings resume right after doc [`SkipReader::doc`].
#[derive(Debug)]
pub struct SkipReader {
    levels: MultiLevelSkipReader<SkipEntryDecoder>,
}

impl SkipReader {
    /// Create a reader over a clone of the `.doc` input.
    pub fn new(doc_in: IndexInput, max_levels: usize, field: &FieldInfo, keep_impacts: bool) -> Self {
        let options = field.index_options;
        let decoder = SkipEntryDecoder {
            has_positions: options.has_positions(),
            has_payloads: field.stores_payloads(),
            has_pay_pointer: field.stores_payloads() || options.has_offsets(),
            keep_impacts,
            doc_pointer: vec![0; max_levels],
            pos_pointer: vec![0; max_levels],
            pay_pointer: vec![0; max_levels],
            pos_buffer_upto: vec![0; max_levels],
            payload_byte_upto: vec![0; max_levels],
            impact_data: vec![Vec::new(); max_levels],
            last_doc_pointer: 0,
            last_pos_pointer: 0,
            last_pay_pointer: 0,
            last_pos_buffer_upto: 0,
            last_payload_byte_upto: 0,
        };
        SkipReader {
            levels: MultiLevelSkipReader::new(doc_in, max_levels, BLOCK_SIZE, BLOCK_SIZE, decoder),
        }
    }

    /// Doc freq the skip levels are computed from.
    ///
    /// A doc freq that is a multiple of the block size has no entry for its
    /// last block, exactly like the next smaller doc freq.
    pub fn trim(df: u32) -> u32 {
        if df as usize % BLOCK_SIZE == 0 {
            df.saturating_sub(1)
        } else {
            df
        }
    }

    /// Position the reader on the skip data of a term.
    pub fn init(
        &mut self,
        skip_pointer: u64,
        doc_base: u64,
        pos_base: u64,
        pay_base: u64,
        df: u32,
    ) -> Result<()> {
        self.levels.init(skip_pointer, Self::trim(df) as u64)?;

        let decoder = self.levels.entry_mut();
        decoder.last_doc_pointer = doc_base;
        decoder.last_pos_pointer = pos_base;
        decoder.last_pay_pointer = pay_base;
        decoder.last_pos_buffer_upto = 0;
        decoder.last_payload_byte_upto = 0;
        decoder.doc_pointer.fill(doc_base);
        decoder.pos_pointer.fill(pos_base);
        decoder.pay_pointer.fill(pay_base);
        decoder.pos_buffer_upto.fill(0);
        decoder.payload_byte_upto.fill(0);
        for data in &mut decoder.impact_data {
            data.clear();
        }
        Ok(())
    }

    /// Skip to the last entry whose doc is before `target`, returning the
    /// number of docs it covers minus one (negative when nothing was skipped).
    pub fn skip_to(&mut self, target: u32) -> Result<i64> {
        self.levels.skip_to(target)
    }

    /// Last doc of the skipped blocks.
    pub fn doc(&self) -> u32 {
        self.levels.last_doc()
    }

    /// Doc of the next level-0 entry.
    pub fn next_skip_doc(&self) -> u32 {
        self.levels.skip_doc(0)
    }

    /// Last doc covered by the current entry of `level`.
    pub fn doc_id_up_to(&self, level: usize) -> u32 {
        self.levels.skip_doc(level)
    }

    pub fn num_levels(&self) -> usize {
        self.levels.num_levels()
    }

    pub fn doc_pointer(&self) -> u64 {
        self.levels.entry().last_doc_pointer
    }

    pub fn pos_pointer(&self) -> u64 {
        self.levels.entry().last_pos_pointer
    }

    pub fn pay_pointer(&self) -> u64 {
        self.levels.entry().last_pay_pointer
    }

    pub fn pos_buffer_upto(&self) -> u32 {
        self.levels.entry().last_pos_buffer_upto
    }

    pub fn payload_byte_upto(&self) -> u32 {
        self.levels.entry().last_payload_byte_upto
    }

    /// Whether the current entry of `level` carries impact data.
    pub fn has_impacts(&self, level: usize) -> bool {
        !self.levels.entry().impact_data[level].is_empty()
    }

    /// Decode the impacts of the current entry of `level`.
    pub fn impacts(&self, level: usize) -> Result<Vec<Impact>> {
        read_impacts(&self.levels.entry().impact_data[level])
    }
}
