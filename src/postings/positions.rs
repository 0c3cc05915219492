//! Position, payload and offset iteration, and impact-aware doc iteration.

use crate::codec::packed::PackedCodec;
use crate::error::{Result, SarissaError};
use crate::postings::docs::DocIterator;
use crate::postings::impact::Impact;
use crate::postings::{
    BLOCK_SIZE, DocIdIterator, FieldInfo, NO_MORE_DOCS, PostingsEnum, PostingsFlags,
};
use crate::storage::structured::{DataInput, IndexInput};

/// Iterates over the docs of one term together with their positions, and
/// optionally payloads and offsets.
///
/// Positions are read lazily: moving to another doc only adds its frequency
/// to a pending count, and the positions of docs that were passed over are
/// skipped on the next call to [`PostingsEnum::next_position`].
#[derive(Debug)]
pub struct PostingsIterator {
    docs: DocIterator,
    pos_in: IndexInput,
    pay_in: Option<IndexInput>,
    codec: PackedCodec,

    index_has_payloads: bool,
    index_has_offsets: bool,
    needs_payloads: bool,
    needs_offsets: bool,

    pos_delta_buffer: [u32; BLOCK_SIZE],
    payload_length_buffer: [u32; BLOCK_SIZE],
    offset_start_delta_buffer: [u32; BLOCK_SIZE],
    offset_length_buffer: [u32; BLOCK_SIZE],
    pos_buffer_upto: usize,

    payload_bytes: Vec<u8>,
    payload_byte_upto: usize,
    payload_start: usize,
    payload_length: usize,

    /// Where the `.pos` stream resumes after a skip, applied lazily.
    pos_pending_fp: Option<u64>,
    pay_pending_fp: Option<u64>,
    /// Positions between the stream and the current doc's next position.
    pos_pending_count: u64,
    /// Start of the VInt tail; `None` when every position is in a packed block.
    last_pos_block_fp: Option<u64>,

    freq: u32,
    positions_read: u32,
    position: u32,
    start_offset: i32,
    end_offset: i32,
    last_start_offset: i32,
}

impl PostingsIterator {
    pub(crate) fn new(
        mut docs: DocIterator,
        mut pos_in: IndexInput,
        mut pay_in: Option<IndexInput>,
        field: &FieldInfo,
        flags: PostingsFlags,
    ) -> Result<Self> {
        let state = *docs.term_state();
        let index_has_payloads = field.stores_payloads();
        let index_has_offsets = field.index_options.has_offsets();

        pos_in.seek(state.pos_start_fp)?;
        if index_has_payloads || index_has_offsets {
            let pay = pay_in.as_mut().ok_or_else(|| {
                SarissaError::invalid_operation(format!(
                    "field {} needs a payloads file but none is open",
                    field.name
                ))
            })?;
            pay.seek(state.pay_start_fp)?;
        } else {
            pay_in = None;
        }

        let last_pos_block_fp = if state.total_term_freq < BLOCK_SIZE as u64 {
            Some(state.pos_start_fp)
        } else if state.total_term_freq == BLOCK_SIZE as u64 {
            None
        } else {
            let offset = state.last_pos_block_offset.ok_or_else(|| {
                SarissaError::corrupt(
                    pos_in.name(),
                    format!(
                        "missing last position block offset for totalTermFreq={}",
                        state.total_term_freq
                    ),
                )
            })?;
            Some(state.pos_start_fp + offset)
        };

        docs.track_freqs();

        Ok(PostingsIterator {
            docs,
            pos_in,
            pay_in,
            codec: PackedCodec::new(),
            index_has_payloads,
            index_has_offsets,
            needs_payloads: index_has_payloads && flags.requests(PostingsFlags::PAYLOADS),
            needs_offsets: index_has_offsets && flags.requests(PostingsFlags::OFFSETS),
            pos_delta_buffer: [0; BLOCK_SIZE],
            payload_length_buffer: [0; BLOCK_SIZE],
            offset_start_delta_buffer: [0; BLOCK_SIZE],
            offset_length_buffer: [0; BLOCK_SIZE],
            pos_buffer_upto: BLOCK_SIZE,
            payload_bytes: Vec::new(),
            payload_byte_upto: 0,
            payload_start: 0,
            payload_length: 0,
            pos_pending_fp: None,
            pay_pending_fp: None,
            pos_pending_count: 0,
            last_pos_block_fp,
            freq: 0,
            positions_read: 0,
            position: 0,
            start_offset: -1,
            end_offset: -1,
            last_start_offset: 0,
        })
    }

    fn on_doc(&mut self, doc: u32) -> Result<u32> {
        if let Some(point) = self.docs.take_skip_move() {
            self.pos_pending_fp = Some(point.pos_fp);
            self.pay_pending_fp = self.pay_in.as_ref().map(|_| point.pay_fp);
            self.pos_pending_count = point.pos_buffer_upto as u64;
        }
        self.pos_pending_count += self.docs.take_freq_sum();

        self.freq = if doc == NO_MORE_DOCS { 0 } else { self.docs.freq()? };
        self.positions_read = 0;
        self.position = 0;
        self.last_start_offset = 0;
        Ok(doc)
    }

    fn pay_input(&mut self) -> Result<&mut IndexInput> {
        self.pay_in
            .as_mut()
            .ok_or_else(|| SarissaError::invalid_operation("no payloads file is open"))
    }

    fn skip_pay_block(&mut self) -> Result<()> {
        let has_payloads = self.index_has_payloads;
        let has_offsets = self.index_has_offsets;
        if !has_payloads && !has_offsets {
            return Ok(());
        }
        let pay_in = self.pay_input()?;
        if has_payloads {
            PackedCodec::skip(pay_in)?;
            let num_bytes = pay_in.read_vint()?;
            pay_in.skip_bytes(num_bytes as u64)?;
        }
        if has_offsets {
            PackedCodec::skip(pay_in)?;
            PackedCodec::skip(pay_in)?;
        }
        Ok(())
    }

    fn refill_positions(&mut self) -> Result<()> {
        if Some(self.pos_in.file_pointer()) == self.last_pos_block_fp {
            return self.read_position_tail();
        }

        self.codec.decode(&mut self.pos_in, &mut self.pos_delta_buffer)?;

        if self.index_has_payloads {
            let pay_in = self
                .pay_in
                .as_mut()
                .ok_or_else(|| SarissaError::invalid_operation("no payloads file is open"))?;
            if self.needs_payloads {
                self.codec.decode(pay_in, &mut self.payload_length_buffer)?;
                let num_bytes = pay_in.read_vint()?;
                self.payload_bytes.clear();
                pay_in.read_appending(&mut self.payload_bytes, num_bytes as u64)?;
            } else {
                PackedCodec::skip(pay_in)?;
                let num_bytes = pay_in.read_vint()?;
                pay_in.skip_bytes(num_bytes as u64)?;
                self.payload_length_buffer.fill(0);
            }
            self.payload_byte_upto = 0;
        }

        if self.index_has_offsets {
            let pay_in = self
                .pay_in
                .as_mut()
                .ok_or_else(|| SarissaError::invalid_operation("no payloads file is open"))?;
            if self.needs_offsets {
                self.codec.decode(pay_in, &mut self.offset_start_delta_buffer)?;
                self.codec.decode(pay_in, &mut self.offset_length_buffer)?;
            } else {
                PackedCodec::skip(pay_in)?;
                PackedCodec::skip(pay_in)?;
            }
        }
        Ok(())
    }

    fn read_position_tail(&mut self) -> Result<()> {
        let count = (self.docs.term_state().total_term_freq % BLOCK_SIZE as u64) as usize;
        let mut payload_length = 0u32;
        let mut offset_length = 0u32;
        self.payload_bytes.clear();

        for i in 0..count {
            let code = self.pos_in.read_vint()?;
            if self.index_has_payloads {
                if code & 1 != 0 {
                    payload_length = self.pos_in.read_vint()?;
                }
                self.payload_length_buffer[i] = payload_length;
                self.pos_delta_buffer[i] = code >> 1;
                if payload_length != 0 {
                    self.pos_in
                        .read_appending(&mut self.payload_bytes, payload_length as u64)?;
                }
            } else {
                self.pos_delta_buffer[i] = code;
            }

            if self.index_has_offsets {
                let delta_code = self.pos_in.read_vint()?;
                if delta_code & 1 != 0 {
                    offset_length = self.pos_in.read_vint()?;
                }
                self.offset_start_delta_buffer[i] = delta_code >> 1;
                self.offset_length_buffer[i] = offset_length;
            }
        }
        self.payload_byte_upto = 0;
        Ok(())
    }

    /// Skip the positions of the docs passed over, leaving the stream on the
    /// current doc's first position.
    fn skip_positions(&mut self) -> Result<()> {
        let mut to_skip = self.pos_pending_count - self.freq as u64;
        let left_in_block = (BLOCK_SIZE - self.pos_buffer_upto) as u64;

        if to_skip < left_in_block {
            let end = self.pos_buffer_upto + to_skip as usize;
            self.skip_buffered(end);
        } else {
            to_skip -= left_in_block;
            while to_skip >= BLOCK_SIZE as u64 {
                if Some(self.pos_in.file_pointer()) == self.last_pos_block_fp {
                    return Err(SarissaError::corrupt(
                        self.pos_in.resource(),
                        "position count exceeds totalTermFreq",
                    ));
                }
                PackedCodec::skip(&mut self.pos_in)?;
                self.skip_pay_block()?;
                to_skip -= BLOCK_SIZE as u64;
            }
            self.refill_positions()?;
            self.payload_byte_upto = 0;
            self.pos_buffer_upto = 0;
            self.skip_buffered(to_skip as usize);
        }

        self.position = 0;
        self.last_start_offset = 0;
        Ok(())
    }

    fn skip_buffered(&mut self, end: usize) {
        while self.pos_buffer_upto < end {
            if self.index_has_payloads {
                self.payload_byte_upto += self.payload_length_buffer[self.pos_buffer_upto] as usize;
            }
            self.pos_buffer_upto += 1;
        }
    }
}

impl DocIdIterator for PostingsIterator {
    fn doc_id(&self) -> Option<u32> {
        self.docs.doc_id()
    }

    fn next_doc(&mut self) -> Result<u32> {
        let doc = self.docs.next_doc()?;
        self.on_doc(doc)
    }

    fn advance(&mut self, target: u32) -> Result<u32> {
        let doc = self.docs.advance(target)?;
        self.on_doc(doc)
    }

    fn cost(&self) -> u64 {
        self.docs.cost()
    }
}

impl PostingsEnum for PostingsIterator {
    fn freq(&mut self) -> Result<u32> {
        Ok(self.freq)
    }

    fn next_position(&mut self) -> Result<u32> {
        if self.positions_read >= self.freq {
            return Err(SarissaError::contract(format!(
                "next_position called more than freq={} times",
                self.freq
            )));
        }

        if let Some(fp) = self.pos_pending_fp.take() {
            self.pos_in.seek(fp)?;
            if let Some(pay_fp) = self.pay_pending_fp.take() {
                self.pay_input()?.seek(pay_fp)?;
            }
            self.pos_buffer_upto = BLOCK_SIZE;
        }

        if self.pos_pending_count > self.freq as u64 {
            self.skip_positions()?;
            self.pos_pending_count = self.freq as u64;
        }

        if self.pos_buffer_upto == BLOCK_SIZE {
            self.refill_positions()?;
            self.pos_buffer_upto = 0;
        }

        let upto = self.pos_buffer_upto;
        self.position = self
            .position
            .checked_add(self.pos_delta_buffer[upto])
            .ok_or_else(|| SarissaError::corrupt(self.pos_in.resource(), "position overflow"))?;

        if self.index_has_payloads {
            self.payload_length = self.payload_length_buffer[upto] as usize;
            self.payload_start = self.payload_byte_upto;
            self.payload_byte_upto += self.payload_length;
        }

        if self.needs_offsets {
            let start = self.last_start_offset as i64 + self.offset_start_delta_buffer[upto] as i64;
            let end = start + self.offset_length_buffer[upto] as i64;
            if end > i32::MAX as i64 {
                return Err(SarissaError::corrupt(self.pos_in.resource(), "offset overflow"));
            }
            self.start_offset = start as i32;
            self.end_offset = end as i32;
            self.last_start_offset = self.start_offset;
        }

        self.pos_buffer_upto += 1;
        self.pos_pending_count -= 1;
        self.positions_read += 1;
        Ok(self.position)
    }

    fn start_offset(&self) -> i32 {
        if self.needs_offsets { self.start_offset } else { -1 }
    }

    fn end_offset(&self) -> i32 {
        if self.needs_offsets { self.end_offset } else { -1 }
    }

    fn payload(&self) -> Option<&[u8]> {
        if !self.needs_payloads || self.payload_length == 0 {
            return None;
        }
        self.payload_bytes
            .get(self.payload_start..self.payload_start + self.payload_length)
    }
}

/// A doc iterator that also exposes the competitive impacts stored in the
/// skip data, for skipping docs that cannot score high enough.
///
/// Levels and impacts describe the state after the last
/// [`ImpactsIterator::advance_shallow`]; level `0` is the finest.
#[derive(Debug)]
pub struct ImpactsIterator {
    docs: DocIterator,
    fallback: Impact,
}

impl ImpactsIterator {
    pub(crate) fn new(docs: DocIterator) -> Self {
        let freq = docs.term_state().total_term_freq.min(u32::MAX as u64) as u32;
        ImpactsIterator {
            docs,
            fallback: Impact::new(freq, 1),
        }
    }

    /// Move the skip data so that impacts describe the docs from `target`
    /// onwards, without moving the doc iterator.
    pub fn advance_shallow(&mut self, target: u32) -> Result<()> {
        if let Some(skipper) = self.docs.skip_reader()? {
            skipper.skip_to(target)?;
        }
        Ok(())
    }

    /// Number of levels with impacts, at least 1.
    pub fn num_levels(&self) -> usize {
        self.docs
            .skipper()
            .map_or(1, |skipper| skipper.num_levels().max(1))
    }

    /// Last doc covered by the impacts of `level`.
    pub fn doc_id_up_to(&self, level: usize) -> u32 {
        debug_assert!(level < self.num_levels());
        match self.docs.skipper() {
            Some(skipper) if level < skipper.num_levels() => skipper.doc_id_up_to(level),
            _ => NO_MORE_DOCS,
        }
    }

    /// Competitive impacts of the docs up to [`Self::doc_id_up_to`]`(level)`,
    /// by increasing freq and norm.
    pub fn impacts(&self, level: usize) -> Result<Vec<Impact>> {
        debug_assert!(level < self.num_levels());
        match self.docs.skipper() {
            Some(skipper) if level < skipper.num_levels() && skipper.has_impacts(level) => {
                skipper.impacts(level)
            }
            _ => Ok(vec![self.fallback]),
        }
    }
}

impl DocIdIterator for ImpactsIterator {
    fn doc_id(&self) -> Option<u32> {
        self.docs.doc_id()
    }

    fn next_doc(&mut self) -> Result<u32> {
        self.docs.next_doc()
    }

    fn advance(&mut self, target: u32) -> Result<u32> {
        self.docs.advance(target)
    }

    fn cost(&self) -> u64 {
        self.docs.cost()
    }
}

impl PostingsEnum for ImpactsIterator {
    fn freq(&mut self) -> Result<u32> {
        self.docs.freq()
    }

    fn next_position(&mut self) -> Result<u32> {
        self.docs.next_position()
    }

    fn start_offset(&self) -> i32 {
        -1
    }

    fn end_offset(&self) -> i32 {
        -1
    }

    fn payload(&self) -> Option<&[u8]> {
        None
    }
}
