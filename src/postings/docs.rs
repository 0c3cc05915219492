//! Doc id and frequency iteration over the `.doc` file.

use crate::codec::packed::PackedCodec;
use crate::error::{Result, SarissaError};
use crate::postings::skip::{SkipPoint, SkipReader};
use crate::postings::term_state::IntBlockTermState;
use crate::postings::{
    BLOCK_SIZE, DocIdIterator, FieldInfo, MAX_SKIP_LEVELS, NO_MORE_DOCS, PostingsEnum,
};
use crate::storage::structured::{DataInput, IndexInput};

/// Iterates over the docs of one term, with lazily decoded frequencies.
///
/// Frequency blocks are only decoded when [`PostingsEnum::freq`] is called
/// for a doc of the block; otherwise they are skipped on the next refill.
#[derive(Debug)]
pub struct DocIterator {
    doc_in: Option<IndexInput>,
    field: FieldInfo,
    state: IntBlockTermState,
    index_has_freq: bool,
    codec: PackedCodec,

    doc_buffer: [u32; BLOCK_SIZE],
    freq_buffer: [u32; BLOCK_SIZE],
    buffer_len: usize,
    doc_buffer_upto: usize,
    freqs_pending: bool,

    doc_upto: u32,
    accum: u32,
    doc: Option<u32>,

    keep_impacts: bool,
    skipper: Option<SkipReader>,
    next_skip_doc: u32,

    track_freqs: bool,
    freq_sum: u64,
    skip_move: Option<SkipPoint>,
}

impl DocIterator {
    /// Iterate over the docs of `state`.
    ///
    /// `doc_in` must be a private clone of the `.doc` input; it is `None` for
    /// singleton terms, which never touch the file.
    pub(crate) fn new(
        doc_in: Option<IndexInput>,
        field: &FieldInfo,
        state: &IntBlockTermState,
        keep_impacts: bool,
    ) -> Result<Self> {
        let mut doc_in = doc_in;
        if state.singleton_doc_id.is_none() {
            let input = doc_in.as_mut().ok_or_else(|| {
                SarissaError::invalid_operation("doc input required for non-singleton terms")
            })?;
            input.seek(state.doc_start_fp)?;
        }

        Ok(DocIterator {
            doc_in,
            field: field.clone(),
            state: *state,
            index_has_freq: field.index_options.has_freqs(),
            codec: PackedCodec::new(),
            doc_buffer: [0; BLOCK_SIZE],
            freq_buffer: [1; BLOCK_SIZE],
            buffer_len: 0,
            doc_buffer_upto: 0,
            freqs_pending: false,
            doc_upto: 0,
            accum: 0,
            doc: None,
            keep_impacts,
            skipper: None,
            next_skip_doc: BLOCK_SIZE as u32 - 1,
            track_freqs: false,
            freq_sum: 0,
            skip_move: None,
        })
    }

    /// Sum the frequencies of every consumed doc, for position accounting.
    pub(crate) fn track_freqs(&mut self) {
        self.track_freqs = true;
    }

    /// Frequencies of the docs consumed since the last call.
    pub(crate) fn take_freq_sum(&mut self) -> u64 {
        std::mem::take(&mut self.freq_sum)
    }

    /// The skip entry the last `advance` jumped to, if it jumped.
    pub(crate) fn take_skip_move(&mut self) -> Option<SkipPoint> {
        self.skip_move.take()
    }

    pub(crate) fn term_state(&self) -> &IntBlockTermState {
        &self.state
    }

    /// The skip reader of this term, created on first use; `None` when the
    /// term has no skip data.
    pub(crate) fn skip_reader(&mut self) -> Result<Option<&mut SkipReader>> {
        if self.state.doc_freq as usize <= BLOCK_SIZE {
            return Ok(None);
        }
        if self.skipper.is_none() {
            let doc_in = self.doc_in.as_ref().ok_or_else(|| {
                SarissaError::invalid_operation("doc input required for non-singleton terms")
            })?;
            let skip_offset = self.state.skip_offset.ok_or_else(|| {
                SarissaError::corrupt(
                    doc_in.name(),
                    format!("missing skip data for docFreq={}", self.state.doc_freq),
                )
            })?;
            let mut skipper =
                SkipReader::new(doc_in.try_clone()?, MAX_SKIP_LEVELS, &self.field, self.keep_impacts);
            skipper.init(
                self.state.doc_start_fp + skip_offset,
                self.state.doc_start_fp,
                self.state.pos_start_fp,
                self.state.pay_start_fp,
                self.state.doc_freq,
            )?;
            self.skipper = Some(skipper);
        }
        Ok(self.skipper.as_mut())
    }

    pub(crate) fn skipper(&self) -> Option<&SkipReader> {
        self.skipper.as_ref()
    }

    fn doc_input(&mut self) -> Result<&mut IndexInput> {
        self.doc_in
            .as_mut()
            .ok_or_else(|| SarissaError::invalid_operation("singleton terms have no doc input"))
    }

    fn refill_docs(&mut self) -> Result<()> {
        if let Some(doc) = self.state.singleton_doc_id {
            self.doc_buffer[0] = doc;
            self.freq_buffer[0] = self.state.total_term_freq.min(u32::MAX as u64) as u32;
            self.buffer_len = 1;
            self.doc_buffer_upto = 0;
            return Ok(());
        }

        let doc_in = self
            .doc_in
            .as_mut()
            .ok_or_else(|| SarissaError::invalid_operation("doc input required for non-singleton terms"))?;

        if self.freqs_pending {
            PackedCodec::skip(doc_in)?;
            self.freqs_pending = false;
        }

        let left = (self.state.doc_freq - self.doc_upto) as usize;
        let len = if left >= BLOCK_SIZE {
            self.codec.decode(doc_in, &mut self.doc_buffer)?;
            if self.index_has_freq {
                self.freqs_pending = true;
            } else {
                self.freq_buffer.fill(1);
            }
            BLOCK_SIZE
        } else {
            for i in 0..left {
                let code = doc_in.read_vint()?;
                if self.index_has_freq {
                    self.doc_buffer[i] = code >> 1;
                    self.freq_buffer[i] = if code & 1 != 0 { 1 } else { doc_in.read_vint()? };
                } else {
                    self.doc_buffer[i] = code;
                    self.freq_buffer[i] = 1;
                }
            }
            left
        };

        let mut accum = self.accum;
        for slot in &mut self.doc_buffer[..len] {
            let doc = accum as u64 + *slot as u64;
            if doc >= NO_MORE_DOCS as u64 {
                return Err(SarissaError::corrupt(
                    doc_in.resource(),
                    format!("doc id {doc} out of range"),
                ));
            }
            accum = doc as u32;
            *slot = accum;
        }

        self.accum = accum;
        self.buffer_len = len;
        self.doc_buffer_upto = 0;
        Ok(())
    }

    fn decode_freqs(&mut self) -> Result<()> {
        if self.freqs_pending {
            let doc_in = self.doc_in.as_mut().ok_or_else(|| {
                SarissaError::invalid_operation("doc input required for non-singleton terms")
            })?;
            self.codec.decode(doc_in, &mut self.freq_buffer)?;
            for freq in &mut self.freq_buffer {
                *freq = freq.checked_add(1).ok_or_else(|| {
                    SarissaError::corrupt(doc_in.resource(), "frequency overflow")
                })?;
            }
            self.freqs_pending = false;
        }
        Ok(())
    }

    fn skip_ahead(&mut self, target: u32) -> Result<()> {
        let doc_upto = self.doc_upto;
        let Some(skipper) = self.skip_reader()? else {
            return Ok(());
        };

        let new_doc_upto = skipper.skip_to(target)? + 1;
        let next_skip_doc = skipper.next_skip_doc();
        let moved = if new_doc_upto > doc_upto as i64 && skipper.doc() < target {
            Some(SkipPoint {
                doc: skipper.doc(),
                doc_fp: skipper.doc_pointer(),
                pos_fp: skipper.pos_pointer(),
                pay_fp: skipper.pay_pointer(),
                pos_buffer_upto: skipper.pos_buffer_upto(),
                payload_byte_upto: skipper.payload_byte_upto(),
            })
        } else {
            None
        };
        self.next_skip_doc = next_skip_doc;

        if let Some(point) = moved {
            self.doc_input()?.seek(point.doc_fp)?;
            self.doc_upto = new_doc_upto as u32;
            self.accum = point.doc;
            self.buffer_len = 0;
            self.doc_buffer_upto = 0;
            self.freqs_pending = false;
            self.freq_sum = 0;
            self.skip_move = Some(point);
        }
        Ok(())
    }

    /// Consume the next buffered doc.
    fn consume(&mut self) -> Result<u32> {
        let doc = self.doc_buffer[self.doc_buffer_upto];
        self.doc_buffer_upto += 1;
        self.doc_upto += 1;
        if self.track_freqs {
            self.decode_freqs()?;
            self.freq_sum += self.freq_buffer[self.doc_buffer_upto - 1] as u64;
        }
        Ok(doc)
    }

    fn exhaust(&mut self) -> u32 {
        self.doc = Some(NO_MORE_DOCS);
        NO_MORE_DOCS
    }
}

impl DocIdIterator for DocIterator {
    fn doc_id(&self) -> Option<u32> {
        self.doc
    }

    fn next_doc(&mut self) -> Result<u32> {
        if self.doc_upto == self.state.doc_freq {
            return Ok(self.exhaust());
        }
        if self.doc_buffer_upto == self.buffer_len {
            self.refill_docs()?;
        }
        let doc = self.consume()?;
        self.doc = Some(doc);
        Ok(doc)
    }

    fn advance(&mut self, target: u32) -> Result<u32> {
        if self.state.doc_freq as usize > BLOCK_SIZE && target > self.next_skip_doc {
            self.skip_ahead(target)?;
        }

        loop {
            if self.doc_upto == self.state.doc_freq {
                return Ok(self.exhaust());
            }
            if self.doc_buffer_upto == self.buffer_len {
                self.refill_docs()?;

                // A whole block before the target only contributes its freq sum.
                if self.track_freqs && self.freqs_pending && self.doc_buffer[BLOCK_SIZE - 1] < target {
                    let doc_in = self.doc_in.as_mut().ok_or_else(|| {
                        SarissaError::invalid_operation("doc input required for non-singleton terms")
                    })?;
                    let sum = self.codec.bulk_sum(doc_in)?;
                    self.freq_sum += sum + BLOCK_SIZE as u64;
                    self.freqs_pending = false;
                    self.doc_upto += BLOCK_SIZE as u32;
                    self.doc_buffer_upto = BLOCK_SIZE;
                    continue;
                }
            }

            let doc = self.consume()?;
            if doc >= target {
                self.doc = Some(doc);
                return Ok(doc);
            }
        }
    }

    fn cost(&self) -> u64 {
        self.state.doc_freq as u64
    }
}

impl PostingsEnum for DocIterator {
    fn freq(&mut self) -> Result<u32> {
        debug_assert!(self.doc_buffer_upto > 0, "freq() called before the first doc");
        if self.doc_buffer_upto == 0 {
            return Ok(1);
        }
        self.decode_freqs()?;
        Ok(self.freq_buffer[self.doc_buffer_upto - 1])
    }

    fn next_position(&mut self) -> Result<u32> {
        Err(SarissaError::contract(format!(
            "positions were not requested for field {}",
            self.field.name
        )))
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
