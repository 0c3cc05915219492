//! Writes the `.doc`, `.pos` and `.pay` files of a segment.
//!
//! Terms are written one at a time, in the order the terms dictionary visits
//! them:
//!
//! ```text
//! set_field
//!   start_term
//!     start_doc, add_position*, finish_doc   (per doc, increasing doc ids)
//!   finish_term -> IntBlockTermState -> encode_term into the terms dictionary
//! close
//! ```

use std::sync::Arc;

use log::{debug, trace};

use crate::codec::codec_util::{write_footer, write_index_header};
use crate::codec::packed::PackedCodec;
use crate::error::{Result, SarissaError};
use crate::postings::impact::CompetitiveImpactAccumulator;
use crate::postings::skip::{SkipPoint, SkipWriter};
use crate::postings::term_state::IntBlockTermState;
use crate::postings::{
    BLOCK_SIZE, DOC_CODEC, DOC_EXTENSION, FieldInfo, MAX_POSITION, MAX_SKIP_LEVELS, NO_MORE_DOCS,
    NormsLookup, PAY_CODEC, PAY_EXTENSION, POS_CODEC, POS_EXTENSION, PostingsFormatConfig,
    SegmentWriteState, TERMS_CODEC, TermStats, VERSION_CURRENT, segment_file_name,
};
use crate::storage::structured::{DataOutput, IndexOutput};

/// Streams the postings of a segment to disk.
pub struct PostingsWriter {
    doc_out: IndexOutput,
    pos_out: Option<IndexOutput>,
    pay_out: Option<IndexOutput>,
    segment_id: [u8; 16],
    segment_suffix: String,
    codec: PackedCodec,

    field_name: String,
    write_freqs: bool,
    write_positions: bool,
    write_payloads: bool,
    write_offsets: bool,
    field_has_norms: bool,

    doc_start_fp: u64,
    pos_start_fp: u64,
    pay_start_fp: u64,

    doc_delta_buffer: [u32; BLOCK_SIZE],
    freq_buffer: [u32; BLOCK_SIZE],
    doc_buffer_upto: usize,

    pos_delta_buffer: [u32; BLOCK_SIZE],
    payload_length_buffer: [u32; BLOCK_SIZE],
    offset_start_delta_buffer: [u32; BLOCK_SIZE],
    offset_length_buffer: [u32; BLOCK_SIZE],
    pos_buffer_upto: usize,
    payload_bytes: Vec<u8>,

    last_block: Option<SkipPoint>,
    last_doc_id: u32,
    doc_count: u32,
    total_freq: u64,
    position_count: u64,
    last_position: u32,
    last_start_offset: i32,

    competitive: CompetitiveImpactAccumulator,
    norms: Option<Arc<dyn NormsLookup>>,
    skip_writer: SkipWriter,
    last_state: IntBlockTermState,
}

impl std::fmt::Debug for PostingsWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostingsWriter")
            .field("doc_out", &self.doc_out)
            .field("pos_out", &self.pos_out)
            .field("pay_out", &self.pay_out)
            .field("field", &self.field_name)
            .field("doc_count", &self.doc_count)
            .finish()
    }
}

fn create_output(
    state: &SegmentWriteState,
    config: &PostingsFormatConfig,
    extension: &str,
    codec: &str,
) -> Result<IndexOutput> {
    let name = segment_file_name(&state.segment_name, &config.segment_suffix, extension);
    let mut out = IndexOutput::create(state.storage.as_ref(), &name)?;
    write_index_header(
        &mut out,
        codec,
        VERSION_CURRENT,
        &state.segment_id,
        &config.segment_suffix,
    )?;
    debug!("Created postings file {name}");
    Ok(out)
}

impl PostingsWriter {
    /// Create the postings files of a segment.
    ///
    /// `.pos` is only created when some field indexes positions and `.pay`
    /// only when some field stores payloads or offsets.
    pub fn new(state: &SegmentWriteState, config: PostingsFormatConfig) -> Result<Self> {
        let infos = &state.field_infos;
        let doc_out = create_output(state, &config, DOC_EXTENSION, DOC_CODEC)?;
        let pos_out = if infos.has_positions() {
            Some(create_output(state, &config, POS_EXTENSION, POS_CODEC)?)
        } else {
            None
        };
        let pay_out = if infos.has_positions() && (infos.has_payloads() || infos.has_offsets()) {
            Some(create_output(state, &config, PAY_EXTENSION, PAY_CODEC)?)
        } else {
            None
        };

        Ok(PostingsWriter {
            doc_out,
            pos_out,
            pay_out,
            segment_id: state.segment_id,
            segment_suffix: config.segment_suffix,
            codec: PackedCodec::new(),
            field_name: String::new(),
            write_freqs: false,
            write_positions: false,
            write_payloads: false,
            write_offsets: false,
            field_has_norms: false,
            doc_start_fp: 0,
            pos_start_fp: 0,
            pay_start_fp: 0,
            doc_delta_buffer: [0; BLOCK_SIZE],
            freq_buffer: [0; BLOCK_SIZE],
            doc_buffer_upto: 0,
            pos_delta_buffer: [0; BLOCK_SIZE],
            payload_length_buffer: [0; BLOCK_SIZE],
            offset_start_delta_buffer: [0; BLOCK_SIZE],
            offset_length_buffer: [0; BLOCK_SIZE],
            pos_buffer_upto: 0,
            payload_bytes: Vec::new(),
            last_block: None,
            last_doc_id: 0,
            doc_count: 0,
            total_freq: 0,
            position_count: 0,
            last_position: 0,
            last_start_offset: 0,
            competitive: CompetitiveImpactAccumulator::new(),
            norms: None,
            skip_writer: SkipWriter::new(MAX_SKIP_LEVELS, config.write_impacts),
            last_state: IntBlockTermState::default(),
        })
    }

    /// Write the postings header into the terms dictionary.
    pub fn init(&self, terms_out: &mut dyn DataOutput) -> Result<()> {
        write_index_header(
            terms_out,
            TERMS_CODEC,
            VERSION_CURRENT,
            &self.segment_id,
            &self.segment_suffix,
        )?;
        terms_out.write_vint(BLOCK_SIZE as u32)
    }

    /// Start writing the terms of `field`.
    pub fn set_field(&mut self, field: &FieldInfo) {
        let options = field.index_options;
        self.field_name.clone_from(&field.name);
        self.write_freqs = options.has_freqs();
        self.write_positions = options.has_positions();
        self.write_payloads = field.stores_payloads();
        self.write_offsets = options.has_offsets();
        self.field_has_norms = field.has_norms;
        self.skip_writer.set_field(field);
        self.last_state = IntBlockTermState::default();
    }

    /// Start a new term.
    ///
    /// `norms` supplies the norm of every doc for the impacts; without it, or
    /// when the field has no norms, every doc counts as norm `1`.
    pub fn start_term(&mut self, norms: Option<Arc<dyn NormsLookup>>) {
        self.doc_start_fp = self.doc_out.file_pointer();
        self.pos_start_fp = 0;
        self.pay_start_fp = 0;
        if self.write_positions {
            if let Some(pos_out) = &self.pos_out {
                self.pos_start_fp = pos_out.file_pointer();
            }
            if self.write_payloads || self.write_offsets {
                if let Some(pay_out) = &self.pay_out {
                    self.pay_start_fp = pay_out.file_pointer();
                }
            }
        }

        self.last_doc_id = 0;
        self.last_block = None;
        self.skip_writer
            .reset_skip(self.doc_start_fp, self.pos_start_fp, self.pay_start_fp);
        self.norms = norms;
        self.competitive.clear();
    }

    /// Add `doc` with `freq` occurrences of the term.
    ///
    /// Docs must be strictly increasing within a term. `freq` is ignored when
    /// the field does not index frequencies.
    pub fn start_doc(&mut self, doc: u32, freq: u32) -> Result<()> {
        if doc >= NO_MORE_DOCS {
            return Err(SarissaError::contract(format!(
                "doc={doc} is too large (>= {NO_MORE_DOCS})"
            )));
        }
        if self.doc_count > 0 && doc <= self.last_doc_id {
            return Err(SarissaError::corrupt(
                self.doc_out.name(),
                format!(
                    "docs out of order ({doc} <= {}) in field {}",
                    self.last_doc_id, self.field_name
                ),
            ));
        }
        if self.write_freqs && freq == 0 {
            return Err(SarissaError::contract(format!(
                "freq must be at least 1 for doc={doc} in field {}",
                self.field_name
            )));
        }

        if let Some(point) = self.last_block {
            if self.doc_buffer_upto == 0 {
                let point = SkipPoint {
                    doc_fp: self.doc_out.file_pointer(),
                    ..point
                };
                self.skip_writer
                    .buffer_skip(point, &self.competitive, self.doc_count)?;
                self.competitive.clear();
            }
        }

        self.doc_delta_buffer[self.doc_buffer_upto] = doc - self.last_doc_id;
        if self.write_freqs {
            self.freq_buffer[self.doc_buffer_upto] = freq;
            self.total_freq += freq as u64;
        } else {
            self.total_freq += 1;
        }
        self.doc_buffer_upto += 1;
        self.doc_count += 1;

        if self.doc_buffer_upto == BLOCK_SIZE {
            self.codec
                .encode(&self.doc_delta_buffer, &mut self.doc_out)?;
            if self.write_freqs {
                let mut freqs = self.freq_buffer;
                for freq in &mut freqs {
                    *freq -= 1;
                }
                self.codec.encode(&freqs, &mut self.doc_out)?;
            }
        }

        self.last_doc_id = doc;
        self.last_position = 0;
        self.last_start_offset = 0;

        let norm = if self.field_has_norms {
            self.norms
                .as_ref()
                .and_then(|norms| norms.norm(doc))
                .unwrap_or(1)
        } else {
            1
        };
        self.competitive
            .add(if self.write_freqs { freq } else { 1 }, norm);
        Ok(())
    }

    /// Add the next position of the current doc.
    ///
    /// `payload` is ignored unless the field stores payloads, and the offsets
    /// are ignored unless it indexes offsets.
    pub fn add_position(
        &mut self,
        position: u32,
        payload: Option<&[u8]>,
        start_offset: i32,
        end_offset: i32,
    ) -> Result<()> {
        if position > MAX_POSITION {
            return Err(SarissaError::corrupt(
                self.doc_out.name(),
                format!("position={position} is too large (> MAX_POSITION={MAX_POSITION})"),
            ));
        }
        if position < self.last_position {
            return Err(SarissaError::corrupt(
                self.doc_out.name(),
                format!(
                    "position={position} is before the previous position {} in doc={}",
                    self.last_position, self.last_doc_id
                ),
            ));
        }
        if self.write_offsets && (start_offset < self.last_start_offset || end_offset < start_offset) {
            return Err(SarissaError::contract(format!(
                "offsets must go forward and end after start: startOffset={start_offset}, \
                 endOffset={end_offset}, previous startOffset={} in field {}",
                self.last_start_offset, self.field_name
            )));
        }
        if !self.write_positions || self.pos_out.is_none() {
            return Err(SarissaError::contract(format!(
                "cannot add positions to field {} in this segment",
                self.field_name
            )));
        }

        let upto = self.pos_buffer_upto;
        self.pos_delta_buffer[upto] = position - self.last_position;
        if self.write_payloads {
            match payload {
                Some(bytes) if !bytes.is_empty() => {
                    self.payload_length_buffer[upto] = bytes.len() as u32;
                    self.payload_bytes.extend_from_slice(bytes);
                }
                _ => self.payload_length_buffer[upto] = 0,
            }
        }
        if self.write_offsets {
            self.offset_start_delta_buffer[upto] = (start_offset - self.last_start_offset) as u32;
            self.offset_length_buffer[upto] = (end_offset - start_offset) as u32;
            self.last_start_offset = start_offset;
        }

        self.pos_buffer_upto += 1;
        self.position_count += 1;
        self.last_position = position;

        if self.pos_buffer_upto == BLOCK_SIZE {
            self.flush_position_block()?;
        }
        Ok(())
    }

    fn flush_position_block(&mut self) -> Result<()> {
        let (Some(pos_out), codec) = (self.pos_out.as_mut(), &mut self.codec) else {
            return Ok(());
        };
        codec.encode(&self.pos_delta_buffer, pos_out)?;

        if self.write_payloads || self.write_offsets {
            let pay_out = self.pay_out.as_mut().ok_or_else(|| {
                SarissaError::contract(format!(
                    "field {} stores payloads or offsets but the segment has no payloads file",
                    self.field_name
                ))
            })?;
            if self.write_payloads {
                codec.encode(&self.payload_length_buffer, pay_out)?;
                pay_out.write_vint(self.payload_bytes.len() as u32)?;
                pay_out.write_bytes(&self.payload_bytes)?;
                self.payload_bytes.clear();
            }
            if self.write_offsets {
                codec.encode(&self.offset_start_delta_buffer, pay_out)?;
                codec.encode(&self.offset_length_buffer, pay_out)?;
            }
        }

        self.pos_buffer_upto = 0;
        Ok(())
    }

    /// Finish the current doc.
    pub fn finish_doc(&mut self) {
        if self.doc_buffer_upto == BLOCK_SIZE {
            self.last_block = Some(SkipPoint {
                doc: self.last_doc_id,
                doc_fp: 0,
                pos_fp: self.pos_out.as_ref().map_or(0, IndexOutput::file_pointer),
                pay_fp: self.pay_out.as_ref().map_or(0, IndexOutput::file_pointer),
                pos_buffer_upto: self.pos_buffer_upto as u32,
                payload_byte_upto: self.payload_bytes.len() as u32,
            });
            self.doc_buffer_upto = 0;
        }
    }

    /// Finish the current term, writing its tails and skip data.
    pub fn finish_term(&mut self, stats: TermStats) -> Result<IntBlockTermState> {
        if stats.doc_freq == 0 || stats.doc_freq != self.doc_count {
            return Err(SarissaError::contract(format!(
                "term stats say docFreq={} but {} docs were added in field {}",
                stats.doc_freq, self.doc_count, self.field_name
            )));
        }
        if stats.total_term_freq != self.total_freq {
            return Err(SarissaError::contract(format!(
                "term stats say totalTermFreq={} but the docs add up to {} in field {}",
                stats.total_term_freq, self.total_freq, self.field_name
            )));
        }
        if self.write_positions && self.position_count != stats.total_term_freq {
            return Err(SarissaError::contract(format!(
                "{} positions were added for totalTermFreq={} in field {}",
                self.position_count, stats.total_term_freq, self.field_name
            )));
        }

        let mut state = IntBlockTermState {
            doc_freq: stats.doc_freq,
            total_term_freq: stats.total_term_freq,
            doc_start_fp: self.doc_start_fp,
            pos_start_fp: self.pos_start_fp,
            pay_start_fp: self.pay_start_fp,
            ..Default::default()
        };

        if stats.doc_freq == 1 {
            state.singleton_doc_id = Some(self.doc_delta_buffer[0]);
        } else {
            self.write_doc_tail()?;
        }

        if self.write_positions {
            let pos_fp = self.pos_out.as_ref().map_or(0, IndexOutput::file_pointer);
            if stats.total_term_freq > BLOCK_SIZE as u64 {
                state.last_pos_block_offset = Some(pos_fp - self.pos_start_fp);
            }
            if self.pos_buffer_upto > 0 {
                self.write_position_tail()?;
            }
        }

        if self.doc_count as usize > BLOCK_SIZE {
            let skip_fp = self.skip_writer.write_skip(&mut self.doc_out)?;
            state.skip_offset = Some(skip_fp - self.doc_start_fp);
        }

        trace!(
            "Finished term in field {}: docFreq={} totalTermFreq={} docStartFP={} skipOffset={:?}",
            self.field_name,
            state.doc_freq,
            state.total_term_freq,
            state.doc_start_fp,
            state.skip_offset
        );

        self.doc_buffer_upto = 0;
        self.pos_buffer_upto = 0;
        self.payload_bytes.clear();
        self.last_doc_id = 0;
        self.doc_count = 0;
        self.total_freq = 0;
        self.position_count = 0;
        Ok(state)
    }

    fn write_doc_tail(&mut self) -> Result<()> {
        for i in 0..self.doc_buffer_upto {
            let delta = self.doc_delta_buffer[i];
            let freq = self.freq_buffer[i];
            if !self.write_freqs {
                self.doc_out.write_vint(delta)?;
            } else if freq == 1 {
                self.doc_out.write_vint((delta << 1) | 1)?;
            } else {
                self.doc_out.write_vint(delta << 1)?;
                self.doc_out.write_vint(freq)?;
            }
        }
        Ok(())
    }

    fn write_position_tail(&mut self) -> Result<()> {
        let Some(pos_out) = self.pos_out.as_mut() else {
            return Ok(());
        };

        let mut last_payload_length = None;
        let mut last_offset_length = None;
        let mut payload_upto = 0;

        for i in 0..self.pos_buffer_upto {
            let delta = self.pos_delta_buffer[i];
            if self.write_payloads {
                let length = self.payload_length_buffer[i];
                if last_payload_length != Some(length) {
                    last_payload_length = Some(length);
                    pos_out.write_vint((delta << 1) | 1)?;
                    pos_out.write_vint(length)?;
                } else {
                    pos_out.write_vint(delta << 1)?;
                }
                if length != 0 {
                    let end = payload_upto + length as usize;
                    pos_out.write_bytes(&self.payload_bytes[payload_upto..end])?;
                    payload_upto = end;
                }
            } else {
                pos_out.write_vint(delta)?;
            }

            if self.write_offsets {
                let start_delta = self.offset_start_delta_buffer[i];
                let length = self.offset_length_buffer[i];
                if last_offset_length == Some(length) {
                    pos_out.write_vint(start_delta << 1)?;
                } else {
                    pos_out.write_vint((start_delta << 1) | 1)?;
                    pos_out.write_vint(length)?;
                    last_offset_length = Some(length);
                }
            }
        }
        Ok(())
    }

    /// Serialize `state` into the terms dictionary.
    ///
    /// `absolute` restarts the delta base, as at the start of a terms block.
    pub fn encode_term(
        &mut self,
        out: &mut dyn DataOutput,
        field: &FieldInfo,
        state: &IntBlockTermState,
        absolute: bool,
    ) -> Result<()> {
        if absolute {
            self.last_state = IntBlockTermState::default();
        }
        state.encode(out, field, &self.last_state)?;

        let doc_start_fp = if state.singleton_doc_id.is_some() {
            self.last_state.doc_start_fp
        } else {
            state.doc_start_fp
        };
        self.last_state = IntBlockTermState {
            doc_start_fp,
            ..*state
        };
        Ok(())
    }

    /// Write the footers and close every file.
    pub fn close(mut self) -> Result<()> {
        for out in std::iter::once(&mut self.doc_out)
            .chain(self.pos_out.as_mut())
            .chain(self.pay_out.as_mut())
        {
            write_footer(out)?;
            out.close()?;
            debug!("Closed postings file {} ({} bytes)", out.name(), out.file_pointer());
        }
        Ok(())
    }
}
