//! Per-term metadata stitching the postings files to the terms dictionary.

use crate::error::Result;
use crate::postings::FieldInfo;
use crate::storage::structured::{DataInput, DataOutput};

/// Where the postings of one term live.
///
/// File pointers are absolute in memory and delta-coded on disk against the
/// previous term of the same terms-dictionary block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntBlockTermState {
    /// Number of documents containing the term.
    pub doc_freq: u32,
    /// Total occurrences of the term.
    pub total_term_freq: u64,
    /// Start of the term's doc stream in `.doc`.
    pub doc_start_fp: u64,
    /// Start of the term's positions in `.pos`.
    pub pos_start_fp: u64,
    /// Start of the term's payloads and offsets in `.pay`.
    pub pay_start_fp: u64,
    /// Skip data offset relative to `doc_start_fp`; set iff `doc_freq > 128`.
    pub skip_offset: Option<u64>,
    /// Offset of the VInt position tail relative to `pos_start_fp`; set iff
    /// positions are indexed and `total_term_freq > 128`.
    pub last_pos_block_offset: Option<u64>,
    /// The only document of a term with `doc_freq == 1`.
    pub singleton_doc_id: Option<u32>,
}

impl IntBlockTermState {
    /// Serialize `self` as deltas against `last`.
    ///
    /// A singleton writes its doc id in place of the doc pointer delta, so the
    /// doc pointer base is left where `last` had it.
    pub(crate) fn encode(
        &self,
        out: &mut dyn DataOutput,
        field: &FieldInfo,
        last: &IntBlockTermState,
    ) -> Result<()> {
        match self.singleton_doc_id {
            Some(doc) => out.write_vint(doc)?,
            None => out.write_vlong(self.doc_start_fp - last.doc_start_fp)?,
        }

        if field.index_options.has_positions() {
            out.write_vlong(self.pos_start_fp - last.pos_start_fp)?;
            if field.stores_payloads() || field.index_options.has_offsets() {
                out.write_vlong(self.pay_start_fp - last.pay_start_fp)?;
            }
        }

        if let Some(offset) = self.last_pos_block_offset {
            out.write_vlong(offset)?;
        }
        if let Some(offset) = self.skip_offset {
            out.write_vlong(offset)?;
        }
        Ok(())
    }

    /// Parse a blob written by [`IntBlockTermState::encode`], using the pointers
    /// currently in `self` as the delta base.
    pub(crate) fn decode(&mut self, input: &mut dyn DataInput, field: &FieldInfo) -> Result<()> {
        if self.doc_freq == 1 {
            self.singleton_doc_id = Some(input.read_vint()?);
        } else {
            self.singleton_doc_id = None;
            self.doc_start_fp += input.read_vlong()?;
        }

        if field.index_options.has_positions() {
            self.pos_start_fp += input.read_vlong()?;
            if field.stores_payloads() || field.index_options.has_offsets() {
                self.pay_start_fp += input.read_vlong()?;
            }
        }

        self.last_pos_block_offset =
            if field.index_options.has_positions() && self.total_term_freq > crate::postings::BLOCK_SIZE as u64 {
                Some(input.read_vlong()?)
            } else {
                None
            };

        self.skip_offset = if self.doc_freq as usize > crate::postings::BLOCK_SIZE {
            Some(input.read_vlong()?)
        } else {
            None
        };
        Ok(())
    }

    /// Reset the delta base, as at the start of a terms-dictionary block.
    pub(crate) fn reset_pointers(&mut self) {
        self.doc_start_fp = 0;
        self.pos_start_fp = 0;
        self.pay_start_fp = 0;
    }
}
