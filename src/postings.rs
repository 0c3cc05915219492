//! Block-based postings format.
//!
//! Postings for a segment are spread over three files:
//!
//! - `.doc`: per term, packed blocks of doc deltas and frequencies, a VInt tail
//!   for the last `doc_freq % 128` docs, then the multi-level skip data.
//! - `.pos`: packed blocks of position deltas, then the interleaved VInt tail of
//!   positions, payloads and offsets.
//! - `.pay`: packed blocks of payload lengths and bytes, offset start deltas and
//!   offset lengths, aligned with the `.pos` blocks.
//!
//! Per-term metadata ([`IntBlockTermState`]) is serialized into the terms
//! dictionary by [`PostingsWriter::encode_term`] and read back by
//! [`PostingsReader::decode_term`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use sarissa_postings::postings::{
//!     DocIdIterator, FieldInfo, FieldInfos, IndexOptions, NO_MORE_DOCS, Postings, PostingsEnum,
//!     PostingsFlags, PostingsFormatConfig, PostingsReader, PostingsWriter, SegmentReadState,
//!     SegmentWriteState, TermStats,
//! };
//! use sarissa_postings::storage::memory::MemoryStorage;
//!
//! # fn main() -> sarissa_postings::error::Result<()> {
//! let field = FieldInfo::new("body", 0, IndexOptions::DocsAndFreqs);
//! let storage = Arc::new(MemoryStorage::new_default());
//! let write_state = SegmentWriteState::new(storage, "_0", FieldInfos::new(vec![field.clone()]));
//!
//! let mut writer = PostingsWriter::new(&write_state, PostingsFormatConfig::default())?;
//! writer.set_field(&field);
//! writer.start_term(None);
//! for doc in [3, 8, 21] {
//!     writer.start_doc(doc, 2)?;
//!     writer.finish_doc();
//! }
//! let state = writer.finish_term(TermStats::new(3, 6))?;
//! writer.close()?;
//!
//! let reader = PostingsReader::open(&SegmentReadState::from(&write_state), PostingsFormatConfig::default())?;
//! let Postings::Docs(mut docs) = reader.postings(&field, &state, PostingsFlags::FREQS)? else {
//!     unreachable!()
//! };
//! assert_eq!(docs.advance(5)?, 8);
//! assert_eq!(docs.freq()?, 2);
//! assert_eq!(docs.next_doc()?, 21);
//! assert_eq!(docs.next_doc()?, NO_MORE_DOCS);
//! # Ok(())
//! # }
//! ```

use std::ops::BitOr;
use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::codec::codec_util::ID_LENGTH;
use crate::codec::packed;
use crate::error::Result;
use crate::storage::Storage;

pub mod docs;
pub mod impact;
pub mod multi_level_skip;
pub mod positions;
pub mod reader;
pub mod skip;
pub mod term_state;
pub mod writer;

pub use docs::DocIterator;
pub use impact::{CompetitiveImpactAccumulator, Impact};
pub use positions::{ImpactsIterator, PostingsIterator};
pub use reader::{Postings, PostingsReader};
pub use term_state::IntBlockTermState;
pub use writer::PostingsWriter;

/// Number of postings per packed block and skip interval.
pub const BLOCK_SIZE: usize = packed::BLOCK_SIZE;

/// Maximum number of skip levels.
pub const MAX_SKIP_LEVELS: usize = 10;

/// Codec name of the `.doc` header.
pub const DOC_CODEC: &str = "Lucene90PostingsWriterDoc";

/// Codec name of the `.pos` header.
pub const POS_CODEC: &str = "Lucene90PostingsWriterPos";

/// Codec name of the `.pay` header.
pub const PAY_CODEC: &str = "Lucene90PostingsWriterPay";

/// Codec name of the header written into the terms dictionary.
pub const TERMS_CODEC: &str = "Lucene90PostingsWriterTerms";

/// Oldest readable format version.
pub const VERSION_START: i32 = 0;

/// Format version written.
pub const VERSION_CURRENT: i32 = 0;

/// Extension of the doc file.
pub const DOC_EXTENSION: &str = "doc";

/// Extension of the positions file.
pub const POS_EXTENSION: &str = "pos";

/// Extension of the payloads and offsets file.
pub const PAY_EXTENSION: &str = "pay";

/// Doc id returned once an iterator is exhausted.
pub const NO_MORE_DOCS: u32 = i32::MAX as u32;

/// Largest position accepted by the writer.
pub const MAX_POSITION: u32 = i32::MAX as u32 - 128;

/// What is recorded in the postings of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IndexOptions {
    /// The field is not indexed.
    None,
    /// Doc ids only.
    Docs,
    /// Doc ids and term frequencies.
    DocsAndFreqs,
    /// Doc ids, frequencies and positions.
    DocsAndFreqsAndPositions,
    /// Doc ids, frequencies, positions and character offsets.
    DocsAndFreqsAndPositionsAndOffsets,
}

impl IndexOptions {
    /// Whether the field has postings at all.
    pub fn is_indexed(self) -> bool {
        self != IndexOptions::None
    }

    /// Whether frequencies are recorded.
    pub fn has_freqs(self) -> bool {
        self >= IndexOptions::DocsAndFreqs
    }

    /// Whether positions are recorded.
    pub fn has_positions(self) -> bool {
        self >= IndexOptions::DocsAndFreqsAndPositions
    }

    /// Whether offsets are recorded.
    pub fn has_offsets(self) -> bool {
        self >= IndexOptions::DocsAndFreqsAndPositionsAndOffsets
    }
}

/// Per-field indexing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Field name.
    pub name: String,
    /// Field number within the segment.
    pub number: u32,
    /// What the postings record.
    pub index_options: IndexOptions,
    /// Whether positions carry payloads.
    pub has_payloads: bool,
    /// Whether the field has norms.
    pub has_norms: bool,
}

impl FieldInfo {
    /// Create a field with norms and without payloads.
    pub fn new<S: Into<String>>(name: S, number: u32, index_options: IndexOptions) -> Self {
        FieldInfo {
            name: name.into(),
            number,
            index_options,
            has_payloads: false,
            has_norms: true,
        }
    }

    /// Set whether positions carry payloads.
    pub fn with_payloads(mut self, has_payloads: bool) -> Self {
        self.has_payloads = has_payloads;
        self
    }

    /// Set whether the field has norms.
    pub fn with_norms(mut self, has_norms: bool) -> Self {
        self.has_norms = has_norms;
        self
    }

    /// Whether payloads are actually stored (payloads need positions).
    pub fn stores_payloads(&self) -> bool {
        self.has_payloads && self.index_options.has_positions()
    }
}

/// The fields of a segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfos {
    fields: Vec<FieldInfo>,
}

impl FieldInfos {
    /// Create from a list of fields.
    pub fn new(fields: Vec<FieldInfo>) -> Self {
        FieldInfos { fields }
    }

    /// Iterate over the fields.
    pub fn iter(&self) -> impl Iterator<Item = &FieldInfo> {
        self.fields.iter()
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether any field records frequencies.
    pub fn has_freqs(&self) -> bool {
        self.fields.iter().any(|f| f.index_options.has_freqs())
    }

    /// Whether any field records positions.
    pub fn has_positions(&self) -> bool {
        self.fields.iter().any(|f| f.index_options.has_positions())
    }

    /// Whether any field stores payloads.
    pub fn has_payloads(&self) -> bool {
        self.fields.iter().any(FieldInfo::stores_payloads)
    }

    /// Whether any field records offsets.
    pub fn has_offsets(&self) -> bool {
        self.fields.iter().any(|f| f.index_options.has_offsets())
    }
}

/// Configuration of the postings format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostingsFormatConfig {
    /// Recompute every file checksum when a reader is opened.
    pub verify_checksums: bool,
    /// Suffix appended to the segment name in file names and headers.
    pub segment_suffix: String,
    /// Store competitive impacts in skip entries.
    pub write_impacts: bool,
}

impl Default for PostingsFormatConfig {
    fn default() -> Self {
        PostingsFormatConfig {
            verify_checksums: true,
            segment_suffix: String::new(),
            write_impacts: true,
        }
    }
}

/// Everything the writer needs to know about the segment being written.
#[derive(Debug, Clone)]
pub struct SegmentWriteState {
    /// Where files are created.
    pub storage: Arc<dyn Storage>,
    /// Segment name, e.g. `_0`.
    pub segment_name: String,
    /// Unique segment id written into every header.
    pub segment_id: [u8; ID_LENGTH],
    /// Fields of the segment.
    pub field_infos: FieldInfos,
}

impl SegmentWriteState {
    /// Create a write state with a freshly generated segment id.
    pub fn new<S: Into<String>>(storage: Arc<dyn Storage>, segment_name: S, field_infos: FieldInfos) -> Self {
        SegmentWriteState {
            storage,
            segment_name: segment_name.into(),
            segment_id: uuid::Uuid::new_v4().into_bytes(),
            field_infos,
        }
    }
}

/// Everything the reader needs to know about the segment being read.
#[derive(Debug, Clone)]
pub struct SegmentReadState {
    /// Where files are read from.
    pub storage: Arc<dyn Storage>,
    /// Segment name, e.g. `_0`.
    pub segment_name: String,
    /// Segment id every header must carry.
    pub segment_id: [u8; ID_LENGTH],
    /// Fields of the segment.
    pub field_infos: FieldInfos,
}

impl From<&SegmentWriteState> for SegmentReadState {
    fn from(state: &SegmentWriteState) -> Self {
        SegmentReadState {
            storage: Arc::clone(&state.storage),
            segment_name: state.segment_name.clone(),
            segment_id: state.segment_id,
            field_infos: state.field_infos.clone(),
        }
    }
}

/// Statistics the terms dictionary keeps for every term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermStats {
    /// Number of documents containing the term.
    pub doc_freq: u32,
    /// Total occurrences; equals `doc_freq` when frequencies are not indexed.
    pub total_term_freq: u64,
}

impl TermStats {
    /// Create term statistics.
    pub fn new(doc_freq: u32, total_term_freq: u64) -> Self {
        TermStats {
            doc_freq,
            total_term_freq,
        }
    }
}

/// Which postings features a caller needs.
///
/// Requesting offsets or payloads implies positions, which imply frequencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PostingsFlags(u8);

impl PostingsFlags {
    /// Doc ids only.
    pub const NONE: PostingsFlags = PostingsFlags(0);
    /// Doc ids and frequencies.
    pub const FREQS: PostingsFlags = PostingsFlags(1 << 3);
    /// Frequencies and positions.
    pub const POSITIONS: PostingsFlags = PostingsFlags(Self::FREQS.0 | 1 << 4);
    /// Positions and offsets.
    pub const OFFSETS: PostingsFlags = PostingsFlags(Self::POSITIONS.0 | 1 << 5);
    /// Positions and payloads.
    pub const PAYLOADS: PostingsFlags = PostingsFlags(Self::POSITIONS.0 | 1 << 6);
    /// Everything.
    pub const ALL: PostingsFlags = PostingsFlags(Self::OFFSETS.0 | Self::PAYLOADS.0);

    /// Whether every bit of `feature` is requested.
    pub fn requests(self, feature: PostingsFlags) -> bool {
        self.0 & feature.0 == feature.0
    }
}

impl BitOr for PostingsFlags {
    type Output = PostingsFlags;

    fn bitor(self, rhs: PostingsFlags) -> PostingsFlags {
        PostingsFlags(self.0 | rhs.0)
    }
}

/// Source of per-document length normalization values.
///
/// Documents without a norm count as norm `1`.
pub trait NormsLookup: Send + Sync {
    /// The norm of `doc`, if it has one.
    fn norm(&self, doc: u32) -> Option<i64>;
}

impl NormsLookup for Vec<i64> {
    fn norm(&self, doc: u32) -> Option<i64> {
        self.get(doc as usize).copied()
    }
}

impl NormsLookup for AHashMap<u32, i64> {
    fn norm(&self, doc: u32) -> Option<i64> {
        self.get(&doc).copied()
    }
}

/// A forward-only iterator over doc ids.
pub trait DocIdIterator: Send + std::fmt::Debug {
    /// The current doc, `None` before the first call to `next_doc`/`advance`.
    fn doc_id(&self) -> Option<u32>;

    /// Move to the next doc, returning [`NO_MORE_DOCS`] when exhausted.
    fn next_doc(&mut self) -> Result<u32>;

    /// Move to the first doc `>= target`, returning [`NO_MORE_DOCS`] when exhausted.
    ///
    /// `target` must be greater than the current doc.
    fn advance(&mut self, target: u32) -> Result<u32>;

    /// Upper bound on the number of docs this iterator yields.
    fn cost(&self) -> u64;
}

/// A doc iterator with per-doc frequencies, positions, offsets and payloads.
pub trait PostingsEnum: DocIdIterator {
    /// Frequency of the term in the current doc (1 when not indexed).
    fn freq(&mut self) -> Result<u32>;

    /// Next position in the current doc; at most `freq()` calls per doc.
    fn next_position(&mut self) -> Result<u32>;

    /// Start offset of the current position, `-1` when offsets are unavailable.
    fn start_offset(&self) -> i32;

    /// End offset of the current position, `-1` when offsets are unavailable.
    fn end_offset(&self) -> i32;

    /// Payload of the current position, if any.
    fn payload(&self) -> Option<&[u8]>;
}

/// Name of a segment file.
pub fn segment_file_name(segment: &str, suffix: &str, extension: &str) -> String {
    if suffix.is_empty() {
        format!("{segment}.{extension}")
    } else {
        format!("{segment}_{suffix}.{extension}")
    }
}
