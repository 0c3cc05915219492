//! Opens the postings files of a segment and hands out iterators.

use log::debug;
use parking_lot::Mutex;

use crate::codec::codec_util::{checksum_entire_file, check_index_header, retrieve_checksum};
use crate::error::{Result, SarissaError};
use crate::postings::docs::DocIterator;
use crate::postings::positions::{ImpactsIterator, PostingsIterator};
use crate::postings::term_state::IntBlockTermState;
use crate::postings::{
    BLOCK_SIZE, DOC_CODEC, DOC_EXTENSION, DocIdIterator, FieldInfo, PAY_CODEC, PAY_EXTENSION,
    POS_CODEC, POS_EXTENSION, PostingsEnum, PostingsFlags, PostingsFormatConfig,
    SegmentReadState, TERMS_CODEC, TermStats, VERSION_CURRENT, VERSION_START, segment_file_name,
};
use crate::storage::structured::{DataInput, IndexInput};

/// The iterator [`PostingsReader::postings`] picked for the requested flags.
#[derive(Debug)]
pub enum Postings {
    /// Docs and frequencies only.
    Docs(DocIterator),
    /// Docs with positions, and payloads or offsets when requested.
    Positions(PostingsIterator),
}

impl DocIdIterator for Postings {
    fn doc_id(&self) -> Option<u32> {
        match self {
            Postings::Docs(docs) => docs.doc_id(),
            Postings::Positions(positions) => positions.doc_id(),
        }
    }

    fn next_doc(&mut self) -> Result<u32> {
        match self {
            Postings::Docs(docs) => docs.next_doc(),
            Postings::Positions(positions) => positions.next_doc(),
        }
    }

    fn advance(&mut self, target: u32) -> Result<u32> {
        match self {
            Postings::Docs(docs) => docs.advance(target),
            Postings::Positions(positions) => positions.advance(target),
        }
    }

    fn cost(&self) -> u64 {
        match self {
            Postings::Docs(docs) => docs.cost(),
            Postings::Positions(positions) => positions.cost(),
        }
    }
}

impl PostingsEnum for Postings {
    fn freq(&mut self) -> Result<u32> {
        match self {
            Postings::Docs(docs) => docs.freq(),
            Postings::Positions(positions) => positions.freq(),
        }
    }

    fn next_position(&mut self) -> Result<u32> {
        match self {
            Postings::Docs(docs) => docs.next_position(),
            Postings::Positions(positions) => positions.next_position(),
        }
    }

    fn start_offset(&self) -> i32 {
        match self {
            Postings::Docs(docs) => docs.start_offset(),
            Postings::Positions(positions) => positions.start_offset(),
        }
    }

    fn end_offset(&self) -> i32 {
        match self {
            Postings::Docs(docs) => docs.end_offset(),
            Postings::Positions(positions) => positions.end_offset(),
        }
    }

    fn payload(&self) -> Option<&[u8]> {
        match self {
            Postings::Docs(docs) => docs.payload(),
            Postings::Positions(positions) => positions.payload(),
        }
    }
}

/// Reads the postings of a segment.
///
/// The reader is shared between threads: every iterator works on its own
/// clones of the inputs, and the master inputs are only locked while they
/// are cloned.
#[derive(Debug)]
pub struct PostingsReader {
    doc_in: Mutex<IndexInput>,
    pos_in: Option<Mutex<IndexInput>>,
    pay_in: Option<Mutex<IndexInput>>,
    segment_id: [u8; 16],
    segment_suffix: String,
    version: i32,
}

fn open_input(
    state: &SegmentReadState,
    config: &PostingsFormatConfig,
    extension: &str,
    codec: &str,
) -> Result<(IndexInput, i32)> {
    let name = segment_file_name(&state.segment_name, &config.segment_suffix, extension);
    let mut input = IndexInput::open(state.storage.as_ref(), &name)?;
    let version = check_index_header(
        &mut input,
        codec,
        VERSION_START,
        VERSION_CURRENT,
        &state.segment_id,
        &config.segment_suffix,
    )?;

    let checksum = if config.verify_checksums {
        checksum_entire_file(&input)?
    } else {
        retrieve_checksum(&mut input)?
    };
    debug!(
        "Opened postings file {name} (version={version}, length={}, checksum={checksum:#010x})",
        input.length()
    );
    Ok((input, version))
}

impl PostingsReader {
    /// Open the postings files written for `state`.
    ///
    /// Headers must carry the segment id and suffix. With
    /// [`PostingsFormatConfig::verify_checksums`] every file is checksummed
    /// up front; otherwise only the footers are validated.
    pub fn open(state: &SegmentReadState, config: PostingsFormatConfig) -> Result<Self> {
        let infos = &state.field_infos;
        let (doc_in, version) = open_input(state, &config, DOC_EXTENSION, DOC_CODEC)?;

        let check_version = |input: &IndexInput, found: i32| -> Result<()> {
            if found != version {
                return Err(SarissaError::corrupt(
                    input.name(),
                    format!("format versions mismatch: doc={version}, {}={found}", input.name()),
                ));
            }
            Ok(())
        };

        let pos_in = if infos.has_positions() {
            let (input, found) = open_input(state, &config, POS_EXTENSION, POS_CODEC)?;
            check_version(&input, found)?;
            Some(Mutex::new(input))
        } else {
            None
        };

        let pay_in = if infos.has_positions() && (infos.has_payloads() || infos.has_offsets()) {
            let (input, found) = open_input(state, &config, PAY_EXTENSION, PAY_CODEC)?;
            check_version(&input, found)?;
            Some(Mutex::new(input))
        } else {
            None
        };

        Ok(PostingsReader {
            doc_in: Mutex::new(doc_in),
            pos_in,
            pay_in,
            segment_id: state.segment_id,
            segment_suffix: config.segment_suffix,
            version,
        })
    }

    /// Format version of the files.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Read the postings header the writer put into the terms dictionary.
    pub fn init(&self, terms_in: &mut dyn DataInput) -> Result<()> {
        check_index_header(
            terms_in,
            TERMS_CODEC,
            VERSION_START,
            VERSION_CURRENT,
            &self.segment_id,
            &self.segment_suffix,
        )?;
        let block_size = terms_in.read_vint()?;
        if block_size as usize != BLOCK_SIZE {
            return Err(SarissaError::corrupt(
                terms_in.resource(),
                format!("invalid block size: {block_size} (expected {BLOCK_SIZE})"),
            ));
        }
        Ok(())
    }

    /// Decode the metadata of the next term of `field` into `state`.
    ///
    /// `state` carries the previous term of the block, the base of the
    /// pointer deltas; `absolute` restarts from zero.
    pub fn decode_term(
        &self,
        input: &mut dyn DataInput,
        field: &FieldInfo,
        stats: TermStats,
        state: &mut IntBlockTermState,
        absolute: bool,
    ) -> Result<()> {
        state.doc_freq = stats.doc_freq;
        state.total_term_freq = stats.total_term_freq;
        if absolute {
            state.reset_pointers();
        }
        state.decode(input, field)
    }

    /// Iterate over the postings of a term.
    ///
    /// Positions are only read when `flags` requests them and the field
    /// indexes them. Requesting offsets or payloads from a field that does
    /// not index them is a contract violation.
    pub fn postings(
        &self,
        field: &FieldInfo,
        state: &IntBlockTermState,
        flags: PostingsFlags,
    ) -> Result<Postings> {
        if flags.requests(PostingsFlags::OFFSETS) && !field.index_options.has_offsets() {
            return Err(SarissaError::contract(format!(
                "offsets requested but field {} does not index them",
                field.name
            )));
        }
        if flags.requests(PostingsFlags::PAYLOADS) && !field.stores_payloads() {
            return Err(SarissaError::contract(format!(
                "payloads requested but field {} does not store them",
                field.name
            )));
        }

        let docs = DocIterator::new(self.clone_doc_input(state)?, field, state, false)?;
        if !(flags.requests(PostingsFlags::POSITIONS) && field.index_options.has_positions()) {
            return Ok(Postings::Docs(docs));
        }

        let pos_in = clone_input(self.pos_in.as_ref(), "positions")?;
        let pay_in = if field.stores_payloads() || field.index_options.has_offsets() {
            Some(clone_input(self.pay_in.as_ref(), "payloads")?)
        } else {
            None
        };
        Ok(Postings::Positions(PostingsIterator::new(
            docs, pos_in, pay_in, field, flags,
        )?))
    }

    /// Iterate over the docs of a term together with their impacts.
    pub fn impacts(&self, field: &FieldInfo, state: &IntBlockTermState) -> Result<ImpactsIterator> {
        let docs = DocIterator::new(self.clone_doc_input(state)?, field, state, true)?;
        Ok(ImpactsIterator::new(docs))
    }

    /// Recompute the checksum of every file.
    pub fn check_integrity(&self) -> Result<()> {
        checksum_entire_file(&self.doc_in.lock())?;
        for input in self.pos_in.iter().chain(self.pay_in.iter()) {
            checksum_entire_file(&input.lock())?;
        }
        Ok(())
    }

    /// Bytes read from the `.doc` file so far, by this reader and every
    /// iterator it created.
    pub fn doc_bytes_read(&self) -> u64 {
        self.doc_in.lock().bytes_read()
    }

    fn clone_doc_input(&self, state: &IntBlockTermState) -> Result<Option<IndexInput>> {
        if state.singleton_doc_id.is_some() {
            return Ok(None);
        }
        Ok(Some(self.doc_in.lock().try_clone()?))
    }
}

fn clone_input(input: Option<&Mutex<IndexInput>>, what: &str) -> Result<IndexInput> {
    input
        .ok_or_else(|| {
            SarissaError::invalid_operation(format!("segment has no {what} file"))
        })?
        .lock()
        .try_clone()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::postings::impact::{CompetitiveImpactAccumulator, Impact};
    use crate::postings::writer::PostingsWriter;
    use crate::postings::{
        FieldInfos, IndexOptions, NO_MORE_DOCS, NormsLookup, SegmentWriteState,
    };
    use crate::storage::memory::MemoryStorage;
    use crate::storage::structured::{ByteBuffer, ByteSliceReader, DataOutput};

    #[derive(Debug, Clone, PartialEq)]
    struct Occurrence {
        position: u32,
        payload: Option<Vec<u8>>,
        start_offset: i32,
        end_offset: i32,
    }

    #[derive(Debug, Clone)]
    struct Posting {
        doc: u32,
        freq: u32,
        occurrences: Vec<Occurrence>,
    }

    fn posting(doc: u32, freq: u32) -> Posting {
        Posting {
            doc,
            freq,
            occurrences: Vec::new(),
        }
    }

    fn with_positions(doc: u32, positions: &[u32]) -> Posting {
        Posting {
            doc,
            freq: positions.len() as u32,
            occurrences: positions
                .iter()
                .map(|&position| Occurrence {
                    position,
                    payload: None,
                    start_offset: -1,
                    end_offset: -1,
                })
                .collect(),
        }
    }

    struct Segment {
        storage: Arc<MemoryStorage>,
        read_state: SegmentReadState,
        states: Vec<IntBlockTermState>,
    }

    impl Segment {
        fn reader(&self) -> PostingsReader {
            PostingsReader::open(&self.read_state, PostingsFormatConfig::default()).unwrap()
        }
    }

    fn write_terms(
        field: &FieldInfo,
        terms: &[Vec<Posting>],
        config: PostingsFormatConfig,
        norms: Option<Arc<dyn NormsLookup>>,
    ) -> Segment {
        let storage = Arc::new(MemoryStorage::new_default());
        let write_state = SegmentWriteState::new(
            storage.clone(),
            "_0",
            FieldInfos::new(vec![field.clone()]),
        );
        let mut writer = PostingsWriter::new(&write_state, config).unwrap();
        writer.set_field(field);

        let mut states = Vec::new();
        for postings in terms {
            writer.start_term(norms.clone());
            let mut ttf = 0u64;
            for p in postings {
                writer.start_doc(p.doc, p.freq).unwrap();
                for occ in &p.occurrences {
                    writer
                        .add_position(
                            occ.position,
                            occ.payload.as_deref(),
                            occ.start_offset,
                            occ.end_offset,
                        )
                        .unwrap();
                }
                writer.finish_doc();
                ttf += if field.index_options.has_freqs() { p.freq as u64 } else { 1 };
            }
            let stats = TermStats::new(postings.len() as u32, ttf);
            states.push(writer.finish_term(stats).unwrap());
        }
        writer.close().unwrap();

        Segment {
            storage,
            read_state: SegmentReadState::from(&write_state),
            states,
        }
    }

    fn check_positions(iter: &mut Postings, expected: &Posting, field: &FieldInfo) {
        for occ in &expected.occurrences {
            assert_eq!(iter.next_position().unwrap(), occ.position, "doc {}", expected.doc);
            if field.stores_payloads() {
                let payload = occ.payload.as_deref().filter(|p| !p.is_empty());
                assert_eq!(iter.payload(), payload, "doc {}", expected.doc);
            }
            if field.index_options.has_offsets() {
                assert_eq!(iter.start_offset(), occ.start_offset);
                assert_eq!(iter.end_offset(), occ.end_offset);
            }
        }
    }

    fn all_flags(field: &FieldInfo) -> PostingsFlags {
        let mut flags = PostingsFlags::POSITIONS;
        if field.index_options.has_offsets() {
            flags = flags | PostingsFlags::OFFSETS;
        }
        if field.stores_payloads() {
            flags = flags | PostingsFlags::PAYLOADS;
        }
        flags
    }

    #[test]
    fn test_singleton_doc() {
        let field = FieldInfo::new("id", 0, IndexOptions::Docs);
        let segment = write_terms(
            &field,
            &[vec![posting(42, 1)]],
            PostingsFormatConfig::default(),
            None,
        );
        let state = segment.states[0];
        assert_eq!(state.singleton_doc_id, Some(42));

        let reader = segment.reader();
        let mut iter = reader.postings(&field, &state, PostingsFlags::FREQS).unwrap();
        assert_eq!(iter.doc_id(), None);
        assert_eq!(iter.next_doc().unwrap(), 42);
        assert_eq!(iter.freq().unwrap(), 1);
        assert_eq!(iter.next_doc().unwrap(), NO_MORE_DOCS);
        assert_eq!(iter.doc_id(), Some(NO_MORE_DOCS));
    }

    #[test]
    fn test_short_list_with_freqs() {
        let field = FieldInfo::new("body", 0, IndexOptions::DocsAndFreqs);
        let segment = write_terms(
            &field,
            &[vec![posting(7, 1), posting(11, 3)]],
            PostingsFormatConfig::default(),
            None,
        );
        let state = segment.states[0];
        assert_eq!(state.skip_offset, None);

        let reader = segment.reader();
        let mut iter = reader.postings(&field, &state, PostingsFlags::FREQS).unwrap();
        assert_eq!(iter.cost(), 2);
        assert_eq!(iter.next_doc().unwrap(), 7);
        assert_eq!(iter.freq().unwrap(), 1);
        assert_eq!(iter.next_doc().unwrap(), 11);
        assert_eq!(iter.freq().unwrap(), 3);
        assert_eq!(iter.next_doc().unwrap(), NO_MORE_DOCS);

        let mut iter = reader.postings(&field, &state, PostingsFlags::NONE).unwrap();
        assert_eq!(iter.advance(8).unwrap(), 11);
        assert_eq!(iter.advance(12).unwrap(), NO_MORE_DOCS);
    }

    #[test]
    fn test_block_and_tail_with_positions() {
        let field = FieldInfo::new("body", 0, IndexOptions::DocsAndFreqsAndPositions);
        let postings: Vec<Posting> = (0..130)
            .map(|i| with_positions(i * 2 + 1, &[i % 5, i % 5 + 3]))
            .collect();
        let segment = write_terms(
            &field,
            &[postings.clone()],
            PostingsFormatConfig::default(),
            None,
        );
        let state = segment.states[0];
        assert_eq!(state.doc_freq, 130);
        assert_eq!(state.total_term_freq, 260);
        assert!(state.skip_offset.is_some());
        assert!(state.last_pos_block_offset.is_some());

        let reader = segment.reader();
        let mut iter = reader.postings(&field, &state, PostingsFlags::POSITIONS).unwrap();
        assert!(matches!(iter, Postings::Positions(_)));
        for expected in &postings {
            assert_eq!(iter.next_doc().unwrap(), expected.doc);
            assert_eq!(iter.freq().unwrap(), 2);
            check_positions(&mut iter, expected, &field);
        }
        assert_eq!(iter.next_doc().unwrap(), NO_MORE_DOCS);

        // Jump into the tail, past the only skip entry.
        let mut iter = reader.postings(&field, &state, PostingsFlags::POSITIONS).unwrap();
        assert_eq!(iter.advance(postings[129].doc).unwrap(), postings[129].doc);
        check_positions(&mut iter, &postings[129], &field);

        // Positions of docs that were never read are skipped.
        let mut iter = reader.postings(&field, &state, PostingsFlags::POSITIONS).unwrap();
        assert_eq!(iter.next_doc().unwrap(), postings[0].doc);
        assert_eq!(iter.advance(postings[70].doc).unwrap(), postings[70].doc);
        check_positions(&mut iter, &postings[70], &field);
        assert_eq!(iter.next_doc().unwrap(), postings[71].doc);
        assert_eq!(iter.next_position().unwrap(), postings[71].occurrences[0].position);
        assert_eq!(iter.next_doc().unwrap(), postings[72].doc);
        check_positions(&mut iter, &postings[72], &field);
    }

    #[test]
    fn test_payload_on_first_position() {
        let field = FieldInfo::new("body", 0, IndexOptions::DocsAndFreqsAndPositions)
            .with_payloads(true);
        let mut doc = with_positions(3, &[4, 9, 13]);
        doc.occurrences[0].payload = Some(vec![0xAB, 0xCD]);
        let postings = vec![doc, with_positions(5, &[1])];
        let segment = write_terms(
            &field,
            &[postings.clone()],
            PostingsFormatConfig::default(),
            None,
        );
        let state = segment.states[0];
        let reader = segment.reader();

        let mut iter = reader.postings(&field, &state, PostingsFlags::PAYLOADS).unwrap();
        assert_eq!(iter.next_doc().unwrap(), 3);
        assert_eq!(iter.next_position().unwrap(), 4);
        assert_eq!(iter.payload(), Some(&[0xAB, 0xCD][..]));
        assert_eq!(iter.next_position().unwrap(), 9);
        assert_eq!(iter.payload(), None);
        assert_eq!(iter.next_position().unwrap(), 13);
        assert_eq!(iter.payload(), None);
        assert!(iter.next_position().is_err());
        assert_eq!(iter.next_doc().unwrap(), 5);
        assert_eq!(iter.next_position().unwrap(), 1);

        // Payloads stay hidden unless requested.
        let mut iter = reader.postings(&field, &state, PostingsFlags::POSITIONS).unwrap();
        assert_eq!(iter.next_doc().unwrap(), 3);
        assert_eq!(iter.next_position().unwrap(), 4);
        assert_eq!(iter.payload(), None);
    }

    #[test]
    fn test_advance_reads_few_bytes() {
        let field = FieldInfo::new("body", 0, IndexOptions::DocsAndFreqs);
        let mut rng = StdRng::seed_from_u64(10_000);
        let postings: Vec<Posting> = (0..10_000)
            .map(|i| posting(i * 7 + rng.random_range(0..3), rng.random_range(1..5)))
            .collect();
        let segment = write_terms(
            &field,
            &[postings.clone()],
            PostingsFormatConfig::default(),
            None,
        );
        let state = segment.states[0];
        let reader = segment.reader();

        let before = reader.doc_bytes_read();
        let mut iter = reader.postings(&field, &state, PostingsFlags::FREQS).unwrap();
        let target = postings[9_500].doc;
        assert_eq!(iter.advance(target).unwrap(), target);
        assert_eq!(iter.freq().unwrap(), postings[9_500].freq);
        let advance_bytes = reader.doc_bytes_read() - before;

        let before = reader.doc_bytes_read();
        let mut iter = reader.postings(&field, &state, PostingsFlags::FREQS).unwrap();
        while iter.next_doc().unwrap() < target {}
        let scan_bytes = reader.doc_bytes_read() - before;

        // 128 values of at most 32 bits, for each of the ~3 levels.
        let bound = (BLOCK_SIZE * 32 / 8) as f64 * (10_000f64.ln() / 128f64.ln() + 1.0);
        assert!((advance_bytes as f64) < bound, "{advance_bytes} >= {bound}");
        assert!(advance_bytes < scan_bytes / 2, "{advance_bytes} vs {scan_bytes}");
    }

    #[test]
    fn test_offsets() {
        let field = FieldInfo::new("body", 0, IndexOptions::DocsAndFreqsAndPositionsAndOffsets);
        let occurrences = [(0, 0, 5), (1, 6, 11), (4, 20, 27)];
        let postings = vec![Posting {
            doc: 2,
            freq: 3,
            occurrences: occurrences
                .iter()
                .map(|&(position, start_offset, end_offset)| Occurrence {
                    position,
                    payload: None,
                    start_offset,
                    end_offset,
                })
                .collect(),
        }];
        let segment = write_terms(
            &field,
            &[postings.clone(), postings.clone()],
            PostingsFormatConfig::default(),
            None,
        );
        let reader = segment.reader();

        let mut iter = reader
            .postings(&field, &segment.states[1], PostingsFlags::OFFSETS)
            .unwrap();
        assert_eq!(iter.next_doc().unwrap(), 2);
        check_positions(&mut iter, &postings[0], &field);

        // Offsets are reported as -1 unless requested.
        let mut iter = reader
            .postings(&field, &segment.states[1], PostingsFlags::POSITIONS)
            .unwrap();
        assert_eq!(iter.next_doc().unwrap(), 2);
        assert_eq!(iter.next_position().unwrap(), 0);
        assert_eq!(iter.start_offset(), -1);
        assert_eq!(iter.end_offset(), -1);
    }

    #[test]
    fn test_flags_select_iterator() {
        let field = FieldInfo::new("body", 0, IndexOptions::DocsAndFreqsAndPositions);
        let segment = write_terms(
            &field,
            &[vec![with_positions(1, &[2]), with_positions(4, &[0, 8])]],
            PostingsFormatConfig::default(),
            None,
        );
        let state = segment.states[0];
        let reader = segment.reader();

        let mut docs = reader.postings(&field, &state, PostingsFlags::FREQS).unwrap();
        assert!(matches!(docs, Postings::Docs(_)));
        assert_eq!(docs.next_doc().unwrap(), 1);
        assert!(docs.next_position().is_err());

        let err = reader.postings(&field, &state, PostingsFlags::OFFSETS).unwrap_err();
        assert!(matches!(err, SarissaError::ContractViolation(_)));
        let err = reader.postings(&field, &state, PostingsFlags::PAYLOADS).unwrap_err();
        assert!(matches!(err, SarissaError::ContractViolation(_)));

        // Positions are not read from a field that does not index them.
        let field = FieldInfo::new("body", 0, IndexOptions::DocsAndFreqs);
        let segment = write_terms(
            &field,
            &[vec![posting(1, 2), posting(4, 1)]],
            PostingsFormatConfig::default(),
            None,
        );
        let reader = segment.reader();
        let iter = reader
            .postings(&field, &segment.states[0], PostingsFlags::POSITIONS)
            .unwrap();
        assert!(matches!(iter, Postings::Docs(_)));
    }

    #[test]
    fn test_every_skip_entry_decodes() {
        let field = FieldInfo::new("body", 0, IndexOptions::DocsAndFreqsAndPositions)
            .with_payloads(true);
        let mut rng = StdRng::seed_from_u64(7);
        let mut doc = 0;
        let postings: Vec<Posting> = (0..1_000)
            .map(|_| {
                doc += rng.random_range(1..20);
                let freq = rng.random_range(1..4);
                let mut position = 0;
                let occurrences = (0..freq)
                    .map(|_| {
                        position += rng.random_range(0..10);
                        let len = rng.random_range(0..3);
                        Occurrence {
                            position,
                            payload: Some((0..len).map(|_| rng.random()).collect()),
                            start_offset: -1,
                            end_offset: -1,
                        }
                    })
                    .collect();
                Posting {
                    doc,
                    freq,
                    occurrences,
                }
            })
            .collect();
        let segment = write_terms(
            &field,
            &[postings.clone()],
            PostingsFormatConfig::default(),
            None,
        );
        let state = segment.states[0];
        let reader = segment.reader();

        for block in (0..postings.len()).step_by(BLOCK_SIZE) {
            let expected = &postings[block];
            let mut iter = reader.postings(&field, &state, PostingsFlags::PAYLOADS).unwrap();
            assert_eq!(iter.advance(expected.doc).unwrap(), expected.doc);
            assert_eq!(iter.freq().unwrap(), expected.freq);
            check_positions(&mut iter, expected, &field);
        }
    }

    fn random_postings(rng: &mut StdRng, field: &FieldInfo, df: usize) -> Vec<Posting> {
        let mut doc = rng.random_range(0..5);
        (0..df)
            .map(|i| {
                if i > 0 {
                    doc += rng.random_range(1..40);
                }
                let freq = if field.index_options.has_freqs() {
                    rng.random_range(1..6)
                } else {
                    1
                };
                let mut occurrences = Vec::new();
                if field.index_options.has_positions() {
                    let mut position = 0;
                    let mut offset = 0;
                    for _ in 0..freq {
                        position += rng.random_range(0..50);
                        offset += rng.random_range(0..10);
                        let len = rng.random_range(0..8);
                        let payload = if field.stores_payloads() && rng.random_bool(0.5) {
                            let n = rng.random_range(0..5);
                            Some((0..n).map(|_| rng.random()).collect())
                        } else {
                            None
                        };
                        occurrences.push(Occurrence {
                            position,
                            payload,
                            start_offset: offset,
                            end_offset: offset + len,
                        });
                    }
                }
                Posting {
                    doc,
                    freq,
                    occurrences,
                }
            })
            .collect()
    }

    #[test]
    fn test_random_round_trip() {
        let fields = [
            FieldInfo::new("docs", 0, IndexOptions::Docs),
            FieldInfo::new("freqs", 0, IndexOptions::DocsAndFreqs),
            FieldInfo::new("positions", 0, IndexOptions::DocsAndFreqsAndPositions),
            FieldInfo::new("payloads", 0, IndexOptions::DocsAndFreqsAndPositions)
                .with_payloads(true),
            FieldInfo::new("offsets", 0, IndexOptions::DocsAndFreqsAndPositionsAndOffsets),
            FieldInfo::new("everything", 0, IndexOptions::DocsAndFreqsAndPositionsAndOffsets)
                .with_payloads(true),
        ];
        let mut rng = StdRng::seed_from_u64(0x5EED);

        for field in &fields {
            let terms: Vec<Vec<Posting>> = [1, 2, 127, 128, 129, 256, 700, 2_000]
                .iter()
                .map(|&df| random_postings(&mut rng, field, df))
                .collect();
            let segment = write_terms(field, &terms, PostingsFormatConfig::default(), None);
            let reader = segment.reader();
            let flags = all_flags(field);

            for (postings, state) in terms.iter().zip(&segment.states) {
                let mut iter = reader.postings(field, state, flags).unwrap();
                for expected in postings {
                    assert_eq!(iter.next_doc().unwrap(), expected.doc, "field {}", field.name);
                    assert_eq!(iter.freq().unwrap(), expected.freq);
                    check_positions(&mut iter, expected, field);
                }
                assert_eq!(iter.next_doc().unwrap(), NO_MORE_DOCS);

                // Random advances, reading positions of some docs only.
                let mut iter = reader.postings(field, state, flags).unwrap();
                let mut upto = 0;
                loop {
                    upto += rng.random_range(1..300);
                    if upto >= postings.len() {
                        let last = postings[postings.len() - 1].doc;
                        assert_eq!(iter.advance(last + 1).unwrap(), NO_MORE_DOCS);
                        break;
                    }
                    let expected = &postings[upto];
                    let target = if rng.random_bool(0.5) {
                        expected.doc
                    } else {
                        postings[upto - 1].doc + 1
                    };
                    assert_eq!(iter.advance(target).unwrap(), expected.doc, "field {}", field.name);
                    assert_eq!(iter.freq().unwrap(), expected.freq);
                    if rng.random_bool(0.5) {
                        check_positions(&mut iter, expected, field);
                    }
                }
            }
        }
    }

    fn advance_randomly(
        reader: &PostingsReader,
        field: &FieldInfo,
        state: &IntBlockTermState,
        postings: &[Posting],
        rng: &mut StdRng,
        max_jump: usize,
    ) {
        let mut iter = reader.postings(field, state, all_flags(field)).unwrap();
        let mut upto = 0;
        loop {
            upto += rng.random_range(1..max_jump);
            if upto >= postings.len() {
                let last = postings[postings.len() - 1].doc;
                assert_eq!(iter.advance(last + 1).unwrap(), NO_MORE_DOCS);
                break;
            }
            let expected = &postings[upto];
            let target = if rng.random_bool(0.5) {
                expected.doc
            } else {
                postings[upto - 1].doc + 1
            };
            assert_eq!(iter.advance(target).unwrap(), expected.doc);
            assert_eq!(iter.freq().unwrap(), expected.freq);
            check_positions(&mut iter, expected, field);
        }
    }

    #[test]
    fn test_two_level_skip_with_everything() {
        let field = FieldInfo::new("everything", 0, IndexOptions::DocsAndFreqsAndPositionsAndOffsets)
            .with_payloads(true);
        let mut rng = StdRng::seed_from_u64(20_000);
        let postings = random_postings(&mut rng, &field, 20_000);
        let segment = write_terms(
            &field,
            &[postings.clone()],
            PostingsFormatConfig::default(),
            None,
        );
        let state = segment.states[0];
        assert!(state.skip_offset.is_some());
        let reader = segment.reader();

        let mut impacts = reader.impacts(&field, &state).unwrap();
        impacts.advance_shallow(postings[1].doc).unwrap();
        assert_eq!(impacts.num_levels(), 2);
        assert_eq!(impacts.doc_id_up_to(0), postings[127].doc);
        assert_eq!(impacts.doc_id_up_to(1), postings[16_383].doc);

        // Straight past the only level 1 entry, then within its span.
        let mut iter = reader.postings(&field, &state, PostingsFlags::ALL).unwrap();
        for i in [16_384 + 300, 16_384 + 301, 19_999] {
            assert_eq!(iter.advance(postings[i].doc).unwrap(), postings[i].doc);
            assert_eq!(iter.freq().unwrap(), postings[i].freq);
            check_positions(&mut iter, &postings[i], &field);
        }

        for _ in 0..4 {
            advance_randomly(&reader, &field, &state, &postings, &mut rng, 3_000);
        }
    }

    #[test]
    fn test_two_level_skip_exact_multiple() {
        let field = FieldInfo::new("payloads", 0, IndexOptions::DocsAndFreqsAndPositions)
            .with_payloads(true);
        let mut rng = StdRng::seed_from_u64(32_768);
        let postings = random_postings(&mut rng, &field, 32_768);
        let segment = write_terms(
            &field,
            &[postings.clone()],
            PostingsFormatConfig::default(),
            None,
        );
        let state = segment.states[0];
        let reader = segment.reader();

        let mut iter = reader.postings(&field, &state, all_flags(&field)).unwrap();
        for expected in &postings {
            assert_eq!(iter.next_doc().unwrap(), expected.doc);
            assert_eq!(iter.freq().unwrap(), expected.freq);
            check_positions(&mut iter, expected, &field);
        }
        assert_eq!(iter.next_doc().unwrap(), NO_MORE_DOCS);

        // The last full block has no skip entry of its own.
        let mut iter = reader.postings(&field, &state, all_flags(&field)).unwrap();
        for i in [32_639, 32_640, 32_767] {
            assert_eq!(iter.advance(postings[i].doc).unwrap(), postings[i].doc);
            check_positions(&mut iter, &postings[i], &field);
        }
        assert_eq!(iter.next_doc().unwrap(), NO_MORE_DOCS);

        let mut impacts = reader.impacts(&field, &state).unwrap();
        impacts.advance_shallow(postings[16_500].doc).unwrap();
        assert_eq!(impacts.num_levels(), 1);
        assert_eq!(impacts.doc_id_up_to(0), postings[16_511].doc);

        impacts.advance_shallow(postings[32_700].doc).unwrap();
        assert_eq!(impacts.num_levels(), 1);
        assert_eq!(impacts.doc_id_up_to(0), NO_MORE_DOCS);
        let ttf: u64 = postings.iter().map(|p| p.freq as u64).sum();
        assert_eq!(impacts.impacts(0).unwrap(), vec![Impact::new(ttf as u32, 1)]);

        for _ in 0..4 {
            advance_randomly(&reader, &field, &state, &postings, &mut rng, 4_000);
        }
    }

    #[test]
    fn test_impacts_on_two_levels() {
        let field = FieldInfo::new("body", 0, IndexOptions::DocsAndFreqs);
        let postings: Vec<Posting> = (0..49_229).map(|i| posting(i, i % 99 + 1)).collect();
        let segment = write_terms(
            &field,
            &[postings.clone()],
            PostingsFormatConfig::default(),
            None,
        );
        let state = segment.states[0];
        let reader = segment.reader();

        let mut iter = reader.impacts(&field, &state).unwrap();
        iter.advance_shallow(16_900).unwrap();
        assert_eq!(iter.num_levels(), 2);
        assert_eq!(iter.doc_id_up_to(0), 17_023);
        assert_eq!(iter.doc_id_up_to(1), 32_767);
        assert_eq!(iter.impacts(0).unwrap(), vec![Impact::new(99, 1)]);
        assert_eq!(iter.impacts(1).unwrap(), vec![Impact::new(99, 1)]);

        iter.advance_shallow(40_000).unwrap();
        assert_eq!(iter.num_levels(), 2);
        assert_eq!(iter.doc_id_up_to(0), 40_063);
        assert_eq!(iter.doc_id_up_to(1), 49_151);

        assert_eq!(iter.advance(40_000).unwrap(), 40_000);
        assert_eq!(iter.freq().unwrap(), postings[40_000].freq);
    }

    #[test]
    fn test_term_metadata_round_trip() {
        let field = FieldInfo::new("body", 0, IndexOptions::DocsAndFreqsAndPositions);
        let mut rng = StdRng::seed_from_u64(3);
        let terms: Vec<Vec<Posting>> = [3, 1, 200, 1, 1, 129, 40]
            .iter()
            .map(|&df| random_postings(&mut rng, &field, df))
            .collect();

        let storage = Arc::new(MemoryStorage::new_default());
        let write_state =
            SegmentWriteState::new(storage, "_0", FieldInfos::new(vec![field.clone()]));
        let mut writer =
            PostingsWriter::new(&write_state, PostingsFormatConfig::default()).unwrap();
        let mut terms_out = ByteBuffer::new();
        writer.init(&mut terms_out).unwrap();
        writer.set_field(&field);

        let mut states = Vec::new();
        let mut stats = Vec::new();
        for (i, postings) in terms.iter().enumerate() {
            writer.start_term(None);
            for p in postings {
                writer.start_doc(p.doc, p.freq).unwrap();
                for occ in &p.occurrences {
                    writer.add_position(occ.position, None, -1, -1).unwrap();
                }
                writer.finish_doc();
            }
            let ttf = postings.iter().map(|p| p.freq as u64).sum();
            let term_stats = TermStats::new(postings.len() as u32, ttf);
            let state = writer.finish_term(term_stats).unwrap();
            writer
                .encode_term(&mut terms_out, &field, &state, i == 4)
                .unwrap();
            states.push(state);
            stats.push(term_stats);
        }
        writer.close().unwrap();

        let reader =
            PostingsReader::open(&SegmentReadState::from(&write_state), PostingsFormatConfig::default())
                .unwrap();
        let bytes = terms_out.into_inner();
        let mut terms_in = ByteSliceReader::new(&bytes);
        reader.init(&mut terms_in).unwrap();

        let mut decoded = IntBlockTermState::default();
        for (i, postings) in terms.iter().enumerate() {
            reader
                .decode_term(&mut terms_in, &field, stats[i], &mut decoded, i == 4)
                .unwrap();
            let expected = states[i];
            assert_eq!(decoded.singleton_doc_id, expected.singleton_doc_id);
            assert_eq!(decoded.pos_start_fp, expected.pos_start_fp);
            assert_eq!(decoded.skip_offset, expected.skip_offset);
            assert_eq!(decoded.last_pos_block_offset, expected.last_pos_block_offset);
            if expected.singleton_doc_id.is_none() {
                assert_eq!(decoded.doc_start_fp, expected.doc_start_fp);
            }

            let mut iter = reader.postings(&field, &decoded, PostingsFlags::POSITIONS).unwrap();
            for p in postings {
                assert_eq!(iter.next_doc().unwrap(), p.doc);
                check_positions(&mut iter, p, &field);
            }
            assert_eq!(iter.next_doc().unwrap(), NO_MORE_DOCS);
        }
        assert!(terms_in.eof());
    }

    #[test]
    fn test_terms_header_block_size_checked() {
        let field = FieldInfo::new("body", 0, IndexOptions::Docs);
        let segment = write_terms(&field, &[], PostingsFormatConfig::default(), None);
        let reader = segment.reader();

        let mut terms_out = ByteBuffer::new();
        crate::codec::codec_util::write_index_header(
            &mut terms_out,
            TERMS_CODEC,
            VERSION_CURRENT,
            &segment.read_state.segment_id,
            "",
        )
        .unwrap();
        terms_out.write_vint(64).unwrap();
        let bytes = terms_out.into_inner();
        let err = reader.init(&mut ByteSliceReader::new(&bytes)).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_corruption_detected() {
        let field = FieldInfo::new("body", 0, IndexOptions::DocsAndFreqs);
        let postings: Vec<Posting> = (0..300).map(|i| posting(i * 3, i % 4 + 1)).collect();
        let segment = write_terms(&field, &[postings], PostingsFormatConfig::default(), None);
        segment.reader().check_integrity().unwrap();

        let mut bytes = segment.storage.read_all("_0.doc").unwrap();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0x01;
        segment.storage.overwrite("_0.doc", bytes.clone()).unwrap();

        let err = PostingsReader::open(&segment.read_state, PostingsFormatConfig::default())
            .unwrap_err();
        assert!(err.is_corruption(), "{err}");

        // Without verification only the footer is checked at open.
        let config = PostingsFormatConfig {
            verify_checksums: false,
            ..Default::default()
        };
        let reader = PostingsReader::open(&segment.read_state, config).unwrap();
        assert!(reader.check_integrity().unwrap_err().is_corruption());

        bytes.truncate(bytes.len() - 4);
        segment.storage.overwrite("_0.doc", bytes).unwrap();
        let config = PostingsFormatConfig {
            verify_checksums: false,
            ..Default::default()
        };
        let err = PostingsReader::open(&segment.read_state, config).unwrap_err();
        assert!(err.is_corruption(), "{err}");
    }

    #[test]
    fn test_wrong_segment_rejected() {
        let field = FieldInfo::new("body", 0, IndexOptions::Docs);
        let segment = write_terms(&field, &[vec![posting(1, 1)]], PostingsFormatConfig::default(), None);

        let mut read_state = segment.read_state.clone();
        read_state.segment_id[0] ^= 0xFF;
        let err = PostingsReader::open(&read_state, PostingsFormatConfig::default()).unwrap_err();
        assert!(err.is_corruption());

        let config = PostingsFormatConfig {
            segment_suffix: "other".to_string(),
            ..Default::default()
        };
        assert!(PostingsReader::open(&segment.read_state, config).is_err());
    }

    #[test]
    fn test_impacts() {
        let field = FieldInfo::new("body", 0, IndexOptions::DocsAndFreqs);
        let postings: Vec<Posting> = (0..300).map(|i| posting(i + 1, i % 7 + 1)).collect();
        let norms: Vec<i64> = (0..=300).map(|doc| (doc % 5) as i64 + 1).collect();
        let segment = write_terms(
            &field,
            &[postings.clone()],
            PostingsFormatConfig::default(),
            Some(Arc::new(norms.clone())),
        );
        let state = segment.states[0];
        let reader = segment.reader();

        let block_impacts = |block: &[Posting]| {
            let mut acc = CompetitiveImpactAccumulator::new();
            for p in block {
                acc.add(p.freq, norms[p.doc as usize]);
            }
            acc.competitive_set()
        };

        let mut iter = reader.impacts(&field, &state).unwrap();
        iter.advance_shallow(1).unwrap();
        assert_eq!(iter.num_levels(), 1);
        assert_eq!(iter.doc_id_up_to(0), postings[127].doc);
        assert_eq!(iter.impacts(0).unwrap(), block_impacts(&postings[..128]));

        iter.advance_shallow(postings[130].doc).unwrap();
        assert_eq!(iter.doc_id_up_to(0), postings[255].doc);
        assert_eq!(iter.impacts(0).unwrap(), block_impacts(&postings[128..256]));

        // Moving the skip data leaves the docs where they were.
        assert_eq!(iter.doc_id(), None);
        assert_eq!(iter.advance(postings[200].doc).unwrap(), postings[200].doc);
        assert_eq!(iter.freq().unwrap(), postings[200].freq);

        // The tail block has no skip entry.
        iter.advance_shallow(postings[260].doc).unwrap();
        assert_eq!(iter.doc_id_up_to(0), NO_MORE_DOCS);
        let ttf: u64 = postings.iter().map(|p| p.freq as u64).sum();
        assert_eq!(iter.impacts(0).unwrap(), vec![Impact::new(ttf as u32, 1)]);
        assert_eq!(iter.next_doc().unwrap(), postings[201].doc);
    }

    #[test]
    fn test_impacts_fallback() {
        let field = FieldInfo::new("body", 0, IndexOptions::DocsAndFreqs);
        let short: Vec<Posting> = (0..10).map(|i| posting(i, 2)).collect();
        let long: Vec<Posting> = (0..200).map(|i| posting(i, 1)).collect();
        let config = PostingsFormatConfig {
            write_impacts: false,
            ..Default::default()
        };
        let segment = write_terms(&field, &[short, long.clone()], config, None);
        let reader = segment.reader();

        // No skip data at all.
        let mut iter = reader.impacts(&field, &segment.states[0]).unwrap();
        iter.advance_shallow(3).unwrap();
        assert_eq!(iter.num_levels(), 1);
        assert_eq!(iter.doc_id_up_to(0), NO_MORE_DOCS);
        assert_eq!(iter.impacts(0).unwrap(), vec![Impact::new(20, 1)]);

        // Skip data without impacts.
        let mut iter = reader.impacts(&field, &segment.states[1]).unwrap();
        iter.advance_shallow(5).unwrap();
        assert_eq!(iter.doc_id_up_to(0), long[127].doc);
        assert_eq!(iter.impacts(0).unwrap(), vec![Impact::new(200, 1)]);
        assert_eq!(iter.advance(150).unwrap(), 150);
    }

    #[test]
    fn test_reader_is_shared_across_threads() {
        let field = FieldInfo::new("body", 0, IndexOptions::DocsAndFreqsAndPositions);
        let mut rng = StdRng::seed_from_u64(99);
        let postings = random_postings(&mut rng, &field, 500);
        let segment = write_terms(
            &field,
            &[postings.clone()],
            PostingsFormatConfig::default(),
            None,
        );
        let reader = Arc::new(segment.reader());
        let state = segment.states[0];

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let reader = Arc::clone(&reader);
                let field = field.clone();
                let postings = postings.clone();
                std::thread::spawn(move || {
                    let mut iter = reader.postings(&field, &state, PostingsFlags::POSITIONS).unwrap();
                    for expected in postings.iter().skip(t) {
                        assert_eq!(iter.advance(expected.doc).unwrap(), expected.doc);
                        check_positions(&mut iter, expected, &field);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
