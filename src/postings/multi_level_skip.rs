//! Generic multi-level skip lists.
//!
//! Level `L` holds one entry per `interval * multiplier^L` postings. Every
//! entry above level 0 ends with a VLong child pointer into the level below,
//! so a search walks down from the highest level whose next entry is still
//! before the target. On disk the levels are written from the top down, each
//! prefixed by its VLong byte length, with level 0 last and unprefixed.
//!
//! What an entry contains is up to the [`SkipEntryWriter`] and
//! [`SkipEntryReader`] implementations.

use log::trace;

use crate::error::{Result, SarissaError};
use crate::postings::NO_MORE_DOCS;
use crate::storage::structured::{ByteBuffer, DataInput, DataOutput, IndexInput, IndexOutput};

/// Writes the payload of a skip entry.
pub trait SkipEntryWriter {
    /// Append the current entry for `level` to `buffer`.
    fn write_skip_data(&mut self, level: usize, buffer: &mut ByteBuffer) -> Result<()>;
}

/// Reads the payload of a skip entry and tracks per-level state.
pub trait SkipEntryReader {
    /// Read the next entry of `level`, returning its doc delta.
    fn read_skip_data(&mut self, level: usize, input: &mut IndexInput) -> Result<u32>;

    /// Remember the current values of `level` as the last skipped entry.
    fn set_last_skip_data(&mut self, level: usize);

    /// Copy the last skipped entry into `level` after descending to it.
    fn seek_child(&mut self, level: usize);
}

fn skip_intervals(interval: u64, multiplier: u64, levels: usize) -> Vec<u64> {
    let mut intervals = Vec::with_capacity(levels);
    let mut current = interval;
    for _ in 0..levels {
        intervals.push(current);
        current = current.saturating_mul(multiplier);
    }
    intervals
}

/// Buffers skip entries per level and writes the pyramid after the postings.
#[derive(Debug)]
pub struct MultiLevelSkipWriter {
    skip_interval: u64,
    skip_multiplier: u64,
    buffers: Vec<ByteBuffer>,
}

impl MultiLevelSkipWriter {
    pub fn new(skip_interval: usize, skip_multiplier: usize, max_levels: usize) -> Self {
        MultiLevelSkipWriter {
            skip_interval: skip_interval as u64,
            skip_multiplier: skip_multiplier as u64,
            buffers: vec![ByteBuffer::new(); max_levels.max(1)],
        }
    }

    /// Number of levels available to entries.
    pub fn num_levels(&self) -> usize {
        self.buffers.len()
    }

    /// Drop every buffered entry.
    pub fn reset(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
    }

    /// Buffer the entry for the posting list prefix of `df` postings.
    ///
    /// `df` must be a multiple of the skip interval.
    pub fn buffer_skip<E: SkipEntryWriter + ?Sized>(&mut self, entry: &mut E, df: u64) -> Result<()> {
        debug_assert_eq!(df % self.skip_interval, 0);

        let mut levels = 1;
        let mut remaining = df / self.skip_interval;
        while remaining % self.skip_multiplier == 0 && levels < self.buffers.len() {
            levels += 1;
            remaining /= self.skip_multiplier;
        }

        let mut child_pointer = 0u64;
        for level in 0..levels {
            let buffer = &mut self.buffers[level];
            entry.write_skip_data(level, buffer)?;
            let new_child_pointer = buffer.len() as u64;
            if level != 0 {
                buffer.write_vlong(child_pointer)?;
            }
            child_pointer = new_child_pointer;
        }
        Ok(())
    }

    /// Write the buffered levels to `out`, returning where they start.
    pub fn write_skip(&self, out: &mut IndexOutput) -> Result<u64> {
        let skip_pointer = out.file_pointer();
        if self.buffers[0].is_empty() {
            return Ok(skip_pointer);
        }

        for level in (1..self.buffers.len()).rev() {
            let buffer = &self.buffers[level];
            if !buffer.is_empty() {
                out.write_vlong(buffer.len() as u64)?;
                buffer.write_to(out)?;
            }
        }
        self.buffers[0].write_to(out)?;

        trace!(
            "Wrote skip data at {skip_pointer} ({} bytes)",
            out.file_pointer() - skip_pointer
        );
        Ok(skip_pointer)
    }
}

/// Reads a skip pyramid written by [`MultiLevelSkipWriter`].
#[derive(Debug)]
pub struct MultiLevelSkipReader<E> {
    entry: E,
    max_levels: usize,
    num_levels: usize,
    doc_count: u64,
    streams: Vec<Option<IndexInput>>,
    skip_pointer: Vec<u64>,
    skip_interval: Vec<u64>,
    skip_multiplier: u64,
    num_skipped: Vec<u64>,
    skip_doc: Vec<u32>,
    child_pointer: Vec<u64>,
    last_doc: u32,
    last_child_pointer: u64,
}

impl<E: SkipEntryReader> MultiLevelSkipReader<E> {
    /// Create a reader over `input`, which is repositioned by [`Self::init`].
    pub fn new(
        input: IndexInput,
        max_levels: usize,
        skip_interval: usize,
        skip_multiplier: usize,
        entry: E,
    ) -> Self {
        let max_levels = max_levels.max(1);
        let mut streams: Vec<Option<IndexInput>> = (0..max_levels).map(|_| None).collect();
        streams[0] = Some(input);

        MultiLevelSkipReader {
            entry,
            max_levels,
            num_levels: 0,
            doc_count: 0,
            streams,
            skip_pointer: vec![0; max_levels],
            skip_interval: skip_intervals(skip_interval as u64, skip_multiplier as u64, max_levels),
            skip_multiplier: skip_multiplier as u64,
            num_skipped: vec![0; max_levels],
            skip_doc: vec![0; max_levels],
            child_pointer: vec![0; max_levels],
            last_doc: 0,
            last_child_pointer: 0,
        }
    }

    /// Position the reader on the skip data at `skip_pointer` of a posting
    /// list of `df` postings.
    pub fn init(&mut self, skip_pointer: u64, df: u64) -> Result<()> {
        self.skip_pointer[0] = skip_pointer;
        self.doc_count = df;
        self.skip_doc.fill(0);
        self.num_skipped.fill(0);
        self.child_pointer.fill(0);
        self.last_doc = 0;
        self.last_child_pointer = 0;
        for stream in self.streams.iter_mut().skip(1) {
            *stream = None;
        }
        self.load_skip_levels()
    }

    fn load_skip_levels(&mut self) -> Result<()> {
        self.num_levels = if self.doc_count <= self.skip_interval[0] {
            1
        } else {
            let mut blocks = self.doc_count / self.skip_interval[0];
            let mut levels = 1;
            while blocks >= self.skip_multiplier {
                blocks /= self.skip_multiplier;
                levels += 1;
            }
            levels
        };
        self.num_levels = self.num_levels.min(self.max_levels);

        let skip_pointer = self.skip_pointer[0];
        self.level_stream(0)?.seek(skip_pointer)?;

        for level in (1..self.num_levels).rev() {
            let stream = self.level_stream(0)?;
            let length = stream.read_vlong()?;
            let start = stream.file_pointer();
            let end = match start.checked_add(length) {
                Some(end) => end,
                None => {
                    return Err(SarissaError::corrupt(
                        stream.resource(),
                        format!("invalid skip level length {length}"),
                    ));
                }
            };
            let child = stream.try_clone()?;
            stream.seek(end)?;

            self.streams[level] = Some(child);
            self.skip_pointer[level] = start;
        }

        self.skip_pointer[0] = self.level_stream(0)?.file_pointer();
        trace!(
            "Loaded {} skip levels for {} docs at {}",
            self.num_levels, self.doc_count, self.skip_pointer[0]
        );
        Ok(())
    }

    fn level_stream(&mut self, level: usize) -> Result<&mut IndexInput> {
        self.streams[level]
            .as_mut()
            .ok_or_else(|| SarissaError::invalid_operation(format!("skip level {level} is not loaded")))
    }

    /// Skip entries until the next entry of level 0 is at or after `target`.
    ///
    /// Returns the number of postings covered by the last skipped entry minus
    /// one, or a negative value when nothing was skipped.
    pub fn skip_to(&mut self, target: u32) -> Result<i64> {
        let mut level = 0;
        while level + 1 < self.num_levels && target > self.skip_doc[level + 1] {
            level += 1;
        }

        let mut level = level as isize;
        while level >= 0 {
            let current = level as usize;
            if target > self.skip_doc[current] {
                if !self.load_next_skip(current)? {
                    continue;
                }
            } else {
                if current > 0 {
                    let below = self.level_stream(current - 1)?.file_pointer();
                    if self.last_child_pointer > below {
                        self.seek_child(current - 1)?;
                    }
                }
                level -= 1;
            }
        }

        Ok(self.num_skipped[0] as i64 - self.skip_interval[0] as i64 - 1)
    }

    fn load_next_skip(&mut self, level: usize) -> Result<bool> {
        self.set_last_skip_data(level);

        self.num_skipped[level] = self.num_skipped[level].saturating_add(self.skip_interval[level]);
        if self.num_skipped[level] > self.doc_count {
            self.skip_doc[level] = NO_MORE_DOCS;
            if self.num_levels > level {
                self.num_levels = level;
            }
            return Ok(false);
        }

        let skip_pointer_below = if level > 0 { self.skip_pointer[level - 1] } else { 0 };
        let stream = self.streams[level]
            .as_mut()
            .ok_or_else(|| SarissaError::invalid_operation(format!("skip level {level} is not loaded")))?;

        let delta = self.entry.read_skip_data(level, stream)?;
        let doc = self.skip_doc[level] as u64 + delta as u64;
        if doc >= NO_MORE_DOCS as u64 {
            return Err(SarissaError::corrupt(
                stream.resource(),
                format!("skip entry doc {doc} out of range"),
            ));
        }
        self.skip_doc[level] = doc as u32;

        if level != 0 {
            self.child_pointer[level] = stream.read_vlong()? + skip_pointer_below;
        }
        Ok(true)
    }

    fn set_last_skip_data(&mut self, level: usize) {
        self.last_doc = self.skip_doc[level];
        self.last_child_pointer = self.child_pointer[level];
        self.entry.set_last_skip_data(level);
    }

    fn seek_child(&mut self, level: usize) -> Result<()> {
        let target = self.last_child_pointer;
        self.level_stream(level)?.seek(target)?;
        self.num_skipped[level] =
            self.num_skipped[level + 1].saturating_sub(self.skip_interval[level + 1]);
        self.skip_doc[level] = self.last_doc;
        self.entry.seek_child(level);

        if level > 0 {
            let skip_pointer_below = self.skip_pointer[level - 1];
            self.child_pointer[level] = self.level_stream(level)?.read_vlong()? + skip_pointer_below;
        }
        Ok(())
    }

    /// Number of levels that still have entries ahead.
    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    /// Doc of the next entry of `level`, [`NO_MORE_DOCS`] once exhausted.
    pub fn skip_doc(&self, level: usize) -> u32 {
        self.skip_doc[level]
    }

    /// Doc of the last skipped entry.
    pub fn last_doc(&self) -> u32 {
        self.last_doc
    }

    pub fn entry(&self) -> &E {
        &self.entry
    }

    pub fn entry_mut(&mut self) -> &mut E {
        &mut self.entry
    }
}
