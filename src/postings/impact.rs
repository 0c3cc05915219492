//! Competitive `(freq, norm)` pairs stored in skip entries.

use std::collections::BTreeMap;

use crate::error::{Result, SarissaError};
use crate::storage::structured::{ByteSliceReader, DataInput, DataOutput};

/// Upper bound on the score contribution of the docs behind a skip entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Impact {
    /// Term frequency.
    pub freq: u32,
    /// Length normalization value, compared as unsigned.
    pub norm: i64,
}

impl Impact {
    pub fn new(freq: u32, norm: i64) -> Self {
        Impact { freq, norm }
    }
}

/// Collects the `(freq, norm)` pairs of a range of docs and reduces them to
/// the competitive set.
///
/// A pair is competitive when no other pair has both a higher or equal freq
/// and a lower or equal norm. Norms are ordered as unsigned 64-bit values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompetitiveImpactAccumulator {
    max_freqs: BTreeMap<u64, u32>,
}

impl CompetitiveImpactAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a doc with the given frequency and norm.
    pub fn add(&mut self, freq: u32, norm: i64) {
        let entry = self.max_freqs.entry(norm as u64).or_insert(0);
        if freq > *entry {
            *entry = freq;
        }
    }

    /// Merge every pair of `other` into `self`.
    pub fn add_all(&mut self, other: &CompetitiveImpactAccumulator) {
        for (&norm, &freq) in &other.max_freqs {
            self.add(freq, norm as i64);
        }
    }

    pub fn clear(&mut self) {
        self.max_freqs.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.max_freqs.is_empty()
    }

    /// The competitive pairs, by increasing norm and strictly increasing freq.
    pub fn competitive_set(&self) -> Vec<Impact> {
        let mut impacts = Vec::new();
        let mut max_freq = 0u32;
        for (&norm, &freq) in &self.max_freqs {
            if freq > max_freq {
                max_freq = freq;
                impacts.push(Impact::new(freq, norm as i64));
            }
        }
        impacts
    }
}

/// Write `impacts` as `VInt(freq delta), ZLong(norm delta)` pairs, starting
/// from `(0, 0)`.
pub fn write_impacts(impacts: &[Impact], out: &mut dyn DataOutput) -> Result<()> {
    let mut prev = Impact::new(0, 0);
    for impact in impacts {
        out.write_vint(impact.freq.wrapping_sub(prev.freq))?;
        out.write_zlong(impact.norm.wrapping_sub(prev.norm))?;
        prev = *impact;
    }
    Ok(())
}

/// Decode the pairs written by [`write_impacts`].
pub fn read_impacts(bytes: &[u8]) -> Result<Vec<Impact>> {
    let mut input = ByteSliceReader::new(bytes);
    let mut impacts = Vec::new();
    let mut prev = Impact::new(0, 0);
    while !input.eof() {
        let freq_delta = input.read_vint()?;
        let norm_delta = input.read_zlong()?;
        let freq = prev.freq.checked_add(freq_delta).ok_or_else(|| {
            SarissaError::corrupt(input.resource(), "impact frequency overflow")
        })?;
        let impact = Impact::new(freq, prev.norm.wrapping_add(norm_delta));
        impacts.push(impact);
        prev = impact;
    }
    Ok(impacts)
}
