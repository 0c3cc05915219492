//! # Sarissa Postings
//!
//! A block-based postings format for the Sarissa search library, compatible
//! with the Lucene 9.0 on-disk layout.
//!
//! ## Features
//!
//! - Packed blocks of 128 doc deltas, frequencies and positions
//! - VInt tails for the remainder of every term
//! - Multi-level skip data with competitive impacts per block
//! - Lazy frequency and position decoding
//! - Checksummed files with segment-bound headers
//! - Pluggable storage backends (file, mmap, memory)

pub mod codec;
pub mod error;
pub mod postings;
pub mod storage;
pub mod util;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
