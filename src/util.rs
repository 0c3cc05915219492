//! Shared utility modules used across the postings codec.

pub mod varint;
