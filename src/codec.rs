//! Low-level block and file-framing codecs shared by the postings format.

pub mod codec_util;
pub mod packed;
