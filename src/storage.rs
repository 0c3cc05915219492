//! Byte storage underneath the postings files.
//!
//! The codec sees a flat namespace of write-once files. Each segment writes
//! its `.doc`, `.pos` and `.pay` files exactly once and then opens them for
//! random-access reads, any number of times and from any thread.
//!
//! Two backends are provided:
//!
//! - [`file::FileStorage`] keeps files in a directory and can read them
//!   through a memory map.
//! - [`memory::MemoryStorage`] keeps files in shared buffers. Tests use it.
//!
//! ```
//! use sarissa_postings::storage::{StorageConfig, StorageFactory};
//!
//! # fn main() -> sarissa_postings::error::Result<()> {
//! let storage = StorageFactory::create(StorageConfig::default())?;
//! assert!(!storage.file_exists("_0.doc"));
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Seek, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Result, SarissaError};

pub mod file;
pub mod memory;
pub mod structured;

/// A namespace of write-once files.
///
/// One storage is shared by the writer of a segment and all of its readers.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open `name` for reading. Fails with [`StorageError::FileNotFound`]
    /// when it does not exist.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create `name`, truncating any previous contents.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    fn file_exists(&self, name: &str) -> bool;

    /// Length of `name` in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;

    /// Reject every further operation.
    fn close(&mut self) -> Result<()>;
}

/// A read cursor over one file.
///
/// Clones share the bytes and own their position.
pub trait StorageInput: Read + Seek + Send + std::fmt::Debug {
    /// Length of the file.
    fn size(&self) -> Result<u64>;

    /// A new cursor over the same file, positioned at offset 0.
    fn clone_input(&self) -> Result<Box<dyn StorageInput>>;

    fn close(&mut self) -> Result<()>;
}

/// An append-only writer of one file.
pub trait StorageOutput: Write + Send + std::fmt::Debug {
    /// Push buffered bytes down to the backend and make them durable.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Number of bytes written so far.
    fn position(&self) -> Result<u64>;

    /// Finish the file. Calling it twice is a no-op.
    fn close(&mut self) -> Result<()>;
}

/// Which backend to build, with its settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    File(file::FileStorageConfig),
    Memory(memory::MemoryStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory(Default::default())
    }
}

/// Builds a shared [`Storage`] from a [`StorageConfig`].
pub struct StorageFactory;

impl StorageFactory {
    pub fn create(config: StorageConfig) -> Result<Arc<dyn Storage>> {
        let storage: Arc<dyn Storage> = match config {
            StorageConfig::File(config) => Arc::new(file::FileStorage::open(config)?),
            StorageConfig::Memory(config) => Arc::new(memory::MemoryStorage::new(config)),
        };
        Ok(storage)
    }
}

/// Failures raised by the storage backends.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Storage is closed")]
    StorageClosed,
}

impl From<StorageError> for SarissaError {
    fn from(err: StorageError) -> Self {
        SarissaError::storage(err.to_string())
    }
}
