//! In-memory storage.
//!
//! A finished file is an immutable `Arc<[u8]>`; inputs are cursors over it.
//! Outputs write into a private buffer and publish it when they are closed or
//! dropped, so a reader never observes a half-written file.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{Storage, StorageError, StorageInput, StorageOutput};

/// Configuration for [`MemoryStorage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStorageConfig {
    /// Number of files to reserve room for.
    pub initial_capacity: usize,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        MemoryStorageConfig {
            initial_capacity: 16,
        }
    }
}

type Files = Arc<Mutex<AHashMap<String, Arc<[u8]>>>>;

/// Files held in memory.
#[derive(Debug)]
pub struct MemoryStorage {
    files: Files,
    closed: bool,
}

impl MemoryStorage {
    pub fn new(config: MemoryStorageConfig) -> Self {
        MemoryStorage {
            files: Arc::new(Mutex::new(AHashMap::with_capacity(config.initial_capacity))),
            closed: false,
        }
    }

    pub fn new_default() -> Self {
        Self::new(MemoryStorageConfig::default())
    }

    fn get(&self, name: &str) -> Result<Arc<[u8]>> {
        if self.closed {
            return Err(StorageError::StorageClosed.into());
        }
        let files = self.files.lock();
        let bytes = files
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;
        Ok(Arc::clone(bytes))
    }

    /// Copy of the bytes of `name`.
    pub fn read_all(&self, name: &str) -> Result<Vec<u8>> {
        Ok(self.get(name)?.to_vec())
    }

    /// Swap the bytes of an existing file, e.g. to damage it on purpose.
    ///
    /// Inputs opened earlier keep reading the old bytes.
    pub fn overwrite(&self, name: &str, bytes: Vec<u8>) -> Result<()> {
        self.get(name)?;
        self.files.lock().insert(name.to_string(), bytes.into());
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        Ok(Box::new(MemoryInput(Cursor::new(self.get(name)?))))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        if self.closed {
            return Err(StorageError::StorageClosed.into());
        }
        Ok(Box::new(MemoryOutput {
            name: name.to_string(),
            bytes: Vec::new(),
            files: Some(Arc::clone(&self.files)),
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        Ok(self.get(name)?.len() as u64)
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// A cursor over a finished in-memory file.
#[derive(Debug)]
pub struct MemoryInput(Cursor<Arc<[u8]>>);

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Seek for MemoryInput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> Result<u64> {
        Ok(self.0.get_ref().len() as u64)
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        Ok(Box::new(MemoryInput(Cursor::new(Arc::clone(self.0.get_ref())))))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Buffers a file until it is published.
#[derive(Debug)]
pub struct MemoryOutput {
    name: String,
    bytes: Vec<u8>,
    /// `None` once the file has been published.
    files: Option<Files>,
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.files.is_none() {
            return Err(io::Error::other(format!("{} is already closed", self.name)));
        }
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StorageOutput for MemoryOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn position(&self) -> Result<u64> {
        Ok(self.bytes.len() as u64)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(files) = self.files.take() {
            let bytes: Arc<[u8]> = std::mem::take(&mut self.bytes).into();
            files.lock().insert(self.name.clone(), bytes);
        }
        Ok(())
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
