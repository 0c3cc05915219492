//! File-based storage implementation.
//!
//! Segment files live flat in one directory. Inputs are either buffered
//! readers, which reopen the file for every clone, or read-only memory maps
//! shared by all clones.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, trace};
use memmap2::{Mmap, MmapOptions};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SarissaError};
use crate::storage::{Storage, StorageError, StorageInput, StorageOutput};

/// Configuration for [`FileStorage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStorageConfig {
    /// Directory holding the segment files.
    pub path: PathBuf,

    /// Buffer size of buffered inputs and outputs.
    pub buffer_size: usize,

    /// Whether to read files through a memory map.
    pub use_mmap: bool,

    /// Whether to flush after every write.
    pub sync_writes: bool,
}

impl FileStorageConfig {
    /// Create a configuration rooted at `path` with default settings.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileStorageConfig {
            path: path.as_ref().to_path_buf(),
            buffer_size: 64 * 1024,
            use_mmap: false,
            sync_writes: false,
        }
    }
}

fn not_found_or(name: &str, err: io::Error, what: &str) -> SarissaError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::FileNotFound(name.to_string()).into()
    } else {
        SarissaError::storage(format!("{what} {name}: {err}"))
    }
}

/// Stores segment files in a directory.
#[derive(Debug)]
pub struct FileStorage {
    config: FileStorageConfig,
    closed: bool,
}

impl FileStorage {
    /// Open the directory of `config`, creating it when missing.
    pub fn open(config: FileStorageConfig) -> Result<Self> {
        let dir = &config.path;
        std::fs::create_dir_all(dir).map_err(|e| {
            SarissaError::storage(format!("Failed to create directory {}: {e}", dir.display()))
        })?;
        if !dir.is_dir() {
            return Err(SarissaError::storage(format!(
                "Path is not a directory: {}",
                dir.display()
            )));
        }

        debug!("Opened file storage at {} (mmap={})", dir.display(), config.use_mmap);
        Ok(FileStorage {
            config,
            closed: false,
        })
    }

    /// Directory holding the files.
    pub fn directory(&self) -> &Path {
        &self.config.path
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StorageError::StorageClosed.into());
        }
        Ok(())
    }
}

impl Storage for FileStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        self.ensure_open()?;
        let path = self.config.path.join(name);
        let file = File::open(&path).map_err(|e| not_found_or(name, e, "Failed to open"))?;
        let len = file.metadata()?.len();

        // Zero-length maps are rejected on some platforms.
        if self.config.use_mmap && len > 0 {
            // SAFETY: segment files are write-once; nothing truncates them while mapped.
            let mmap = unsafe { MmapOptions::new().map(&file) }
                .map_err(|e| SarissaError::storage(format!("Failed to map {name}: {e}")))?;
            trace!("Mapped {name} ({len} bytes)");
            return Ok(Box::new(MmapInput {
                mmap: Arc::new(mmap),
                position: 0,
            }));
        }

        Ok(Box::new(FileInput {
            reader: BufReader::with_capacity(self.config.buffer_size, file),
            path,
            size: len,
            buffer_size: self.config.buffer_size,
        }))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        self.ensure_open()?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.config.path.join(name))
            .map_err(|e| StorageError::IoError(format!("Failed to create {name}: {e}")))?;

        Ok(Box::new(FileOutput {
            writer: BufWriter::with_capacity(self.config.buffer_size, file),
            sync_writes: self.config.sync_writes,
            position: 0,
            closed: false,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        !self.closed && self.config.path.join(name).is_file()
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        self.ensure_open()?;
        std::fs::metadata(self.config.path.join(name))
            .map(|metadata| metadata.len())
            .map_err(|e| not_found_or(name, e, "Failed to stat"))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// A buffered file input.
///
/// Clones reopen the file so that every cursor has its own OS handle.
#[derive(Debug)]
pub struct FileInput {
    path: PathBuf,
    reader: BufReader<File>,
    size: u64,
    buffer_size: usize,
}

impl Read for FileInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Seek for FileInput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.reader.seek(pos)
    }
}

impl StorageInput for FileInput {
    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        let file = File::open(&self.path)
            .map_err(|e| SarissaError::storage(format!("Failed to reopen {}: {e}", self.path.display())))?;
        Ok(Box::new(FileInput {
            path: self.path.clone(),
            reader: BufReader::with_capacity(self.buffer_size, file),
            size: self.size,
            buffer_size: self.buffer_size,
        }))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A memory-mapped file input.
///
/// Clones share the mapping and only copy the cursor.
#[derive(Debug)]
pub struct MmapInput {
    mmap: Arc<Mmap>,
    position: usize,
}

impl Read for MmapInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data: &[u8] = &self.mmap;
        let rest = data.get(self.position..).unwrap_or_default();
        let n = buf.len().min(rest.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.position += n;
        Ok(n)
    }
}

impl Seek for MmapInput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => (self.mmap.len() as u64).checked_add_signed(delta),
            SeekFrom::Current(delta) => (self.position as u64).checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before the start of the map")
        })?;
        self.position = target as usize;
        Ok(target)
    }
}

impl StorageInput for MmapInput {
    fn size(&self) -> Result<u64> {
        Ok(self.mmap.len() as u64)
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        Ok(Box::new(MmapInput {
            mmap: Arc::clone(&self.mmap),
            position: 0,
        }))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A buffered file output.
#[derive(Debug)]
pub struct FileOutput {
    writer: BufWriter<File>,
    sync_writes: bool,
    position: u64,
    closed: bool,
}

impl Write for FileOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.writer.write(buf)?;
        self.position += written as u64;
        if self.sync_writes {
            self.writer.flush()?;
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl StorageOutput for FileOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| SarissaError::storage(format!("Failed to flush: {e}")))?;
        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| SarissaError::storage(format!("Failed to sync: {e}")))
    }

    fn position(&self) -> Result<u64> {
        Ok(self.position)
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.flush_and_sync()?;
            self.closed = true;
        }
        Ok(())
    }
}
