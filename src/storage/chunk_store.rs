use std::fs::{DirBuilder, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::{DirBuilderExt, FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use nix::sys::statvfs::statvfs;
use tracing::instrument;

use super::error::{ChunkStorageError, ChunkStorageResult};
use crate::constants::CHUNK_DIR_SEPARATOR;
use crate::data::chunking::is_pow2;

/// Permission bits of chunk files
const CHUNK_FILE_MODE: u32 = 0o640;

/// Permission bits of chunk directories
const CHUNK_DIR_MODE: u32 = 0o750;

/// Capacity of the chunk root expressed in chunk-size units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkStat {
    pub chunk_size: u64,
    pub chunk_total: u64,
    pub chunk_free: u64,
}

/// File-based chunk storage
///
/// Each file gets one directory below the root; each chunk is a plain file
/// named by its decimal chunk id inside that directory.
/// Directory structure: `<root>/<path without leading '/', '/' replaced by ':'>/<chunk_id>`
#[derive(Debug)]
pub struct ChunkStorage {
    /// Base directory for chunk storage
    root: PathBuf,

    /// Chunk size
    chunk_size: u64,
}

impl ChunkStorage {
    /// Create a chunk storage rooted at `root`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(root: P, chunk_size: u64) -> ChunkStorageResult<Self> {
        if !is_pow2(chunk_size) {
            return Err(ChunkStorageError::InvalidChunkSize(chunk_size));
        }

        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| ChunkStorageError::io("mkdir", &root, e))?;

        tracing::info!(
            "Chunk storage initialized at {} (chunk_size={})",
            root.display(),
            chunk_size
        );

        Ok(Self { root, chunk_size })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// File path -> chunk directory name (`/a/b` -> `a:b`)
    pub fn chunk_dir_name(file_path: &str) -> String {
        file_path
            .strip_prefix('/')
            .unwrap_or(file_path)
            .replace('/', &CHUNK_DIR_SEPARATOR.to_string())
    }

    /// Absolute chunk directory for a file
    ///
    /// The directory name must be a single component strictly below the root,
    /// so `/`, `/.` and `/..` are refused with `InvalidPath`.
    pub fn chunk_dir(&self, file_path: &str) -> ChunkStorageResult<PathBuf> {
        let name = Self::chunk_dir_name(file_path);
        if name.is_empty() || name == "." || name == ".." || name.contains('\0') {
            return Err(ChunkStorageError::InvalidPath(file_path.to_string()));
        }
        Ok(self.root.join(name))
    }

    /// Absolute path of one chunk file
    pub fn chunk_path(&self, file_path: &str, chunk_id: u64) -> ChunkStorageResult<PathBuf> {
        Ok(self.chunk_dir(file_path)?.join(chunk_id.to_string()))
    }

    fn check_range(&self, offset: u64, size: u64) -> ChunkStorageResult<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.chunk_size => Ok(()),
            _ => Err(ChunkStorageError::InvalidRange {
                offset,
                size,
                chunk_size: self.chunk_size,
            }),
        }
    }

    /// Create the chunk directory of a file; an existing directory is fine
    #[instrument(level = "trace", name = "init_chunk_space", skip(self))]
    pub fn init_chunk_space(&self, file_path: &str) -> ChunkStorageResult<()> {
        let dir = self.chunk_dir(file_path)?;
        match DirBuilder::new().mode(CHUNK_DIR_MODE).create(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(ChunkStorageError::io("mkdir", dir, e)),
        }
    }

    /// Write `buf` into chunk `chunk_id` at `offset` (intra-chunk)
    ///
    /// A short write is reported as an error.
    #[instrument(level = "trace", name = "write_chunk", skip(self, buf), fields(len = buf.len()))]
    pub fn write_chunk(
        &self,
        file_path: &str,
        chunk_id: u64,
        buf: &[u8],
        offset: u64,
    ) -> ChunkStorageResult<usize> {
        self.check_range(offset, buf.len() as u64)?;

        let chunk_file = self.chunk_path(file_path, chunk_id)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .mode(CHUNK_FILE_MODE)
            .open(&chunk_file)
            .map_err(|e| ChunkStorageError::io("open", &chunk_file, e))?;

        let written = loop {
            match file.write_at(buf, offset) {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                other => break other,
            }
        }
        .map_err(|e| ChunkStorageError::io("pwrite", &chunk_file, e))?;

        if written != buf.len() {
            return Err(ChunkStorageError::ShortWrite {
                path: chunk_file,
                written,
                expected: buf.len(),
            });
        }

        tracing::debug!(
            "Wrote {} bytes to chunk (path={}, chunk_id={}, offset={})",
            written,
            file_path,
            chunk_id,
            offset
        );

        Ok(written)
    }

    /// Read up to `buf.len()` bytes from chunk `chunk_id` at `offset`
    ///
    /// A missing chunk file reads as 0 bytes and EOF ends the read early; the
    /// caller treats the untouched tail of `buf` as zeros.
    #[instrument(level = "trace", name = "read_chunk", skip(self, buf), fields(len = buf.len()))]
    pub fn read_chunk(
        &self,
        file_path: &str,
        chunk_id: u64,
        buf: &mut [u8],
        offset: u64,
    ) -> ChunkStorageResult<usize> {
        self.check_range(offset, buf.len() as u64)?;

        let chunk_file = self.chunk_path(file_path, chunk_id)?;
        let file = match OpenOptions::new().read(true).open(&chunk_file) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::trace!("Chunk {} of {} not present, sparse read", chunk_id, file_path);
                return Ok(0);
            }
            Err(e) => return Err(ChunkStorageError::io("open", chunk_file, e)),
        };

        let mut total = 0usize;
        while total < buf.len() {
            match file.read_at(&mut buf[total..], offset + total as u64) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ChunkStorageError::io("pread", chunk_file, e)),
            }
        }

        tracing::debug!(
            "Read {} bytes from chunk (path={}, chunk_id={}, offset={})",
            total,
            file_path,
            chunk_id,
            offset
        );

        Ok(total)
    }

    /// Remove every chunk file whose id is `>= first_chunk_id`
    ///
    /// All removals are attempted; failures are reported once at the end.
    #[instrument(level = "trace", name = "trim_chunk_space", skip(self))]
    pub fn trim_chunk_space(&self, file_path: &str, first_chunk_id: u64) -> ChunkStorageResult<()> {
        let dir = self.chunk_dir(file_path)?;
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ChunkStorageError::io("readdir", dir, e)),
        };

        let mut failures = 0usize;
        let mut first_error: Option<std::io::Error> = None;
        let mut removed = 0usize;

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    failures += 1;
                    first_error.get_or_insert(e);
                    continue;
                }
            };

            let Some(chunk_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
            else {
                continue;
            };
            if chunk_id < first_chunk_id {
                continue;
            }

            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!("Failed to remove chunk {}: {}", entry.path().display(), e);
                    failures += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        tracing::debug!(
            "Trimmed {} chunk files of {} from chunk {}",
            removed,
            file_path,
            first_chunk_id
        );

        match first_error {
            None => Ok(()),
            Some(first) => Err(ChunkStorageError::TrimFailed {
                path: file_path.to_string(),
                failures,
                first,
            }),
        }
    }

    /// Truncate one chunk file to `length` bytes
    ///
    /// A chunk that was never written has nothing to shorten.
    #[instrument(level = "trace", name = "truncate_chunk_file", skip(self))]
    pub fn truncate_chunk_file(&self, file_path: &str, chunk_id: u64, length: u64) -> ChunkStorageResult<()> {
        self.check_range(0, length)?;

        let chunk_file = self.chunk_path(file_path, chunk_id)?;
        let file = match OpenOptions::new().write(true).open(&chunk_file) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ChunkStorageError::io("open", chunk_file, e)),
        };
        file.set_len(length)
            .map_err(|e| ChunkStorageError::io("truncate", &chunk_file, e))?;

        tracing::debug!(
            "Truncated chunk (path={}, chunk_id={}) to {} bytes",
            file_path,
            chunk_id,
            length
        );
        Ok(())
    }

    /// Remove the whole chunk directory of a file; a missing directory is fine
    #[instrument(level = "trace", name = "destroy_chunk_space", skip(self))]
    pub fn destroy_chunk_space(&self, file_path: &str) -> ChunkStorageResult<()> {
        let dir = self.chunk_dir(file_path)?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!("Destroyed chunk space of {}", file_path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ChunkStorageError::io("rmdir", dir, e)),
        }
    }

    /// Capacity of the storage root in chunk units
    pub fn chunk_stat(&self) -> ChunkStorageResult<ChunkStat> {
        let vfs = statvfs(&self.root)
            .map_err(|errno| ChunkStorageError::io("statvfs", &self.root, std::io::Error::from(errno)))?;

        let block_size = vfs.block_size() as u64;
        Ok(ChunkStat {
            chunk_size: self.chunk_size,
            chunk_total: block_size * vfs.blocks() as u64 / self.chunk_size,
            chunk_free: block_size * vfs.blocks_available() as u64 / self.chunk_size,
        })
    }
}
