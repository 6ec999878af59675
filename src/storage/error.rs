use std::path::PathBuf;

use thiserror::Error;

/// チャンクストレージエラー
#[derive(Error, Debug)]
pub enum ChunkStorageError {
    #[error("{op} failed on {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Short write on {}: wrote {written} of {expected} bytes", path.display())]
    ShortWrite {
        path: PathBuf,
        written: usize,
        expected: usize,
    },

    #[error("Invalid chunk range: offset {offset} + size {size} exceeds chunk size {chunk_size}")]
    InvalidRange {
        offset: u64,
        size: u64,
        chunk_size: u64,
    },

    #[error("File path {0:?} has no chunk directory of its own")]
    InvalidPath(String),

    #[error("Chunk size must be a power of two, got {0}")]
    InvalidChunkSize(u64),

    #[error("Trimming {path} failed for {failures} chunk file(s), first error: {first}")]
    TrimFailed {
        path: String,
        failures: usize,
        #[source]
        first: std::io::Error,
    },

    #[error("I/O task pool is shut down")]
    PoolClosed,
}

impl ChunkStorageError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// 対応する POSIX errno (正の値)
    pub fn errno(&self) -> i32 {
        match self {
            Self::Io { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            Self::TrimFailed { first, .. } => first.raw_os_error().unwrap_or(libc::EIO),
            Self::InvalidRange { .. } | Self::InvalidChunkSize(_) | Self::InvalidPath(_) => {
                libc::EINVAL
            }
            Self::ShortWrite { .. } | Self::PoolClosed => libc::EIO,
        }
    }
}

pub type ChunkStorageResult<T> = Result<T, ChunkStorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        let err = ChunkStorageError::io(
            "open",
            "/tmp/x",
            std::io::Error::from_raw_os_error(libc::ENOSPC),
        );
        assert_eq!(err.errno(), libc::ENOSPC);

        let err = ChunkStorageError::io("open", "/tmp/x", std::io::Error::other("boom"));
        assert_eq!(err.errno(), libc::EIO);

        let err = ChunkStorageError::InvalidRange {
            offset: 10,
            size: 100,
            chunk_size: 64,
        };
        assert_eq!(err.errno(), libc::EINVAL);
        assert_eq!(ChunkStorageError::PoolClosed.errno(), libc::EIO);
    }
}
