//! API types for scatterfs client operations

use crate::data::{ChunkingError, PlacementError};
use crate::metadata::Metadata;
use crate::rpc::RpcError;

/// File attributes as stored on the metadata host
pub type FileAttributes = Metadata;

/// Cluster capacity summed over every host, in chunk units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FsStat {
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub free_chunks: u64,
}

impl FsStat {
    pub fn total_bytes(&self) -> u64 {
        self.total_chunks.saturating_mul(self.chunk_size)
    }

    pub fn free_bytes(&self) -> u64 {
        self.free_chunks.saturating_mul(self.chunk_size)
    }
}

/// API errors
///
/// Every variant maps to a positive POSIX errno through [`ApiError::errno`].
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A host answered with a non-zero status
    #[error("{context}: errno {errno}")]
    Status { errno: i32, context: String },

    /// A scatter-gather call failed on at least one host
    ///
    /// `transferred` counts the bytes the other hosts completed; they are not
    /// rolled back.
    #[error("Scatter-gather failed with errno {errno} after {transferred} bytes")]
    Scatter { errno: i32, transferred: u64 },

    /// The request never got an answer
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
}

impl ApiError {
    pub(crate) fn status(errno: i32, context: impl Into<String>) -> Self {
        Self::Status {
            errno,
            context: context.into(),
        }
    }

    pub(crate) fn invalid(context: impl Into<String>) -> Self {
        Self::status(libc::EINVAL, context)
    }

    /// POSIX errno (positive)
    pub fn errno(&self) -> i32 {
        match self {
            Self::Status { errno, .. } | Self::Scatter { errno, .. } => *errno,
            Self::Rpc(e) => e.errno(),
        }
    }
}

impl From<ChunkingError> for ApiError {
    fn from(e: ChunkingError) -> Self {
        match e {
            ChunkingError::RangeOverflow { .. } => Self::status(libc::EOVERFLOW, e.to_string()),
            ChunkingError::NotPowerOfTwo(_) => Self::invalid(e.to_string()),
        }
    }
}

impl From<PlacementError> for ApiError {
    fn from(e: PlacementError) -> Self {
        Self::invalid(e.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(ApiError::status(libc::ENOENT, "stat /x").errno(), libc::ENOENT);
        assert_eq!(
            ApiError::Scatter {
                errno: libc::ENOTDIR,
                transferred: 128
            }
            .errno(),
            libc::ENOTDIR
        );
        assert_eq!(ApiError::from(RpcError::UnknownHost(4)).errno(), libc::EHOSTUNREACH);
        assert_eq!(
            ApiError::from(ChunkingError::RangeOverflow { offset: u64::MAX, count: 2 }).errno(),
            libc::EOVERFLOW
        );
    }

    #[test]
    fn test_fs_stat_bytes() {
        let stat = FsStat {
            chunk_size: 4096,
            total_chunks: 10,
            free_chunks: 4,
        };
        assert_eq!(stat.total_bytes(), 40960);
        assert_eq!(stat.free_bytes(), 16384);
    }
}
