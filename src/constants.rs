//! Global constants for scatterfs
//!
//! This module centralizes commonly used constants across the codebase
//! to improve maintainability and reduce duplication.

/// Seed for every placement hash (data and metadata)
///
/// Placement is part of the cluster's on-disk compatibility contract: every
/// host and client of one cluster must hash `(path, chunk id)` identically,
/// otherwise clients would address chunks on hosts that never stored them.
pub const PLACEMENT_HASH_SEED: u64 = 0;

/// Maximum path length for file operations (4KB)
pub const MAX_PATH_LENGTH: usize = 4096;

/// Maximum single transfer size (1GB)
///
/// Upper bound for the byte count of one pwrite/pread call.
pub const MAX_TRANSFER_SIZE: u64 = 1 << 30;

/// Replacement for `/` when a file path is turned into a chunk directory name
pub const CHUNK_DIR_SEPARATOR: char = ':';

/// Name of the directory below `data_dir` that holds all chunk directories
pub const CHUNK_ROOT_DIR: &str = "chunks";

/// Field separator of the persisted metadata record
pub const METADATA_FIELD_SEPARATOR: char = '|';

/// Default file mode for regular files created without an explicit mode
pub const DEFAULT_FILE_MODE: u32 = libc::S_IFREG as u32 | 0o644;
