use crate::rpc::{BulkHandle, PathOnlyRequestHeader, Rpc, RpcId, StatusResponseHeader, errno};

/// RPC IDs for data operations
pub const RPC_WRITE_DATA: RpcId = 10;
pub const RPC_READ_DATA: RpcId = 11;
pub const RPC_TRUNC_DATA: RpcId = 12;
pub const RPC_REMOVE_DATA: RpcId = 13;
pub const RPC_CHUNK_STAT: RpcId = 14;

// ============================================================================
// Shared data headers
// ============================================================================

/// Request header of a per-host read/write sub-request
///
/// Chunk boundaries describe the whole operation, not only this host's slice;
/// the receiving host derives its own chunks and their extents from them.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, zerocopy::FromBytes, zerocopy::IntoBytes, zerocopy::KnownLayout, zerocopy::Immutable)]
pub struct DataRequestHeader {
    /// Offset inside the first chunk of the operation
    pub offset: i64,

    /// Number of chunks this host is responsible for
    pub host_chunks: u64,

    /// Number of distinct chunks of the whole operation
    pub total_chunks: u64,

    /// First chunk id of the whole operation
    pub chunk_start: u64,

    /// Last chunk id of the whole operation (inclusive)
    pub chunk_end: u64,

    /// Bytes this host is responsible for
    pub total_size: u64,
}

/// Response header of a read/write sub-request
#[repr(C)]
#[derive(Debug, Clone, Copy, zerocopy::FromBytes, zerocopy::IntoBytes, zerocopy::KnownLayout, zerocopy::Immutable)]
pub struct IoResponseHeader {
    /// Bytes actually transferred by the successful chunk tasks
    pub io_size: u64,

    /// Status code (0 = success, negative errno = first failing chunk)
    pub status: i32,

    /// Padding for alignment
    _padding: [u8; 4],
}

impl IoResponseHeader {
    pub fn new(io_size: u64, status: i32) -> Self {
        Self {
            io_size,
            status,
            _padding: [0; 4],
        }
    }

    pub fn success(io_size: u64) -> Self {
        Self::new(io_size, errno::SUCCESS)
    }

    pub fn error(status: i32) -> Self {
        Self::new(0, status)
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

// ============================================================================
// WriteData RPC
// ============================================================================

/// WriteData RPC request
///
/// The server pulls its chunks' bytes from `bulk`.
pub struct WriteDataRequest {
    header: DataRequestHeader,
    path: String,
    bulk: BulkHandle,
}

impl WriteDataRequest {
    pub fn new(path: &str, header: DataRequestHeader, bulk: BulkHandle) -> Self {
        Self {
            header,
            path: path.to_string(),
            bulk,
        }
    }
}

impl Rpc for WriteDataRequest {
    type RequestHeader = DataRequestHeader;
    type ResponseHeader = IoResponseHeader;

    fn rpc_id() -> RpcId {
        RPC_WRITE_DATA
    }

    fn request_header(&self) -> &Self::RequestHeader {
        &self.header
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn bulk(&self) -> Option<BulkHandle> {
        Some(self.bulk.clone())
    }
}

// ============================================================================
// ReadData RPC
// ============================================================================

/// ReadData RPC request
///
/// The server pushes its chunks' bytes into `bulk`.
pub struct ReadDataRequest {
    header: DataRequestHeader,
    path: String,
    bulk: BulkHandle,
}

impl ReadDataRequest {
    pub fn new(path: &str, header: DataRequestHeader, bulk: BulkHandle) -> Self {
        Self {
            header,
            path: path.to_string(),
            bulk,
        }
    }
}

impl Rpc for ReadDataRequest {
    type RequestHeader = DataRequestHeader;
    type ResponseHeader = IoResponseHeader;

    fn rpc_id() -> RpcId {
        RPC_READ_DATA
    }

    fn request_header(&self) -> &Self::RequestHeader {
        &self.header
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn bulk(&self) -> Option<BulkHandle> {
        Some(self.bulk.clone())
    }
}

// ============================================================================
// TruncData RPC
// ============================================================================

/// TruncData request header
#[repr(C)]
#[derive(Debug, Clone, Copy, zerocopy::FromBytes, zerocopy::IntoBytes, zerocopy::KnownLayout, zerocopy::Immutable)]
pub struct TruncDataRequestHeader {
    /// New file length in bytes
    pub length: u64,
}

/// TruncData RPC request
pub struct TruncDataRequest {
    header: TruncDataRequestHeader,
    path: String,
}

impl TruncDataRequest {
    pub fn new(path: &str, length: u64) -> Self {
        Self {
            header: TruncDataRequestHeader { length },
            path: path.to_string(),
        }
    }
}

impl Rpc for TruncDataRequest {
    type RequestHeader = TruncDataRequestHeader;
    type ResponseHeader = StatusResponseHeader;

    fn rpc_id() -> RpcId {
        RPC_TRUNC_DATA
    }

    fn request_header(&self) -> &Self::RequestHeader {
        &self.header
    }

    fn path(&self) -> &str {
        &self.path
    }
}

// ============================================================================
// RemoveData RPC
// ============================================================================

/// RemoveData RPC request (drops the whole chunk directory)
pub struct RemoveDataRequest {
    header: PathOnlyRequestHeader,
    path: String,
}

impl RemoveDataRequest {
    pub fn new(path: &str) -> Self {
        Self {
            header: PathOnlyRequestHeader::default(),
            path: path.to_string(),
        }
    }
}

impl Rpc for RemoveDataRequest {
    type RequestHeader = PathOnlyRequestHeader;
    type ResponseHeader = StatusResponseHeader;

    fn rpc_id() -> RpcId {
        RPC_REMOVE_DATA
    }

    fn request_header(&self) -> &Self::RequestHeader {
        &self.header
    }

    fn path(&self) -> &str {
        &self.path
    }
}

// ============================================================================
// ChunkStat RPC
// ============================================================================

/// ChunkStat response header
#[repr(C)]
#[derive(Debug, Clone, Copy, zerocopy::FromBytes, zerocopy::IntoBytes, zerocopy::KnownLayout, zerocopy::Immutable)]
pub struct ChunkStatResponseHeader {
    pub chunk_size: u64,
    pub chunk_total: u64,
    pub chunk_free: u64,

    /// Status code (0 = success, negative errno = error)
    pub status: i32,

    /// Padding for alignment
    _padding: [u8; 4],
}

impl ChunkStatResponseHeader {
    pub fn success(chunk_size: u64, chunk_total: u64, chunk_free: u64) -> Self {
        Self {
            chunk_size,
            chunk_total,
            chunk_free,
            status: errno::SUCCESS,
            _padding: [0; 4],
        }
    }

    pub fn error(status: i32) -> Self {
        Self {
            chunk_size: 0,
            chunk_total: 0,
            chunk_free: 0,
            status,
            _padding: [0; 4],
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

/// ChunkStat RPC request
pub struct ChunkStatRequest {
    header: PathOnlyRequestHeader,
}

impl ChunkStatRequest {
    pub fn new() -> Self {
        Self {
            header: PathOnlyRequestHeader::default(),
        }
    }
}

impl Default for ChunkStatRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl Rpc for ChunkStatRequest {
    type RequestHeader = PathOnlyRequestHeader;
    type ResponseHeader = ChunkStatResponseHeader;

    fn rpc_id() -> RpcId {
        RPC_CHUNK_STAT
    }

    fn request_header(&self) -> &Self::RequestHeader {
        &self.header
    }

    fn path(&self) -> &str {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::decode_header;
    use bytes::Bytes;

    #[test]
    fn test_header_sizes() {
        assert_eq!(std::mem::size_of::<DataRequestHeader>(), 48);
        assert_eq!(std::mem::size_of::<IoResponseHeader>(), 16);
        assert_eq!(std::mem::size_of::<ChunkStatResponseHeader>(), 32);
    }

    #[test]
    fn test_write_request_envelope() {
        let header = DataRequestHeader {
            offset: 10,
            host_chunks: 2,
            total_chunks: 3,
            chunk_start: 0,
            chunk_end: 2,
            total_size: 90,
        };
        let bulk = BulkHandle::read_only(Bytes::from(vec![1u8; 150]));
        let request = WriteDataRequest::new("/a", header, bulk).to_request();

        assert_eq!(request.rpc_id, RPC_WRITE_DATA);
        assert_eq!(request.path, "/a");
        assert_eq!(request.bulk.as_ref().map(|b| b.len()), Some(150));
        assert_eq!(decode_header::<DataRequestHeader>(&request.header).unwrap(), header);
    }

    #[test]
    fn test_response_helpers() {
        assert!(IoResponseHeader::success(5).is_success());
        let partial = IoResponseHeader::new(64, errno::EIO);
        assert!(!partial.is_success());
        assert_eq!(partial.io_size, 64);
        assert!(!ChunkStatResponseHeader::error(errno::EIO).is_success());
    }
}
