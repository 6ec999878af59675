use crate::metadata::Metadata;
use crate::rpc::{PathOnlyRequestHeader, Rpc, RpcId, StatusResponseHeader, errno};

/// RPC IDs for metadata operations
pub const RPC_CREATE: RpcId = 20;
pub const RPC_STAT: RpcId = 21;
pub const RPC_REMOVE_METADATA: RpcId = 22;
pub const RPC_UPDATE_SIZE: RpcId = 23;
pub const RPC_DECREASE_SIZE: RpcId = 24;
pub const RPC_UPDATE_METADATA: RpcId = 25;

// ============================================================================
// Wire metadata
// ============================================================================

/// Fixed-layout metadata carried in stat/update headers
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, zerocopy::FromBytes, zerocopy::IntoBytes, zerocopy::KnownLayout, zerocopy::Immutable)]
pub struct WireMetadata {
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub link_count: u64,
    pub blocks: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    _padding: [u8; 4],
}

impl From<&Metadata> for WireMetadata {
    fn from(md: &Metadata) -> Self {
        Self {
            size: md.size,
            atime: md.atime,
            mtime: md.mtime,
            ctime: md.ctime,
            link_count: md.link_count,
            blocks: md.blocks,
            mode: md.mode,
            uid: md.uid,
            gid: md.gid,
            _padding: [0; 4],
        }
    }
}

impl From<&WireMetadata> for Metadata {
    fn from(wire: &WireMetadata) -> Self {
        Self {
            mode: wire.mode,
            size: wire.size,
            atime: wire.atime,
            mtime: wire.mtime,
            ctime: wire.ctime,
            uid: wire.uid,
            gid: wire.gid,
            link_count: wire.link_count,
            blocks: wire.blocks,
        }
    }
}

/// Response header carrying a full metadata record
#[repr(C)]
#[derive(Debug, Clone, Copy, zerocopy::FromBytes, zerocopy::IntoBytes, zerocopy::KnownLayout, zerocopy::Immutable)]
pub struct MetadataResponseHeader {
    pub metadata: WireMetadata,

    /// Status code (0 = success, negative errno = error)
    pub status: i32,

    /// Padding for alignment
    _padding: [u8; 4],
}

impl MetadataResponseHeader {
    pub fn success(md: &Metadata) -> Self {
        Self {
            metadata: md.into(),
            status: errno::SUCCESS,
            _padding: [0; 4],
        }
    }

    pub fn error(status: i32) -> Self {
        Self {
            metadata: (&Metadata::default()).into(),
            status,
            _padding: [0; 4],
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    pub fn metadata(&self) -> Metadata {
        (&self.metadata).into()
    }
}

/// Response header carrying the resulting file size
#[repr(C)]
#[derive(Debug, Clone, Copy, zerocopy::FromBytes, zerocopy::IntoBytes, zerocopy::KnownLayout, zerocopy::Immutable)]
pub struct SizeResponseHeader {
    /// Absolute file size after the update
    pub size: i64,

    /// Status code (0 = success, negative errno = error)
    pub status: i32,

    /// Padding for alignment
    _padding: [u8; 4],
}

impl SizeResponseHeader {
    pub fn success(size: u64) -> Self {
        Self {
            size: size as i64,
            status: errno::SUCCESS,
            _padding: [0; 4],
        }
    }

    pub fn error(status: i32) -> Self {
        Self {
            size: 0,
            status,
            _padding: [0; 4],
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

// ============================================================================
// Create RPC
// ============================================================================

/// Create request header
#[repr(C)]
#[derive(Debug, Clone, Copy, zerocopy::FromBytes, zerocopy::IntoBytes, zerocopy::KnownLayout, zerocopy::Immutable)]
pub struct CreateRequestHeader {
    pub mode: u32,

    /// Padding for alignment
    _padding: [u8; 4],
}

/// Create RPC request
pub struct CreateRequest {
    header: CreateRequestHeader,
    path: String,
}

impl CreateRequest {
    pub fn new(path: &str, mode: u32) -> Self {
        Self {
            header: CreateRequestHeader {
                mode,
                _padding: [0; 4],
            },
            path: path.to_string(),
        }
    }
}

impl Rpc for CreateRequest {
    type RequestHeader = CreateRequestHeader;
    type ResponseHeader = StatusResponseHeader;

    fn rpc_id() -> RpcId {
        RPC_CREATE
    }

    fn request_header(&self) -> &Self::RequestHeader {
        &self.header
    }

    fn path(&self) -> &str {
        &self.path
    }
}

// ============================================================================
// Stat RPC
// ============================================================================

/// Stat RPC request
pub struct StatRequest {
    header: PathOnlyRequestHeader,
    path: String,
}

impl StatRequest {
    pub fn new(path: &str) -> Self {
        Self {
            header: PathOnlyRequestHeader::default(),
            path: path.to_string(),
        }
    }
}

impl Rpc for StatRequest {
    type RequestHeader = PathOnlyRequestHeader;
    type ResponseHeader = MetadataResponseHeader;

    fn rpc_id() -> RpcId {
        RPC_STAT
    }

    fn request_header(&self) -> &Self::RequestHeader {
        &self.header
    }

    fn path(&self) -> &str {
        &self.path
    }
}

// ============================================================================
// RemoveMetadata RPC
// ============================================================================

/// RemoveMetadata RPC request
///
/// Broadcast to every host; hosts without the record answer success.
pub struct RemoveMetadataRequest {
    header: PathOnlyRequestHeader,
    path: String,
}

impl RemoveMetadataRequest {
    pub fn new(path: &str) -> Self {
        Self {
            header: PathOnlyRequestHeader::default(),
            path: path.to_string(),
        }
    }
}

impl Rpc for RemoveMetadataRequest {
    type RequestHeader = PathOnlyRequestHeader;
    type ResponseHeader = StatusResponseHeader;

    fn rpc_id() -> RpcId {
        RPC_REMOVE_METADATA
    }

    fn request_header(&self) -> &Self::RequestHeader {
        &self.header
    }

    fn path(&self) -> &str {
        &self.path
    }
}

// ============================================================================
// UpdateSize RPC
// ============================================================================

/// UpdateSize request header
#[repr(C)]
#[derive(Debug, Clone, Copy, zerocopy::FromBytes, zerocopy::IntoBytes, zerocopy::KnownLayout, zerocopy::Immutable)]
pub struct UpdateSizeRequestHeader {
    /// Bytes written
    pub count: u64,

    /// Write offset (ignored for appends)
    pub offset: u64,

    /// 1 = append, 0 = positional write
    pub append: u8,

    /// Padding for alignment
    _padding: [u8; 7],
}

/// UpdateSize RPC request
pub struct UpdateSizeRequest {
    header: UpdateSizeRequestHeader,
    path: String,
}

impl UpdateSizeRequest {
    pub fn new(path: &str, count: u64, offset: u64, append: bool) -> Self {
        Self {
            header: UpdateSizeRequestHeader {
                count,
                offset,
                append: append as u8,
                _padding: [0; 7],
            },
            path: path.to_string(),
        }
    }
}

impl Rpc for UpdateSizeRequest {
    type RequestHeader = UpdateSizeRequestHeader;
    type ResponseHeader = SizeResponseHeader;

    fn rpc_id() -> RpcId {
        RPC_UPDATE_SIZE
    }

    fn request_header(&self) -> &Self::RequestHeader {
        &self.header
    }

    fn path(&self) -> &str {
        &self.path
    }
}

// ============================================================================
// DecreaseSize RPC
// ============================================================================

/// DecreaseSize request header
#[repr(C)]
#[derive(Debug, Clone, Copy, zerocopy::FromBytes, zerocopy::IntoBytes, zerocopy::KnownLayout, zerocopy::Immutable)]
pub struct DecreaseSizeRequestHeader {
    /// New file size
    pub size: u64,
}

/// DecreaseSize RPC request
pub struct DecreaseSizeRequest {
    header: DecreaseSizeRequestHeader,
    path: String,
}

impl DecreaseSizeRequest {
    pub fn new(path: &str, size: u64) -> Self {
        Self {
            header: DecreaseSizeRequestHeader { size },
            path: path.to_string(),
        }
    }
}

impl Rpc for DecreaseSizeRequest {
    type RequestHeader = DecreaseSizeRequestHeader;
    type ResponseHeader = SizeResponseHeader;

    fn rpc_id() -> RpcId {
        RPC_DECREASE_SIZE
    }

    fn request_header(&self) -> &Self::RequestHeader {
        &self.header
    }

    fn path(&self) -> &str {
        &self.path
    }
}

// ============================================================================
// UpdateMetadata RPC
// ============================================================================

/// UpdateMetadata RPC request
///
/// Replaces every attribute except the size.
pub struct UpdateMetadataRequest {
    header: WireMetadata,
    path: String,
}

impl UpdateMetadataRequest {
    pub fn new(path: &str, md: &Metadata) -> Self {
        Self {
            header: md.into(),
            path: path.to_string(),
        }
    }
}

impl Rpc for UpdateMetadataRequest {
    type RequestHeader = WireMetadata;
    type ResponseHeader = MetadataResponseHeader;

    fn rpc_id() -> RpcId {
        RPC_UPDATE_METADATA
    }

    fn request_header(&self) -> &Self::RequestHeader {
        &self.header
    }

    fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::decode_header;

    #[test]
    fn test_header_sizes() {
        assert_eq!(std::mem::size_of::<WireMetadata>(), 64);
        assert_eq!(std::mem::size_of::<MetadataResponseHeader>(), 72);
        assert_eq!(std::mem::size_of::<UpdateSizeRequestHeader>(), 24);
    }

    #[test]
    fn test_wire_metadata_conversion() {
        let md = Metadata {
            mode: 0o100644,
            size: 4096,
            atime: 1,
            mtime: 2,
            ctime: 3,
            uid: 1000,
            gid: 100,
            link_count: 1,
            blocks: 8,
        };
        let response = MetadataResponseHeader::success(&md);
        assert!(response.is_success());
        assert_eq!(response.metadata(), md);
    }

    #[test]
    fn test_update_size_envelope() {
        let request = UpdateSizeRequest::new("/f", 100, 20, true).to_request();
        assert_eq!(request.rpc_id, RPC_UPDATE_SIZE);
        assert!(request.bulk.is_none());

        let header: UpdateSizeRequestHeader = decode_header(&request.header).unwrap();
        assert_eq!((header.count, header.offset, header.append), (100, 20, 1));
    }
}
