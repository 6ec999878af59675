//! Host-to-host RPC layer
//!
//! Every RPC is a fixed-layout `#[repr(C)]` request header plus the target
//! path and an optional bulk region; the reply is a fixed-layout response
//! header whose `status` is `0` or a negative errno. Transports only move
//! [`RpcRequest`]/[`RpcReply`] envelopes and never interpret headers.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use zerocopy::{FromBytes, IntoBytes};

use crate::data::HostId;

pub mod bulk;
pub mod data_ops;
pub mod error;
pub mod handlers;
pub mod loopback;
pub mod metadata_ops;

pub use bulk::BulkHandle;
pub use error::{errno, errno_to_status, status_to_errno, RpcError};

/// RPC ID type for identifying different RPC operations
pub type RpcId = u16;

pub trait Serializable:
    zerocopy::FromBytes
    + zerocopy::IntoBytes
    + zerocopy::KnownLayout
    + zerocopy::Immutable
    + std::fmt::Debug
{
}

impl<T> Serializable for T where
    T: zerocopy::FromBytes
        + zerocopy::IntoBytes
        + zerocopy::KnownLayout
        + zerocopy::Immutable
        + std::fmt::Debug
{
}

/// Decode a fixed-layout header from the front of `bytes`
pub fn decode_header<T: Serializable + Sized>(bytes: &[u8]) -> Result<T, RpcError> {
    T::read_from_prefix(bytes)
        .map(|(header, _)| header)
        .map_err(|_| RpcError::InvalidHeader)
}

/// Encode a fixed-layout header
pub fn encode_header<T: Serializable>(header: &T) -> Bytes {
    Bytes::copy_from_slice(header.as_bytes())
}

fn decode_reply<T: Serializable + Sized>(reply: Result<RpcReply, RpcError>) -> Result<T, RpcError> {
    decode_header(&reply?.header)
}

/// Request envelope as seen by a transport
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub rpc_id: RpcId,
    pub header: Bytes,
    pub path: String,
    pub bulk: Option<BulkHandle>,
}

/// Reply envelope as seen by a transport
#[derive(Debug, Clone)]
pub struct RpcReply {
    pub header: Bytes,
}

impl RpcReply {
    pub fn new<T: Serializable>(header: &T) -> Self {
        Self {
            header: encode_header(header),
        }
    }
}

/// Moves request envelopes to hosts and brings replies back
///
/// `call` must not block; the returned future resolves once the target host
/// has answered or the transport gave up.
pub trait Transport: Send + Sync {
    fn call(&self, target: HostId, request: RpcRequest) -> BoxFuture<'static, Result<RpcReply, RpcError>>;

    /// Number of reachable hosts
    fn hosts_size(&self) -> u32;
}

/// Header of RPCs whose only argument is the path
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, zerocopy::FromBytes, zerocopy::IntoBytes, zerocopy::KnownLayout, zerocopy::Immutable)]
pub struct PathOnlyRequestHeader {
    _reserved: u64,
}

/// Response header carrying only a status code
#[repr(C)]
#[derive(Debug, Clone, Copy, zerocopy::FromBytes, zerocopy::IntoBytes, zerocopy::KnownLayout, zerocopy::Immutable)]
pub struct StatusResponseHeader {
    /// Status code (0 = success, negative errno = error)
    pub status: i32,

    /// Padding for alignment
    _padding: [u8; 4],
}

impl StatusResponseHeader {
    pub fn success() -> Self {
        Self::error(errno::SUCCESS)
    }

    pub fn error(status: i32) -> Self {
        Self {
            status,
            _padding: [0; 4],
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

/// Client-side view of one RPC type
pub trait Rpc {
    type RequestHeader: Serializable;

    type ResponseHeader: Serializable + Sized + Send + 'static;

    /// Get the RPC ID for this operation
    fn rpc_id() -> RpcId;

    /// Get the RPC request header
    fn request_header(&self) -> &Self::RequestHeader;

    fn path(&self) -> &str;

    /// Bulk region exposed to the server (if any)
    fn bulk(&self) -> Option<BulkHandle> {
        None
    }

    fn to_request(&self) -> RpcRequest {
        RpcRequest {
            rpc_id: Self::rpc_id(),
            header: encode_header(self.request_header()),
            path: self.path().to_string(),
            bulk: self.bulk(),
        }
    }

    /// Send to `target` and decode the typed response header
    fn call(
        &self,
        transport: &dyn Transport,
        target: HostId,
    ) -> BoxFuture<'static, Result<Self::ResponseHeader, RpcError>> {
        transport
            .call(target, self.to_request())
            .map(decode_reply::<Self::ResponseHeader>)
            .boxed()
    }
}
