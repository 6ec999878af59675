use crate::data::HostId;
use crate::rpc::RpcId;

/// RPC error types
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Invalid RPC header")]
    InvalidHeader,

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Handler error: {0}")]
    HandlerError(String),

    #[error("Bulk transfer error: {0}")]
    BulkError(String),

    #[error("Unknown host {0}")]
    UnknownHost(HostId),

    #[error("Unknown RPC id {0}")]
    UnknownRpc(RpcId),
}

impl RpcError {
    /// 対応する POSIX errno (正の値)
    pub fn errno(&self) -> i32 {
        match self {
            Self::InvalidHeader | Self::UnknownRpc(_) => libc::EINVAL,
            Self::UnknownHost(_) => libc::EHOSTUNREACH,
            Self::TransportError(_) | Self::HandlerError(_) | Self::BulkError(_) => libc::EBUSY,
        }
    }
}

/// Convert errno to error status code
pub fn errno_to_status(errno: i32) -> i32 {
    -errno.abs()
}

/// Convert status code to errno
pub fn status_to_errno(status: i32) -> i32 {
    (-status).abs()
}

/// Status codes carried in response headers (0 or negative errno)
pub mod errno {
    pub const SUCCESS: i32 = 0;
    pub const ENOENT: i32 = -libc::ENOENT;
    pub const EIO: i32 = -libc::EIO;
    pub const EBUSY: i32 = -libc::EBUSY;
    pub const EEXIST: i32 = -libc::EEXIST;
    pub const ENOTDIR: i32 = -libc::ENOTDIR;
    pub const EINVAL: i32 = -libc::EINVAL;
    pub const ENOSPC: i32 = -libc::ENOSPC;
}
