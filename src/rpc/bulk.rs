//! Bulk regions
//!
//! The client exposes its buffer once per call; every target host pulls (write
//! path) or pushes (read path) only the byte ranges of the chunks it owns.
//! Offsets are relative to the start of the exposed region.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use super::RpcError;

#[derive(Clone)]
enum Region {
    /// Source of a write, shared without copying
    ReadOnly(Bytes),

    /// Destination of a read, filled concurrently by the owning hosts
    WriteOnly(Arc<Mutex<Vec<u8>>>),
}

/// Handle to a client memory region
#[derive(Clone)]
pub struct BulkHandle {
    region: Region,
    len: u64,
}

impl fmt::Debug for BulkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.region {
            Region::ReadOnly(_) => "read-only",
            Region::WriteOnly(_) => "write-only",
        };
        f.debug_struct("BulkHandle")
            .field("mode", &mode)
            .field("len", &self.len)
            .finish()
    }
}

impl BulkHandle {
    /// Expose `data` as the source of a write
    pub fn read_only(data: Bytes) -> Self {
        let len = data.len() as u64;
        Self {
            region: Region::ReadOnly(data),
            len,
        }
    }

    /// Expose a zero-filled region of `len` bytes as the destination of a read
    pub fn write_only(len: usize) -> Self {
        Self {
            region: Region::WriteOnly(Arc::new(Mutex::new(vec![0u8; len]))),
            len: len as u64,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check_range(&self, offset: u64, len: u64) -> Result<std::ops::Range<usize>, RpcError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(offset as usize..end as usize),
            _ => Err(RpcError::BulkError(format!(
                "range {}+{} outside region of {} bytes",
                offset, len, self.len
            ))),
        }
    }

    /// Pull `len` bytes at `offset` from a read-only region
    pub fn pull(&self, offset: u64, len: u64) -> Result<Bytes, RpcError> {
        let range = self.check_range(offset, len)?;
        match &self.region {
            Region::ReadOnly(data) => Ok(data.slice(range)),
            Region::WriteOnly(_) => Err(RpcError::BulkError("pull from write-only region".to_string())),
        }
    }

    /// Push `data` to `offset` of a write-only region
    pub fn push(&self, offset: u64, data: &[u8]) -> Result<(), RpcError> {
        let range = self.check_range(offset, data.len() as u64)?;
        match &self.region {
            Region::WriteOnly(buf) => {
                buf.lock()[range].copy_from_slice(data);
                Ok(())
            }
            Region::ReadOnly(_) => Err(RpcError::BulkError("push to read-only region".to_string())),
        }
    }

    /// Copy the current contents of the region into `dst`
    pub fn copy_to(&self, dst: &mut [u8]) -> Result<(), RpcError> {
        let range = self.check_range(0, dst.len() as u64)?;
        match &self.region {
            Region::ReadOnly(data) => dst.copy_from_slice(&data[range]),
            Region::WriteOnly(buf) => dst.copy_from_slice(&buf.lock()[range]),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_slices() {
        let bulk = BulkHandle::read_only(Bytes::from_static(b"0123456789"));
        assert_eq!(bulk.len(), 10);
        assert_eq!(&bulk.pull(2, 3).unwrap()[..], b"234");
        assert_eq!(&bulk.pull(0, 10).unwrap()[..], b"0123456789");
        assert!(bulk.pull(8, 3).is_err());
        assert!(bulk.push(0, b"x").is_err());
    }

    #[test]
    fn test_push_and_copy() {
        let bulk = BulkHandle::write_only(8);
        bulk.push(4, b"abcd").unwrap();
        bulk.clone().push(0, b"zz").unwrap();
        assert!(bulk.push(6, b"abc").is_err());
        assert!(bulk.pull(0, 1).is_err());

        let mut out = [0xffu8; 8];
        bulk.copy_to(&mut out).unwrap();
        assert_eq!(&out, b"zz\0\0abcd");
    }
}
