//! Scatter-gather orchestration
//!
//! One client read or write becomes one sub-request per host that owns at
//! least one chunk of the byte range. All sub-requests are issued before any
//! is awaited; every one of them is awaited before the call returns.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use tracing::instrument;

use crate::api::types::{ApiError, ApiResult};
use crate::data::{ChunkManager, ChunkSpan, Distributor, HostId};
use crate::rpc::data_ops::{DataRequestHeader, IoResponseHeader, ReadDataRequest, WriteDataRequest};
use crate::rpc::{BulkHandle, Rpc, RpcError, Transport, status_to_errno};

/// Chunks of one operation owned by a single host
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostSlice {
    /// Owned chunk ids, ascending
    pub chunk_ids: Vec<u64>,

    /// Bytes of the operation that fall into these chunks
    pub total_size: u64,
}

/// Placement of one read/write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoPlan {
    pub offset: u64,
    pub count: u64,
    pub span: ChunkSpan,
    pub targets: BTreeMap<HostId, HostSlice>,
}

impl IoPlan {
    /// Sub-request header for one target host
    pub fn header(&self, slice: &HostSlice, chunks: &ChunkManager) -> DataRequestHeader {
        DataRequestHeader {
            offset: chunks.overrun(self.offset) as i64,
            host_chunks: slice.chunk_ids.len() as u64,
            total_chunks: self.span.count(),
            chunk_start: self.span.first,
            chunk_end: self.span.last,
            total_size: slice.total_size,
        }
    }
}

/// Aggregate result of one fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScatterOutcome {
    /// Bytes reported by all hosts
    pub transferred: u64,

    /// Number of sub-requests issued
    pub requests: usize,

    /// First failing host and its errno (positive)
    pub first_error: Option<(HostId, i32)>,
}

impl ScatterOutcome {
    fn record_error(&mut self, host: HostId, errno: i32) {
        if self.first_error.is_none() {
            self.first_error = Some((host, errno));
        }
    }

    pub fn is_success(&self) -> bool {
        self.first_error.is_none()
    }

    /// Bytes transferred, or the first error with the partial count
    pub fn into_result(self) -> ApiResult<u64> {
        match self.first_error {
            None => Ok(self.transferred),
            Some((_, errno)) => Err(ApiError::Scatter {
                errno,
                transferred: self.transferred,
            }),
        }
    }
}

/// Client-side scatter-gather engine
pub struct ScatterGather {
    transport: Arc<dyn Transport>,
    distributor: Arc<Distributor>,
    chunks: ChunkManager,
}

impl ScatterGather {
    pub fn new(transport: Arc<dyn Transport>, distributor: Arc<Distributor>, chunks: ChunkManager) -> Self {
        Self {
            transport,
            distributor,
            chunks,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn distributor(&self) -> &Distributor {
        &self.distributor
    }

    pub fn chunks(&self) -> &ChunkManager {
        &self.chunks
    }

    /// Group the chunks of `[offset, offset + count)` by owning host
    ///
    /// Returns `None` for an empty range.
    pub fn plan(&self, path: &str, offset: u64, count: u64) -> ApiResult<Option<IoPlan>> {
        let Some(span) = self.chunks.span(offset, count)? else {
            return Ok(None);
        };

        let mut targets: BTreeMap<HostId, HostSlice> = BTreeMap::new();
        for chunk_id in span.iter() {
            let host = self.distributor.locate_data(path, chunk_id);
            let slice = targets.entry(host).or_default();
            slice.chunk_ids.push(chunk_id);
            slice.total_size += self.chunks.segment(offset, count, chunk_id).len;
        }

        Ok(Some(IoPlan {
            offset,
            count,
            span,
            targets,
        }))
    }

    /// Write `data` at `offset`; each host pulls its chunks from one shared region
    #[instrument(level = "trace", name = "scatter_write", skip(self, data), fields(len = data.len()))]
    pub async fn write(&self, path: &str, data: Bytes, offset: u64) -> ApiResult<ScatterOutcome> {
        let Some(plan) = self.plan(path, offset, data.len() as u64)? else {
            return Ok(ScatterOutcome::default());
        };

        let bulk = BulkHandle::read_only(data);
        let requests = plan
            .targets
            .iter()
            .map(|(&host, slice)| {
                let header = plan.header(slice, &self.chunks);
                (host, WriteDataRequest::new(path, header, bulk.clone()))
            })
            .collect();

        let outcome = self.gather_io(requests).await;
        tracing::debug!(
            "Scatter write {} @{}: {} bytes over {} hosts, error={:?}",
            path,
            offset,
            outcome.transferred,
            outcome.requests,
            outcome.first_error
        );
        Ok(outcome)
    }

    /// Read `buf.len()` bytes at `offset`; holes stay zero
    #[instrument(level = "trace", name = "scatter_read", skip(self, buf), fields(len = buf.len()))]
    pub async fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> ApiResult<ScatterOutcome> {
        let Some(plan) = self.plan(path, offset, buf.len() as u64)? else {
            return Ok(ScatterOutcome::default());
        };

        let bulk = BulkHandle::write_only(buf.len());
        let requests = plan
            .targets
            .iter()
            .map(|(&host, slice)| {
                let header = plan.header(slice, &self.chunks);
                (host, ReadDataRequest::new(path, header, bulk.clone()))
            })
            .collect();

        let outcome = self.gather_io(requests).await;
        bulk.copy_to(buf)?;

        tracing::debug!(
            "Scatter read {} @{}: {} bytes over {} hosts, error={:?}",
            path,
            offset,
            outcome.transferred,
            outcome.requests,
            outcome.first_error
        );
        Ok(outcome)
    }

    async fn gather_io<R>(&self, requests: Vec<(HostId, R)>) -> ScatterOutcome
    where
        R: Rpc<ResponseHeader = IoResponseHeader>,
    {
        let mut outcome = ScatterOutcome {
            requests: requests.len(),
            ..Default::default()
        };

        for (host, result) in self.broadcast(requests).await {
            match result {
                Ok(response) => {
                    outcome.transferred += response.io_size;
                    if !response.is_success() {
                        tracing::error!(
                            "Host {} failed sub-request with status {} after {} bytes",
                            host,
                            response.status,
                            response.io_size
                        );
                        outcome.record_error(host, status_to_errno(response.status));
                    }
                }
                Err(e) => {
                    tracing::error!("Sub-request to host {} failed: {}", host, e);
                    outcome.record_error(host, e.errno());
                }
            }
        }

        outcome
    }

    /// Issue every request without waiting in between, then await them all
    ///
    /// Results keep the order of `requests`.
    pub async fn broadcast<R: Rpc>(
        &self,
        requests: Vec<(HostId, R)>,
    ) -> Vec<(HostId, Result<R::ResponseHeader, RpcError>)> {
        let (hosts, calls): (Vec<HostId>, Vec<_>) = requests
            .into_iter()
            .map(|(host, rpc)| (host, rpc.call(self.transport.as_ref(), host)))
            .unzip();

        hosts.into_iter().zip(join_all(calls).await).collect()
    }
}
