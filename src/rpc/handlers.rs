use std::sync::Arc;

use futures::future::join_all;
use tracing::instrument;

use crate::data::chunking::{chunk_index, overrun};
use crate::data::{ChunkSegment, Distributor, HostId};
use crate::metadata::{Metadata, MetadataManager};
use crate::rpc::data_ops::*;
use crate::rpc::metadata_ops::*;
use crate::rpc::{
    BulkHandle, RpcError, RpcReply, RpcRequest, StatusResponseHeader, decode_header, errno,
    errno_to_status,
};
use crate::storage::{ChunkStorage, ChunkStorageError, TaskPool};

/// RPC Handler context
///
/// Everything one host needs to serve requests. Chunk I/O never runs on the
/// dispatching thread; it is submitted to `io_pool` one task per chunk.
pub struct RpcHandlerContext {
    pub host_id: HostId,
    pub chunk_storage: Arc<ChunkStorage>,
    pub metadata_manager: Arc<MetadataManager>,
    pub distributor: Arc<Distributor>,
    pub io_pool: Arc<TaskPool>,
}

impl RpcHandlerContext {
    pub fn new(
        host_id: HostId,
        chunk_storage: Arc<ChunkStorage>,
        metadata_manager: Arc<MetadataManager>,
        distributor: Arc<Distributor>,
        io_pool: Arc<TaskPool>,
    ) -> Self {
        Self {
            host_id,
            chunk_storage,
            metadata_manager,
            distributor,
            io_pool,
        }
    }

    /// Chunks of the operation owned by this host with their extents
    ///
    /// The first chunk of the operation starts at `header.offset`, every
    /// other chunk at 0. All owned chunks but the last are filled to the chunk
    /// end; the last one takes whatever remains of `header.total_size`.
    pub fn plan_host_chunks(&self, path: &str, header: &DataRequestHeader) -> Result<Vec<ChunkSegment>, i32> {
        let chunk_size = self.chunk_storage.chunk_size();

        if header.offset < 0
            || header.offset as u64 >= chunk_size
            || header.chunk_start > header.chunk_end
            || header.total_chunks != header.chunk_end - header.chunk_start + 1
        {
            tracing::error!("Malformed data request for {}: {:?}", path, header);
            return Err(errno::EINVAL);
        }
        let first_offset = header.offset as u64;

        let owned: Vec<u64> = (header.chunk_start..=header.chunk_end)
            .filter(|&chunk_id| self.distributor.locate_data(path, chunk_id) == self.host_id)
            .collect();
        if owned.len() as u64 != header.host_chunks {
            tracing::error!(
                "Chunk count mismatch for {}: client sent {}, host owns {}",
                path,
                header.host_chunks,
                owned.len()
            );
            return Err(errno::EINVAL);
        }

        let origin = header.chunk_start * chunk_size + first_offset;
        let mut remaining = header.total_size;
        let mut segments = Vec::with_capacity(owned.len());

        for (i, &chunk_id) in owned.iter().enumerate() {
            let offset_in_chunk = if chunk_id == header.chunk_start { first_offset } else { 0 };
            let room = chunk_size - offset_in_chunk;
            let len = if i + 1 == owned.len() { remaining } else { room };
            if len > room || len > remaining {
                tracing::error!(
                    "Host byte count {} does not fit chunks of {} (chunk {})",
                    header.total_size,
                    path,
                    chunk_id
                );
                return Err(errno::EINVAL);
            }
            remaining -= len;

            segments.push(ChunkSegment {
                index: chunk_id,
                offset_in_chunk,
                len,
                buf_offset: chunk_id * chunk_size + offset_in_chunk - origin,
            });
        }

        Ok(segments)
    }
}

type ChunkTaskResult = Result<u64, i32>;

fn storage_status(path: &str, chunk_id: u64, e: ChunkStorageError) -> i32 {
    tracing::error!("Chunk {} of {} failed: {}", chunk_id, path, e);
    errno_to_status(e.errno())
}

/// Sum successful chunk tasks and keep the first failure
fn collect_chunk_results(results: Vec<Result<ChunkTaskResult, ChunkStorageError>>) -> IoResponseHeader {
    let mut io_size = 0u64;
    let mut status = errno::SUCCESS;

    for result in results {
        match result.unwrap_or_else(|e| Err(errno_to_status(e.errno()))) {
            Ok(n) => io_size += n,
            Err(s) if status == errno::SUCCESS => status = s,
            Err(_) => {}
        }
    }

    IoResponseHeader::new(io_size, status)
}

/// Route one request envelope to its handler
pub async fn dispatch(ctx: Arc<RpcHandlerContext>, request: RpcRequest) -> Result<RpcReply, RpcError> {
    let RpcRequest {
        rpc_id,
        header,
        path,
        bulk,
    } = request;

    let reply = match rpc_id {
        RPC_WRITE_DATA => RpcReply::new(&handle_write_data(&ctx, decode_header(&header)?, &path, bulk).await),
        RPC_READ_DATA => RpcReply::new(&handle_read_data(&ctx, decode_header(&header)?, &path, bulk).await),
        RPC_TRUNC_DATA => RpcReply::new(&handle_trunc_data(&ctx, decode_header(&header)?, &path).await),
        RPC_REMOVE_DATA => RpcReply::new(&handle_remove_data(&ctx, &path).await),
        RPC_CHUNK_STAT => RpcReply::new(&handle_chunk_stat(&ctx).await),
        RPC_CREATE => RpcReply::new(&handle_create(&ctx, decode_header(&header)?, &path)),
        RPC_STAT => RpcReply::new(&handle_stat(&ctx, &path)),
        RPC_REMOVE_METADATA => RpcReply::new(&handle_remove_metadata(&ctx, &path)),
        RPC_UPDATE_SIZE => RpcReply::new(&handle_update_size(&ctx, decode_header(&header)?, &path)),
        RPC_DECREASE_SIZE => RpcReply::new(&handle_decrease_size(&ctx, decode_header(&header)?, &path)),
        RPC_UPDATE_METADATA => RpcReply::new(&handle_update_metadata(&ctx, decode_header(&header)?, &path)),
        other => {
            tracing::error!("Unknown RPC id {} on host {}", other, ctx.host_id);
            return Err(RpcError::UnknownRpc(other));
        }
    };

    Ok(reply)
}

// ============================================================================
// Data RPC Handlers
// ============================================================================

/// Handle WriteData RPC request
///
/// Pulls each owned chunk's bytes from the client region and writes them as
/// one pool task per chunk. Failed chunks do not cancel their siblings.
#[instrument(level = "trace", name = "handle_write_data", skip(ctx, bulk))]
pub async fn handle_write_data(
    ctx: &RpcHandlerContext,
    header: DataRequestHeader,
    path: &str,
    bulk: Option<BulkHandle>,
) -> IoResponseHeader {
    let Some(bulk) = bulk else {
        tracing::error!("WriteData request for {} carries no bulk region", path);
        return IoResponseHeader::error(errno::EINVAL);
    };

    let segments = match ctx.plan_host_chunks(path, &header) {
        Ok(segments) => segments,
        Err(status) => return IoResponseHeader::error(status),
    };
    if segments.is_empty() {
        return IoResponseHeader::success(0);
    }

    if let Err(e) = ctx.chunk_storage.init_chunk_space(path) {
        tracing::error!("Failed to create chunk space for {}: {}", path, e);
        return IoResponseHeader::error(errno_to_status(e.errno()));
    }

    tracing::debug!(
        "WriteData: path={}, chunks={}, bytes={}",
        path,
        segments.len(),
        header.total_size
    );

    let tasks: Vec<_> = segments
        .into_iter()
        .map(|seg| {
            let storage = ctx.chunk_storage.clone();
            let bulk = bulk.clone();
            let path = path.to_string();
            ctx.io_pool.submit(move || -> ChunkTaskResult {
                let data = bulk
                    .pull(seg.buf_offset, seg.len)
                    .map_err(|e| errno_to_status(e.errno()))?;
                storage
                    .write_chunk(&path, seg.index, &data, seg.offset_in_chunk)
                    .map(|n| n as u64)
                    .map_err(|e| storage_status(&path, seg.index, e))
            })
        })
        .collect();

    collect_chunk_results(join_all(tasks).await)
}

/// Handle ReadData RPC request
///
/// Reads each owned chunk on the pool and pushes what was found into the
/// client region. Missing chunks contribute zero bytes.
#[instrument(level = "trace", name = "handle_read_data", skip(ctx, bulk))]
pub async fn handle_read_data(
    ctx: &RpcHandlerContext,
    header: DataRequestHeader,
    path: &str,
    bulk: Option<BulkHandle>,
) -> IoResponseHeader {
    let Some(bulk) = bulk else {
        tracing::error!("ReadData request for {} carries no bulk region", path);
        return IoResponseHeader::error(errno::EINVAL);
    };

    let segments = match ctx.plan_host_chunks(path, &header) {
        Ok(segments) => segments,
        Err(status) => return IoResponseHeader::error(status),
    };

    tracing::debug!(
        "ReadData: path={}, chunks={}, bytes={}",
        path,
        segments.len(),
        header.total_size
    );

    let tasks: Vec<_> = segments
        .into_iter()
        .map(|seg| {
            let storage = ctx.chunk_storage.clone();
            let bulk = bulk.clone();
            let path = path.to_string();
            ctx.io_pool.submit(move || -> ChunkTaskResult {
                let mut buf = vec![0u8; seg.len as usize];
                let n = storage
                    .read_chunk(&path, seg.index, &mut buf, seg.offset_in_chunk)
                    .map_err(|e| storage_status(&path, seg.index, e))?;
                if n > 0 {
                    bulk.push(seg.buf_offset, &buf[..n])
                        .map_err(|e| errno_to_status(e.errno()))?;
                }
                Ok(n as u64)
            })
        })
        .collect();

    collect_chunk_results(join_all(tasks).await)
}

/// Handle TruncData RPC request
///
/// Shortens the chunk that contains the new end (when owned here) and removes
/// every local chunk past it. Truncating to 0 drops the whole chunk space.
#[instrument(level = "trace", name = "handle_trunc_data", skip(ctx))]
pub async fn handle_trunc_data(
    ctx: &RpcHandlerContext,
    header: TruncDataRequestHeader,
    path: &str,
) -> StatusResponseHeader {
    let chunk_size = ctx.chunk_storage.chunk_size();
    let length = header.length;
    let mut first_removed = chunk_index(length, chunk_size);
    let left_pad = overrun(length, chunk_size);

    let boundary = (left_pad != 0).then_some(first_removed);
    if left_pad != 0 {
        first_removed += 1;
    }
    let owns_boundary = boundary.is_some_and(|chunk_id| ctx.distributor.locate_data(path, chunk_id) == ctx.host_id);

    let storage = ctx.chunk_storage.clone();
    let owned_path = path.to_string();
    let task = ctx.io_pool.submit(move || {
        if length == 0 {
            return storage.destroy_chunk_space(&owned_path);
        }
        if let (true, Some(chunk_id)) = (owns_boundary, boundary) {
            storage.truncate_chunk_file(&owned_path, chunk_id, left_pad)?;
        }
        storage.trim_chunk_space(&owned_path, first_removed)
    });

    match task.await.and_then(|r| r) {
        Ok(()) => {
            tracing::debug!("Truncated data of {} to {} bytes", path, length);
            StatusResponseHeader::success()
        }
        Err(e) => {
            tracing::error!("Failed to truncate data of {}: {}", path, e);
            StatusResponseHeader::error(errno_to_status(e.errno()))
        }
    }
}

/// Handle RemoveData RPC request
#[instrument(level = "trace", name = "handle_remove_data", skip(ctx))]
pub async fn handle_remove_data(ctx: &RpcHandlerContext, path: &str) -> StatusResponseHeader {
    let storage = ctx.chunk_storage.clone();
    let owned_path = path.to_string();
    let task = ctx.io_pool.submit(move || storage.destroy_chunk_space(&owned_path));

    match task.await.and_then(|r| r) {
        Ok(()) => StatusResponseHeader::success(),
        Err(e) => {
            tracing::error!("Failed to remove data of {}: {}", path, e);
            StatusResponseHeader::error(errno_to_status(e.errno()))
        }
    }
}

/// Handle ChunkStat RPC request
pub async fn handle_chunk_stat(ctx: &RpcHandlerContext) -> ChunkStatResponseHeader {
    let storage = ctx.chunk_storage.clone();
    match ctx.io_pool.submit(move || storage.chunk_stat()).await.and_then(|r| r) {
        Ok(stat) => ChunkStatResponseHeader::success(stat.chunk_size, stat.chunk_total, stat.chunk_free),
        Err(e) => {
            tracing::error!("chunk_stat failed on host {}: {}", ctx.host_id, e);
            ChunkStatResponseHeader::error(errno_to_status(e.errno()))
        }
    }
}

// ============================================================================
// Metadata RPC Handlers
// ============================================================================

/// Handle Create RPC request
pub fn handle_create(ctx: &RpcHandlerContext, header: CreateRequestHeader, path: &str) -> StatusResponseHeader {
    match ctx.metadata_manager.create(path, Metadata::new(header.mode)) {
        Ok(_) => StatusResponseHeader::success(),
        Err(e) => {
            tracing::debug!("Create {} failed: {}", path, e);
            StatusResponseHeader::error(errno_to_status(e.errno()))
        }
    }
}

/// Handle Stat RPC request
pub fn handle_stat(ctx: &RpcHandlerContext, path: &str) -> MetadataResponseHeader {
    match ctx.metadata_manager.get(path) {
        Ok(md) => MetadataResponseHeader::success(&md),
        Err(e) => {
            tracing::debug!("Stat {} failed: {}", path, e);
            MetadataResponseHeader::error(errno_to_status(e.errno()))
        }
    }
}

/// Handle RemoveMetadata RPC request
pub fn handle_remove_metadata(ctx: &RpcHandlerContext, path: &str) -> StatusResponseHeader {
    match ctx.metadata_manager.remove(path) {
        Ok(()) => StatusResponseHeader::success(),
        Err(e) => StatusResponseHeader::error(errno_to_status(e.errno())),
    }
}

/// Handle UpdateSize RPC request
pub fn handle_update_size(ctx: &RpcHandlerContext, header: UpdateSizeRequestHeader, path: &str) -> SizeResponseHeader {
    match ctx
        .metadata_manager
        .update_size(path, header.count, header.offset, header.append != 0)
    {
        Ok(size) => SizeResponseHeader::success(size),
        Err(e) => {
            tracing::debug!("UpdateSize {} failed: {}", path, e);
            SizeResponseHeader::error(errno_to_status(e.errno()))
        }
    }
}

/// Handle DecreaseSize RPC request
pub fn handle_decrease_size(
    ctx: &RpcHandlerContext,
    header: DecreaseSizeRequestHeader,
    path: &str,
) -> SizeResponseHeader {
    match ctx.metadata_manager.decrease_size(path, header.size) {
        Ok(size) => SizeResponseHeader::success(size),
        Err(e) => SizeResponseHeader::error(errno_to_status(e.errno())),
    }
}

/// Handle UpdateMetadata RPC request
pub fn handle_update_metadata(ctx: &RpcHandlerContext, header: WireMetadata, path: &str) -> MetadataResponseHeader {
    match ctx.metadata_manager.update(path, &(&header).into()) {
        Ok(md) => MetadataResponseHeader::success(&md),
        Err(e) => MetadataResponseHeader::error(errno_to_status(e.errno())),
    }
}
