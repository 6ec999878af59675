//! File operations for scatterfs
//!
//! [`ScatterFs`] is the client facade: it talks to the metadata host of a
//! path for attributes and sizes, and fans data out through [`ScatterGather`].

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use tracing::instrument;

use crate::api::scatter::ScatterGather;
use crate::api::types::{ApiError, ApiResult, FileAttributes, FsStat};
use crate::config::ClusterConfig;
use crate::constants::MAX_PATH_LENGTH;
use crate::data::{ChunkManager, Distributor, HostId};
use crate::rpc::data_ops::{ChunkStatRequest, RemoveDataRequest, TruncDataRequest};
use crate::rpc::metadata_ops::{
    CreateRequest, DecreaseSizeRequest, RemoveMetadataRequest, StatRequest, UpdateMetadataRequest,
    UpdateSizeRequest,
};
use crate::rpc::{Rpc, Transport, status_to_errno};

/// scatterfs client
pub struct ScatterFs {
    scatter: ScatterGather,
}

fn check_status(status: i32, context: impl FnOnce() -> String) -> ApiResult<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(ApiError::status(status_to_errno(status), context()))
    }
}

fn check_path(path: &str) -> ApiResult<()> {
    if !path.starts_with('/') {
        return Err(ApiError::invalid(format!("path must be absolute: {:?}", path)));
    }
    if path.len() > MAX_PATH_LENGTH {
        return Err(ApiError::status(
            libc::ENAMETOOLONG,
            format!("path longer than {} bytes", MAX_PATH_LENGTH),
        ));
    }
    // The root and dot components do not name a file of their own
    if path == "/" || path.split('/').any(|c| c == "." || c == "..") {
        return Err(ApiError::invalid(format!("path does not name a file: {:?}", path)));
    }
    Ok(())
}

impl ScatterFs {
    /// Client for the cluster described by `config`; `node.host_id` is the local host
    pub fn new(config: &ClusterConfig, transport: Arc<dyn Transport>) -> ApiResult<Self> {
        let distributor = Distributor::from_config(config)?;
        Self::with_distributor(distributor, config.storage.chunk_size, transport)
    }

    pub fn with_distributor(
        distributor: Distributor,
        chunk_size: u64,
        transport: Arc<dyn Transport>,
    ) -> ApiResult<Self> {
        if distributor.hosts_size() > transport.hosts_size() {
            return Err(ApiError::invalid(format!(
                "placement spans {} hosts but the transport reaches {}",
                distributor.hosts_size(),
                transport.hosts_size()
            )));
        }
        let chunks = ChunkManager::with_chunk_size(chunk_size)?;
        Ok(Self {
            scatter: ScatterGather::new(transport, Arc::new(distributor), chunks),
        })
    }

    pub fn chunk_size(&self) -> u64 {
        self.scatter.chunks().chunk_size()
    }

    pub fn distributor(&self) -> &Distributor {
        self.scatter.distributor()
    }

    fn transport(&self) -> &dyn Transport {
        self.scatter.transport().as_ref()
    }

    fn metadata_host(&self, path: &str) -> HostId {
        self.distributor().locate_metadata(path)
    }

    /// Create a file record on its metadata host
    #[instrument(level = "trace", name = "scatterfs_create", skip(self))]
    pub async fn create(&self, path: &str, mode: u32) -> ApiResult<()> {
        check_path(path)?;
        let response = CreateRequest::new(path, mode)
            .call(self.transport(), self.metadata_host(path))
            .await?;
        check_status(response.status, || format!("create {}", path))
    }

    /// Decoded metadata record of `path`
    pub async fn get_attributes(&self, path: &str) -> ApiResult<FileAttributes> {
        check_path(path)?;
        let response = StatRequest::new(path)
            .call(self.transport(), self.metadata_host(path))
            .await?;
        check_status(response.status, || format!("stat {}", path))?;
        Ok(response.metadata())
    }

    pub async fn get_size(&self, path: &str) -> ApiResult<u64> {
        Ok(self.get_attributes(path).await?.size)
    }

    /// Replace every attribute except the size; returns the stored record
    pub async fn update_metadata(&self, path: &str, attrs: &FileAttributes) -> ApiResult<FileAttributes> {
        check_path(path)?;
        let response = UpdateMetadataRequest::new(path, attrs)
            .call(self.transport(), self.metadata_host(path))
            .await?;
        check_status(response.status, || format!("update metadata of {}", path))?;
        Ok(response.metadata())
    }

    /// Remove the record, then drop the chunk space on every host
    #[instrument(level = "trace", name = "scatterfs_remove", skip(self))]
    pub async fn remove(&self, path: &str) -> ApiResult<()> {
        self.get_attributes(path).await?;

        let response = RemoveMetadataRequest::new(path)
            .call(self.transport(), self.metadata_host(path))
            .await?;
        check_status(response.status, || format!("remove metadata of {}", path))?;

        let requests = self
            .distributor()
            .locate_metadata_broadcast(path)
            .into_iter()
            .map(|host| (host, RemoveDataRequest::new(path)))
            .collect();

        let mut first_error = None;
        for (host, result) in self.scatter.broadcast(requests).await {
            let result = result
                .map_err(ApiError::from)
                .and_then(|r| check_status(r.status, || format!("remove data of {} on host {}", path, host)));
            if let Err(e) = result {
                tracing::error!("{}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            None => {
                tracing::debug!("Removed {}", path);
                Ok(())
            }
            Some(e) => Err(e),
        }
    }

    async fn update_size(&self, path: &str, count: u64, offset: u64, append: bool) -> ApiResult<u64> {
        let response = UpdateSizeRequest::new(path, count, offset, append)
            .call(self.transport(), self.metadata_host(path))
            .await?;
        check_status(response.status, || format!("update size of {}", path))?;
        Ok(response.size as u64)
    }

    async fn scatter_write(&self, path: &str, buf: &[u8], offset: u64) -> ApiResult<usize> {
        let outcome = self
            .scatter
            .write(path, Bytes::copy_from_slice(buf), offset)
            .await?;
        Ok(outcome.into_result()? as usize)
    }

    /// Positional write
    ///
    /// The size is raised on the metadata host before any chunk is written.
    /// A failed sub-request does not roll back the hosts that succeeded.
    #[instrument(level = "trace", name = "scatterfs_pwrite", skip(self, buf), fields(len = buf.len()))]
    pub async fn pwrite(&self, path: &str, buf: &[u8], offset: u64) -> ApiResult<usize> {
        check_path(path)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let count = buf.len() as u64;
        offset
            .checked_add(count)
            .ok_or_else(|| ApiError::status(libc::EFBIG, format!("write past end of offset space on {}", path)))?;

        self.update_size(path, count, offset, false).await?;
        self.scatter_write(path, buf, offset).await
    }

    /// Append `buf`; the write lands where the size update placed it
    #[instrument(level = "trace", name = "scatterfs_append", skip(self, buf), fields(len = buf.len()))]
    pub async fn pwrite_append(&self, path: &str, buf: &[u8]) -> ApiResult<usize> {
        check_path(path)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let count = buf.len() as u64;

        let new_size = self.update_size(path, count, 0, true).await?;
        let offset = new_size - count;
        tracing::debug!("Append to {} at offset {}", path, offset);

        self.scatter_write(path, buf, offset).await
    }

    /// Positional read, clamped to the file size
    ///
    /// Ranges never written read as zeros.
    #[instrument(level = "trace", name = "scatterfs_pread", skip(self, buf), fields(len = buf.len()))]
    pub async fn pread(&self, path: &str, buf: &mut [u8], offset: u64) -> ApiResult<usize> {
        check_path(path)?;
        let size = self.get_size(path).await?;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let count = (buf.len() as u64).min(size - offset) as usize;

        self.scatter
            .read(path, &mut buf[..count], offset)
            .await?
            .into_result()?;
        Ok(count)
    }

    /// Shrink `path` to `new_size`
    #[instrument(level = "trace", name = "scatterfs_truncate", skip(self))]
    pub async fn truncate(&self, path: &str, new_size: u64) -> ApiResult<()> {
        check_path(path)?;
        let size = self.get_size(path).await?;
        if new_size > size {
            return Err(ApiError::invalid(format!(
                "truncate {} to {} beyond its size {}",
                path, new_size, size
            )));
        }
        if new_size == size {
            return Ok(());
        }

        let response = DecreaseSizeRequest::new(path, new_size)
            .call(self.transport(), self.metadata_host(path))
            .await?;
        check_status(response.status, || format!("decrease size of {}", path))?;

        // Hosts holding any chunk in [chunk(new), chunk(old - 1)]
        let chunks = self.scatter.chunks();
        let hosts_size = self.distributor().hosts_size() as usize;
        let mut hosts = BTreeSet::new();
        for chunk_id in chunks.index(new_size)..=chunks.index(size - 1) {
            hosts.insert(self.distributor().locate_data(path, chunk_id));
            if hosts.len() == hosts_size {
                break;
            }
        }

        let requests = hosts
            .into_iter()
            .map(|host| (host, TruncDataRequest::new(path, new_size)))
            .collect();

        let mut first_error = None;
        for (host, result) in self.scatter.broadcast(requests).await {
            let result = result
                .map_err(ApiError::from)
                .and_then(|r| check_status(r.status, || format!("truncate data of {} on host {}", path, host)));
            if let Err(e) = result {
                tracing::error!("{}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            None => {
                tracing::debug!("Truncated {} from {} to {} bytes", path, size, new_size);
                Ok(())
            }
            Some(e) => Err(e),
        }
    }

    /// Capacity summed over every host
    pub async fn statfs(&self) -> ApiResult<FsStat> {
        let requests = self
            .distributor()
            .all_hosts()
            .into_iter()
            .map(|host| (host, ChunkStatRequest::new()))
            .collect();

        let mut stat = FsStat {
            chunk_size: self.chunk_size(),
            ..Default::default()
        };
        for (host, result) in self.scatter.broadcast(requests).await {
            let response = result?;
            check_status(response.status, || format!("chunk stat on host {}", host))?;
            stat.total_chunks += response.chunk_total;
            stat.free_chunks += response.chunk_free;
        }
        Ok(stat)
    }
}
