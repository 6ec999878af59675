//! Host daemon
//!
//! A [`HostDaemon`] owns one host's chunk storage, metadata store and two
//! independent thread pools: one dispatching incoming requests and one doing
//! chunk I/O. [`LocalCluster`] starts a whole host set in one process and
//! wires it together with the loopback transport.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::{ApiResult, ScatterFs};
use crate::config::{ClusterConfig, ConfigError};
use crate::data::{Distributor, HostId, PlacementError};
use crate::metadata::MetadataManager;
use crate::rpc::handlers::{RpcHandlerContext, dispatch};
use crate::rpc::loopback::LoopbackTransport;
use crate::rpc::{RpcError, RpcReply, RpcRequest, Transport};
use crate::storage::{ChunkStorage, ChunkStorageError, TaskHandle, TaskPool};

/// Daemon startup errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Placement setup failed: {0}")]
    Placement(#[from] PlacementError),

    #[error("Chunk storage setup failed: {0}")]
    Storage(#[from] ChunkStorageError),

    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] std::io::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// One scatterfs host
pub struct HostDaemon {
    // dispatch workers hold the context, so they are drained first
    dispatch_pool: TaskPool,
    context: Arc<RpcHandlerContext>,
    config: ClusterConfig,
}

impl HostDaemon {
    /// Build every component of the host from its configuration
    pub fn start(config: ClusterConfig) -> ServerResult<Self> {
        config.validate()?;
        let host_id = config.node.host_id;

        let distributor = Distributor::from_config(&config)?;
        let chunk_storage = ChunkStorage::new(config.chunk_root(), config.storage.chunk_size)?;
        let metadata_manager = MetadataManager::new(config.metadata.fields(), config.metadata.create_exist_check);

        let io_pool = TaskPool::new(&format!("h{}-io", host_id), config.storage.io_workers)?;
        let dispatch_pool = TaskPool::new(&format!("h{}-rpc", host_id), config.storage.dispatch_workers)?;

        let context = RpcHandlerContext::new(
            host_id,
            Arc::new(chunk_storage),
            Arc::new(metadata_manager),
            Arc::new(distributor),
            Arc::new(io_pool),
        );

        tracing::info!(
            "Host {} started (data_dir={}, chunk_size={}, io_workers={}, dispatch_workers={})",
            host_id,
            config.node.data_dir.display(),
            config.storage.chunk_size,
            config.storage.io_workers,
            config.storage.dispatch_workers
        );

        Ok(Self {
            dispatch_pool,
            context: Arc::new(context),
            config,
        })
    }

    pub fn host_id(&self) -> HostId {
        self.context.host_id
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<RpcHandlerContext> {
        &self.context
    }

    /// Queue one request on the dispatch pool
    pub fn handle(&self, request: RpcRequest) -> TaskHandle<Result<RpcReply, RpcError>> {
        let ctx = self.context.clone();
        self.dispatch_pool
            .submit(move || futures::executor::block_on(dispatch(ctx, request)))
    }
}

impl Drop for HostDaemon {
    fn drop(&mut self) {
        tracing::debug!("Host {} shutting down", self.context.host_id);
        self.dispatch_pool.shutdown();
    }
}

/// Every host of a cluster running in this process
pub struct LocalCluster {
    config: ClusterConfig,
    transport: Arc<LoopbackTransport>,
}

impl LocalCluster {
    /// Start `config.distribution.hosts_size` hosts with data under `root/host-<id>`
    pub fn start(config: &ClusterConfig, root: &Path) -> ServerResult<Self> {
        let hosts = (0..config.distribution.hosts_size)
            .map(|host_id| {
                let host_config = config.for_host(host_id, Self::host_dir(root, host_id));
                HostDaemon::start(host_config).map(Arc::new)
            })
            .collect::<ServerResult<Vec<_>>>()?;

        tracing::info!("Local cluster of {} hosts started under {}", hosts.len(), root.display());

        Ok(Self {
            config: config.clone(),
            transport: Arc::new(LoopbackTransport::new(hosts)),
        })
    }

    /// Data directory of one host
    pub fn host_dir(root: &Path, host_id: HostId) -> PathBuf {
        root.join(format!("host-{}", host_id))
    }

    pub fn hosts_size(&self) -> u32 {
        self.transport.hosts_size()
    }

    pub fn daemon(&self, host_id: HostId) -> Option<&Arc<HostDaemon>> {
        self.transport.host(host_id)
    }

    pub fn loopback(&self) -> &Arc<LoopbackTransport> {
        &self.transport
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// Client whose local host is `host_id`
    pub fn client(&self, host_id: HostId) -> ApiResult<ScatterFs> {
        let config = self.config.for_host(host_id, self.config.node.data_dir.clone());
        ScatterFs::new(&config, self.transport())
    }
}
