//! scatterfs - the data path of a scale-out file service
//!
//! Files are split into fixed-size chunks spread over a set of hosts; file
//! metadata lives on one host per path. The crate covers:
//!
//! - **Placement** ([`data`]): chunk arithmetic and the distributor that maps
//!   `(path, chunk)` and `path` to hosts
//! - **Chunk Storage** ([`storage`]): one directory per file, one file per
//!   chunk, plus the bounded I/O task pool
//! - **Metadata** ([`metadata`]): path-keyed records with merge-based size
//!   updates
//! - **RPC Layer** ([`rpc`]): wire headers, bulk regions, host-side handlers and
//!   an in-process transport
//! - **Host Daemon** ([`server`]): wires one host together and starts whole
//!   clusters in one process
//! - **API Layer** ([`api`]): scatter-gather reads and writes, truncate, remove
//!
//! # Example
//!
//! ```rust,no_run
//! use scatterfs::config::ClusterConfig;
//! use scatterfs::constants::DEFAULT_FILE_MODE;
//! use scatterfs::server::LocalCluster;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = ClusterConfig::default();
//! config.distribution.hosts_size = 4;
//!
//! let cluster = LocalCluster::start(&config, std::path::Path::new("/tmp/scatterfs"))?;
//! let fs = cluster.client(0)?;
//!
//! futures::executor::block_on(async {
//!     fs.create("/test.txt", DEFAULT_FILE_MODE).await?;
//!     fs.pwrite("/test.txt", b"Hello, scatterfs!", 0).await?;
//!
//!     let mut buf = vec![0u8; 100];
//!     let n = fs.pread("/test.txt", &mut buf, 0).await?;
//!     assert_eq!(&buf[..n], b"Hello, scatterfs!");
//!     Ok::<_, scatterfs::api::ApiError>(())
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod constants;
pub mod data;
pub mod logging;
pub mod metadata;
pub mod rpc;
pub mod server;
pub mod storage;
