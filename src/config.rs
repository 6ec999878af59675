//! scatterfs cluster configuration
//!
//! One immutable [`ClusterConfig`] is built at startup and handed to every
//! component constructor. Everything except `node.host_id` and
//! `node.data_dir` must be identical on all hosts of a cluster.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::data::chunking::is_pow2;
use crate::metadata::MetadataFields;

/// Default configuration constants
pub mod defaults {
    // Storage defaults
    /// Default chunk size: 512KiB
    pub const CHUNK_SIZE: u64 = 512 * 1024;

    /// Smallest accepted chunk size: 64B
    pub const MIN_CHUNK_SIZE: u64 = 64;

    /// Largest accepted chunk size: 128MiB
    pub const MAX_CHUNK_SIZE: u64 = 128 * 1024 * 1024;

    /// Chunk I/O workers per host
    pub const IO_WORKERS: usize = 8;

    /// Request dispatch workers per host
    pub const DISPATCH_WORKERS: usize = 4;

    // Distribution defaults
    pub const HOSTS_SIZE: u32 = 1;

    // Metadata defaults
    /// Reject create on an existing record
    pub const CREATE_EXIST_CHECK: bool = true;

    // Log level
    /// Default log level
    pub const fn default_log_level() -> &'static str {
        "info"
    }

    pub const fn default_data_dir() -> &'static str {
        "/tmp/scatterfs"
    }
}

/// scatterfs cluster configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Per-process node configuration
    pub node: NodeConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Data/metadata distribution
    #[serde(default)]
    pub distribution: DistributionConfig,

    /// Metadata record layout
    #[serde(default)]
    pub metadata: MetadataConfig,
}

/// Node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Index of this host in the host set
    #[serde(default)]
    pub host_id: u32,

    /// Data directory (chunk files live in `<data_dir>/chunks`)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(defaults::default_data_dir())
}

fn default_log_level() -> String {
    defaults::default_log_level().to_string()
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Chunk size in bytes, a power of two (default: 512KiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Size of the chunk I/O task pool
    #[serde(default = "default_io_workers")]
    pub io_workers: usize,

    /// Size of the request dispatch pool
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,
}

fn default_chunk_size() -> u64 {
    defaults::CHUNK_SIZE
}

fn default_io_workers() -> usize {
    defaults::IO_WORKERS
}

fn default_dispatch_workers() -> usize {
    defaults::DISPATCH_WORKERS
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            io_workers: default_io_workers(),
            dispatch_workers: default_dispatch_workers(),
        }
    }
}

/// Placement policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionPolicy {
    #[default]
    Hash,
    LocalOnly,
    Forwarding,
    Guided,
}

/// Distribution configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionConfig {
    #[serde(default)]
    pub policy: DistributionPolicy,

    /// Number of hosts in the cluster
    #[serde(default = "default_hosts_size")]
    pub hosts_size: u32,

    /// Target host of all data for the `forwarding` policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_host: Option<u32>,

    /// Map file for the `guided` policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guided_map: Option<PathBuf>,
}

fn default_hosts_size() -> u32 {
    defaults::HOSTS_SIZE
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            policy: DistributionPolicy::default(),
            hosts_size: default_hosts_size(),
            forward_host: None,
            guided_map: None,
        }
    }
}

/// Metadata record configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default)]
    pub atime: bool,
    #[serde(default)]
    pub mtime: bool,
    #[serde(default)]
    pub ctime: bool,
    #[serde(default)]
    pub uid: bool,
    #[serde(default)]
    pub gid: bool,
    #[serde(default)]
    pub link_count: bool,
    #[serde(default)]
    pub blocks: bool,

    /// Use put-if-absent on create and report EEXIST
    #[serde(default = "default_create_exist_check")]
    pub create_exist_check: bool,
}

fn default_create_exist_check() -> bool {
    defaults::CREATE_EXIST_CHECK
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            atime: false,
            mtime: false,
            ctime: false,
            uid: false,
            gid: false,
            link_count: false,
            blocks: false,
            create_exist_check: default_create_exist_check(),
        }
    }
}

impl MetadataConfig {
    /// Optional record fields enabled cluster-wide
    pub fn fields(&self) -> MetadataFields {
        MetadataFields {
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
            uid: self.uid,
            gid: self.gid,
            link_count: self.link_count,
            blocks: self.blocks,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                host_id: 0,
                data_dir: default_data_dir(),
                log_level: default_log_level(),
            },
            storage: StorageConfig::default(),
            distribution: DistributionConfig::default(),
            metadata: MetadataConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(format!("Failed to read config file: {}", e)))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: ClusterConfig = toml::from_str(contents)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self).map_err(|e| {
            ConfigError::SerializeError(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path.as_ref(), contents)
            .map_err(|e| ConfigError::WriteError(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Same cluster settings for another host of the cluster
    pub fn for_host(&self, host_id: u32, data_dir: PathBuf) -> Self {
        let mut config = self.clone();
        config.node.host_id = host_id;
        config.node.data_dir = data_dir;
        config
    }

    /// Directory holding all chunk directories of this host
    pub fn chunk_root(&self) -> PathBuf {
        self.node.data_dir.join(crate::constants::CHUNK_ROOT_DIR)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chunk_size = self.storage.chunk_size;
        if !is_pow2(chunk_size) {
            return Err(ConfigError::ValidationError(format!(
                "Chunk size must be a power of two, got {}",
                chunk_size
            )));
        }
        if !(defaults::MIN_CHUNK_SIZE..=defaults::MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(ConfigError::ValidationError(format!(
                "Chunk size must be between {} and {} bytes",
                defaults::MIN_CHUNK_SIZE,
                defaults::MAX_CHUNK_SIZE
            )));
        }

        if self.storage.io_workers == 0 || self.storage.dispatch_workers == 0 {
            return Err(ConfigError::ValidationError(
                "Worker pools need at least one worker".to_string(),
            ));
        }

        let hosts_size = self.distribution.hosts_size;
        if hosts_size == 0 {
            return Err(ConfigError::ValidationError(
                "hosts_size must be at least 1".to_string(),
            ));
        }
        if self.node.host_id >= hosts_size {
            return Err(ConfigError::ValidationError(format!(
                "host_id {} out of range (hosts_size={})",
                self.node.host_id, hosts_size
            )));
        }

        match self.distribution.policy {
            DistributionPolicy::Forwarding => match self.distribution.forward_host {
                Some(host) if host < hosts_size => {}
                Some(host) => {
                    return Err(ConfigError::ValidationError(format!(
                        "forward_host {} out of range (hosts_size={})",
                        host, hosts_size
                    )));
                }
                None => {
                    return Err(ConfigError::ValidationError(
                        "forwarding policy requires forward_host".to_string(),
                    ));
                }
            },
            DistributionPolicy::Guided if self.distribution.guided_map.is_none() => {
                return Err(ConfigError::ValidationError(
                    "guided policy requires guided_map".to_string(),
                ));
            }
            _ => {}
        }

        // Validate log level
        match self.node.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.node.log_level
                )));
            }
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config: {0}")]
    WriteError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
