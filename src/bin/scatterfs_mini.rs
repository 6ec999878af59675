//! scatterfs mini cluster
//!
//! Boots every host of a cluster inside this process, connects them with the
//! loopback transport and runs a write/read/truncate/remove workload.
//!
//! Usage:
//!   scatterfs_mini --hosts 4 --chunk-size 65536 --files 8 --file-size 1048576
//!   scatterfs_mini --config cluster.toml --root /tmp/scatterfs

use scatterfs::api::{ApiResult, ScatterFs};
use scatterfs::config::{ClusterConfig, DistributionPolicy};
use scatterfs::constants::DEFAULT_FILE_MODE;
use scatterfs::logging::init_with_hostname;
use scatterfs::server::LocalCluster;

use clap::{Parser, ValueEnum};
use futures::executor::block_on;

use std::path::PathBuf;
use std::time::{Duration, Instant};

/// scatterfs in-process cluster
#[derive(Parser)]
#[command(name = "scatterfs_mini")]
#[command(about = "Run a scatterfs cluster in one process and drive a workload through it")]
struct Args {
    /// Cluster configuration file (TOML); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root directory; host N keeps its data in <root>/host-N
    #[arg(long, default_value = "/tmp/scatterfs_mini")]
    root: PathBuf,

    /// Number of hosts
    #[arg(long)]
    hosts: Option<u32>,

    /// Chunk size in bytes (power of two)
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Placement policy
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    /// Target host for the forwarding policy
    #[arg(long)]
    forward_host: Option<u32>,

    /// Map file for the guided policy
    #[arg(long)]
    guided_map: Option<PathBuf>,

    /// Host the client runs on
    #[arg(long, default_value = "0")]
    client_host: u32,

    /// Number of files to write
    #[arg(long, default_value = "4")]
    files: usize,

    /// Size of each file in bytes
    #[arg(long, default_value = "1048576")]
    file_size: usize,

    /// Bytes per write/read call
    #[arg(long, default_value = "262144")]
    block_size: usize,

    /// Keep the files instead of removing them at the end
    #[arg(long)]
    keep: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Hash,
    LocalOnly,
    Forwarding,
    Guided,
}

impl From<PolicyArg> for DistributionPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Hash => DistributionPolicy::Hash,
            PolicyArg::LocalOnly => DistributionPolicy::LocalOnly,
            PolicyArg::Forwarding => DistributionPolicy::Forwarding,
            PolicyArg::Guided => DistributionPolicy::Guided,
        }
    }
}

/// Per-phase statistics
#[derive(Debug, Default)]
struct PhaseStats {
    operations: usize,
    total_bytes: u64,
    total_time: Duration,
}

impl PhaseStats {
    fn record(&mut self, bytes: usize) {
        self.operations += 1;
        self.total_bytes += bytes as u64;
    }

    fn throughput_mbps(&self) -> f64 {
        if self.total_time.as_secs_f64() == 0.0 {
            return 0.0;
        }
        (self.total_bytes as f64 / 1024.0 / 1024.0) / self.total_time.as_secs_f64()
    }

    fn print_report(&self, name: &str) {
        println!("\n===== {} =====", name);
        println!("Operations:   {}", self.operations);
        println!(
            "Total bytes:  {} bytes ({:.2} MB)",
            self.total_bytes,
            self.total_bytes as f64 / 1024.0 / 1024.0
        );
        println!("Total time:   {:.3} ms", self.total_time.as_secs_f64() * 1000.0);
        println!("Throughput:   {:.2} MB/s", self.throughput_mbps());
    }
}

fn build_config(args: &Args) -> Result<ClusterConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => ClusterConfig::from_file(path)?,
        None => ClusterConfig::default(),
    };

    if let Some(hosts) = args.hosts {
        config.distribution.hosts_size = hosts;
    }
    if let Some(chunk_size) = args.chunk_size {
        config.storage.chunk_size = chunk_size;
    }
    if let Some(policy) = args.policy {
        config.distribution.policy = policy.into();
    }
    if args.forward_host.is_some() {
        config.distribution.forward_host = args.forward_host;
    }
    if args.guided_map.is_some() {
        config.distribution.guided_map = args.guided_map.clone();
    }
    config.node.log_level = args.log_level.clone();
    config.node.data_dir = args.root.clone();

    config.validate()?;
    Ok(config)
}

fn pattern(file_index: usize, offset: usize, len: usize) -> Vec<u8> {
    (offset..offset + len)
        .map(|i| ((i * 31 + file_index * 7) % 251) as u8)
        .collect()
}

fn run_workload(fs: &ScatterFs, args: &Args) -> ApiResult<()> {
    let block_size = args.block_size.max(1);
    let paths: Vec<String> = (0..args.files).map(|i| format!("/mini/file-{}", i)).collect();

    // Write
    let mut stats = PhaseStats::default();
    let start = Instant::now();
    for (index, path) in paths.iter().enumerate() {
        block_on(fs.create(path, DEFAULT_FILE_MODE))?;
        let mut offset = 0;
        while offset < args.file_size {
            let len = block_size.min(args.file_size - offset);
            let data = pattern(index, offset, len);
            let written = block_on(fs.pwrite(path, &data, offset as u64))?;
            stats.record(written);
            offset += len;
        }
    }
    stats.total_time = start.elapsed();
    stats.print_report("Write");

    // Read and verify
    let mut stats = PhaseStats::default();
    let mut mismatches = 0usize;
    let mut buf = vec![0u8; block_size];
    let start = Instant::now();
    for (index, path) in paths.iter().enumerate() {
        let mut offset = 0;
        while offset < args.file_size {
            let read = block_on(fs.pread(path, &mut buf, offset as u64))?;
            if read == 0 {
                break;
            }
            if buf[..read] != pattern(index, offset, read)[..] {
                mismatches += 1;
                tracing::error!("Data mismatch in {} at offset {}", path, offset);
            }
            stats.record(read);
            offset += read;
        }
    }
    stats.total_time = start.elapsed();
    stats.print_report("Read");
    println!("Mismatched blocks: {}", mismatches);

    // Truncate every file to half its size
    let start = Instant::now();
    for path in &paths {
        block_on(fs.truncate(path, (args.file_size / 2) as u64))?;
    }
    println!("\nTruncated {} files in {:.3} ms", paths.len(), start.elapsed().as_secs_f64() * 1000.0);

    let stat = block_on(fs.statfs())?;
    println!(
        "Capacity: {} chunks of {} bytes, {} free ({:.2} MB free)",
        stat.total_chunks,
        stat.chunk_size,
        stat.free_chunks,
        stat.free_bytes() as f64 / 1024.0 / 1024.0
    );

    if !args.keep {
        for path in &paths {
            block_on(fs.remove(path))?;
        }
        println!("Removed {} files", paths.len());
    }

    Ok(())
}

fn main() {
    let args = Args::parse();
    init_with_hostname(&args.log_level);

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Starting scatterfs mini cluster");
    tracing::info!("Root directory: {}", args.root.display());
    tracing::info!("Hosts: {}", config.distribution.hosts_size);
    tracing::info!("Chunk size: {} bytes", config.storage.chunk_size);
    tracing::info!("Policy: {:?}", config.distribution.policy);

    let cluster = match LocalCluster::start(&config, &args.root) {
        Ok(cluster) => cluster,
        Err(e) => {
            tracing::error!("Failed to start cluster: {}", e);
            std::process::exit(1);
        }
    };

    let fs = match cluster.client(args.client_host) {
        Ok(fs) => fs,
        Err(e) => {
            tracing::error!("Failed to create client: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run_workload(&fs, &args) {
        tracing::error!("Workload failed (errno {}): {}", e.errno(), e);
        std::process::exit(1);
    }

    tracing::info!("Workload finished");
}
