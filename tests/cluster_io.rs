//! End-to-end tests against an in-process cluster
//!
//! Every test boots `LocalCluster` under a temporary directory and drives it
//! through the `ScatterFs` client. Chunk files are inspected directly on disk.

use futures::executor::block_on;
use scatterfs::api::{ApiError, ScatterFs};
use scatterfs::config::{ClusterConfig, DistributionPolicy};
use scatterfs::constants::{CHUNK_ROOT_DIR, DEFAULT_FILE_MODE};
use scatterfs::data::HostId;
use scatterfs::rpc::data_ops::RemoveDataRequest;
use scatterfs::rpc::{errno_to_status, Rpc};
use scatterfs::server::LocalCluster;
use scatterfs::storage::ChunkStorage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const C: u64 = 64;

fn config(hosts: u32, policy: DistributionPolicy) -> ClusterConfig {
    let mut config = ClusterConfig::default();
    config.storage.chunk_size = C;
    config.storage.io_workers = 4;
    config.storage.dispatch_workers = 2;
    config.distribution.hosts_size = hosts;
    config.distribution.policy = policy;
    config
}

fn start(config: &ClusterConfig) -> (TempDir, LocalCluster, ScatterFs) {
    let dir = TempDir::new().unwrap();
    let cluster = LocalCluster::start(config, dir.path()).unwrap();
    let fs = cluster.client(0).unwrap();
    (dir, cluster, fs)
}

fn chunk_file(root: &Path, host: HostId, path: &str, chunk_id: u64) -> PathBuf {
    chunk_dir(root, host, path).join(chunk_id.to_string())
}

fn chunk_dir(root: &Path, host: HostId, path: &str) -> PathBuf {
    LocalCluster::host_dir(root, host)
        .join(CHUNK_ROOT_DIR)
        .join(ChunkStorage::chunk_dir_name(path))
}

fn file_len(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}

fn errno_of<T: std::fmt::Debug>(result: Result<T, ApiError>) -> i32 {
    result.unwrap_err().errno()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_single_host_write_splits_into_chunks() {
    let (dir, _cluster, fs) = start(&config(1, DistributionPolicy::Hash));
    let data = pattern(160);

    block_on(fs.create("/a", DEFAULT_FILE_MODE)).unwrap();
    assert_eq!(block_on(fs.pwrite("/a", &data, 0)).unwrap(), 160);
    assert_eq!(block_on(fs.get_size("/a")).unwrap(), 160);

    // 64 + 64 + 32
    assert_eq!(file_len(&chunk_file(dir.path(), 0, "/a", 0)), Some(64));
    assert_eq!(file_len(&chunk_file(dir.path(), 0, "/a", 1)), Some(64));
    assert_eq!(file_len(&chunk_file(dir.path(), 0, "/a", 2)), Some(32));
    assert_eq!(
        std::fs::read(chunk_file(dir.path(), 0, "/a", 2)).unwrap(),
        &data[128..]
    );

    let mut out = vec![0u8; 160];
    assert_eq!(block_on(fs.pread("/a", &mut out, 0)).unwrap(), 160);
    assert_eq!(out, data);
}

#[test]
fn test_multi_host_write_covers_every_byte_once() {
    let (dir, _cluster, fs) = start(&config(3, DistributionPolicy::Hash));
    let data = pattern(192);

    block_on(fs.create("/b", DEFAULT_FILE_MODE)).unwrap();
    assert_eq!(block_on(fs.pwrite("/b", &data, 0)).unwrap(), 192);

    let mut on_disk = 0;
    for chunk_id in 0..3 {
        let owner = fs.distributor().locate_data("/b", chunk_id);
        for host in 0..3 {
            let len = file_len(&chunk_file(dir.path(), host, "/b", chunk_id));
            if host == owner {
                assert_eq!(len, Some(C));
                on_disk += C;
            } else {
                assert_eq!(len, None, "chunk {} found on non-owner host {}", chunk_id, host);
            }
        }
    }
    assert_eq!(on_disk, 192);

    let mut out = vec![0u8; 192];
    assert_eq!(block_on(fs.pread("/b", &mut out, 0)).unwrap(), 192);
    assert_eq!(out, data);
}

#[test]
fn test_unaligned_write_and_read_across_hosts() {
    let (_dir, _cluster, fs) = start(&config(4, DistributionPolicy::Hash));
    let data = pattern(1000);

    block_on(fs.create("/c", DEFAULT_FILE_MODE)).unwrap();
    assert_eq!(block_on(fs.pwrite("/c", &data, 37)).unwrap(), 1000);
    assert_eq!(block_on(fs.get_size("/c")).unwrap(), 1037);

    let mut out = vec![0u8; 300];
    assert_eq!(block_on(fs.pread("/c", &mut out, 100)).unwrap(), 300);
    assert_eq!(&out[..], &data[63..363]);

    // Clamped at the end of the file
    let mut out = vec![0u8; 100];
    assert_eq!(block_on(fs.pread("/c", &mut out, 1000)).unwrap(), 37);
    assert_eq!(&out[..37], &data[963..]);
}

#[test]
fn test_partial_failure_reports_first_error_and_keeps_others() {
    let dir = TempDir::new().unwrap();
    let map = dir.path().join("guided.map");
    std::fs::write(&map, "/pf 0 0\n/pf 1 1\n/pf 2 2\n").unwrap();

    let mut config = config(3, DistributionPolicy::Guided);
    config.distribution.guided_map = Some(map);
    let root = dir.path().join("cluster");
    let cluster = LocalCluster::start(&config, &root).unwrap();
    let fs = cluster.client(0).unwrap();

    // A regular file where host 2 expects the chunk directory
    let blocked = chunk_dir(&root, 2, "/pf");
    std::fs::write(&blocked, b"not a directory").unwrap();

    let data = pattern(160);
    block_on(fs.create("/pf", DEFAULT_FILE_MODE)).unwrap();
    let err = block_on(fs.pwrite("/pf", &data, 0)).unwrap_err();
    match err {
        ApiError::Scatter { errno, transferred } => {
            assert_eq!(errno, libc::ENOTDIR);
            assert_eq!(transferred, 128);
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // The hosts that succeeded keep their chunks
    assert_eq!(file_len(&chunk_file(&root, 0, "/pf", 0)), Some(64));
    assert_eq!(file_len(&chunk_file(&root, 1, "/pf", 1)), Some(64));

    let mut out = vec![0u8; 128];
    assert_eq!(block_on(fs.pread("/pf", &mut out, 0)).unwrap(), 128);
    assert_eq!(&out[..], &data[..128]);
}

#[test]
fn test_shrink_truncate() {
    let (dir, _cluster, fs) = start(&config(3, DistributionPolicy::Hash));
    let data = pattern(160);

    block_on(fs.create("/t", DEFAULT_FILE_MODE)).unwrap();
    block_on(fs.pwrite("/t", &data, 0)).unwrap();
    block_on(fs.truncate("/t", 69)).unwrap();
    assert_eq!(block_on(fs.get_size("/t")).unwrap(), 69);

    let owner = |chunk_id| fs.distributor().locate_data("/t", chunk_id);
    assert_eq!(file_len(&chunk_file(dir.path(), owner(0), "/t", 0)), Some(64));
    assert_eq!(file_len(&chunk_file(dir.path(), owner(1), "/t", 1)), Some(5));
    assert_eq!(file_len(&chunk_file(dir.path(), owner(2), "/t", 2)), None);

    let mut out = vec![0u8; 160];
    assert_eq!(block_on(fs.pread("/t", &mut out, 0)).unwrap(), 69);
    assert_eq!(&out[..69], &data[..69]);

    // Truncating to zero drops the chunk space everywhere
    block_on(fs.truncate("/t", 0)).unwrap();
    assert_eq!(block_on(fs.get_size("/t")).unwrap(), 0);
    for host in 0..3 {
        assert!(!chunk_dir(dir.path(), host, "/t").exists());
    }
}

#[test]
fn test_truncate_on_chunk_boundary() {
    let (dir, _cluster, fs) = start(&config(1, DistributionPolicy::Hash));

    block_on(fs.create("/tb", DEFAULT_FILE_MODE)).unwrap();
    block_on(fs.pwrite("/tb", &pattern(200), 0)).unwrap();
    block_on(fs.truncate("/tb", 128)).unwrap();

    assert_eq!(file_len(&chunk_file(dir.path(), 0, "/tb", 0)), Some(64));
    assert_eq!(file_len(&chunk_file(dir.path(), 0, "/tb", 1)), Some(64));
    assert_eq!(file_len(&chunk_file(dir.path(), 0, "/tb", 2)), None);
    assert_eq!(file_len(&chunk_file(dir.path(), 0, "/tb", 3)), None);
}

#[test]
fn test_sparse_read_returns_zeros() {
    let (_dir, _cluster, fs) = start(&config(3, DistributionPolicy::Hash));

    block_on(fs.create("/s", DEFAULT_FILE_MODE)).unwrap();
    block_on(fs.pwrite("/s", b"0123456789", 200)).unwrap();
    assert_eq!(block_on(fs.get_size("/s")).unwrap(), 210);

    let mut out = vec![0xffu8; 256];
    assert_eq!(block_on(fs.pread("/s", &mut out, 0)).unwrap(), 210);
    assert!(out[..200].iter().all(|&b| b == 0));
    assert_eq!(&out[200..210], b"0123456789");
}

#[test]
fn test_append_extends_size() {
    let (_dir, _cluster, fs) = start(&config(2, DistributionPolicy::Hash));

    block_on(fs.create("/log", DEFAULT_FILE_MODE)).unwrap();
    let first = pattern(100);
    assert_eq!(block_on(fs.pwrite_append("/log", &first)).unwrap(), 100);
    assert_eq!(block_on(fs.pwrite_append("/log", b"tail")).unwrap(), 4);
    assert_eq!(block_on(fs.get_size("/log")).unwrap(), 104);

    let mut out = vec![0u8; 104];
    block_on(fs.pread("/log", &mut out, 0)).unwrap();
    assert_eq!(&out[..100], &first[..]);
    assert_eq!(&out[100..], b"tail");
}

#[test]
fn test_non_append_write_keeps_larger_size() {
    let (_dir, _cluster, fs) = start(&config(2, DistributionPolicy::Hash));

    block_on(fs.create("/w", DEFAULT_FILE_MODE)).unwrap();
    block_on(fs.pwrite("/w", &pattern(300), 0)).unwrap();
    block_on(fs.pwrite("/w", b"xx", 10)).unwrap();
    assert_eq!(block_on(fs.get_size("/w")).unwrap(), 300);
}

#[test]
fn test_create_twice_reports_exists() {
    let (_dir, _cluster, fs) = start(&config(2, DistributionPolicy::Hash));

    block_on(fs.create("/dup", DEFAULT_FILE_MODE)).unwrap();
    let err = block_on(fs.create("/dup", DEFAULT_FILE_MODE)).unwrap_err();
    assert_eq!(err.errno(), libc::EEXIST);
}

#[test]
fn test_remove_drops_metadata_and_chunks() {
    let (dir, _cluster, fs) = start(&config(3, DistributionPolicy::Hash));

    block_on(fs.create("/r", DEFAULT_FILE_MODE)).unwrap();
    block_on(fs.pwrite("/r", &pattern(500), 0)).unwrap();
    block_on(fs.remove("/r")).unwrap();

    assert_eq!(block_on(fs.get_attributes("/r")).unwrap_err().errno(), libc::ENOENT);
    for host in 0..3 {
        assert!(!chunk_dir(dir.path(), host, "/r").exists());
    }

    assert_eq!(block_on(fs.remove("/r")).unwrap_err().errno(), libc::ENOENT);
}

#[test]
fn test_statfs_sums_hosts() {
    let (_dir, _cluster, fs) = start(&config(3, DistributionPolicy::Hash));

    let stat = block_on(fs.statfs()).unwrap();
    assert_eq!(stat.chunk_size, C);
    assert!(stat.total_chunks > 0);
    assert!(stat.free_chunks <= stat.total_chunks);
    assert_eq!(stat.total_chunks % 3, 0);
}

#[test]
fn test_disconnected_host_fails_with_ebusy() {
    let mut config = config(3, DistributionPolicy::Forwarding);
    config.distribution.forward_host = Some(2);
    let (_dir, cluster, fs) = start(&config);

    // A path whose metadata lives off the data host
    let path = (0..)
        .map(|i| format!("/x{}", i))
        .find(|p| fs.distributor().locate_metadata(p) != 2)
        .unwrap();

    block_on(fs.create(&path, DEFAULT_FILE_MODE)).unwrap();
    cluster.loopback().disconnect(2);

    let err = block_on(fs.pwrite(&path, &pattern(100), 0)).unwrap_err();
    match err {
        ApiError::Scatter { errno, transferred } => {
            assert_eq!(errno, libc::EBUSY);
            assert_eq!(transferred, 0);
        }
        other => panic!("unexpected error: {:?}", other),
    }

    cluster.loopback().reconnect(2);
    assert_eq!(block_on(fs.pwrite(&path, &pattern(100), 0)).unwrap(), 100);
}

#[test]
fn test_concurrent_clients_on_distinct_files() {
    let (_dir, cluster, _fs) = start(&config(4, DistributionPolicy::Hash));
    let cluster = Arc::new(cluster);

    let workers: Vec<_> = (0..4u32)
        .map(|host| {
            let cluster = cluster.clone();
            std::thread::spawn(move || {
                let fs = cluster.client(host).unwrap();
                let path = format!("/par/{}", host);
                let data: Vec<u8> = (0..777).map(|i| (i as u32 * (host + 1)) as u8).collect();

                block_on(fs.create(&path, DEFAULT_FILE_MODE)).unwrap();
                assert_eq!(block_on(fs.pwrite(&path, &data, 0)).unwrap(), 777);

                let mut out = vec![0u8; 777];
                assert_eq!(block_on(fs.pread(&path, &mut out, 0)).unwrap(), 777);
                assert_eq!(out, data);
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn test_root_and_dot_paths_leave_other_files_intact() {
    let (dir, cluster, fs) = start(&config(2, DistributionPolicy::Hash));

    block_on(fs.create("/keep", DEFAULT_FILE_MODE)).unwrap();
    assert_eq!(block_on(fs.pwrite("/keep", &[7u8; 200], 0)).unwrap(), 200);

    assert_eq!(errno_of(block_on(fs.create("/", DEFAULT_FILE_MODE))), libc::EINVAL);
    assert_eq!(errno_of(block_on(fs.remove("/"))), libc::EINVAL);
    assert_eq!(errno_of(block_on(fs.truncate("/", 0))), libc::EINVAL);
    assert_eq!(errno_of(block_on(fs.create("/..", DEFAULT_FILE_MODE))), libc::EINVAL);
    assert_eq!(errno_of(block_on(fs.pwrite("/..", &[1u8; 10], 0))), libc::EINVAL);

    // A raw request past the client checks is refused by every host's storage
    let transport = cluster.transport();
    for host in 0..2 {
        for path in ["/", "/.."] {
            let response = block_on(RemoveDataRequest::new(path).call(transport.as_ref(), host)).unwrap();
            assert_eq!(response.status, errno_to_status(libc::EINVAL), "{path} on host {host}");
        }
    }

    let mut out = vec![0u8; 200];
    assert_eq!(block_on(fs.pread("/keep", &mut out, 0)).unwrap(), 200);
    assert_eq!(out, vec![7u8; 200]);

    for host in 0..2 {
        let host_dir = LocalCluster::host_dir(dir.path(), host);
        assert!(host_dir.join(CHUNK_ROOT_DIR).is_dir());
        assert!(!host_dir.join("0").exists());
    }
}
