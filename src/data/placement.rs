//! チャンク/メタデータ配置
//!
//! `(path, chunk_id)` からデータ担当ホストを、`path` からメタデータ担当ホストを
//! 決定する。ポリシーは起動時に1つだけ選ばれ、同一ホスト集合の世代内では
//! 同じ入力に対して常に同じホストを返す。

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use xxhash_rust::xxh64::xxh64;

use crate::config::{ClusterConfig, DistributionPolicy};
use crate::constants::PLACEMENT_HASH_SEED;

/// ホスト識別子 (`[0, hosts_size)`)
pub type HostId = u32;

/// 配置エラー
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    #[error("Host set must not be empty")]
    EmptyHostSet,

    #[error("Host {host} out of range (hosts_size={hosts_size})")]
    HostOutOfRange { host: HostId, hosts_size: u32 },

    #[error("Guided map {path}: line {line}: {reason}")]
    MalformedMap {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("Failed to read guided map {path}: {source}")]
    MapIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Policy {0:?} requires option `{1}`")]
    MissingOption(DistributionPolicy, &'static str),
}

pub type PlacementResult<T> = Result<T, PlacementError>;

/// 配置に使うパスハッシュ
///
/// xxh64 (seed = [`PLACEMENT_HASH_SEED`]) を UTF-8 バイト列にかける。
/// クラスタの互換性契約の一部なので変更してはならない。
#[inline]
pub fn path_hash(key: &str) -> u64 {
    xxh64(key.as_bytes(), PLACEMENT_HASH_SEED)
}

/// データチャンク用のハッシュキー: パス + 10進チャンクID
#[inline]
fn data_key(path: &str, chunk_id: u64) -> String {
    format!("{}{}", path, chunk_id)
}

#[inline]
fn hash_data(path: &str, chunk_id: u64, hosts_size: u32) -> HostId {
    (path_hash(&data_key(path, chunk_id)) % hosts_size as u64) as HostId
}

#[inline]
fn hash_metadata(path: &str, hosts_size: u32) -> HostId {
    (path_hash(path) % hosts_size as u64) as HostId
}

/// Guided配置テーブル
///
/// マップファイルの各行は `path chunk_id host`。
/// `#` で始まるパスはプレフィックス宣言で、そのプレフィックス配下のファイルは
/// 全チャンクをメタデータ担当ホストに置く (chunk_id と host は無視される)。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuidedTable {
    /// path -> (chunk_id -> host)
    chunks: HashMap<String, BTreeMap<u64, HostId>>,

    /// 同居プレフィックス
    prefixes: Vec<String>,
}

impl GuidedTable {
    /// マップファイルを読み込む
    ///
    /// ファイルが存在しない場合は警告を出し、空のテーブル (= ハッシュ配置) を返す。
    pub fn load(path: &Path, hosts_size: u32) -> PlacementResult<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    "Guided map {} not found, falling back to hash placement",
                    path.display()
                );
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(PlacementError::MapIo {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        Self::parse(&contents, hosts_size).map_err(|e| match e {
            PlacementError::MalformedMap { line, reason, .. } => PlacementError::MalformedMap {
                path: path.display().to_string(),
                line,
                reason,
            },
            other => other,
        })
    }

    /// マップ文字列をパース
    pub fn parse(contents: &str, hosts_size: u32) -> PlacementResult<Self> {
        let mut table = Self::default();

        for (lineno, line) in contents.lines().enumerate() {
            let mut fields = line.split_whitespace();
            let Some(path) = fields.next() else {
                continue;
            };

            if let Some(prefix) = path.strip_prefix('#') {
                if !prefix.is_empty() {
                    table.prefixes.push(prefix.to_string());
                }
                continue;
            }

            let malformed = |reason: &str| PlacementError::MalformedMap {
                path: String::new(),
                line: lineno + 1,
                reason: reason.to_string(),
            };

            let chunk_id: u64 = fields
                .next()
                .ok_or_else(|| malformed("missing chunk id"))?
                .parse()
                .map_err(|_| malformed("chunk id is not an integer"))?;
            let host: HostId = fields
                .next()
                .ok_or_else(|| malformed("missing host"))?
                .parse()
                .map_err(|_| malformed("host is not an integer"))?;
            if host >= hosts_size {
                return Err(PlacementError::HostOutOfRange { host, hosts_size });
            }

            // 同じ (path, chunk_id) が複数回現れた場合は最初の行が優先
            table
                .chunks
                .entry(path.to_string())
                .or_default()
                .entry(chunk_id)
                .or_insert(host);
        }

        tracing::debug!(
            "Guided map loaded: {} files, {} prefixes",
            table.chunks.len(),
            table.prefixes.len()
        );
        Ok(table)
    }

    fn lookup(&self, path: &str, chunk_id: u64) -> Option<HostId> {
        self.chunks.get(path)?.get(&chunk_id).copied()
    }

    fn colocated(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.prefixes.is_empty()
    }
}

/// 配置ポリシー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Distributor {
    /// `hash(path ++ chunk_id) mod hosts_size`
    Hash { localhost: HostId, hosts_size: u32 },

    /// 全てを localhost に配置 (単一ノード構成)
    LocalOnly { localhost: HostId },

    /// データは全て `fwd_host` へ、メタデータはハッシュ分散
    Forwarding {
        localhost: HostId,
        hosts_size: u32,
        fwd_host: HostId,
    },

    /// Guidedテーブルを優先し、無ければハッシュ
    Guided {
        localhost: HostId,
        hosts_size: u32,
        table: GuidedTable,
    },
}

impl Distributor {
    pub fn hash(localhost: HostId, hosts_size: u32) -> PlacementResult<Self> {
        check_host(localhost, hosts_size)?;
        Ok(Self::Hash {
            localhost,
            hosts_size,
        })
    }

    pub fn local_only(localhost: HostId) -> Self {
        Self::LocalOnly { localhost }
    }

    pub fn forwarding(localhost: HostId, hosts_size: u32, fwd_host: HostId) -> PlacementResult<Self> {
        check_host(localhost, hosts_size)?;
        check_host(fwd_host, hosts_size)?;
        Ok(Self::Forwarding {
            localhost,
            hosts_size,
            fwd_host,
        })
    }

    pub fn guided(localhost: HostId, hosts_size: u32, table: GuidedTable) -> PlacementResult<Self> {
        check_host(localhost, hosts_size)?;
        Ok(Self::Guided {
            localhost,
            hosts_size,
            table,
        })
    }

    /// クラスタ設定から配置ポリシーを構築
    pub fn from_config(config: &ClusterConfig) -> PlacementResult<Self> {
        let localhost = config.node.host_id;
        let hosts_size = config.distribution.hosts_size;

        match config.distribution.policy {
            DistributionPolicy::Hash => Self::hash(localhost, hosts_size),
            DistributionPolicy::LocalOnly => Ok(Self::local_only(localhost)),
            DistributionPolicy::Forwarding => {
                let fwd_host = config
                    .distribution
                    .forward_host
                    .ok_or(PlacementError::MissingOption(DistributionPolicy::Forwarding, "forward_host"))?;
                Self::forwarding(localhost, hosts_size, fwd_host)
            }
            DistributionPolicy::Guided => {
                let map_path = config
                    .distribution
                    .guided_map
                    .as_deref()
                    .ok_or(PlacementError::MissingOption(DistributionPolicy::Guided, "guided_map"))?;
                let table = GuidedTable::load(map_path, hosts_size)?;
                Self::guided(localhost, hosts_size, table)
            }
        }
    }

    pub fn localhost(&self) -> HostId {
        match self {
            Self::Hash { localhost, .. }
            | Self::LocalOnly { localhost }
            | Self::Forwarding { localhost, .. }
            | Self::Guided { localhost, .. } => *localhost,
        }
    }

    /// ホスト集合のサイズ (LocalOnly は 1 とみなす)
    pub fn hosts_size(&self) -> u32 {
        match self {
            Self::LocalOnly { .. } => 1,
            Self::Hash { hosts_size, .. }
            | Self::Forwarding { hosts_size, .. }
            | Self::Guided { hosts_size, .. } => *hosts_size,
        }
    }

    /// チャンクのデータ担当ホスト
    #[inline]
    pub fn locate_data(&self, path: &str, chunk_id: u64) -> HostId {
        match self {
            Self::Hash { hosts_size, .. } => hash_data(path, chunk_id, *hosts_size),
            Self::LocalOnly { localhost } => *localhost,
            Self::Forwarding { fwd_host, .. } => *fwd_host,
            Self::Guided {
                hosts_size, table, ..
            } => {
                if let Some(host) = table.lookup(path, chunk_id) {
                    return host;
                }
                if table.colocated(path) {
                    return hash_metadata(path, *hosts_size);
                }
                hash_data(path, chunk_id, *hosts_size)
            }
        }
    }

    /// ファイル属性の担当ホスト
    #[inline]
    pub fn locate_metadata(&self, path: &str) -> HostId {
        match self {
            Self::LocalOnly { localhost } => *localhost,
            Self::Hash { hosts_size, .. }
            | Self::Forwarding { hosts_size, .. }
            | Self::Guided { hosts_size, .. } => hash_metadata(path, *hosts_size),
        }
    }

    /// ブロードキャスト先 (削除や statfs で使う)
    pub fn locate_metadata_broadcast(&self, _path: &str) -> Vec<HostId> {
        self.all_hosts()
    }

    pub fn all_hosts(&self) -> Vec<HostId> {
        match self {
            Self::LocalOnly { localhost } => vec![*localhost],
            _ => (0..self.hosts_size()).collect(),
        }
    }
}

fn check_host(host: HostId, hosts_size: u32) -> PlacementResult<()> {
    if hosts_size == 0 {
        return Err(PlacementError::EmptyHostSet);
    }
    if host >= hosts_size {
        return Err(PlacementError::HostOutOfRange { host, hosts_size });
    }
    Ok(())
}
