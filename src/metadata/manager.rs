use std::sync::Arc;

use tracing::instrument;

use super::kv::{KvStore, MemoryKvStore};
use super::merge::{MergeOperand, MetadataMergeOperator};
use super::types::{Metadata, MetadataFields};

/// メタデータ管理エラー
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("Metadata not found: {0}")]
    NotFound(String),

    #[error("Metadata already exists: {0}")]
    AlreadyExists(String),

    #[error("Corrupt metadata record {record:?}: {reason}")]
    Corrupt { record: String, reason: String },

    #[error("Invalid merge operand: {0:?}")]
    InvalidOperand(String),
}

impl MetadataError {
    /// 対応する POSIX errno (正の値)
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound(_) => libc::ENOENT,
            Self::AlreadyExists(_) => libc::EEXIST,
            Self::Corrupt { .. } => libc::EIO,
            Self::InvalidOperand(_) => libc::EINVAL,
        }
    }
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// メタデータマネージャー
///
/// 1ホスト分のメタデータレコードを KV ストアに保持する。
/// サイズは必ずマージオペランド経由で更新し、読み出し-変更-書き込みはしない。
pub struct MetadataManager {
    store: Arc<dyn KvStore>,

    /// レコードに含める任意フィールド (クラスタ共通)
    fields: MetadataFields,

    /// create 時に既存チェックを行うか
    create_exist_check: bool,
}

impl MetadataManager {
    /// 新しいメタデータマネージャーを作成 (インメモリ KV)
    pub fn new(fields: MetadataFields, create_exist_check: bool) -> Self {
        let store = Arc::new(MemoryKvStore::new(MetadataMergeOperator::new(fields)));
        Self::with_store(store, fields, create_exist_check)
    }

    /// 任意の KV ストアでメタデータマネージャーを作成
    pub fn with_store(store: Arc<dyn KvStore>, fields: MetadataFields, create_exist_check: bool) -> Self {
        Self {
            store,
            fields,
            create_exist_check,
        }
    }

    pub fn fields(&self) -> &MetadataFields {
        &self.fields
    }

    /// ローカルに保持しているレコード数
    pub fn record_count(&self) -> usize {
        self.store.len()
    }

    /// ファイルメタデータを作成
    ///
    /// 有効なタイムスタンプは現在時刻で埋める。
    #[instrument(level = "trace", name = "metadata_create", skip(self, md))]
    pub fn create(&self, path: &str, mut md: Metadata) -> MetadataResult<Metadata> {
        if self.fields.any_time() {
            md.stamp_times(&self.fields, chrono::Utc::now().timestamp());
        }
        let record = md.serialize(&self.fields);

        if self.create_exist_check {
            self.store.put_no_exist(path, record)?;
        } else {
            self.store.merge(path, &MergeOperand::Create { record }.serialize())?;
        }

        tracing::debug!("Created metadata for {}", path);
        Ok(md)
    }

    /// ファイルメタデータを取得
    pub fn get(&self, path: &str) -> MetadataResult<Metadata> {
        let record = self.store.get(path)?;
        Metadata::deserialize(&record, &self.fields)
    }

    pub fn get_size(&self, path: &str) -> MetadataResult<u64> {
        Ok(self.get(path)?.size)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.store.exists(path)
    }

    /// サイズ以外の属性を更新
    #[instrument(level = "trace", name = "metadata_update", skip(self, md))]
    pub fn update(&self, path: &str, md: &Metadata) -> MetadataResult<Metadata> {
        let operand = MergeOperand::UpdateAttributes {
            record: md.serialize(&self.fields),
        };
        let merged = self.store.merge(path, &operand.serialize())?;
        Metadata::deserialize(&merged, &self.fields)
    }

    /// 書き込みに伴うサイズ更新
    ///
    /// append なら `count` だけ伸ばし、そうでなければ `offset + count` を
    /// 最高水位として適用する。更新後のサイズを返す。
    #[instrument(level = "trace", name = "update_size", skip(self))]
    pub fn update_size(&self, path: &str, count: u64, offset: u64, append: bool) -> MetadataResult<u64> {
        let delta = if append {
            count
        } else {
            offset.saturating_add(count)
        };
        let operand = MergeOperand::IncreaseSize { delta, append };
        let merged = self.store.merge(path, &operand.serialize())?;
        let size = Metadata::deserialize(&merged, &self.fields)?.size;

        tracing::debug!(
            "Updated size of {} to {} (count={}, offset={}, append={})",
            path,
            size,
            count,
            offset,
            append
        );
        Ok(size)
    }

    /// truncate 用: サイズを `size` に設定
    #[instrument(level = "trace", name = "decrease_size", skip(self))]
    pub fn decrease_size(&self, path: &str, size: u64) -> MetadataResult<u64> {
        let merged = self
            .store
            .merge(path, &MergeOperand::DecreaseSize { size }.serialize())?;
        Ok(Metadata::deserialize(&merged, &self.fields)?.size)
    }

    /// メタデータを削除
    ///
    /// 削除はブロードキャストされるため、存在しないレコードはエラーにしない。
    #[instrument(level = "trace", name = "metadata_remove", skip(self))]
    pub fn remove(&self, path: &str) -> MetadataResult<()> {
        match self.store.remove(path) {
            Ok(()) => {
                tracing::debug!("Removed metadata for {}", path);
                Ok(())
            }
            Err(MetadataError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
