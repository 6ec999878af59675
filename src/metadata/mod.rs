// メタデータ管理モジュール
pub mod kv;
pub mod manager;
pub mod merge;
pub mod types;

pub use kv::{KvStore, MemoryKvStore};
pub use manager::{MetadataError, MetadataManager, MetadataResult};
pub use merge::{MergeOperand, MetadataMergeOperator};
pub use types::{ChunkId, Metadata, MetadataFields};
