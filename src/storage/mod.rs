// ストレージ層モジュール
pub mod chunk_store;
pub mod error;
pub mod io_pool;

pub use chunk_store::{ChunkStat, ChunkStorage};
pub use error::{ChunkStorageError, ChunkStorageResult};
pub use io_pool::{TaskHandle, TaskPool};
