// データ配置モジュール
pub mod chunking;
pub mod placement;

pub use chunking::{ChunkManager, ChunkSegment, ChunkSpan, ChunkingError, ChunkingResult};
pub use placement::{Distributor, GuidedTable, HostId, PlacementError, PlacementResult, path_hash};
