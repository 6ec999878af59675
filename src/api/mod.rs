/// scatterfs client API
///
/// Whole-file operations addressed by absolute path. Metadata calls go to the
/// path's metadata host; reads and writes fan out to the chunk owners.
pub mod file_ops;
pub mod scatter;
pub mod types;

// Re-export main types
pub use file_ops::*;
pub use scatter::{HostSlice, IoPlan, ScatterGather, ScatterOutcome};
pub use types::*;
