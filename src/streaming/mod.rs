//! Chunk residency, background loading and the per-tick streaming loop

pub mod budget;
pub mod chunk_loader;
pub mod chunk_manager;
pub mod manager;
pub mod priority;

pub use budget::{FrameBudget, MemoryBudget};
pub use chunk_loader::{ChunkLoader, LoadRequest, LoadResult};
pub use chunk_manager::ChunkManager;
pub use manager::{LoadMode, StreamingManager, StreamingStats};
pub use priority::{ChunkPriority, ChunkPriorityQueue};
