//! Ledge Core Library
//!
//! This crate provides a shelf/checkpoint engine for working copies:
//! capturing local modifications as versioned checkpoints, reverting the
//! working copy to its baseline, and replaying checkpoints back with
//! three-way conflict detection and all-or-nothing application.

pub mod codec;
pub mod error;
pub mod extractor;
pub mod manager;
pub mod replay;
pub mod store;
pub mod types;
pub mod workspace;

// Re-export commonly used types
pub use error::{LedgeError, LedgeResult};
pub use extractor::DeltaExtractor;
pub use manager::{ShelfManager, ShelfManagerConfig};
pub use replay::ApplyOutcome;
pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use types::*;
pub use workspace::WorkingCopy;
