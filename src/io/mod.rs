//! I/O operations for loading and saving data.
//!
//! This module handles all file format parsing and export:
//! - Scene descriptions (params.json + per-view image stacks)
//! - Parameter snapshots (trained field/material/light state)

mod scene;
mod snapshot;

// Re-export public types and functions
pub use scene::{linear_f32_to_srgb_u8, srgb_u8_to_linear_f32, Scene, SceneError, SceneParams, ViewData};
pub use snapshot::{load_snapshot, save_snapshot, Snapshot, SnapshotError};
