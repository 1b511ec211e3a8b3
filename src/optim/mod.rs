//! Optimization components (Adam, losses, the phased training loop).
//!
//! This module contains everything needed for the joint optimization:
//! - Adam optimizer over flat parameter buffers and small vector sets
//! - Loss functions with analytic gradients
//! - Phase schedule and training orchestration

pub mod adam;
pub mod loss;
pub mod trainer;

pub use adam::{AdamF32, AdamVec3};
pub use loss::LossKind;
pub use trainer::{Phase, StepStats, TrainConfig, TrainError, Trainer};
