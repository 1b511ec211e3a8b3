//! # psdf-rs: Shadow-aware inverse rendering from multi-view photometric stereo
//!
//! This crate jointly reconstructs geometry, spatially-varying reflectance, and
//! directional lighting from calibrated multi-view, multi-light photographs of a
//! static object. Geometry is an implicit signed-distance field; rendering is a
//! sphere-traced, shadow-aware forward pass with hand-derived analytic backward
//! passes driving a staged Adam optimization.
//!
//! ## Architecture
//!
//! The crate is organized into several modules:
//!
//! - `core`: Fundamental data structures (cameras, lights, math utilities)
//! - `field`: The implicit SDF network and the material head, with explicit
//!   forward-mode spatial tangents and reverse-mode parameter gradients
//! - `render`: Sphere tracing, shadow visibility, and the reflectance model
//! - `io`: Scene description / image-stack loading and parameter snapshots
//! - `optim`: Adam, loss functions, and the phased training loop
//!
//! ## Learning path
//!
//! This implementation prioritizes clarity over raw speed:
//! 1. Understand the math through explicit forward/backward implementations
//! 2. Verify correctness through finite-difference gradient checking
//! 3. Optimize only when profiling shows need

// Core data structures and math
pub mod core;

// Implicit geometry field and material head
pub mod field;

// Forward rendering: tracing, visibility, shading
pub mod render;

// I/O operations (scene description, image stacks, snapshots)
pub mod io;

// Optimization (Adam, losses, phased training loop)
pub mod optim;

// Re-export commonly used types at crate root for convenience
pub use crate::core::{Camera, Light, LightRig};
pub use field::{MaterialNetwork, SdfNetwork};
pub use io::{Scene, SceneError};
pub use optim::{Phase, TrainConfig, Trainer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
