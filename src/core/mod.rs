//! Core data structures and mathematical operations.
//!
//! This module contains the fundamental types used throughout the system:
//! - `Camera`: Camera intrinsics and extrinsics, ray generation
//! - `Light`: Directional light with refinable parameters
//! - Math utilities: activations, ray/sphere helpers
//!
//! All types here are "pure data" - no I/O, no rendering logic.

mod camera;
mod light;
pub mod math;

// Re-export public types
pub use camera::Camera;
pub use light::{Light, LightRig};
pub use math::{inverse_sigmoid, ray_sphere_intersect, sigmoid, softplus, softplus_prime};
