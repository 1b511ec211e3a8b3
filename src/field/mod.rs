//! Implicit geometry field and material head.
//!
//! The geometry field maps a 3-D point to a signed distance and a feature
//! embedding. The material head maps (point, feature) to reflectance
//! parameters. Both are small dense networks with explicit, hand-derived
//! forward and backward passes:
//!
//! - `linear`: dense layers, plain and dual (value + spatial tangent) passes
//! - `encoding`: Fourier positional encoding of 3-D points
//! - `sdf`: the SDF network; its dual forward pass yields the analytic
//!   spatial gradient (the surface normal source) alongside the value
//! - `material`: the reflectance-parameter head
//! - `init`: fitting the field to a reference distance function
//!
//! Parameter gradients accumulate into flat `f32` buffers aligned with
//! `params_to_vec`, so one Adam instance can update an entire network.

mod encoding;
mod linear;
mod material;
mod sdf;

pub mod init;

pub use encoding::FourierEncoding;
pub use linear::{DualVec, Linear};
pub use material::{MaterialCache, MaterialConfig, MaterialNetwork, MaterialSample};
pub use sdf::{SdfCache, SdfConfig, SdfEval, SdfNetwork};
