//! Forward rendering: ray tracing against the implicit surface, shadow
//! visibility, and the reflectance model.
//!
//! No parameter updates happen here; backward helpers live next to their
//! forward ops so the math stays reviewable in one place.

mod shade;
mod tracer;
mod visibility;

pub use shade::{shade, shade_backward, ShadeGrads, ShadeInputs};
pub use tracer::{
    implicit_sdf_adjoint, DistanceField, SphereTracer, TraceConfig, TraceHit,
};
pub use visibility::{soft_shadow, ShadowConfig, VisibilityCache, VisibilityMode};
