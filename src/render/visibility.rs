//! Shadow visibility: how much of a light reaches a surface point.
//!
//! Two strategies exist, selected once at scene-load time:
//!
//! - **Cached**: a precomputed per-(view, pixel, light) occlusion mask,
//!   read-only during optimization.
//! - **Traced**: march a secondary ray from the surface point toward the
//!   light through the same distance field. The result is a soft factor in
//!   [0, 1] from the minimum distance/travel ratio along the ray, so the
//!   shadow term has usable gradients instead of a hard step.
//!
//! Visibility is treated as a constant in the backward pass: shadow-ray
//! gradients into geometry are noisy enough to destabilize the surface, so
//! they are detached while the primary-hit gradients carry the geometry.

use super::tracer::DistanceField;
use crate::core::math::ray_sphere_intersect;
use nalgebra::Vector3;

#[derive(Clone, Copy, Debug)]
pub struct ShadowConfig {
    /// Start offset along the shadow ray, past the surface's own epsilon band.
    pub start_offset: f32,
    /// Softness factor k in min(k * d / t); larger is sharper.
    pub softness: f32,
    /// Distance below which the shadow ray counts as blocked outright.
    pub hit_eps: f32,
    /// Step budget for the shadow march.
    pub max_steps: usize,
    /// How far toward the light to march (directional lights: scene extent).
    pub max_distance: f32,
    /// Radius of the bounding sphere the geometry lives in. The march never
    /// leaves it: outside, a learned field is unconstrained and can report
    /// spuriously small distances.
    pub bound_radius: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            start_offset: 0.02,
            softness: 16.0,
            hit_eps: 1e-3,
            max_steps: 64,
            max_distance: 4.0,
            bound_radius: 1.0,
        }
    }
}

/// Precomputed binary occlusion masks, aligned to image pixels.
///
/// `masks[view][light][pixel]` is true where the light is visible.
#[derive(Clone, Debug)]
pub struct VisibilityCache {
    pub masks: Vec<Vec<Vec<bool>>>,
}

impl VisibilityCache {
    pub fn lookup(&self, view: usize, light: usize, pixel: usize) -> f32 {
        if self.masks[view][light][pixel] {
            1.0
        } else {
            0.0
        }
    }
}

/// The visibility strategy chosen for a scene.
#[derive(Clone, Debug)]
pub enum VisibilityMode {
    Cached(VisibilityCache),
    Traced(ShadowConfig),
}

impl VisibilityMode {
    /// Visibility of `light_dir` (unit, surface → light) from `point`,
    /// in [0, 1]. `pixel` indexes the cached mask when present.
    pub fn visibility<F: DistanceField + ?Sized>(
        &self,
        field: &F,
        view: usize,
        light: usize,
        pixel: usize,
        point: &Vector3<f32>,
        normal: &Vector3<f32>,
        light_dir: &Vector3<f32>,
    ) -> f32 {
        match self {
            VisibilityMode::Cached(cache) => cache.lookup(view, light, pixel),
            VisibilityMode::Traced(cfg) => {
                // Nudge off the surface along the normal so the march does
                // not immediately re-find the point it started from.
                let origin = point + normal * cfg.start_offset;
                soft_shadow(field, &origin, light_dir, cfg)
            }
        }
    }
}

/// Soft shadow march: vis = clamp(min_t k * d(t) / t), 0 on a hard hit.
/// The march stops at the bounding-sphere exit or `max_distance`, whichever
/// comes first; a ray already outside the bound is unoccluded.
pub fn soft_shadow<F: DistanceField + ?Sized>(
    field: &F,
    origin: &Vector3<f32>,
    dir: &Vector3<f32>,
    cfg: &ShadowConfig,
) -> f32 {
    let Some((_, t_exit)) = ray_sphere_intersect(origin, dir, cfg.bound_radius) else {
        return 1.0;
    };
    let far = t_exit.min(cfg.max_distance);

    let mut t = cfg.start_offset;
    let mut vis = 1.0f32;
    for _ in 0..cfg.max_steps {
        if t >= far {
            break;
        }
        let d = field.distance(&(origin + dir * t));
        if !d.is_finite() || d < cfg.hit_eps {
            return 0.0;
        }
        vis = vis.min(cfg.softness * d / t);
        t += d;
    }
    vis.clamp(0.0, 1.0)
}
