//! Directional lights with refinable parameters.
//!
//! Lights are stored in optimization space:
//! - direction as an unconstrained 3-vector, normalized in the forward pass
//!   (the unit-norm invariant holds by construction)
//! - intensity as log-intensity, exponentiated in the forward pass
//!   (non-negativity holds by construction)
//!
//! This mirrors the logit/sigmoid reparameterization used elsewhere for
//! material parameters: gradients act on unconstrained values.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// A single directional light.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Light {
    /// Unconstrained direction parameter; `direction()` normalizes it.
    pub raw_direction: Vector3<f32>,

    /// Per-channel log intensity; `intensity()` exponentiates it.
    pub log_intensity: Vector3<f32>,
}

impl Light {
    /// Build a light from a calibrated unit direction and linear RGB intensity.
    pub fn from_calibration(direction: Vector3<f32>, intensity: Vector3<f32>) -> Self {
        Self {
            raw_direction: direction.normalize(),
            log_intensity: Vector3::new(
                intensity.x.max(1e-6).ln(),
                intensity.y.max(1e-6).ln(),
                intensity.z.max(1e-6).ln(),
            ),
        }
    }

    /// Unit light direction (surface → light).
    pub fn direction(&self) -> Vector3<f32> {
        self.raw_direction.normalize()
    }

    /// Linear RGB intensity, strictly positive.
    pub fn intensity(&self) -> Vector3<f32> {
        Vector3::new(
            self.log_intensity.x.exp(),
            self.log_intensity.y.exp(),
            self.log_intensity.z.exp(),
        )
    }

    /// Map a gradient w.r.t. the unit direction back to the raw parameter.
    ///
    /// u = raw/|raw|, so du/draw = (I - u uᵀ)/|raw|: only the tangential
    /// component of the upstream gradient survives.
    pub fn direction_grad_to_raw(&self, d_unit: &Vector3<f32>) -> Vector3<f32> {
        let norm = self.raw_direction.norm().max(1e-8);
        let u = self.raw_direction / norm;
        let jac = (Matrix3::identity() - u * u.transpose()) / norm;
        jac * d_unit
    }

    /// Map a gradient w.r.t. the linear intensity back to log-intensity.
    ///
    /// I = exp(log I), so dI/d(log I) = I.
    pub fn intensity_grad_to_log(&self, d_intensity: &Vector3<f32>) -> Vector3<f32> {
        let i = self.intensity();
        Vector3::new(i.x * d_intensity.x, i.y * d_intensity.y, i.z * d_intensity.z)
    }
}

/// The full set of lights for a scene.
///
/// Lights are either shared across all views (the common calibrated-rig case)
/// or specified per view. Either way, `light(view, idx)` and
/// `slot(view, idx)` give a uniform interface: `slot` is the index into the
/// flat parameter vector the optimizer updates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum LightRig {
    /// One light set shared by every view.
    Shared(Vec<Light>),

    /// An independent light set per view; outer index is the view id.
    PerView(Vec<Vec<Light>>),
}

impl LightRig {
    /// Number of lights per view.
    pub fn lights_per_view(&self) -> usize {
        match self {
            LightRig::Shared(l) => l.len(),
            LightRig::PerView(v) => v.first().map_or(0, |l| l.len()),
        }
    }

    /// Total number of independent light parameter slots.
    pub fn slot_count(&self) -> usize {
        match self {
            LightRig::Shared(l) => l.len(),
            LightRig::PerView(v) => v.iter().map(|l| l.len()).sum(),
        }
    }

    /// Flat parameter-slot index for (view, light).
    pub fn slot(&self, view: usize, light: usize) -> usize {
        match self {
            LightRig::Shared(_) => light,
            LightRig::PerView(_) => view * self.lights_per_view() + light,
        }
    }

    pub fn light(&self, view: usize, light: usize) -> &Light {
        match self {
            LightRig::Shared(l) => &l[light],
            LightRig::PerView(v) => &v[view][light],
        }
    }

    /// Iterate all parameter slots in slot order.
    pub fn slots(&self) -> Vec<&Light> {
        match self {
            LightRig::Shared(l) => l.iter().collect(),
            LightRig::PerView(v) => v.iter().flatten().collect(),
        }
    }

    /// Mutable access to all parameter slots in slot order.
    pub fn slots_mut(&mut self) -> Vec<&mut Light> {
        match self {
            LightRig::Shared(l) => l.iter_mut().collect(),
            LightRig::PerView(v) => v.iter_mut().flatten().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_direction_is_unit_norm() {
        let light = Light {
            raw_direction: Vector3::new(3.0, 0.0, 4.0),
            log_intensity: Vector3::zeros(),
        };
        assert_relative_eq!(light.direction().norm(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_intensity_is_positive() {
        let light = Light {
            raw_direction: Vector3::z(),
            log_intensity: Vector3::new(-5.0, 0.0, 2.0),
        };
        let i = light.intensity();
        assert!(i.x > 0.0 && i.y > 0.0 && i.z > 0.0);
        assert_relative_eq!(i.y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_calibration_roundtrip() {
        let light = Light::from_calibration(
            Vector3::new(0.0, 0.6, 0.8),
            Vector3::new(1.5, 2.0, 0.5),
        );
        let d = light.direction();
        assert_relative_eq!(d.y, 0.6, epsilon = 1e-5);
        assert_relative_eq!(light.intensity().x, 1.5, epsilon = 1e-5);
    }

    #[test]
    fn test_direction_grad_is_tangential() {
        let light = Light::from_calibration(Vector3::z(), Vector3::new(1.0, 1.0, 1.0));
        // Radial upstream gradient must be projected away entirely.
        let d_raw = light.direction_grad_to_raw(&Vector3::z());
        assert!(d_raw.norm() < 1e-6);
        // Tangential gradient passes through.
        let d_raw = light.direction_grad_to_raw(&Vector3::x());
        assert_relative_eq!(d_raw.x, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_direction_grad_matches_finite_difference() {
        let mut light = Light {
            raw_direction: Vector3::new(0.3, -0.5, 0.9),
            log_intensity: Vector3::zeros(),
        };
        // Scalar probe: L = direction() · probe
        let probe = Vector3::new(0.2, 0.7, -0.4);
        let analytical = light.direction_grad_to_raw(&probe);

        let eps = 1e-3;
        for axis in 0..3 {
            let base = light.raw_direction[axis];
            light.raw_direction[axis] = base + eps;
            let lp = light.direction().dot(&probe);
            light.raw_direction[axis] = base - eps;
            let lm = light.direction().dot(&probe);
            light.raw_direction[axis] = base;
            let numerical = (lp - lm) / (2.0 * eps);
            assert_relative_eq!(numerical, analytical[axis], epsilon = 1e-3);
        }
    }

    #[test]
    fn test_rig_slots_shared_vs_per_view() {
        let l = Light::from_calibration(Vector3::z(), Vector3::new(1.0, 1.0, 1.0));
        let shared = LightRig::Shared(vec![l.clone(), l.clone(), l.clone()]);
        assert_eq!(shared.slot_count(), 3);
        assert_eq!(shared.slot(5, 2), 2);

        let per_view = LightRig::PerView(vec![vec![l.clone(), l.clone()]; 4]);
        assert_eq!(per_view.slot_count(), 8);
        assert_eq!(per_view.slot(3, 1), 7);
    }
}
