//! Loss terms with analytic gradients.
//!
//! Every term returns `(loss, adjoint)` for a single sample; the trainer
//! applies the configured weights and normalization and feeds the adjoints
//! into the backward passes. Keeping the terms per-sample (instead of
//! per-image) matches the ray-batched optimization: excluded rays simply
//! never call into here, so they contribute exactly zero loss and gradient.

use crate::field::MaterialSample;
use nalgebra::Vector3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossKind {
    L1,
    L2,
}

/// Photometric error between predicted and observed radiance for one
/// (pixel, light) sample. Returns (loss, dL/d_predicted).
pub fn photometric_term(
    kind: LossKind,
    predicted: &Vector3<f32>,
    observed: &Vector3<f32>,
) -> (f32, Vector3<f32>) {
    let diff = predicted - observed;
    match kind {
        LossKind::L2 => (diff.dot(&diff), diff * 2.0),
        LossKind::L1 => {
            let loss = diff.x.abs() + diff.y.abs() + diff.z.abs();
            let grad = Vector3::new(signum0(diff.x), signum0(diff.y), signum0(diff.z));
            (loss, grad)
        }
    }
}

fn signum0(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Normal-consistency term: L1 between the rendered analytic normal and the
/// independently estimated target normal. Returns (loss, dL/d_normal).
pub fn normal_consistency_term(
    normal: &Vector3<f32>,
    target: &Vector3<f32>,
) -> (f32, Vector3<f32>) {
    let diff = normal - target;
    let loss = diff.x.abs() + diff.y.abs() + diff.z.abs();
    let grad = Vector3::new(signum0(diff.x), signum0(diff.y), signum0(diff.z));
    (loss, grad)
}

/// Eikonal term at one sample point: (|∇f| - 1)². Returns
/// (loss, dL/d_gradient). A valid distance field has unit gradient
/// everywhere, so this is the regularizer keeping the field an SDF.
pub fn eikonal_term(gradient: &Vector3<f32>) -> (f32, Vector3<f32>) {
    let norm = gradient.norm();
    if norm < 1e-8 {
        // Degenerate gradient: no useful direction to push.
        return (1.0, Vector3::zeros());
    }
    let dev = norm - 1.0;
    (dev * dev, gradient * (2.0 * dev / norm))
}

/// Material smoothness between two nearby surface samples: squared
/// difference over all reflectance channels. Returns
/// (loss, adjoints for sample a, adjoints for sample b).
///
/// The adjoints are (d_albedo, d_roughness, d_specular) triples matching
/// `MaterialNetwork::backward`.
#[allow(clippy::type_complexity)]
pub fn smoothness_term(
    a: &MaterialSample,
    b: &MaterialSample,
) -> (f32, (Vector3<f32>, f32, f32), (Vector3<f32>, f32, f32)) {
    let da = a.albedo - b.albedo;
    let dr = a.roughness - b.roughness;
    let ds = a.specular - b.specular;
    let loss = da.dot(&da) + dr * dr + ds * ds;
    let ga = (da * 2.0, 2.0 * dr, 2.0 * ds);
    let gb = (da * -2.0, -2.0 * dr, -2.0 * ds);
    (loss, ga, gb)
}
