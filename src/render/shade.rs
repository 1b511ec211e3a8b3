//! The reflectance model: radiance of a surface point under one light.
//!
//! Forward model, per light and per channel c:
//!
//!   radiance_c = vis · I_c · (albedo_c/π + s · max(n·h, 0)^m) · max(n·l, 0)
//!
//! with h the half vector between light and view directions and m a
//! Blinn-Phong exponent derived from roughness, m = 2/r². The diffuse term
//! is Lambertian; the specular lobe is achromatic and spatially varying
//! through the learned (s, r). Lights behind the surface contribute nothing:
//! the clamp zeroes both the value and every gradient path.
//!
//! The backward pass is hand-derived and exact for every differentiable
//! input except visibility, which is deliberately detached (see the
//! visibility module).

use crate::field::MaterialSample;
use nalgebra::Vector3;
use std::f32::consts::PI;

/// Everything the reflectance model reads. All directions unit length,
/// pointing away from the surface.
#[derive(Clone, Copy, Debug)]
pub struct ShadeInputs {
    pub normal: Vector3<f32>,
    pub view_dir: Vector3<f32>,
    pub light_dir: Vector3<f32>,
    /// Linear RGB light intensity.
    pub light_intensity: Vector3<f32>,
    /// Shadow visibility in [0, 1]; constant w.r.t. the backward pass.
    pub visibility: f32,
}

/// Gradients of the radiance w.r.t. the differentiable inputs, already
/// contracted with an upstream adjoint.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShadeGrads {
    pub d_albedo: Vector3<f32>,
    pub d_roughness: f32,
    pub d_specular: f32,
    pub d_normal: Vector3<f32>,
    pub d_light_dir: Vector3<f32>,
    pub d_intensity: Vector3<f32>,
}

fn specular_exponent(roughness: f32) -> f32 {
    2.0 / (roughness * roughness)
}

/// Forward radiance.
pub fn shade(inputs: &ShadeInputs, material: &MaterialSample) -> Vector3<f32> {
    let cos = inputs.normal.dot(&inputs.light_dir);
    if cos <= 0.0 {
        return Vector3::zeros();
    }

    let h = (inputs.light_dir + inputs.view_dir).normalize();
    let p = inputs.normal.dot(&h).max(0.0);
    let m = specular_exponent(material.roughness);
    let spec = if p > 0.0 {
        material.specular * p.powf(m)
    } else {
        0.0
    };

    let mut out = Vector3::zeros();
    for c in 0..3 {
        let f = material.albedo[c] / PI + spec;
        out[c] = inputs.visibility * inputs.light_intensity[c] * f * cos;
    }
    out
}

/// Backward pass: contract the radiance Jacobian with the upstream adjoint
/// `radiance_bar`. Returns zero gradients when the light is behind the
/// surface, matching the forward clamp.
pub fn shade_backward(
    inputs: &ShadeInputs,
    material: &MaterialSample,
    radiance_bar: &Vector3<f32>,
) -> ShadeGrads {
    let cos = inputs.normal.dot(&inputs.light_dir);
    if cos <= 0.0 {
        return ShadeGrads::default();
    }

    let vis = inputs.visibility;
    let h_raw = inputs.light_dir + inputs.view_dir;
    let h_norm = h_raw.norm().max(1e-8);
    let h = h_raw / h_norm;
    let p = inputs.normal.dot(&h).max(0.0);
    let m = specular_exponent(material.roughness);
    let (spec, d_spec_d_p, d_spec_d_m) = if p > 0.0 {
        let pm = p.powf(m);
        (
            material.specular * pm,
            material.specular * m * p.powf(m - 1.0),
            material.specular * pm * p.ln(),
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    let mut g = ShadeGrads::default();

    // Shared contractions.
    let mut w_sum = 0.0f32; // Σ_c r̄_c I_c
    let mut f_sum = 0.0f32; // Σ_c r̄_c I_c f_c
    for c in 0..3 {
        let rb = radiance_bar[c];
        let i_c = inputs.light_intensity[c];
        let f_c = material.albedo[c] / PI + spec;
        w_sum += rb * i_c;
        f_sum += rb * i_c * f_c;

        g.d_albedo[c] = rb * vis * i_c * cos / PI;
        g.d_intensity[c] = rb * vis * f_c * cos;
    }

    // Specular chain: spec = s * p^m.
    let d_spec = vis * cos * w_sum; // dL/d(spec)
    g.d_specular = if p > 0.0 { p.powf(m) * d_spec } else { 0.0 };
    // m = 2/r² so dm/dr = -4/r³.
    g.d_roughness = d_spec * d_spec_d_m * (-4.0 / material.roughness.powi(3));

    // Cosine path and normal/light adjoints.
    let d_cos = vis * f_sum;
    let d_p = d_spec * d_spec_d_p;

    g.d_normal = inputs.light_dir * d_cos + h * d_p;
    // l̄ via both the cosine and the half-vector: ∂h/∂l = (I - h hᵀ)/|l+v|.
    let h_jac_n = (inputs.normal - h * inputs.normal.dot(&h)) / h_norm;
    g.d_light_dir = inputs.normal * d_cos + h_jac_n * d_p;

    g
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn material() -> MaterialSample {
        MaterialSample {
            albedo: Vector3::new(0.6, 0.4, 0.2),
            roughness: 0.3,
            specular: 0.5,
        }
    }

    fn inputs() -> ShadeInputs {
        ShadeInputs {
            normal: Vector3::new(0.1, 0.2, 1.0).normalize(),
            view_dir: Vector3::new(0.3, -0.1, 1.0).normalize(),
            light_dir: Vector3::new(-0.2, 0.4, 1.0).normalize(),
            light_intensity: Vector3::new(1.2, 1.0, 0.8),
            visibility: 0.7,
        }
    }

    #[test]
    fn test_pure_lambertian_matches_closed_form() {
        let m = MaterialSample {
            albedo: Vector3::new(0.5, 0.5, 0.5),
            roughness: 0.5,
            specular: 0.0,
        };
        let inp = ShadeInputs {
            normal: Vector3::z(),
            view_dir: Vector3::z(),
            light_dir: Vector3::new(0.0, 0.6, 0.8),
            light_intensity: Vector3::new(2.0, 2.0, 2.0),
            visibility: 1.0,
        };
        let r = shade(&inp, &m);
        // radiance = I * albedo/π * cos, cos = 0.8
        let want = 2.0 * 0.5 / PI * 0.8;
        assert_relative_eq!(r.x, want, epsilon = 1e-5);
        assert_relative_eq!(r.y, want, epsilon = 1e-5);
    }

    #[test]
    fn test_light_behind_surface_is_zero() {
        let inp = ShadeInputs {
            normal: Vector3::z(),
            view_dir: Vector3::z(),
            light_dir: -Vector3::z(),
            light_intensity: Vector3::new(1.0, 1.0, 1.0),
            visibility: 1.0,
        };
        assert_eq!(shade(&inp, &material()), Vector3::zeros());
        let g = shade_backward(&inp, &material(), &Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(g.d_albedo, Vector3::zeros());
        assert_eq!(g.d_normal, Vector3::zeros());
    }

    #[test]
    fn test_visibility_scales_linearly() {
        let mut inp = inputs();
        inp.visibility = 1.0;
        let full = shade(&inp, &material());
        inp.visibility = 0.25;
        let quarter = shade(&inp, &material());
        assert_relative_eq!(quarter.x, full.x * 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let inp = inputs();
        let mat = material();
        let r_bar = Vector3::new(0.9, -0.4, 0.6);
        let g = shade_backward(&inp, &mat, &r_bar);

        let loss = |inp: &ShadeInputs, mat: &MaterialSample| shade(inp, mat).dot(&r_bar);
        let eps = 1e-3f32;

        // Albedo.
        for c in 0..3 {
            let mut mp = mat;
            mp.albedo[c] += eps;
            let mut mm = mat;
            mm.albedo[c] -= eps;
            let numerical = (loss(&inp, &mp) - loss(&inp, &mm)) / (2.0 * eps);
            assert_relative_eq!(numerical, g.d_albedo[c], epsilon = 1e-3);
        }

        // Roughness and specular.
        let mut mp = mat;
        mp.roughness += eps;
        let mut mm = mat;
        mm.roughness -= eps;
        let numerical = (loss(&inp, &mp) - loss(&inp, &mm)) / (2.0 * eps);
        assert_relative_eq!(numerical, g.d_roughness, epsilon = 2e-2_f32.max(0.02 * numerical.abs()));

        let mut mp = mat;
        mp.specular += eps;
        let mut mm = mat;
        mm.specular -= eps;
        let numerical = (loss(&inp, &mp) - loss(&inp, &mm)) / (2.0 * eps);
        assert_relative_eq!(numerical, g.d_specular, epsilon = 1e-2);

        // Intensity.
        for c in 0..3 {
            let mut ip = inp;
            ip.light_intensity[c] += eps;
            let mut im = inp;
            im.light_intensity[c] -= eps;
            let numerical = (loss(&ip, &mat) - loss(&im, &mat)) / (2.0 * eps);
            assert_relative_eq!(numerical, g.d_intensity[c], epsilon = 1e-3);
        }

        // Normal (unnormalized perturbation is fine for a directional check
        // as long as the forward pass sees the perturbed vector directly).
        for axis in 0..3 {
            let mut dp = Vector3::zeros();
            dp[axis] = eps;
            let mut ip = inp;
            ip.normal = inp.normal + dp;
            let mut im = inp;
            im.normal = inp.normal - dp;
            let numerical = (loss(&ip, &mat) - loss(&im, &mat)) / (2.0 * eps);
            assert_relative_eq!(numerical, g.d_normal[axis], epsilon = 2e-2_f32.max(0.02 * numerical.abs()));
        }

        // Light direction.
        for axis in 0..3 {
            let mut dp = Vector3::zeros();
            dp[axis] = eps;
            let mut ip = inp;
            ip.light_dir = inp.light_dir + dp;
            let mut im = inp;
            im.light_dir = inp.light_dir - dp;
            let numerical = (loss(&ip, &mat) - loss(&im, &mat)) / (2.0 * eps);
            assert_relative_eq!(numerical, g.d_light_dir[axis], epsilon = 2e-2_f32.max(0.02 * numerical.abs()));
        }
    }
}
