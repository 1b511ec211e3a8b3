//! The material head: spatially-varying reflectance parameters.
//!
//! Maps (surface point, geometry feature) to diffuse albedo, roughness and a
//! specular coefficient. All outputs are squashed through sigmoids so the
//! optimizer works in unconstrained space, mirroring the light
//! reparameterization. The head is a plain first-order MLP with ReLU hidden
//! activations; the second-order machinery of the SDF network is not needed
//! here because material smoothness is measured by finite spatial pairs, not
//! analytic gradients.

use super::linear::Linear;
use crate::core::math::sigmoid;
use nalgebra::Vector3;
use rand::Rng;

/// Lower bound on roughness; keeps the specular exponent finite.
pub const ROUGHNESS_MIN: f32 = 0.05;

#[derive(Clone, Debug)]
pub struct MaterialConfig {
    /// Geometry feature size (must match the SDF network's `feature_dim`).
    pub feature_dim: usize,
    /// Width of each hidden layer.
    pub hidden_dim: usize,
    /// Number of hidden layers.
    pub n_hidden_layers: usize,
}

impl Default for MaterialConfig {
    fn default() -> Self {
        Self {
            feature_dim: 8,
            hidden_dim: 64,
            n_hidden_layers: 2,
        }
    }
}

/// Reflectance parameters at one surface point.
#[derive(Clone, Copy, Debug)]
pub struct MaterialSample {
    /// Diffuse albedo, per channel in (0, 1).
    pub albedo: Vector3<f32>,
    /// Roughness in (ROUGHNESS_MIN, 1).
    pub roughness: f32,
    /// Specular coefficient in (0, 1).
    pub specular: f32,
}

/// Cached activations for the backward pass.
#[derive(Clone, Debug)]
pub struct MaterialCache {
    /// Per layer: input values.
    inputs: Vec<Vec<f32>>,
    /// Per hidden layer: pre-activation values.
    pres: Vec<Vec<f32>>,
    /// Raw (pre-sigmoid) outputs.
    raw: Vec<f32>,
}

#[derive(Clone, Debug)]
pub struct MaterialNetwork {
    pub cfg: MaterialConfig,
    layers: Vec<Linear>,
}

/// Raw output layout: [albedo r, g, b, roughness, specular]
const N_OUT: usize = 5;

impl MaterialNetwork {
    pub fn new(cfg: MaterialConfig, rng: &mut impl Rng) -> Self {
        let in_dim = 3 + cfg.feature_dim;
        let mut layers = Vec::with_capacity(cfg.n_hidden_layers + 1);
        let mut d = in_dim;
        for _ in 0..cfg.n_hidden_layers {
            layers.push(Linear::xavier(d, cfg.hidden_dim, rng));
            d = cfg.hidden_dim;
        }
        layers.push(Linear::xavier(d, N_OUT, rng));
        Self { cfg, layers }
    }

    pub fn param_count(&self) -> usize {
        self.layers.iter().map(|l| l.param_count()).sum()
    }

    pub fn params_to_vec(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.param_count());
        for layer in &self.layers {
            layer.write_params(&mut out);
        }
        out
    }

    pub fn load_params(&mut self, flat: &[f32]) {
        assert_eq!(flat.len(), self.param_count());
        let mut offset = 0;
        for layer in self.layers.iter_mut() {
            offset = layer.read_params(flat, offset);
        }
    }

    /// Evaluate the material at (point, feature).
    pub fn evaluate(&self, point: &Vector3<f32>, feature: &[f32]) -> (MaterialSample, MaterialCache) {
        assert_eq!(feature.len(), self.cfg.feature_dim);
        let mut x: Vec<f32> = Vec::with_capacity(3 + feature.len());
        x.extend_from_slice(&[point.x, point.y, point.z]);
        x.extend_from_slice(feature);

        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut pres = Vec::with_capacity(self.cfg.n_hidden_layers);
        for i in 0..self.cfg.n_hidden_layers {
            inputs.push(x.clone());
            let z = self.layers[i].forward(&x);
            pres.push(z.clone());
            x = z.iter().map(|&v| v.max(0.0)).collect();
        }
        inputs.push(x.clone());
        let raw = self.layers[self.cfg.n_hidden_layers].forward(&x);

        let sample = MaterialSample {
            albedo: Vector3::new(sigmoid(raw[0]), sigmoid(raw[1]), sigmoid(raw[2])),
            roughness: ROUGHNESS_MIN + (1.0 - ROUGHNESS_MIN) * sigmoid(raw[3]),
            specular: sigmoid(raw[4]),
        };
        (
            sample,
            MaterialCache {
                inputs,
                pres,
                raw,
            },
        )
    }

    /// Accumulate parameter gradients; returns (point adjoint, feature adjoint).
    ///
    /// `d_albedo`/`d_roughness`/`d_specular` are the upstream adjoints on the
    /// squashed outputs. `grads` must be `param_count()` long, aligned with
    /// `params_to_vec`.
    pub fn backward(
        &self,
        cache: &MaterialCache,
        d_albedo: &Vector3<f32>,
        d_roughness: f32,
        d_specular: f32,
        grads: &mut [f32],
    ) -> (Vector3<f32>, Vec<f32>) {
        assert_eq!(grads.len(), self.param_count());

        // Through the sigmoid squashers: dσ/dx = σ(1-σ).
        let mut raw_bar = vec![0.0f32; N_OUT];
        for c in 0..3 {
            let s = sigmoid(cache.raw[c]);
            raw_bar[c] = d_albedo[c] * s * (1.0 - s);
        }
        let s3 = sigmoid(cache.raw[3]);
        raw_bar[3] = d_roughness * (1.0 - ROUGHNESS_MIN) * s3 * (1.0 - s3);
        let s4 = sigmoid(cache.raw[4]);
        raw_bar[4] = d_specular * s4 * (1.0 - s4);

        // Layer offsets in the flat buffer.
        let mut offsets = Vec::with_capacity(self.layers.len());
        let mut off = 0;
        for layer in &self.layers {
            offsets.push(off);
            off += layer.param_count();
        }

        let n = self.cfg.n_hidden_layers;
        let mut bar = {
            let layer = &self.layers[n];
            let (dw, db) = slice_wb(grads, offsets[n], layer.w.len(), layer.b.len());
            layer.backward(&cache.inputs[n], &raw_bar, dw, db)
        };

        for i in (0..n).rev() {
            // ReLU gate.
            for (b, &z) in bar.iter_mut().zip(cache.pres[i].iter()) {
                if z <= 0.0 {
                    *b = 0.0;
                }
            }
            let layer = &self.layers[i];
            let (dw, db) = slice_wb(grads, offsets[i], layer.w.len(), layer.b.len());
            bar = layer.backward(&cache.inputs[i], &bar, dw, db);
        }

        let point_bar = Vector3::new(bar[0], bar[1], bar[2]);
        let feature_bar = bar[3..].to_vec();
        (point_bar, feature_bar)
    }
}

fn slice_wb(grads: &mut [f32], off: usize, nw: usize, nb: usize) -> (&mut [f32], &mut [f32]) {
    let (_, rest) = grads.split_at_mut(off);
    let (wb, _) = rest.split_at_mut(nw + nb);
    wb.split_at_mut(nw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_head(seed: u64) -> MaterialNetwork {
        let cfg = MaterialConfig {
            feature_dim: 4,
            hidden_dim: 10,
            n_hidden_layers: 2,
        };
        let mut rng = StdRng::seed_from_u64(seed);
        MaterialNetwork::new(cfg, &mut rng)
    }

    #[test]
    fn test_outputs_in_valid_ranges() {
        let head = small_head(1);
        let (m, _) = head.evaluate(&Vector3::new(0.3, -0.2, 0.5), &[0.1, -0.4, 0.2, 0.8]);
        for c in 0..3 {
            assert!(m.albedo[c] > 0.0 && m.albedo[c] < 1.0);
        }
        assert!(m.roughness > ROUGHNESS_MIN && m.roughness < 1.0);
        assert!(m.specular > 0.0 && m.specular < 1.0);
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let mut head = small_head(2);
        let point = Vector3::new(0.2, 0.4, -0.1);
        let feature = vec![0.3f32, -0.6, 0.1, 0.5];

        // Probe loss touching all outputs.
        let da = Vector3::new(0.7, -0.3, 0.5);
        let (dr, ds) = (0.4f32, -0.8f32);
        let loss = |head: &MaterialNetwork, point: &Vector3<f32>, feature: &[f32]| -> f32 {
            let (m, _) = head.evaluate(point, feature);
            da.dot(&m.albedo) + dr * m.roughness + ds * m.specular
        };

        let (_, cache) = head.evaluate(&point, &feature);
        let mut grads = vec![0.0f32; head.param_count()];
        let (point_bar, feature_bar) = head.backward(&cache, &da, dr, ds, &mut grads);

        let eps = 1e-3f32;
        let mut flat = head.params_to_vec();
        let n = flat.len();
        for &idx in &[0usize, 5, n / 2, n - 3, n - 1] {
            let base = flat[idx];
            flat[idx] = base + eps;
            head.load_params(&flat);
            let lp = loss(&head, &point, &feature);
            flat[idx] = base - eps;
            head.load_params(&flat);
            let lm = loss(&head, &point, &feature);
            flat[idx] = base;
            head.load_params(&flat);
            let numerical = (lp - lm) / (2.0 * eps);
            assert!(
                (numerical - grads[idx]).abs() < 1e-2_f32.max(0.05 * numerical.abs()),
                "param {idx}: numerical={numerical} analytical={}",
                grads[idx]
            );
        }

        // Input adjoints.
        for axis in 0..3 {
            let mut dp = Vector3::zeros();
            dp[axis] = eps;
            let numerical = (loss(&head, &(point + dp), &feature)
                - loss(&head, &(point - dp), &feature))
                / (2.0 * eps);
            assert_relative_eq!(numerical, point_bar[axis], epsilon = 1e-2);
        }
        for i in 0..feature.len() {
            let mut fp = feature.clone();
            fp[i] += eps;
            let mut fm = feature.clone();
            fm[i] -= eps;
            let numerical =
                (loss(&head, &point, &fp) - loss(&head, &point, &fm)) / (2.0 * eps);
            assert_relative_eq!(numerical, feature_bar[i], epsilon = 1e-2);
        }
    }
}
