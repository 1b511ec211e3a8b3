//! The implicit signed-distance network.
//!
//! `evaluate` returns the signed distance, its analytic spatial gradient
//! (source of surface normals and the eikonal term), and a feature embedding
//! consumed by the material head — all from one dual forward pass. `backward`
//! accepts adjoints on all three outputs and accumulates parameter gradients
//! into a flat buffer.
//!
//! Initialization is geometric: the network starts out approximating the
//! signed distance of an origin-centered sphere, so early sphere tracing has
//! a sane surface to find. A better initial surface (fit to coarse normals)
//! is produced by `field::init`.

use super::encoding::FourierEncoding;
use super::linear::{sample_normal, DualVec, Linear};
use crate::core::math::{softplus, softplus_prime, softplus_second};
use nalgebra::Vector3;
use rand::Rng;

#[derive(Clone, Debug)]
pub struct SdfConfig {
    /// Fourier encoding octaves.
    pub n_frequencies: usize,
    /// Width of each hidden layer.
    pub hidden_dim: usize,
    /// Number of hidden layers; a skip connection re-injects the encoded
    /// input at the middle layer when there are at least three.
    pub n_hidden_layers: usize,
    /// Feature embedding size handed to the material head.
    pub feature_dim: usize,
    /// Softplus sharpness for the hidden activations.
    pub softplus_beta: f32,
    /// Radius of the initialization sphere.
    pub sphere_radius: f32,
}

impl Default for SdfConfig {
    fn default() -> Self {
        Self {
            n_frequencies: 6,
            hidden_dim: 64,
            n_hidden_layers: 4,
            feature_dim: 8,
            softplus_beta: 100.0,
            sphere_radius: 0.6,
        }
    }
}

/// One field evaluation: value, spatial gradient, feature embedding.
#[derive(Clone, Debug)]
pub struct SdfEval {
    pub sdf: f32,
    pub gradient: Vector3<f32>,
    pub feature: Vec<f32>,
}

/// Cached activations from a dual forward pass, consumed by `backward`.
#[derive(Clone, Debug)]
pub struct SdfCache {
    layers: Vec<LayerCache>,
}

#[derive(Clone, Debug)]
struct LayerCache {
    /// Input to the layer (after any skip concatenation).
    input: DualVec,
    /// Pre-activation output.
    pre: DualVec,
}

#[derive(Clone, Debug)]
pub struct SdfNetwork {
    pub cfg: SdfConfig,
    encoding: FourierEncoding,
    layers: Vec<Linear>,
    skip_layer: Option<usize>,
}

impl SdfNetwork {
    /// Build a network with geometric (sphere) initialization.
    pub fn new(cfg: SdfConfig, rng: &mut impl Rng) -> Self {
        let encoding = FourierEncoding::new(cfg.n_frequencies);
        let enc_dim = encoding.out_dim();
        let skip_layer = if cfg.n_hidden_layers >= 3 {
            Some(cfg.n_hidden_layers / 2)
        } else {
            None
        };

        let mut layers = Vec::with_capacity(cfg.n_hidden_layers + 1);
        for i in 0..cfg.n_hidden_layers {
            let in_dim = if i == 0 {
                enc_dim
            } else if skip_layer == Some(i) {
                cfg.hidden_dim + enc_dim
            } else {
                cfg.hidden_dim
            };
            let mut layer = Linear::zeros(in_dim, cfg.hidden_dim);
            let std = (2.0f32).sqrt() / (cfg.hidden_dim as f32).sqrt();
            for w in layer.w.iter_mut() {
                *w = sample_normal(rng) * std;
            }
            // Zero the columns fed by the high-frequency encoding components
            // so the initial field is the smooth sphere, not encoding noise.
            if i == 0 {
                for o in 0..layer.out_dim {
                    for c in 3..enc_dim {
                        layer.w[o * layer.in_dim + c] = 0.0;
                    }
                }
            }
            if skip_layer == Some(i) {
                for o in 0..layer.out_dim {
                    for c in cfg.hidden_dim + 3..in_dim {
                        layer.w[o * layer.in_dim + c] = 0.0;
                    }
                }
            }
            layers.push(layer);
        }

        // Output layer: row 0 is the signed distance, remaining rows the
        // feature embedding. Geometric init puts the zero level-set near the
        // configured sphere.
        let out_dim = 1 + cfg.feature_dim;
        let mut out = Linear::zeros(cfg.hidden_dim, out_dim);
        let sdf_mean = (std::f32::consts::PI / cfg.hidden_dim as f32).sqrt();
        for i in 0..cfg.hidden_dim {
            out.w[i] = sdf_mean + sample_normal(rng) * 1e-4;
        }
        out.b[0] = -cfg.sphere_radius;
        let feat_std = (2.0f32).sqrt() / (cfg.hidden_dim as f32).sqrt();
        for o in 1..out_dim {
            for i in 0..cfg.hidden_dim {
                out.w[o * cfg.hidden_dim + i] = sample_normal(rng) * feat_std * 0.1;
            }
        }
        layers.push(out);

        Self {
            cfg,
            encoding,
            layers,
            skip_layer,
        }
    }

    /// Total number of parameters in the flat layout.
    pub fn param_count(&self) -> usize {
        self.layers.iter().map(|l| l.param_count()).sum()
    }

    /// Flatten all parameters (layer order, weights then biases).
    pub fn params_to_vec(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.param_count());
        for layer in &self.layers {
            layer.write_params(&mut out);
        }
        out
    }

    /// Load parameters from a flat vector produced by `params_to_vec`.
    pub fn load_params(&mut self, flat: &[f32]) {
        assert_eq!(flat.len(), self.param_count());
        let mut offset = 0;
        for layer in self.layers.iter_mut() {
            offset = layer.read_params(flat, offset);
        }
    }

    /// Signed distance only, no tangents or cache. Used by the tracers.
    pub fn value(&self, p: &Vector3<f32>) -> f32 {
        let encoded = self.encoding.encode_value(p);
        let mut x = encoded.clone();
        for i in 0..self.cfg.n_hidden_layers {
            if self.skip_layer == Some(i) {
                x.extend_from_slice(&encoded);
            }
            let z = self.layers[i].forward(&x);
            x = z
                .iter()
                .map(|&v| softplus(v, self.cfg.softplus_beta))
                .collect();
        }
        self.layers[self.cfg.n_hidden_layers].forward(&x)[0]
    }

    /// Full dual evaluation: value, spatial gradient, feature, plus the
    /// cache needed for the backward pass.
    pub fn evaluate(&self, p: &Vector3<f32>) -> (SdfEval, SdfCache) {
        let encoded = self.encoding.encode(p);
        let mut x = encoded.clone();
        let mut caches = Vec::with_capacity(self.layers.len());

        for i in 0..self.cfg.n_hidden_layers {
            if self.skip_layer == Some(i) {
                x = DualVec::concat(&x, &encoded);
            }
            let pre = self.layers[i].forward_dual(&x);
            let mut act = DualVec::zeros(pre.len());
            for j in 0..pre.len() {
                act.val[j] = softplus(pre.val[j], self.cfg.softplus_beta);
                act.tan[j] = pre.tan[j] * softplus_prime(pre.val[j], self.cfg.softplus_beta);
            }
            caches.push(LayerCache { input: x, pre });
            x = act;
        }

        let out = self.layers[self.cfg.n_hidden_layers].forward_dual(&x);
        caches.push(LayerCache {
            input: x,
            pre: out.clone(),
        });

        let eval = SdfEval {
            sdf: out.val[0],
            gradient: out.tan[0],
            feature: out.val[1..].to_vec(),
        };
        (eval, SdfCache { layers: caches })
    }

    /// Accumulate parameter gradients for one evaluation.
    ///
    /// `sdf_bar` is dL/d(sdf), `grad_bar` is dL/d(spatial gradient), and
    /// `feat_bar` is dL/d(feature) (may be empty for no feature adjoint).
    /// Gradients are added into `grads`, which must be `param_count()` long
    /// and aligned with `params_to_vec`.
    pub fn backward(
        &self,
        cache: &SdfCache,
        sdf_bar: f32,
        grad_bar: &Vector3<f32>,
        feat_bar: &[f32],
        grads: &mut [f32],
    ) {
        assert_eq!(grads.len(), self.param_count());
        let beta = self.cfg.softplus_beta;

        // Seed the output-layer adjoints.
        let out_dim = 1 + self.cfg.feature_dim;
        let mut out_bar = vec![0.0f32; out_dim];
        let mut out_tan_bar = vec![Vector3::zeros(); out_dim];
        out_bar[0] = sdf_bar;
        out_tan_bar[0] = *grad_bar;
        for (j, &fb) in feat_bar.iter().enumerate() {
            out_bar[1 + j] = fb;
        }

        // Output layer.
        let n = self.cfg.n_hidden_layers;
        let (dw_slices, _) = self.grad_offsets();
        let (off, nw, nb) = dw_slices[n];
        let (dw, db) = split_wb(grads, off, nw, nb);
        let (mut in_bar, mut in_tan_bar) =
            self.layers[n].backward_dual(&cache.layers[n].input, &out_bar, &out_tan_bar, dw, db);

        // Hidden layers, in reverse, through the softplus activation.
        for i in (0..n).rev() {
            let pre = &cache.layers[i].pre;
            let mut z_bar = vec![0.0f32; pre.len()];
            let mut z_tan_bar = vec![Vector3::zeros(); pre.len()];
            for j in 0..pre.len() {
                let sp1 = softplus_prime(pre.val[j], beta);
                let sp2 = softplus_second(pre.val[j], beta);
                // a = softplus(z), ta = softplus'(z) * tz:
                //   dL/dz = ā softplus'(z) + (t̄a · tz) softplus''(z)
                //   dL/dtz = softplus'(z) t̄a
                z_bar[j] = in_bar[j] * sp1 + in_tan_bar[j].dot(&pre.tan[j]) * sp2;
                z_tan_bar[j] = in_tan_bar[j] * sp1;
            }
            let (off, nw, nb) = dw_slices[i];
            let (dw, db) = split_wb(grads, off, nw, nb);
            let (ib, itb) =
                self.layers[i].backward_dual(&cache.layers[i].input, &z_bar, &z_tan_bar, dw, db);
            in_bar = ib;
            in_tan_bar = itb;

            // The skip concatenation has no parameters: drop the adjoint of
            // the re-injected encoding, keep the part flowing to layer i-1.
            if self.skip_layer == Some(i) && i > 0 {
                in_bar.truncate(self.cfg.hidden_dim);
                in_tan_bar.truncate(self.cfg.hidden_dim);
            }
        }
    }

    /// (offset, n_weights, n_biases) of every layer in the flat buffer.
    fn grad_offsets(&self) -> (Vec<(usize, usize, usize)>, usize) {
        let mut out = Vec::with_capacity(self.layers.len());
        let mut offset = 0;
        for layer in &self.layers {
            out.push((offset, layer.w.len(), layer.b.len()));
            offset += layer.param_count();
        }
        (out, offset)
    }
}

/// Split a flat gradient buffer into the (weights, biases) slices of one layer.
fn split_wb(grads: &mut [f32], off: usize, nw: usize, nb: usize) -> (&mut [f32], &mut [f32]) {
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

    fn small_net(seed: u64) -> SdfNetwork {
        let cfg = SdfConfig {
            n_frequencies: 2,
            hidden_dim: 12,
            n_hidden_layers: 3,
            feature_dim: 4,
            softplus_beta: 10.0,
            sphere_radius: 0.5,
        };
        let mut rng = StdRng::seed_from_u64(seed);
        SdfNetwork::new(cfg, &mut rng)
    }

    #[test]
    fn test_value_and_evaluate_agree() {
        let net = small_net(1);
        let p = Vector3::new(0.2, -0.3, 0.5);
        let (eval, _) = net.evaluate(&p);
        assert_relative_eq!(eval.sdf, net.value(&p), epsilon = 1e-5);
        assert_eq!(eval.feature.len(), 4);
    }

    #[test]
    fn test_geometric_init_is_roughly_spherical() {
        let net = small_net(2);
        // Signed distance should be negative inside, positive outside.
        assert!(net.value(&Vector3::zeros()) < 0.0);
        assert!(net.value(&Vector3::new(1.5, 0.0, 0.0)) > 0.0);
    }

    #[test]
    fn test_spatial_gradient_matches_finite_difference() {
        let net = small_net(3);
        let p = Vector3::new(0.3, 0.1, -0.4);
        let (eval, _) = net.evaluate(&p);

        let eps = 1e-3f32;
        for axis in 0..3 {
            let mut dp = Vector3::zeros();
            dp[axis] = eps;
            let numerical = (net.value(&(p + dp)) - net.value(&(p - dp))) / (2.0 * eps);
            assert_relative_eq!(numerical, eval.gradient[axis], epsilon = 2e-2);
        }
    }

    #[test]
    fn test_param_vec_roundtrip() {
        let net = small_net(4);
        let flat = net.params_to_vec();
        assert_eq!(flat.len(), net.param_count());

        let mut copy = small_net(5);
        copy.load_params(&flat);
        let p = Vector3::new(-0.2, 0.4, 0.1);
        assert_relative_eq!(copy.value(&p), net.value(&p), epsilon = 1e-6);
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let mut net = small_net(6);
        let p = Vector3::new(0.25, -0.15, 0.35);

        // Probe loss touching all three outputs:
        // L = a*sdf + b·gradient + c·feature
        let b = Vector3::new(0.3, -0.7, 0.2);
        let c: Vec<f32> = vec![0.5, -0.2, 0.1, 0.4];
        let loss = |net: &SdfNetwork| -> f32 {
            let (e, _) = net.evaluate(&p);
            let mut l = 1.3 * e.sdf + b.dot(&e.gradient);
            for (ci, fi) in c.iter().zip(e.feature.iter()) {
                l += ci * fi;
            }
            l
        };

        let (_, cache) = net.evaluate(&p);
        let mut grads = vec![0.0f32; net.param_count()];
        net.backward(&cache, 1.3, &b, &c, &mut grads);

        // Spot-check a spread of parameters with central differences.
        let mut flat = net.params_to_vec();
        let eps = 1e-3f32;
        let n = flat.len();
        for &idx in &[0usize, 7, n / 3, n / 2, 2 * n / 3, n - 2, n - 1] {
            let base = flat[idx];
            flat[idx] = base + eps;
            net.load_params(&flat);
            let lp = loss(&net);
            flat[idx] = base - eps;
            net.load_params(&flat);
            let lm = loss(&net);
            flat[idx] = base;
            net.load_params(&flat);

            let numerical = (lp - lm) / (2.0 * eps);
            let analytical = grads[idx];
            assert!(
                (numerical - analytical).abs() < 2e-2_f32.max(0.05 * numerical.abs()),
                "param {idx}: numerical={numerical} analytical={analytical}"
            );
        }
    }
}
