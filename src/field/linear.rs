//! Dense layers with explicit forward and backward passes.
//!
//! Two forward modes exist:
//!
//! - plain: values only, used for cheap distance queries during tracing
//! - dual: every unit carries a value plus a 3-vector tangent ∂value/∂point,
//!   so the network's spatial gradient comes out of the same pass that
//!   computes the value (forward-mode in the point, reverse-mode in the
//!   parameters)
//!
//! Backward passes accumulate parameter gradients into caller-provided flat
//! slices so a whole network's gradient lives in one buffer.

use nalgebra::Vector3;
use rand::Rng;

/// A vector of unit values with their spatial tangents.
#[derive(Clone, Debug, Default)]
pub struct DualVec {
    pub val: Vec<f32>,
    pub tan: Vec<Vector3<f32>>,
}

impl DualVec {
    pub fn zeros(n: usize) -> Self {
        Self {
            val: vec![0.0; n],
            tan: vec![Vector3::zeros(); n],
        }
    }

    pub fn len(&self) -> usize {
        self.val.len()
    }

    pub fn is_empty(&self) -> bool {
        self.val.is_empty()
    }

    /// Concatenate two dual vectors (used at skip connections).
    pub fn concat(a: &DualVec, b: &DualVec) -> DualVec {
        let mut val = Vec::with_capacity(a.len() + b.len());
        val.extend_from_slice(&a.val);
        val.extend_from_slice(&b.val);
        let mut tan = Vec::with_capacity(a.len() + b.len());
        tan.extend_from_slice(&a.tan);
        tan.extend_from_slice(&b.tan);
        DualVec { val, tan }
    }
}

/// A dense layer y = W x + b with row-major weights.
#[derive(Clone, Debug)]
pub struct Linear {
    /// Weights, row-major: `w[o * in_dim + i]`
    pub w: Vec<f32>,
    pub b: Vec<f32>,
    pub in_dim: usize,
    pub out_dim: usize,
}

impl Linear {
    /// Xavier-normal initialization.
    pub fn xavier(in_dim: usize, out_dim: usize, rng: &mut impl Rng) -> Self {
        let std = (2.0 / (in_dim + out_dim) as f32).sqrt();
        let w = (0..in_dim * out_dim)
            .map(|_| sample_normal(rng) * std)
            .collect();
        Self {
            w,
            b: vec![0.0; out_dim],
            in_dim,
            out_dim,
        }
    }

    /// All-zero layer (weights filled in by a custom initializer).
    pub fn zeros(in_dim: usize, out_dim: usize) -> Self {
        Self {
            w: vec![0.0; in_dim * out_dim],
            b: vec![0.0; out_dim],
            in_dim,
            out_dim,
        }
    }

    /// Number of parameters (weights then biases) in the flat layout.
    pub fn param_count(&self) -> usize {
        self.w.len() + self.b.len()
    }

    /// Plain forward pass: y = W x + b.
    pub fn forward(&self, x: &[f32]) -> Vec<f32> {
        debug_assert_eq!(x.len(), self.in_dim);
        let mut y = self.b.clone();
        for o in 0..self.out_dim {
            let row = &self.w[o * self.in_dim..(o + 1) * self.in_dim];
            let mut acc = 0.0f32;
            for (wi, xi) in row.iter().zip(x.iter()) {
                acc += wi * xi;
            }
            y[o] += acc;
        }
        y
    }

    /// Dual forward pass: values and tangents through the same linear map.
    pub fn forward_dual(&self, x: &DualVec) -> DualVec {
        debug_assert_eq!(x.len(), self.in_dim);
        let mut out = DualVec {
            val: self.b.clone(),
            tan: vec![Vector3::zeros(); self.out_dim],
        };
        for o in 0..self.out_dim {
            let row = &self.w[o * self.in_dim..(o + 1) * self.in_dim];
            let mut acc = 0.0f32;
            let mut tacc = Vector3::zeros();
            for i in 0..self.in_dim {
                acc += row[i] * x.val[i];
                tacc += row[i] * x.tan[i];
            }
            out.val[o] += acc;
            out.tan[o] = tacc;
        }
        out
    }

    /// Backward pass for the plain forward.
    ///
    /// `input` is the cached forward input; `out_bar` is dL/dy. Parameter
    /// gradients accumulate into `dw`/`db`; returns dL/dx.
    pub fn backward(
        &self,
        input: &[f32],
        out_bar: &[f32],
        dw: &mut [f32],
        db: &mut [f32],
    ) -> Vec<f32> {
        debug_assert_eq!(input.len(), self.in_dim);
        debug_assert_eq!(out_bar.len(), self.out_dim);
        debug_assert_eq!(dw.len(), self.w.len());
        debug_assert_eq!(db.len(), self.b.len());

        let mut in_bar = vec![0.0f32; self.in_dim];
        for o in 0..self.out_dim {
            let ob = out_bar[o];
            db[o] += ob;
            let row = &self.w[o * self.in_dim..(o + 1) * self.in_dim];
            let drow = &mut dw[o * self.in_dim..(o + 1) * self.in_dim];
            for i in 0..self.in_dim {
                drow[i] += ob * input[i];
                in_bar[i] += row[i] * ob;
            }
        }
        in_bar
    }

    /// Backward pass for the dual forward.
    ///
    /// Adjoints arrive on both the output values (`out_bar`) and the output
    /// tangents (`out_tan_bar`). Since ty[o] = Σ_i w[o][i] tx[i], the weight
    /// gradient gains a tangent term: dL/dw[o][i] += out_bar[o]·x[i] +
    /// out_tan_bar[o] · tx[i].
    pub fn backward_dual(
        &self,
        input: &DualVec,
        out_bar: &[f32],
        out_tan_bar: &[Vector3<f32>],
        dw: &mut [f32],
        db: &mut [f32],
    ) -> (Vec<f32>, Vec<Vector3<f32>>) {
        debug_assert_eq!(input.len(), self.in_dim);
        debug_assert_eq!(out_bar.len(), self.out_dim);
        debug_assert_eq!(out_tan_bar.len(), self.out_dim);

        let mut in_bar = vec![0.0f32; self.in_dim];
        let mut in_tan_bar = vec![Vector3::zeros(); self.in_dim];
        for o in 0..self.out_dim {
            let ob = out_bar[o];
            let tb = out_tan_bar[o];
            db[o] += ob;
            let row = &self.w[o * self.in_dim..(o + 1) * self.in_dim];
            let drow = &mut dw[o * self.in_dim..(o + 1) * self.in_dim];
            for i in 0..self.in_dim {
                drow[i] += ob * input.val[i] + tb.dot(&input.tan[i]);
                in_bar[i] += row[i] * ob;
                in_tan_bar[i] += row[i] * tb;
            }
        }
        (in_bar, in_tan_bar)
    }

    /// Copy parameters into `out` (weights then biases).
    pub fn write_params(&self, out: &mut Vec<f32>) {
        out.extend_from_slice(&self.w);
        out.extend_from_slice(&self.b);
    }

    /// Load parameters from `src` starting at `offset`; returns the new offset.
    pub fn read_params(&mut self, src: &[f32], offset: usize) -> usize {
        let nw = self.w.len();
        let nb = self.b.len();
        self.w.copy_from_slice(&src[offset..offset + nw]);
        self.b.copy_from_slice(&src[offset + nw..offset + nw + nb]);
        offset + nw + nb
    }
}

/// Standard normal sample via Box-Muller (keeps the rand API surface small).
pub fn sample_normal(rng: &mut impl Rng) -> f32 {
    let u1: f32 = rng.gen_range(1e-7f32..1.0);
    let u2: f32 = rng.gen_range(0.0f32..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}
