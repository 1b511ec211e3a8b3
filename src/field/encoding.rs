//! Fourier positional encoding of 3-D points.
//!
//! The raw coordinate is kept alongside sin/cos pairs at octave frequencies,
//! the usual trick for letting a small MLP represent higher-frequency
//! geometry. The encoding also produces spatial tangents so that the SDF
//! network's dual forward pass can propagate ∂/∂point from the very input:
//! d sin(f·x_c)/d point = f cos(f·x_c) e_c.

use super::linear::DualVec;
use nalgebra::Vector3;

#[derive(Clone, Debug)]
pub struct FourierEncoding {
    /// Number of octaves; frequency of octave j is 2^j.
    pub n_frequencies: usize,
}

impl FourierEncoding {
    pub fn new(n_frequencies: usize) -> Self {
        Self { n_frequencies }
    }

    /// Encoded dimension: 3 raw coordinates + (sin, cos) per octave per axis.
    pub fn out_dim(&self) -> usize {
        3 + 6 * self.n_frequencies
    }

    /// Encode a point with its spatial tangents.
    pub fn encode(&self, p: &Vector3<f32>) -> DualVec {
        let mut out = DualVec {
            val: Vec::with_capacity(self.out_dim()),
            tan: Vec::with_capacity(self.out_dim()),
        };

        let axes = [Vector3::x(), Vector3::y(), Vector3::z()];
        for c in 0..3 {
            out.val.push(p[c]);
            out.tan.push(axes[c]);
        }
        for j in 0..self.n_frequencies {
            let f = (1u32 << j) as f32;
            for c in 0..3 {
                let a = f * p[c];
                out.val.push(a.sin());
                out.tan.push(axes[c] * (f * a.cos()));
                out.val.push(a.cos());
                out.tan.push(axes[c] * (-f * a.sin()));
            }
        }
        out
    }

    /// Values-only encoding for cheap distance queries.
    pub fn encode_value(&self, p: &Vector3<f32>) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.out_dim());
        out.extend_from_slice(&[p.x, p.y, p.z]);
        for j in 0..self.n_frequencies {
            let f = (1u32 << j) as f32;
            for c in 0..3 {
                let a = f * p[c];
                out.push(a.sin());
                out.push(a.cos());
            }
        }
        out
    }
}
