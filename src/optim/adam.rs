//! Adam optimizer (minimal).
//!
//! Two flavors cover every parameter group in the system: `AdamF32` updates
//! the flat network buffers (geometry field, material head), `AdamVec3`
//! updates small per-light vector parameters (raw directions,
//! log-intensities).

use nalgebra::Vector3;

#[derive(Debug)]
pub struct AdamF32 {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    t: u32,
    m: Vec<f32>,
    v: Vec<f32>,
}

impl AdamF32 {
    pub fn new(lr: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            eps,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn ensure_len(&mut self, len: usize) {
        if self.m.len() != len {
            // Resize preserving existing state and zeroing new elements.
            // Don't reset t: new parameters start with zero momentum, which
            // is correct, and bias correction must keep the global timestep.
            self.m.resize(len, 0.0);
            self.v.resize(len, 0.0);
        }
    }

    pub fn step(&mut self, params: &mut [f32], grads: &[f32]) {
        assert_eq!(params.len(), grads.len());
        self.ensure_len(params.len());

        self.t += 1;
        let t = self.t as f32;
        let b1 = self.beta1;
        let b2 = self.beta2;

        let bias1 = 1.0 - b1.powf(t);
        let bias2 = 1.0 - b2.powf(t);

        for i in 0..params.len() {
            let g = grads[i];
            self.m[i] = self.m[i] * b1 + g * (1.0 - b1);
            self.v[i] = self.v[i] * b2 + g * g * (1.0 - b2);

            let m_hat = self.m[i] / bias1;
            let v_hat = self.v[i] / bias2;

            params[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
    }
}

#[derive(Debug)]
pub struct AdamVec3 {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    t: u32,
    m: Vec<Vector3<f32>>,
    v: Vec<Vector3<f32>>,
}

impl AdamVec3 {
    pub fn new(lr: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            eps,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn ensure_len(&mut self, len: usize) {
        if self.m.len() != len {
            self.m.resize(len, Vector3::zeros());
            self.v.resize(len, Vector3::zeros());
        }
    }

    pub fn step(&mut self, params: &mut [Vector3<f32>], grads: &[Vector3<f32>]) {
        assert_eq!(params.len(), grads.len());
        self.ensure_len(params.len());

        self.t += 1;
        let t = self.t as f32;
        let b1 = self.beta1;
        let b2 = self.beta2;

        let bias1 = 1.0 - b1.powf(t);
        let bias2 = 1.0 - b2.powf(t);

        for i in 0..params.len() {
            let g = grads[i];
            self.m[i] = self.m[i] * b1 + g * (1.0 - b1);
            self.v[i] = self.v[i] * b2 + g.component_mul(&g) * (1.0 - b2);

            let m_hat = self.m[i] / bias1;
            let v_hat = self.v[i] / bias2;

            // elementwise update
            params[i].x -= self.lr * m_hat.x / (v_hat.x.sqrt() + self.eps);
            params[i].y -= self.lr * m_hat.y / (v_hat.y.sqrt() + self.eps);
            params[i].z -= self.lr * m_hat.z / (v_hat.z.sqrt() + self.eps);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adam_basic_update() {
        let mut opt = AdamVec3::new(0.01, 0.9, 0.999, 1e-8);

        let mut params = vec![Vector3::new(1.0, 1.0, 1.0)];
        let grads = vec![Vector3::new(1.0, 1.0, 1.0)];

        let initial = params[0];
        opt.step(&mut params, &grads);

        // Parameters should have moved in the opposite direction of gradient
        assert!(params[0].x < initial.x);
        assert!(params[0].y < initial.y);
        assert!(params[0].z < initial.z);
    }

    #[test]
    fn test_adam_f32_basic_update() {
        let mut opt = AdamF32::new(0.01, 0.9, 0.999, 1e-8);
        let mut params = vec![1.0f32];
        let grads = vec![1.0f32];
        opt.step(&mut params, &grads);
        assert!(params[0] < 1.0);
    }

    #[test]
    fn test_adam_preserves_timestep_on_resize() {
        let mut opt = AdamF32::new(0.001, 0.9, 0.999, 1e-8);

        let mut params = vec![1.0f32, 2.0];
        let grads = vec![0.1f32, 0.2];
        opt.step(&mut params, &grads);
        opt.step(&mut params, &grads);
        assert_eq!(opt.t, 2);

        let mut params3 = vec![1.0f32, 2.0, 3.0];
        let grads3 = vec![0.1f32, 0.2, 0.3];
        opt.step(&mut params3, &grads3);

        // Timestep should NOT be reset.
        assert_eq!(opt.t, 3);
        assert_eq!(opt.m.len(), 3);
        assert_ne!(opt.m[0], 0.0);
    }

    #[test]
    fn test_adam_converges_on_quadratic() {
        // Minimize (x - 3)^2; Adam should get close within a few hundred steps.
        let mut opt = AdamF32::new(0.05, 0.9, 0.999, 1e-8);
        let mut params = vec![0.0f32];
        for _ in 0..500 {
            let g = 2.0 * (params[0] - 3.0);
            opt.step(&mut params, &[g]);
        }
        assert!((params[0] - 3.0).abs() < 0.1, "got {}", params[0]);
    }
}
