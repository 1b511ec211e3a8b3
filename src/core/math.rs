//! Mathematical utilities (activation functions, ray helpers).

use nalgebra::Vector3;

/// Sigmoid activation function: σ(x) = 1 / (1 + e^(-x))
///
/// Maps R → (0, 1)
/// Used for material parameters (converts unbounded optimization to valid range)
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Inverse sigmoid (logit): logit(p) = log(p / (1-p))
///
/// Maps (0, 1) → R
/// Used to convert initial material values to optimization space
pub fn inverse_sigmoid(p: f32) -> f32 {
    // Clamp to avoid log(0) or division by zero
    let p_clamped = p.clamp(1e-6, 1.0 - 1e-6);
    (p_clamped / (1.0 - p_clamped)).ln()
}

/// Scaled softplus: (1/β) ln(1 + e^(βx)).
///
/// Smooth approximation of ReLU used as the SDF network activation;
/// its smoothness is what makes the analytic spatial gradient well behaved.
/// Written in a numerically stable form for large |βx|.
pub fn softplus(x: f32, beta: f32) -> f32 {
    let bx = beta * x;
    if bx > 20.0 {
        x
    } else if bx < -20.0 {
        bx.exp() / beta
    } else {
        (1.0 + bx.exp()).ln() / beta
    }
}

/// Derivative of the scaled softplus: σ(βx).
pub fn softplus_prime(x: f32, beta: f32) -> f32 {
    sigmoid(beta * x)
}

/// Second derivative of the scaled softplus: β σ(βx)(1 - σ(βx)).
///
/// Needed when back-propagating through the spatial tangents of the SDF
/// network (the gradient path sees one more derivative than the value path).
pub fn softplus_second(x: f32, beta: f32) -> f32 {
    let s = sigmoid(beta * x);
    beta * s * (1.0 - s)
}

/// Intersect a ray with the origin-centered sphere of the given radius.
///
/// Returns `(t_near, t_far)` with `t_far > 0`, or `None` if the ray misses
/// the sphere entirely or the sphere is fully behind the origin.
/// `dir` must be unit length.
pub fn ray_sphere_intersect(
    origin: &Vector3<f32>,
    dir: &Vector3<f32>,
    radius: f32,
) -> Option<(f32, f32)> {
    let b = origin.dot(dir);
    let c = origin.dot(origin) - radius * radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let sq = disc.sqrt();
    let t0 = -b - sq;
    let t1 = -b + sq;
    if t1 <= 0.0 {
        return None;
    }
    Some((t0.max(0.0), t1))
}
