//! Norm computations for vectors.
//!
//! Provides the L2 (Euclidean) norm and norm clipping used by
//! [`crate::privacy::clip`].

/// Compute the L2 (Euclidean) norm of an f64 slice.
pub fn l2_norm(v: &[f64]) -> f64 {
    l2_norm_sq(v).sqrt()
}

/// Compute the squared L2 norm of an f64 slice (avoids sqrt).
pub fn l2_norm_sq(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum()
}

/// Rescale `v` in place so its L2 norm is at most `max_norm`.
///
/// Returns `true` if the vector was rescaled. Vectors already within the
/// bound are left bit-for-bit untouched.
pub fn clip_to_norm(v: &mut [f64], max_norm: f64) -> bool {
    let norm = l2_norm(v);
    if norm > max_norm {
        let scale = max_norm / norm;
        for x in v.iter_mut() {
            *x *= scale;
        }
        true
    } else {
        false
    }
}
