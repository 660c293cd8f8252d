//! Fixed-point encoding for masked vectors.
//!
//! Masked contributions live in I32F32 with wrapping arithmetic, i.e. the ring
//! Z/2^64. Pairwise masks are uniformly random ring elements, so they cancel
//! exactly when summed, and any individual masked value is uniformly
//! distributed. Decoding the final sum is exact as long as the true sum fits
//! in the I32F32 range (about ±2.1e9).

use fixed::types::I32F32;

/// Encode an f64 vector into the fixed-point ring (saturating on overflow).
pub fn encode(values: &[f64]) -> Vec<I32F32> {
    values.iter().map(|&x| I32F32::saturating_from_num(x)).collect()
}

/// Decode a fixed-point vector back to f64.
pub fn decode(values: &[I32F32]) -> Vec<f64> {
    values.iter().map(|x| x.to_num::<f64>()).collect()
}

/// `acc += other` modulo 2^64. Lengths must match.
pub fn wrapping_add_assign(acc: &mut [I32F32], other: &[I32F32]) {
    debug_assert_eq!(acc.len(), other.len());
    for (a, b) in acc.iter_mut().zip(other.iter()) {
        *a = a.wrapping_add(*b);
    }
}

/// `acc -= other` modulo 2^64. Lengths must match.
pub fn wrapping_sub_assign(acc: &mut [I32F32], other: &[I32F32]) {
    debug_assert_eq!(acc.len(), other.len());
    for (a, b) in acc.iter_mut().zip(other.iter()) {
        *a = a.wrapping_sub(*b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_precision() {
        let values = vec![1.5, -2.25, 0.0, 1234.000_001];
        let decoded = decode(&encode(&values));
        for (a, b) in values.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 1e-9, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_encode_saturates() {
        let encoded = encode(&[1e12, -1e12]);
        assert_eq!(encoded[0], I32F32::MAX);
        assert_eq!(encoded[1], I32F32::MIN);
    }

    #[test]
    fn test_wrapping_mask_cancels_exactly() {
        let value = encode(&[3.75, -0.5]);
        let mask = vec![I32F32::MAX, I32F32::from_bits(0x1234_5678_9abc_def0)];

        let mut masked = value.clone();
        wrapping_add_assign(&mut masked, &mask);
        assert_ne!(masked, value);

        wrapping_sub_assign(&mut masked, &mask);
        assert_eq!(masked, value);
    }
}
