//! Shamir threshold secret sharing over GF(2^61 − 1).
//!
//! A 32-byte secret is split into eight 32-bit limbs; every limb is shared
//! with its own random polynomial of degree `threshold − 1`, evaluated at the
//! same x-coordinate per recipient. Any `threshold` shares reconstruct the
//! secret; fewer reveal nothing about it.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::QoraError;

/// Field modulus, the Mersenne prime 2^61 − 1.
pub const FIELD_MODULUS: u64 = (1 << 61) - 1;

const LIMBS: usize = 8;

/// Encoded length of a [`Share`].
pub const SHARE_BYTES: usize = 4 + LIMBS * 8;

/// One participant's share of a 32-byte secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    /// Evaluation point (never 0).
    pub index: u32,
    /// Polynomial value per limb.
    pub limbs: [u64; LIMBS],
}

impl Share {
    /// Fixed-width little-endian encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SHARE_BYTES);
        out.extend_from_slice(&self.index.to_le_bytes());
        for limb in &self.limbs {
            out.extend_from_slice(&limb.to_le_bytes());
        }
        out
    }

    /// Decode a share produced by [`Share::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, QoraError> {
        if bytes.len() != SHARE_BYTES {
            return Err(QoraError::InvalidShare(format!(
                "expected {} bytes, got {}",
                SHARE_BYTES,
                bytes.len()
            )));
        }
        let mut index = [0u8; 4];
        index.copy_from_slice(&bytes[..4]);
        let mut limbs = [0u64; LIMBS];
        for (k, chunk) in bytes[4..].chunks_exact(8).enumerate() {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            limbs[k] = u64::from_le_bytes(word);
            if limbs[k] >= FIELD_MODULUS {
                return Err(QoraError::InvalidShare("limb outside field".to_string()));
            }
        }
        Ok(Self {
            index: u32::from_le_bytes(index),
            limbs,
        })
    }
}

/// Split `secret` into one share per entry of `indices`.
///
/// # Errors
///
/// [`QoraError::InvalidShare`] if `threshold` is zero or an index is zero or
/// repeated.
pub fn split<R: Rng + ?Sized>(
    secret: &[u8; 32],
    indices: &[u32],
    threshold: usize,
    rng: &mut R,
) -> Result<Vec<Share>, QoraError> {
    if threshold == 0 {
        return Err(QoraError::InvalidShare("threshold must be at least 1".to_string()));
    }
    check_indices(indices.iter().copied())?;

    let mut shares: Vec<Share> = indices
        .iter()
        .map(|&index| Share {
            index,
            limbs: [0; LIMBS],
        })
        .collect();

    for (k, chunk) in secret.chunks_exact(4).enumerate() {
        let mut word = [0u8; 4];
        word.copy_from_slice(chunk);
        let mut coeffs = Vec::with_capacity(threshold);
        coeffs.push(u64::from(u32::from_le_bytes(word)));
        for _ in 1..threshold {
            coeffs.push(rng.gen_range(0..FIELD_MODULUS));
        }

        for share in shares.iter_mut() {
            share.limbs[k] = eval(&coeffs, u64::from(share.index));
        }
    }

    Ok(shares)
}

/// Reconstruct the secret from at least `threshold` shares.
///
/// Only the first `threshold` shares are used.
pub fn reconstruct(shares: &[Share], threshold: usize) -> Result<[u8; 32], QoraError> {
    if threshold == 0 || shares.len() < threshold {
        return Err(QoraError::InvalidShare(format!(
            "need {} shares, got {}",
            threshold,
            shares.len()
        )));
    }
    let used = &shares[..threshold];
    check_indices(used.iter().map(|s| s.index))?;

    // Lagrange basis at x = 0
    let xs: Vec<u64> = used.iter().map(|s| u64::from(s.index)).collect();
    let basis: Vec<u64> = (0..xs.len())
        .map(|i| {
            let mut num = 1u64;
            let mut den = 1u64;
            for (j, &xj) in xs.iter().enumerate() {
                if i != j {
                    num = mul(num, xj);
                    den = mul(den, sub(xj, xs[i]));
                }
            }
            mul(num, inv(den))
        })
        .collect();

    let mut secret = [0u8; 32];
    for k in 0..LIMBS {
        let value = used
            .iter()
            .zip(basis.iter())
            .fold(0u64, |acc, (share, &b)| add(acc, mul(share.limbs[k], b)));
        let limb = u32::try_from(value)
            .map_err(|_| QoraError::InvalidShare("inconsistent shares".to_string()))?;
        secret[k * 4..k * 4 + 4].copy_from_slice(&limb.to_le_bytes());
    }
    Ok(secret)
}

fn check_indices(indices: impl Iterator<Item = u32>) -> Result<(), QoraError> {
    let mut seen = std::collections::BTreeSet::new();
    for index in indices {
        if index == 0 {
            return Err(QoraError::InvalidShare("share index 0 is reserved".to_string()));
        }
        if !seen.insert(index) {
            return Err(QoraError::InvalidShare(format!("duplicate share index {}", index)));
        }
    }
    Ok(())
}

fn eval(coeffs: &[u64], x: u64) -> u64 {
    coeffs.iter().rev().fold(0u64, |acc, &c| add(mul(acc, x), c))
}

fn add(a: u64, b: u64) -> u64 {
    let s = a + b;
    if s >= FIELD_MODULUS {
        s - FIELD_MODULUS
    } else {
        s
    }
}

fn sub(a: u64, b: u64) -> u64 {
    if a >= b {
        a - b
    } else {
        a + FIELD_MODULUS - b
    }
}

fn mul(a: u64, b: u64) -> u64 {
    ((u128::from(a) * u128::from(b)) % u128::from(FIELD_MODULUS)) as u64
}

fn inv(a: u64) -> u64 {
    // Fermat: a^(p-2)
    let mut result = 1u64;
    let mut base = a;
    let mut exp = FIELD_MODULUS - 2;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mul(result, base);
        }
        base = mul(base, base);
        exp >>= 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn secret() -> [u8; 32] {
        let mut s = [0u8; 32];
        for (i, b) in s.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(37).wrapping_add(11);
        }
        s
    }

    #[test]
    fn test_any_threshold_subset_reconstructs() {
        let mut rng = StdRng::seed_from_u64(1);
        let shares = split(&secret(), &[1, 2, 3, 4, 5], 3, &mut rng).unwrap();

        assert_eq!(reconstruct(&shares[..3], 3).unwrap(), secret());
        assert_eq!(reconstruct(&shares[2..], 3).unwrap(), secret());
        let mixed = vec![shares[4].clone(), shares[0].clone(), shares[2].clone()];
        assert_eq!(reconstruct(&mixed, 3).unwrap(), secret());
    }

    #[test]
    fn test_too_few_shares_rejected() {
        let mut rng = StdRng::seed_from_u64(2);
        let shares = split(&secret(), &[1, 2, 3, 4], 3, &mut rng).unwrap();
        assert!(matches!(
            reconstruct(&shares[..2], 3),
            Err(QoraError::InvalidShare(_))
        ));
    }

    #[test]
    fn test_below_threshold_gives_wrong_secret() {
        let mut rng = StdRng::seed_from_u64(3);
        let shares = split(&secret(), &[1, 2, 3], 3, &mut rng).unwrap();
        // Pretending the threshold is 2 interpolates the wrong polynomial
        match reconstruct(&shares[..2], 2) {
            Ok(recovered) => assert_ne!(recovered, secret()),
            Err(e) => assert!(matches!(e, QoraError::InvalidShare(_))),
        }
    }

    #[test]
    fn test_threshold_one_is_replication() {
        let mut rng = StdRng::seed_from_u64(4);
        let shares = split(&secret(), &[7, 9], 1, &mut rng).unwrap();
        assert_eq!(shares[0].limbs, shares[1].limbs);
        assert_eq!(reconstruct(&shares[1..], 1).unwrap(), secret());
    }

    #[test]
    fn test_rejects_zero_and_duplicate_indices() {
        let mut rng = StdRng::seed_from_u64(5);
        assert!(split(&secret(), &[0, 1], 2, &mut rng).is_err());
        assert!(split(&secret(), &[1, 1], 2, &mut rng).is_err());
        assert!(split(&secret(), &[1, 2], 0, &mut rng).is_err());
    }

    #[test]
    fn test_share_bytes_round_trip() {
        let mut rng = StdRng::seed_from_u64(6);
        let share = split(&secret(), &[3], 2, &mut rng).unwrap().remove(0);
        let bytes = share.to_bytes();
        assert_eq!(bytes.len(), SHARE_BYTES);
        assert_eq!(Share::from_bytes(&bytes).unwrap(), share);
        assert!(Share::from_bytes(&bytes[1..]).is_err());
    }

    #[test]
    fn test_field_inverse() {
        for a in [1u64, 2, 12345, FIELD_MODULUS - 1] {
            assert_eq!(mul(a, inv(a)), 1);
        }
    }
}
