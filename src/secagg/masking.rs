//! Pairwise mask expansion.
//!
//! For a pair `(i, j)` with `i < j`, participant `i` adds `PRG(seed_ij)` and
//! participant `j` subtracts it, so every pair's contribution to the sum is
//! zero. Masks are uniform elements of the wrapping I32F32 ring.

use fixed::types::I32F32;
use rand::RngCore;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::math::fixed_point::{wrapping_add_assign, wrapping_sub_assign};
use crate::types::ParticipantId;

/// Which side of a pair a participant is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaskSign {
    /// Lower id: adds the pair mask
    Add,
    /// Higher id: subtracts the pair mask
    Subtract,
}

impl MaskSign {
    /// Sign applied by `me` for its pair with `peer`.
    pub fn for_pair(me: &ParticipantId, peer: &ParticipantId) -> Self {
        if me < peer {
            MaskSign::Add
        } else {
            MaskSign::Subtract
        }
    }
}

/// Expand a 32-byte seed into a mask of `dimension` ring elements.
pub fn expand_mask(seed: &[u8; 32], dimension: usize) -> Vec<I32F32> {
    let mut rng = ChaCha20Rng::from_seed(*seed);
    (0..dimension)
        .map(|_| I32F32::from_bits(rng.next_u64() as i64))
        .collect()
}

/// Apply `mask` to `acc` with the given sign.
pub fn apply_mask(acc: &mut [I32F32], mask: &[I32F32], sign: MaskSign) {
    match sign {
        MaskSign::Add => wrapping_add_assign(acc, mask),
        MaskSign::Subtract => wrapping_sub_assign(acc, mask),
    }
}

/// Remove a mask previously applied with `sign`.
pub fn remove_mask(acc: &mut [I32F32], mask: &[I32F32], sign: MaskSign) {
    match sign {
        MaskSign::Add => wrapping_sub_assign(acc, mask),
        MaskSign::Subtract => wrapping_add_assign(acc, mask),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::fixed_point::encode;

    #[test]
    fn test_expand_mask_deterministic() {
        let a = expand_mask(&[1u8; 32], 16);
        let b = expand_mask(&[1u8; 32], 16);
        let c = expand_mask(&[2u8; 32], 16);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_pair_masks_cancel() {
        let lo = ParticipantId::from("a");
        let hi = ParticipantId::from("b");
        let mask = expand_mask(&[3u8; 32], 4);

        let mut x = encode(&[1.0, 2.0, 3.0, 4.0]);
        let mut y = encode(&[-1.0, 0.5, 0.0, 8.0]);
        apply_mask(&mut x, &mask, MaskSign::for_pair(&lo, &hi));
        apply_mask(&mut y, &mask, MaskSign::for_pair(&hi, &lo));

        let mut sum = x;
        wrapping_add_assign(&mut sum, &y);
        assert_eq!(sum, encode(&[0.0, 2.5, 3.0, 12.0]));
    }

    #[test]
    fn test_remove_mask_inverts_apply() {
        let mask = expand_mask(&[4u8; 32], 3);
        let original = encode(&[0.25, -0.75, 9.0]);
        for sign in [MaskSign::Add, MaskSign::Subtract] {
            let mut v = original.clone();
            apply_mask(&mut v, &mask, sign);
            remove_mask(&mut v, &mask, sign);
            assert_eq!(v, original);
        }
    }
}
