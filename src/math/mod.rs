//! Mathematical primitives for qora-secagg.
//!
//! - [`norms`] - L2 norm and norm clipping
//! - [`fixed_point`] - Wrapping I32F32 ring used for masked vectors

pub mod fixed_point;
pub mod norms;

pub use fixed_point::{decode, encode, wrapping_add_assign, wrapping_sub_assign};
pub use norms::{clip_to_norm, l2_norm, l2_norm_sq};
