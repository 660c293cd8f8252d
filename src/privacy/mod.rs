//! Differential-privacy primitives.
//!
//! - [`calibrator`] - Noise scale for the Gaussian and Laplace mechanisms
//! - [`clip`] - Clip-then-noise privatization of local updates
//! - [`accountant`] - Cumulative `(ε, δ)` budget with pluggable composition

pub mod accountant;
pub mod calibrator;
pub mod clip;

pub use accountant::{
    BudgetCharge, CompositionStrategy, PrivacyBudgetAccountant, PrivacyBudgetState, PrivacyReport,
};
pub use calibrator::{Mechanism, NoiseScale};
pub use clip::{ClippingPolicy, NormKind};
