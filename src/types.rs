//! Shared data types: participant identity and the global parameter vector.

use std::fmt;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::QoraError;

/// Identifier of a federated-learning participant.
///
/// The total order on ids decides which side of a pair adds the shared mask
/// and which side subtracts it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Create an id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Versioned global model parameters.
///
/// Never mutated in place: committing a round produces a new value, so a
/// snapshot handed to participants stays consistent for the whole round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalParameters {
    round_number: u64,
    values: Array1<f64>,
}

impl GlobalParameters {
    /// Initial parameters (version 0).
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            round_number: 0,
            values: Array1::from(values),
        }
    }

    /// Round that produced this version (0 for the initial parameters).
    pub fn round_number(&self) -> u64 {
        self.round_number
    }

    /// The parameter values.
    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    /// Number of parameters.
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Produce the next version: `values + learning_rate * update`.
    pub fn with_update(
        &self,
        update: &Array1<f64>,
        learning_rate: f64,
        round_number: u64,
    ) -> Result<Self, QoraError> {
        if update.len() != self.values.len() {
            return Err(QoraError::DimensionMismatch {
                expected: self.values.len(),
                actual: update.len(),
            });
        }
        Ok(Self {
            round_number,
            values: &self.values + &(update * learning_rate),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_participant_id_ordering() {
        let a = ParticipantId::from("alice");
        let b = ParticipantId::from("bob");
        assert!(a < b);
        assert_eq!(a.to_string(), "alice");
    }

    #[test]
    fn test_with_update_produces_new_version() {
        let params = GlobalParameters::new(vec![1.0, 2.0]);
        let next = params.with_update(&array![0.5, -1.0], 2.0, 3).unwrap();

        assert_eq!(next.round_number(), 3);
        assert_eq!(next.values(), &array![2.0, 0.0]);
        // Original untouched
        assert_eq!(params.round_number(), 0);
        assert_eq!(params.values(), &array![1.0, 2.0]);
    }

    #[test]
    fn test_with_update_dimension_mismatch() {
        let params = GlobalParameters::new(vec![1.0, 2.0]);
        let result = params.with_update(&array![1.0], 1.0, 1);
        assert!(matches!(
            result,
            Err(QoraError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_global_parameters_serde() {
        let params = GlobalParameters::new(vec![0.25, -4.0]);
        let json = serde_json::to_string(&params).unwrap();
        let restored: GlobalParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, params);
    }
}
