//! Observation representation

use serde::{Deserialize, Serialize};

/// Flat vector observation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VectorObservation {
    /// The observation data
    pub data: Vec<f64>,
}

impl VectorObservation {
    /// Wrap raw observation data
    #[must_use]
    pub fn new(data: Vec<f64>) -> Self {
        Self { data }
    }

    /// Number of features
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the observation carries no features
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Observation as `f32` features for network input
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_f32(&self) -> Vec<f32> {
        self.data.iter().map(|&x| x as f32).collect()
    }
}

impl From<Vec<f64>> for VectorObservation {
    fn from(data: Vec<f64>) -> Self {
        Self { data }
    }
}
