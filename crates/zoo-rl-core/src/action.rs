//! Action representations and action/observation spaces

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{RLError, Result};

/// Action sent to an environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Action {
    /// Index into a discrete action space
    Discrete(usize),
    /// Point in a continuous (box) action space
    Continuous(Vec<f64>),
}

impl Action {
    /// Convert action to a vector representation
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_vec(&self) -> Vec<f64> {
        match self {
            Self::Discrete(a) => vec![*a as f64],
            Self::Continuous(values) => values.clone(),
        }
    }

    /// Discrete index, or an error for continuous actions
    pub fn discrete(&self) -> Result<usize> {
        match self {
            Self::Discrete(a) => Ok(*a),
            Self::Continuous(_) => Err(RLError::InvalidAction(
                "expected a discrete action, got a continuous one".into(),
            )),
        }
    }

    /// Continuous values, or an error for discrete actions
    pub fn continuous(&self) -> Result<&[f64]> {
        match self {
            Self::Continuous(values) => Ok(values),
            Self::Discrete(_) => Err(RLError::InvalidAction(
                "expected a continuous action, got a discrete one".into(),
            )),
        }
    }
}

/// Discrete space `{0, .., n - 1}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscreteSpace {
    /// Number of discrete actions
    pub n: usize,
}

impl DiscreteSpace {
    /// Create a new discrete space
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

/// Bounded box space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxSpace {
    /// Lower bounds, flattened
    pub low: Vec<f64>,
    /// Upper bounds, flattened
    pub high: Vec<f64>,
    /// Shape of elements
    pub shape: Vec<usize>,
}

impl BoxSpace {
    /// Create a new box space
    pub fn new(low: Vec<f64>, high: Vec<f64>, shape: Vec<usize>) -> Result<Self> {
        let total_size: usize = shape.iter().product();
        if low.len() != total_size {
            return Err(RLError::DimensionMismatch {
                expected: total_size,
                actual: low.len(),
            });
        }
        if high.len() != total_size {
            return Err(RLError::DimensionMismatch {
                expected: total_size,
                actual: high.len(),
            });
        }
        Ok(Self { low, high, shape })
    }

    /// One-dimensional box with the same bounds on every axis
    pub fn uniform(low: f64, high: f64, dim: usize) -> Result<Self> {
        Self::new(vec![low; dim], vec![high; dim], vec![dim])
    }

    /// Clip a point into the box
    #[must_use]
    pub fn clip(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .zip(self.low.iter().zip(&self.high))
            .map(|(x, (l, h))| x.clamp(*l, *h))
            .collect()
    }
}

/// Observation or action space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Space {
    /// Finite set of choices
    Discrete(DiscreteSpace),
    /// Continuous box
    Box(BoxSpace),
}

impl Space {
    /// Flat size of one element (1 for discrete spaces)
    #[must_use]
    pub fn flat_dim(&self) -> usize {
        match self {
            Self::Discrete(_) => 1,
            Self::Box(b) => b.low.len(),
        }
    }

    /// Number of policy outputs needed to parameterise this space
    #[must_use]
    pub fn n_outputs(&self) -> usize {
        match self {
            Self::Discrete(d) => d.n,
            Self::Box(b) => b.low.len(),
        }
    }

    /// Shape of one element
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Self::Discrete(_) => Vec::new(),
            Self::Box(b) => b.shape.clone(),
        }
    }

    /// Sample uniformly from the space
    ///
    /// Unbounded box axes are sampled from `[-1, 1)`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Action {
        match self {
            Self::Discrete(d) => Action::Discrete(rng.gen_range(0..d.n.max(1))),
            Self::Box(b) => Action::Continuous(
                b.low
                    .iter()
                    .zip(&b.high)
                    .map(|(l, h)| {
                        let (l, h) = (l.max(-1.0), h.min(1.0));
                        if l < h {
                            rng.gen_range(l..h)
                        } else {
                            l
                        }
                    })
                    .collect(),
            ),
        }
    }

    /// Check if an action is valid within this space
    #[must_use]
    pub fn contains(&self, action: &Action) -> bool {
        match (self, action) {
            (Self::Discrete(d), Action::Discrete(a)) => *a < d.n,
            (Self::Box(b), Action::Continuous(values)) => {
                values.len() == b.low.len()
                    && values
                        .iter()
                        .zip(&b.low)
                        .zip(&b.high)
                        .all(|((x, l), h)| x >= l && x <= h)
            }
            _ => false,
        }
    }

    /// Same space with every box axis repeated `n` times along the last dimension
    ///
    /// Used when frames are stacked.
    #[must_use]
    pub fn stacked(&self, n: usize) -> Self {
        match self {
            Self::Discrete(_) => self.clone(),
            Self::Box(b) => {
                let mut shape = b.shape.clone();
                if let Some(last) = shape.last_mut() {
                    *last *= n;
                } else {
                    shape.push(n);
                }
                Self::Box(BoxSpace {
                    low: b.low.repeat(n),
                    high: b.high.repeat(n),
                    shape,
                })
            }
        }
    }
}

impl From<DiscreteSpace> for Space {
    fn from(space: DiscreteSpace) -> Self {
        Self::Discrete(space)
    }
}

impl From<BoxSpace> for Space {
    fn from(space: BoxSpace) -> Self {
        Self::Box(space)
    }
}
