//! Inference-only neural network policies
//!
//! Parameters are plain ndarray matrices loaded from a checkpoint. A policy
//! is an optional tanh recurrent cell, a stack of dense layers and an action
//! head producing logits (discrete actions) or means (continuous actions).

use async_trait::async_trait;
use ndarray::{Array1, Array2};
use rand::distributions::WeightedIndex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use zoo_rl_core::{Action, Policy, RLError, RecurrentState, Result, Space, VectorObservation};

/// Hidden-layer activation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Hyperbolic tangent
    #[default]
    Tanh,
    /// Rectified linear unit
    Relu,
    /// No activation
    Identity,
}

impl Activation {
    fn apply(self, x: Array1<f32>) -> Array1<f32> {
        match self {
            Activation::Tanh => x.mapv(f32::tanh),
            Activation::Relu => x.mapv(|v| v.max(0.0)),
            Activation::Identity => x,
        }
    }
}

/// Fully connected layer computing `x W + b`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    /// Weights, `[in_dim, out_dim]`
    pub weight: Array2<f32>,
    /// Bias, `[out_dim]`
    pub bias: Array1<f32>,
}

impl DenseLayer {
    /// Xavier-uniform weights and zero bias
    #[allow(clippy::cast_precision_loss)]
    pub fn xavier<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, rng: &mut R) -> Self {
        let limit = (6.0 / (in_dim + out_dim) as f32).sqrt();
        Self {
            weight: Array2::from_shape_fn((in_dim, out_dim), |_| rng.gen_range(-limit..limit)),
            bias: Array1::zeros(out_dim),
        }
    }

    /// Input width
    #[must_use]
    pub fn in_dim(&self) -> usize {
        self.weight.nrows()
    }

    /// Output width
    #[must_use]
    pub fn out_dim(&self) -> usize {
        self.weight.ncols()
    }

    fn forward(&self, x: &Array1<f32>) -> Array1<f32> {
        x.dot(&self.weight) + &self.bias
    }
}

/// Elman cell: `h' = tanh(x W_in + b + h W_hidden)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrentCell {
    /// Input projection
    pub input: DenseLayer,
    /// Hidden-to-hidden weights, `[hidden_dim, hidden_dim]`
    pub hidden: Array2<f32>,
}

impl RecurrentCell {
    /// Width of the hidden state
    #[must_use]
    pub fn hidden_dim(&self) -> usize {
        self.input.out_dim()
    }

    fn step(&self, x: &Array1<f32>, h: &Array1<f32>) -> Array1<f32> {
        (self.input.forward(x) + h.dot(&self.hidden)).mapv(f32::tanh)
    }
}

/// Serialized policy parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyParams {
    /// Activation between hidden layers
    #[serde(default)]
    pub activation: Activation,
    /// Recurrent cell applied to the observation first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrent: Option<RecurrentCell>,
    /// Hidden layers
    pub layers: Vec<DenseLayer>,
    /// Output layer
    pub action_head: DenseLayer,
    /// Log standard deviation of Gaussian actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_std: Option<Array1<f32>>,
    /// Squash continuous actions with tanh and rescale into bounds
    #[serde(default)]
    pub squash_output: bool,
}

impl PolicyParams {
    /// Randomly initialized parameters
    pub fn random(
        obs_dim: usize,
        hidden: &[usize],
        n_outputs: usize,
        recurrent_dim: Option<usize>,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let recurrent = recurrent_dim.map(|h| RecurrentCell {
            input: DenseLayer::xavier(obs_dim, h, &mut rng),
            hidden: DenseLayer::xavier(h, h, &mut rng).weight,
        });
        let mut prev = recurrent_dim.unwrap_or(obs_dim);
        let mut layers = Vec::with_capacity(hidden.len());
        for &dim in hidden {
            layers.push(DenseLayer::xavier(prev, dim, &mut rng));
            prev = dim;
        }
        Self {
            activation: Activation::Tanh,
            recurrent,
            layers,
            action_head: DenseLayer::xavier(prev, n_outputs, &mut rng),
            log_std: None,
            squash_output: false,
        }
    }

    /// Check that layer widths chain from `obs_dim` to `n_outputs`
    pub fn validate(&self, obs_dim: usize, n_outputs: usize) -> std::result::Result<(), String> {
        let mut width = obs_dim;
        if let Some(cell) = &self.recurrent {
            if cell.input.in_dim() != width {
                return Err(format!(
                    "recurrent cell expects {} inputs, got {width}",
                    cell.input.in_dim()
                ));
            }
            let h = cell.hidden_dim();
            if cell.hidden.dim() != (h, h) || cell.input.bias.len() != h {
                return Err(format!("recurrent cell weights are not {h}x{h}"));
            }
            width = h;
        }
        for (i, layer) in self.layers.iter().chain(Some(&self.action_head)).enumerate() {
            if layer.in_dim() != width {
                return Err(format!(
                    "layer {i} expects {} inputs, got {width}",
                    layer.in_dim()
                ));
            }
            if layer.bias.len() != layer.out_dim() {
                return Err(format!("layer {i} bias has the wrong size"));
            }
            width = layer.out_dim();
        }
        if width != n_outputs {
            return Err(format!("policy outputs {width} values, action space needs {n_outputs}"));
        }
        if let Some(log_std) = &self.log_std {
            if log_std.len() != n_outputs {
                return Err(format!("log_std has {} entries, expected {n_outputs}", log_std.len()));
            }
        }
        Ok(())
    }
}

/// Feed-forward (optionally recurrent) policy over flat observations
#[derive(Debug)]
pub struct MlpPolicy {
    params: PolicyParams,
    observation_space: Space,
    action_space: Space,
    rng: StdRng,
}

impl MlpPolicy {
    /// Bind parameters to spaces
    ///
    /// `seed` makes stochastic action sampling reproducible.
    pub fn new(
        params: PolicyParams,
        observation_space: Space,
        action_space: Space,
        seed: Option<u64>,
    ) -> Result<Self> {
        params
            .validate(observation_space.flat_dim(), action_space.n_outputs())
            .map_err(RLError::Policy)?;
        Ok(Self {
            params,
            observation_space,
            action_space,
            rng: seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64),
        })
    }

    /// Width of the recurrent state, if any
    #[must_use]
    pub fn hidden_dim(&self) -> Option<usize> {
        self.params.recurrent.as_ref().map(RecurrentCell::hidden_dim)
    }

    /// Raw network output and the next hidden state
    fn forward(&self, obs: &[f32], hidden: Option<&[f32]>) -> (Array1<f32>, Option<Array1<f32>>) {
        let mut x = Array1::from_vec(obs.to_vec());
        let mut next_hidden = None;
        if let Some(cell) = &self.params.recurrent {
            let h = hidden.map_or_else(
                || Array1::zeros(cell.hidden_dim()),
                |h| Array1::from_vec(h.to_vec()),
            );
            x = cell.step(&x, &h);
            next_hidden = Some(x.clone());
        }
        for layer in &self.params.layers {
            x = self.params.activation.apply(layer.forward(&x));
        }
        (self.params.action_head.forward(&x), next_hidden)
    }

    fn select(&mut self, output: &Array1<f32>, deterministic: bool) -> Result<Action> {
        match &self.action_space {
            Space::Discrete(_) => {
                if deterministic {
                    return Ok(Action::Discrete(argmax(output)));
                }
                let max = output.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let weights: Vec<f32> = output.iter().map(|&l| (l - max).exp()).collect();
                let dist = WeightedIndex::new(&weights)
                    .map_err(|e| RLError::Policy(format!("invalid action logits: {e}")))?;
                Ok(Action::Discrete(dist.sample(&mut self.rng)))
            }
            Space::Box(bounds) => {
                let mut values: Vec<f64> = output.iter().map(|&m| f64::from(m)).collect();
                if !deterministic {
                    if let Some(log_std) = &self.params.log_std {
                        for (v, &ls) in values.iter_mut().zip(log_std) {
                            let noise = Normal::new(0.0, f64::from(ls).exp())
                                .map_err(|e| RLError::Policy(e.to_string()))?;
                            *v += noise.sample(&mut self.rng);
                        }
                    }
                }
                if self.params.squash_output {
                    values = values
                        .iter()
                        .zip(bounds.low.iter().zip(&bounds.high))
                        .map(|(v, (l, h))| l + (v.tanh() + 1.0) * 0.5 * (h - l))
                        .collect();
                }
                Ok(Action::Continuous(bounds.clip(&values)))
            }
        }
    }
}

fn argmax(values: &Array1<f32>) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
        .0
}

#[async_trait]
impl Policy for MlpPolicy {
    fn observation_space(&self) -> &Space {
        &self.observation_space
    }

    fn action_space(&self) -> &Space {
        &self.action_space
    }

    async fn predict(
        &mut self,
        observations: &[VectorObservation],
        state: Option<RecurrentState>,
        episode_start: &[bool],
        deterministic: bool,
    ) -> Result<(Vec<Action>, Option<RecurrentState>)> {
        let n = observations.len();
        if episode_start.len() != n {
            return Err(RLError::DimensionMismatch {
                expected: n,
                actual: episode_start.len(),
            });
        }
        let obs_dim = self.observation_space.flat_dim();
        let mut state = self.hidden_dim().map(|dim| match state {
            Some(s) if s.hidden.len() == n => s,
            _ => RecurrentState::zeros(n, dim),
        });

        let mut actions = Vec::with_capacity(n);
        for (i, obs) in observations.iter().enumerate() {
            if obs.len() != obs_dim {
                return Err(RLError::DimensionMismatch {
                    expected: obs_dim,
                    actual: obs.len(),
                });
            }
            let hidden = state
                .as_ref()
                .filter(|_| !episode_start[i])
                .map(|s| s.hidden[i].as_slice());
            let (output, next) = self.forward(&obs.to_f32(), hidden);
            if let (Some(s), Some(next)) = (state.as_mut(), next) {
                s.hidden[i] = next.to_vec();
            }
            actions.push(self.select(&output, deterministic)?);
        }
        Ok((actions, state))
    }
}
