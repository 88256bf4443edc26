//! Observation and reward normalization from saved running statistics

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

use zoo_rl_core::{Action, RLError, RenderMode, Result, Space, VecEnv, VecStep, VectorObservation};

/// Running mean and variance, one entry per feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningMeanStd {
    /// Mean
    #[serde(deserialize_with = "scalar_or_vec")]
    pub mean: Vec<f64>,
    /// Variance
    #[serde(deserialize_with = "scalar_or_vec")]
    pub var: Vec<f64>,
    /// Count
    pub count: f64,
}

fn scalar_or_vec<'de, D>(deserializer: D) -> std::result::Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(f64),
        Many(Vec<f64>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(x) => vec![x],
        OneOrMany::Many(xs) => xs,
    })
}

impl RunningMeanStd {
    /// Standardize `x` feature-wise and clip into `[-clip, clip]`
    #[must_use]
    pub fn normalize(&self, x: &[f64], epsilon: f64, clip: f64) -> Vec<f64> {
        x.iter()
            .zip(self.mean.iter().zip(&self.var))
            .map(|(x, (m, v))| ((x - m) / (v + epsilon).sqrt()).clamp(-clip, clip))
            .collect()
    }
}

/// Contents of a `vecnormalize.json` statistics file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    /// Observation statistics
    pub obs_rms: RunningMeanStd,
    /// Discounted-return statistics (one feature)
    pub ret_rms: RunningMeanStd,
    /// Observation clip bound
    #[serde(default = "default_clip")]
    pub clip_obs: f64,
    /// Reward clip bound
    #[serde(default = "default_clip")]
    pub clip_reward: f64,
    /// Discount used for the running return
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    /// Variance floor
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Whether observations are normalized
    #[serde(default = "default_true")]
    pub norm_obs: bool,
    /// Whether rewards are normalized
    #[serde(default = "default_true")]
    pub norm_reward: bool,
}

fn default_clip() -> f64 {
    10.0
}

fn default_gamma() -> f64 {
    0.99
}

fn default_epsilon() -> f64 {
    1e-8
}

fn default_true() -> bool {
    true
}

impl NormalizationStats {
    /// Read statistics saved by a training run
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RLError::Environment(format!(
                "cannot read normalization stats {}: {e}",
                path.display()
            ))
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Normalizes observations (and optionally rewards) of a vectorized env
///
/// The statistics are frozen: stepping never updates them.
pub struct VecNormalize<V> {
    venv: V,
    stats: NormalizationStats,
}

impl<V: VecEnv> VecNormalize<V> {
    /// Wrap `venv` with saved statistics
    pub fn new(venv: V, stats: NormalizationStats) -> Result<Self> {
        let dim = venv.observation_space().flat_dim();
        if stats.norm_obs && stats.obs_rms.mean.len() != dim {
            return Err(RLError::DimensionMismatch {
                expected: dim,
                actual: stats.obs_rms.mean.len(),
            });
        }
        Ok(Self { venv, stats })
    }

    /// Load `vecnormalize.json` from `path` and wrap `venv` in test mode
    pub fn load(path: &Path, venv: V) -> Result<Self> {
        let stats = NormalizationStats::load(path)?;
        tracing::info!(path = %path.display(), "loaded normalization statistics");
        Self::new(venv, stats)
    }

    /// Override whether rewards are normalized
    pub fn set_norm_reward(&mut self, norm_reward: bool) {
        self.stats.norm_reward = norm_reward;
    }

    /// Frozen statistics
    pub fn stats(&self) -> &NormalizationStats {
        &self.stats
    }

    fn normalize_obs(&self, obs: &VectorObservation) -> VectorObservation {
        if !self.stats.norm_obs {
            return obs.clone();
        }
        VectorObservation::new(self.stats.obs_rms.normalize(
            &obs.data,
            self.stats.epsilon,
            self.stats.clip_obs,
        ))
    }

    fn normalize_reward(&self, reward: f64) -> f64 {
        if !self.stats.norm_reward {
            return reward;
        }
        let var = self.stats.ret_rms.var.first().copied().unwrap_or(1.0);
        (reward / (var + self.stats.epsilon).sqrt())
            .clamp(-self.stats.clip_reward, self.stats.clip_reward)
    }
}

#[async_trait]
impl<V: VecEnv> VecEnv for VecNormalize<V> {
    fn num_envs(&self) -> usize {
        self.venv.num_envs()
    }

    fn observation_space(&self) -> Space {
        self.venv.observation_space()
    }

    fn action_space(&self) -> Space {
        self.venv.action_space()
    }

    async fn reset(&mut self) -> Result<Vec<VectorObservation>> {
        let observations = self.venv.reset().await?;
        Ok(observations.iter().map(|o| self.normalize_obs(o)).collect())
    }

    async fn step(&mut self, actions: &[Action]) -> Result<VecStep> {
        let mut batch = self.venv.step(actions).await?;
        for i in 0..batch.observations.len() {
            batch.observations[i] = self.normalize_obs(&batch.observations[i]);
            batch.rewards[i] = self.normalize_reward(batch.rewards[i]);
            if let Some(terminal) = batch.infos[i].terminal_observation() {
                let normalized = self.normalize_obs(&terminal);
                batch.infos[i].set_terminal_observation(&normalized);
            }
        }
        Ok(batch)
    }

    async fn render(&self, mode: RenderMode) -> Result<()> {
        self.venv.render(mode).await
    }

    async fn close(&mut self) -> Result<()> {
        self.venv.close().await
    }
}
