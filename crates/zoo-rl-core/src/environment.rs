//! Environment traits and types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Action, RLError, Reward, Space, VectorObservation};

/// Result of a single environment step
#[derive(Debug, Clone)]
pub struct Step {
    /// Observation from the environment
    pub observation: VectorObservation,
    /// Reward signal
    pub reward: Reward,
    /// Whether the episode reached a terminal state
    pub done: bool,
    /// Whether the episode was truncated (e.g., time limit)
    pub truncated: bool,
    /// Additional info from the environment
    pub info: StepInfo,
}

impl Step {
    /// Whether this step ends the episode, for any reason
    #[must_use]
    pub fn is_boundary(&self) -> bool {
        self.done || self.truncated
    }
}

/// Statistics of a finished episode, as reported by a monitor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpisodeInfo {
    /// Total (unnormalized) reward
    pub r: f64,
    /// Length in steps
    pub l: usize,
    /// Seconds since the monitor started
    pub t: f64,
}

/// Additional information from a step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    /// Custom fields
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

impl StepInfo {
    const EPISODE: &'static str = "episode";
    const IS_SUCCESS: &'static str = "is_success";
    const TERMINAL_OBSERVATION: &'static str = "terminal_observation";
    const TIME_LIMIT_TRUNCATED: &'static str = "TimeLimit.truncated";

    /// Insert an arbitrary field
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// Goal-achieved flag, when the environment reports one
    ///
    /// Accepts booleans and numbers (non-zero is success).
    #[must_use]
    pub fn is_success(&self) -> Option<bool> {
        match self.fields.get(Self::IS_SUCCESS)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|x| x != 0.0),
            _ => None,
        }
    }

    /// Record the goal-achieved flag
    pub fn set_success(&mut self, success: bool) {
        self.insert(Self::IS_SUCCESS, Value::Bool(success));
    }

    /// Episode statistics attached by a monitor at the end of an episode
    #[must_use]
    pub fn episode(&self) -> Option<EpisodeInfo> {
        self.fields
            .get(Self::EPISODE)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Attach episode statistics
    pub fn set_episode(&mut self, episode: EpisodeInfo) {
        if let Ok(value) = serde_json::to_value(episode) {
            self.insert(Self::EPISODE, value);
        }
    }

    /// Last observation of an episode that was auto-reset by a vectorized env
    #[must_use]
    pub fn terminal_observation(&self) -> Option<VectorObservation> {
        self.fields
            .get(Self::TERMINAL_OBSERVATION)
            .and_then(|v| serde_json::from_value::<Vec<f64>>(v.clone()).ok())
            .map(VectorObservation::new)
    }

    /// Stash the last observation before an auto-reset
    pub fn set_terminal_observation(&mut self, observation: &VectorObservation) {
        self.insert(
            Self::TERMINAL_OBSERVATION,
            Value::from(observation.data.clone()),
        );
    }

    /// Whether a time limit cut the episode short
    #[must_use]
    pub fn time_limit_truncated(&self) -> bool {
        matches!(self.fields.get(Self::TIME_LIMIT_TRUNCATED), Some(Value::Bool(true)))
    }

    /// Flag a time-limit truncation
    pub fn set_time_limit_truncated(&mut self, truncated: bool) {
        self.insert(Self::TIME_LIMIT_TRUNCATED, Value::Bool(truncated));
    }
}

/// How an environment should be rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Draw for a human watching the terminal
    Human,
    /// Produce a text frame
    Ansi,
}

/// Keyword arguments passed to an environment constructor
///
/// Every knob a registered environment understands is a named optional
/// field. `None` keeps the environment default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvKwargs {
    /// Override of the registered episode step limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_episode_steps: Option<usize>,
    /// Render mode requested at construction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_mode: Option<RenderMode>,
    /// Gravitational acceleration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gravity: Option<f64>,
    /// Magnitude of the force applied by an action (cart-pole)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_mag: Option<f64>,
    /// Half length of the pole (cart-pole)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pole_length: Option<f64>,
    /// Minimum velocity at the goal (mountain car)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_velocity: Option<f64>,
    /// Speed limit (mountain car, pendulum)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_speed: Option<f64>,
    /// Torque limit (pendulum)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_torque: Option<f64>,
}

impl EnvKwargs {
    /// Set one field from a `key` and a raw textual value
    ///
    /// The value is read as JSON when possible (`1.5`, `true`, `null`) and
    /// as a bare string otherwise (`human`).
    pub fn set(&mut self, key: &str, raw: &str) -> crate::Result<()> {
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
        let mut fields = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        fields.insert(key.to_owned(), value);
        *self = serde_json::from_value(Value::Object(fields)).map_err(|e| RLError::InvalidKwarg {
            key: key.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

/// Core environment trait
#[async_trait]
pub trait Environment: Send + Sync {
    /// Get the observation space
    fn observation_space(&self) -> Space;

    /// Get the action space
    fn action_space(&self) -> Space;

    /// Reset the environment, reseeding it when a seed is given
    async fn reset(&mut self, seed: Option<u64>) -> crate::Result<(VectorObservation, StepInfo)>;

    /// Take a step in the environment
    async fn step(&mut self, action: &Action) -> crate::Result<Step>;

    /// Render the environment (optional)
    async fn render(&self, _mode: RenderMode) -> crate::Result<()> {
        Ok(())
    }

    /// Close the environment
    async fn close(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<E> Environment for Box<E>
where
    E: Environment + ?Sized,
{
    fn observation_space(&self) -> Space {
        (**self).observation_space()
    }

    fn action_space(&self) -> Space {
        (**self).action_space()
    }

    async fn reset(&mut self, seed: Option<u64>) -> crate::Result<(VectorObservation, StepInfo)> {
        (**self).reset(seed).await
    }

    async fn step(&mut self, action: &Action) -> crate::Result<Step> {
        (**self).step(action).await
    }

    async fn render(&self, mode: RenderMode) -> crate::Result<()> {
        (**self).render(mode).await
    }

    async fn close(&mut self) -> crate::Result<()> {
        (**self).close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kwargs_parse_numbers_and_strings() {
        let mut kwargs = EnvKwargs::default();
        kwargs.set("gravity", "3.7").unwrap();
        kwargs.set("render_mode", "human").unwrap();
        kwargs.set("max_episode_steps", "200").unwrap();
        assert_eq!(kwargs.gravity, Some(3.7));
        assert_eq!(kwargs.render_mode, Some(RenderMode::Human));
        assert_eq!(kwargs.max_episode_steps, Some(200));
    }

    #[test]
    fn kwargs_reject_unknown_keys() {
        let mut kwargs = EnvKwargs::default();
        let err = kwargs.set("warp_drive", "true").unwrap_err();
        assert!(matches!(err, RLError::InvalidKwarg { ref key, .. } if key == "warp_drive"));
        assert_eq!(kwargs, EnvKwargs::default());
    }

    #[test]
    fn kwargs_null_clears_field() {
        let mut kwargs = EnvKwargs {
            gravity: Some(1.0),
            ..EnvKwargs::default()
        };
        kwargs.set("gravity", "null").unwrap();
        assert_eq!(kwargs.gravity, None);
    }

    #[test]
    fn step_info_reads_success_and_episode() {
        let mut info = StepInfo::default();
        assert_eq!(info.is_success(), None);
        info.insert("is_success", Value::from(1.0));
        assert_eq!(info.is_success(), Some(true));
        info.set_episode(EpisodeInfo { r: 12.5, l: 7, t: 0.1 });
        assert_eq!(info.episode().map(|e| e.l), Some(7));
    }
}
