//! Vectorized environments: N independent instances stepped in lockstep

use async_trait::async_trait;

use crate::{Action, RenderMode, Space, StepInfo, VectorObservation};

/// Batched result of one lockstep step
#[derive(Debug, Clone, Default)]
pub struct VecStep {
    /// Next observation per environment (post-reset for finished episodes)
    pub observations: Vec<VectorObservation>,
    /// Reward per environment
    pub rewards: Vec<f64>,
    /// Episode-boundary flag per environment
    pub dones: Vec<bool>,
    /// Step info per environment
    pub infos: Vec<StepInfo>,
}

impl VecStep {
    /// Empty batch sized for `n` environments
    #[must_use]
    pub fn with_capacity(n: usize) -> Self {
        Self {
            observations: Vec::with_capacity(n),
            rewards: Vec::with_capacity(n),
            dones: Vec::with_capacity(n),
            infos: Vec::with_capacity(n),
        }
    }
}

/// A batch of environments driven together
///
/// Implementations reset a sub-environment automatically when its episode
/// ends and keep the final observation in `StepInfo::terminal_observation`.
#[async_trait]
pub trait VecEnv: Send + Sync {
    /// Number of sub-environments
    fn num_envs(&self) -> usize;

    /// Observation space of one sub-environment
    fn observation_space(&self) -> Space;

    /// Action space of one sub-environment
    fn action_space(&self) -> Space;

    /// Reset every sub-environment
    async fn reset(&mut self) -> crate::Result<Vec<VectorObservation>>;

    /// Step every sub-environment with its action
    async fn step(&mut self, actions: &[Action]) -> crate::Result<VecStep>;

    /// Render the first sub-environment
    async fn render(&self, _mode: RenderMode) -> crate::Result<()> {
        Ok(())
    }

    /// Close every sub-environment
    async fn close(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<V> VecEnv for Box<V>
where
    V: VecEnv + ?Sized,
{
    fn num_envs(&self) -> usize {
        (**self).num_envs()
    }

    fn observation_space(&self) -> Space {
        (**self).observation_space()
    }

    fn action_space(&self) -> Space {
        (**self).action_space()
    }

    async fn reset(&mut self) -> crate::Result<Vec<VectorObservation>> {
        (**self).reset().await
    }

    async fn step(&mut self, actions: &[Action]) -> crate::Result<VecStep> {
        (**self).step(actions).await
    }

    async fn render(&self, mode: RenderMode) -> crate::Result<()> {
        (**self).render(mode).await
    }

    async fn close(&mut self) -> crate::Result<()> {
        (**self).close().await
    }
}
