//! Policy abstractions for action selection

use async_trait::async_trait;
use rand::{rngs::StdRng, SeedableRng};

use crate::{Action, RLError, Space, VectorObservation};

/// Hidden state carried between calls by recurrent policies
///
/// One row per sub-environment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecurrentState {
    /// Hidden activations, `[n_envs][hidden_dim]`
    pub hidden: Vec<Vec<f32>>,
}

impl RecurrentState {
    /// Zeroed state for `n_envs` environments
    #[must_use]
    pub fn zeros(n_envs: usize, hidden_dim: usize) -> Self {
        Self {
            hidden: vec![vec![0.0; hidden_dim]; n_envs],
        }
    }
}

/// Core policy trait for selecting actions
///
/// Policies are inference only: they map a batch of observations (one per
/// sub-environment) to a batch of actions.
#[async_trait]
pub trait Policy: Send + Sync {
    /// Observation space the policy was trained on
    fn observation_space(&self) -> &Space;

    /// Action space the policy acts in
    fn action_space(&self) -> &Space;

    /// Select one action per observation
    ///
    /// `state` is the recurrent state returned by the previous call (or
    /// `None` on the first call); `episode_start[i]` tells a recurrent
    /// policy to forget the state of environment `i`. Stateless policies
    /// return `None` as the next state.
    async fn predict(
        &mut self,
        observations: &[VectorObservation],
        state: Option<RecurrentState>,
        episode_start: &[bool],
        deterministic: bool,
    ) -> crate::Result<(Vec<Action>, Option<RecurrentState>)>;
}

#[async_trait]
impl<P> Policy for Box<P>
where
    P: Policy + ?Sized,
{
    fn observation_space(&self) -> &Space {
        (**self).observation_space()
    }

    fn action_space(&self) -> &Space {
        (**self).action_space()
    }

    async fn predict(
        &mut self,
        observations: &[VectorObservation],
        state: Option<RecurrentState>,
        episode_start: &[bool],
        deterministic: bool,
    ) -> crate::Result<(Vec<Action>, Option<RecurrentState>)> {
        (**self)
            .predict(observations, state, episode_start, deterministic)
            .await
    }
}

/// Random policy that always selects random actions
pub struct RandomPolicy {
    observation_space: Space,
    action_space: Space,
    rng: StdRng,
}

impl RandomPolicy {
    /// Create a new random policy
    #[must_use]
    pub fn new(observation_space: Space, action_space: Space, seed: u64) -> Self {
        Self {
            observation_space,
            action_space,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

#[async_trait]
impl Policy for RandomPolicy {
    fn observation_space(&self) -> &Space {
        &self.observation_space
    }

    fn action_space(&self) -> &Space {
        &self.action_space
    }

    async fn predict(
        &mut self,
        observations: &[VectorObservation],
        _state: Option<RecurrentState>,
        episode_start: &[bool],
        _deterministic: bool,
    ) -> crate::Result<(Vec<Action>, Option<RecurrentState>)> {
        if episode_start.len() != observations.len() {
            return Err(RLError::DimensionMismatch {
                expected: observations.len(),
                actual: episode_start.len(),
            });
        }
        let actions = observations
            .iter()
            .map(|_| self.action_space.sample(&mut self.rng))
            .collect();
        Ok((actions, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiscreteSpace;

    #[tokio::test]
    async fn random_policy_is_reproducible() {
        let obs_space = Space::Discrete(DiscreteSpace::new(1));
        let act_space = Space::Discrete(DiscreteSpace::new(4));
        let observations = vec![VectorObservation::default(); 3];
        let starts = vec![true; 3];

        let mut a = RandomPolicy::new(obs_space.clone(), act_space.clone(), 11);
        let mut b = RandomPolicy::new(obs_space, act_space, 11);
        let (first, state) = a.predict(&observations, None, &starts, true).await.unwrap();
        let (second, _) = b.predict(&observations, None, &starts, true).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn random_policy_checks_batch_sizes() {
        let space = Space::Discrete(DiscreteSpace::new(2));
        let mut policy = RandomPolicy::new(space.clone(), space, 0);
        let err = policy
            .predict(&[VectorObservation::default()], None, &[true, true], false)
            .await
            .unwrap_err();
        assert!(matches!(err, RLError::DimensionMismatch { expected: 1, actual: 2 }));
    }
}
