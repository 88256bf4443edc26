//! Vectorized environments stepped sequentially in one thread

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;

use zoo_rl_core::{
    Action, EnvKwargs, Environment, RLError, RenderMode, Result, Space, VecEnv, VecStep,
    VectorObservation,
};

use crate::registry::make_env;
use crate::wrappers::{apply_wrappers, Monitor, WrapperSpec};

/// Runs every sub-environment in turn on the calling task
///
/// A finished sub-environment is reset immediately; its last observation is
/// kept in the step info under `terminal_observation`.
pub struct DummyVecEnv {
    envs: Vec<Box<dyn Environment>>,
    observation_space: Space,
    action_space: Space,
    pending_seed: Option<u64>,
}

impl DummyVecEnv {
    /// Stack environments that share the same spaces
    pub fn new(envs: Vec<Box<dyn Environment>>) -> Result<Self> {
        let first = envs
            .first()
            .ok_or_else(|| RLError::Environment("DummyVecEnv needs at least one env".into()))?;
        let observation_space = first.observation_space();
        let action_space = first.action_space();
        if let Some(i) = envs.iter().position(|e| {
            e.observation_space() != observation_space || e.action_space() != action_space
        }) {
            return Err(RLError::Environment(format!(
                "sub-environment {i} has different spaces than sub-environment 0"
            )));
        }
        Ok(Self {
            envs,
            observation_space,
            action_space,
            pending_seed: None,
        })
    }

    /// Seed the next reset: sub-environment `i` gets `seed + i`
    pub fn seed(&mut self, seed: u64) {
        self.pending_seed = Some(seed);
    }
}

#[async_trait]
impl VecEnv for DummyVecEnv {
    fn num_envs(&self) -> usize {
        self.envs.len()
    }

    fn observation_space(&self) -> Space {
        self.observation_space.clone()
    }

    fn action_space(&self) -> Space {
        self.action_space.clone()
    }

    async fn reset(&mut self) -> Result<Vec<VectorObservation>> {
        let seed = self.pending_seed.take();
        let mut observations = Vec::with_capacity(self.envs.len());
        for (i, env) in self.envs.iter_mut().enumerate() {
            let (obs, _) = env.reset(seed.map(|s| s + i as u64)).await?;
            observations.push(obs);
        }
        Ok(observations)
    }

    async fn step(&mut self, actions: &[Action]) -> Result<VecStep> {
        if actions.len() != self.envs.len() {
            return Err(RLError::DimensionMismatch {
                expected: self.envs.len(),
                actual: actions.len(),
            });
        }
        let mut batch = VecStep::with_capacity(self.envs.len());
        for (env, action) in self.envs.iter_mut().zip(actions) {
            let step = env.step(action).await?;
            let done = step.is_boundary();
            let mut info = step.info;
            let observation = if done {
                info.set_terminal_observation(&step.observation);
                if step.truncated && !step.done {
                    info.set_time_limit_truncated(true);
                }
                env.reset(None).await?.0
            } else {
                step.observation
            };
            batch.observations.push(observation);
            batch.rewards.push(step.reward.value());
            batch.dones.push(done);
            batch.infos.push(info);
        }
        Ok(batch)
    }

    async fn render(&self, mode: RenderMode) -> Result<()> {
        match self.envs.first() {
            Some(env) => env.render(mode).await,
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        for env in &mut self.envs {
            env.close().await?;
        }
        Ok(())
    }
}

/// Stacks the last `n_stack` observations of every sub-environment
///
/// Frames are concatenated oldest first; the stack is zero-filled on reset.
pub struct VecFrameStack<V> {
    venv: V,
    n_stack: usize,
    frames: Vec<VecDeque<Vec<f64>>>,
}

impl<V: VecEnv> VecFrameStack<V> {
    /// Wrap `venv`, stacking `n_stack` frames
    pub fn new(venv: V, n_stack: usize) -> Result<Self> {
        if n_stack == 0 {
            return Err(RLError::Environment("frame stack size must be positive".into()));
        }
        let n = venv.num_envs();
        Ok(Self {
            venv,
            n_stack,
            frames: vec![VecDeque::with_capacity(n_stack); n],
        })
    }

    fn fill(&mut self, i: usize, obs: &VectorObservation) {
        let stack = &mut self.frames[i];
        stack.clear();
        for _ in 1..self.n_stack {
            stack.push_back(vec![0.0; obs.len()]);
        }
        stack.push_back(obs.data.clone());
    }

    fn push(&mut self, i: usize, obs: &VectorObservation) {
        let stack = &mut self.frames[i];
        stack.pop_front();
        stack.push_back(obs.data.clone());
    }

    fn stacked(&self, i: usize) -> VectorObservation {
        VectorObservation::new(self.frames[i].iter().flatten().copied().collect())
    }
}

#[async_trait]
impl<V: VecEnv> VecEnv for VecFrameStack<V> {
    fn num_envs(&self) -> usize {
        self.venv.num_envs()
    }

    fn observation_space(&self) -> Space {
        self.venv.observation_space().stacked(self.n_stack)
    }

    fn action_space(&self) -> Space {
        self.venv.action_space()
    }

    async fn reset(&mut self) -> Result<Vec<VectorObservation>> {
        let observations = self.venv.reset().await?;
        for (i, obs) in observations.iter().enumerate() {
            self.fill(i, obs);
        }
        Ok((0..observations.len()).map(|i| self.stacked(i)).collect())
    }

    async fn step(&mut self, actions: &[Action]) -> Result<VecStep> {
        let mut batch = self.venv.step(actions).await?;
        for i in 0..batch.observations.len() {
            if batch.dones[i] {
                if let Some(terminal) = batch.infos[i].terminal_observation() {
                    self.push(i, &terminal);
                    let stacked = self.stacked(i);
                    batch.infos[i].set_terminal_observation(&stacked);
                }
                let obs = batch.observations[i].clone();
                self.fill(i, &obs);
            } else {
                let obs = batch.observations[i].clone();
                self.push(i, &obs);
            }
            batch.observations[i] = self.stacked(i);
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

/// How to build the sub-environments of a [`DummyVecEnv`]
#[derive(Debug, Clone, Default)]
pub struct VecEnvOptions {
    /// Number of sub-environments
    pub n_envs: usize,
    /// Base seed; sub-environment `i` is seeded `seed + i`
    pub seed: Option<u64>,
    /// Constructor keyword arguments
    pub env_kwargs: EnvKwargs,
    /// Extra wrappers applied inside the monitor
    pub wrappers: Vec<WrapperSpec>,
    /// Directory receiving `<i>.monitor.csv` files
    pub monitor_dir: Option<PathBuf>,
}

/// Create `n_envs` monitored copies of `env_id` and stack them
pub fn make_vec_env(env_id: &str, options: &VecEnvOptions) -> Result<DummyVecEnv> {
    if let Some(dir) = &options.monitor_dir {
        std::fs::create_dir_all(dir)?;
    }
    let envs = (0..options.n_envs.max(1))
        .map(|i| {
            let env = apply_wrappers(make_env(env_id, &options.env_kwargs)?, &options.wrappers);
            let csv = options.monitor_dir.as_ref().map(|d| d.join(i.to_string()));
            let monitored = Monitor::new(env, env_id, csv.as_deref())?;
            Ok(Box::new(monitored) as Box<dyn Environment>)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut venv = DummyVecEnv::new(envs)?;
    if let Some(seed) = options.seed {
        venv.seed(seed);
    }
    tracing::debug!(env_id, n_envs = venv.num_envs(), "created vectorized env");
    Ok(venv)
}
