//! Environment registry for creating environments by id

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use zoo_rl_core::{EnvKwargs, Environment, RLError};

use crate::classic::{CartPoleEnv, MountainCarEnv, PendulumEnv};
use crate::gridworld::GridGoalEnv;
use crate::wrappers::TimeLimit;

/// Boxed constructor taking the keyword arguments of one instance
pub type EnvConstructor =
    Arc<dyn Fn(&EnvKwargs) -> zoo_rl_core::Result<Box<dyn Environment>> + Send + Sync>;

lazy_static::lazy_static! {
    static ref REGISTRY: Arc<Mutex<EnvRegistry>> = Arc::new(Mutex::new(EnvRegistry::new()));
}

/// Broad family an environment belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvFamily {
    /// Low-dimensional physics control tasks
    ClassicControl,
    /// Small discrete tasks
    ToyText,
    /// Arcade games, scored by the monitor's episode info
    Atari,
}

/// Registration metadata of one environment id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvSpec {
    /// Environment id, e.g. `CartPole-v1`
    pub id: String,
    /// Family of the environment
    pub family: EnvFamily,
    /// Step limit applied through a [`TimeLimit`] wrapper
    pub max_episode_steps: Option<usize>,
    /// Average return at which the task counts as solved
    pub reward_threshold: Option<f64>,
}

impl EnvSpec {
    /// Spec with no step limit or threshold
    pub fn new(id: impl Into<String>, family: EnvFamily) -> Self {
        Self {
            id: id.into(),
            family,
            max_episode_steps: None,
            reward_threshold: None,
        }
    }

    /// Set the step limit
    #[must_use]
    pub fn with_max_episode_steps(mut self, steps: usize) -> Self {
        self.max_episode_steps = Some(steps);
        self
    }

    /// Set the solved threshold
    #[must_use]
    pub fn with_reward_threshold(mut self, threshold: f64) -> Self {
        self.reward_threshold = Some(threshold);
        self
    }
}

struct Registration {
    spec: EnvSpec,
    constructor: EnvConstructor,
}

/// Global environment registry
pub struct EnvRegistry {
    /// Registered environments
    envs: HashMap<String, Registration>,
}

impl fmt::Debug for EnvRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvRegistry")
            .field("envs", &self.list())
            .finish()
    }
}

impl EnvRegistry {
    /// Create a registry holding the built-in classic control tasks
    fn new() -> Self {
        let mut registry = Self {
            envs: HashMap::new(),
        };
        registry.register(
            EnvSpec::new("CartPole-v1", EnvFamily::ClassicControl)
                .with_max_episode_steps(500)
                .with_reward_threshold(475.0),
            |kwargs| Ok(Box::new(CartPoleEnv::new(kwargs)) as Box<dyn Environment>),
        );
        registry.register(
            EnvSpec::new("MountainCar-v0", EnvFamily::ClassicControl)
                .with_max_episode_steps(200)
                .with_reward_threshold(-110.0),
            |kwargs| Ok(Box::new(MountainCarEnv::new(kwargs)) as Box<dyn Environment>),
        );
        registry.register(
            EnvSpec::new("Pendulum-v1", EnvFamily::ClassicControl).with_max_episode_steps(200),
            |kwargs| Ok(Box::new(PendulumEnv::new(kwargs)) as Box<dyn Environment>),
        );
        registry
    }

    /// Register an environment, replacing any previous entry with the same id
    pub fn register<F>(&mut self, spec: EnvSpec, constructor: F)
    where
        F: Fn(&EnvKwargs) -> zoo_rl_core::Result<Box<dyn Environment>> + Send + Sync + 'static,
    {
        self.envs.insert(
            spec.id.clone(),
            Registration {
                spec,
                constructor: Arc::new(constructor),
            },
        );
    }

    /// Look up the spec and constructor of an environment
    fn entry(&self, id: &str) -> zoo_rl_core::Result<(EnvSpec, EnvConstructor)> {
        self.envs
            .get(id)
            .map(|r| (r.spec.clone(), Arc::clone(&r.constructor)))
            .ok_or_else(|| RLError::UnknownEnvironment(id.to_owned()))
    }

    /// Spec of a registered environment
    pub fn spec(&self, id: &str) -> Option<&EnvSpec> {
        self.envs.get(id).map(|r| &r.spec)
    }

    /// List registered environments, sorted by id
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.envs.keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn registry() -> MutexGuard<'static, EnvRegistry> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Register an environment globally
pub fn register_env<F>(spec: EnvSpec, constructor: F)
where
    F: Fn(&EnvKwargs) -> zoo_rl_core::Result<Box<dyn Environment>> + Send + Sync + 'static,
{
    tracing::debug!(env_id = %spec.id, family = ?spec.family, "registering environment");
    registry().register(spec, constructor);
}

/// Create an environment by id
///
/// The instance is wrapped in a [`TimeLimit`] when `kwargs.max_episode_steps`
/// or the registered spec sets a step limit.
pub fn make_env(id: &str, kwargs: &EnvKwargs) -> zoo_rl_core::Result<Box<dyn Environment>> {
    // Release the lock before running user constructors
    let (spec, constructor) = registry().entry(id)?;
    let env = constructor(kwargs)?;
    match kwargs.max_episode_steps.or(spec.max_episode_steps) {
        Some(limit) => Ok(Box::new(TimeLimit::new(env, limit))),
        None => Ok(env),
    }
}

/// Spec of a registered environment
pub fn spec(id: &str) -> Option<EnvSpec> {
    registry().spec(id).cloned()
}

/// List all registered environments
pub fn list_envs() -> Vec<String> {
    registry().list()
}

/// Whether `id` is registered as an Atari game
pub fn is_atari(id: &str) -> bool {
    spec(id).is_some_and(|s| s.family == EnvFamily::Atari)
}

/// Import an extra environment package, registering its environments
///
/// Importing a package twice is harmless.
pub fn register_package(name: &str) -> zoo_rl_core::Result<()> {
    match name {
        // Built in
        "classic_control" => {}
        "gridworld" => register_env(
            EnvSpec::new("GridGoal-v0", EnvFamily::ToyText).with_max_episode_steps(50),
            |kwargs| Ok(Box::new(GridGoalEnv::new(kwargs)) as Box<dyn Environment>),
        ),
        other => {
            return Err(RLError::Environment(format!(
                "Unknown environment package: {other}"
            )))
        }
    }
    tracing::info!(package = name, "imported environment package");
    Ok(())
}
