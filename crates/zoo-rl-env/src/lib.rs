//! Reinforcement learning environments for evaluating trained agents
//!
//! This crate provides:
//! - Classic control environments and a small goal-reaching grid task
//! - A global registry creating environments by id
//! - Wrappers (time limit, monitor, action clipping)
//! - Vectorized environments with frame stacking and frozen normalization

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod classic;
pub mod gridworld;
pub mod normalize;
pub mod registry;
pub mod vec_env;
pub mod wrappers;

// Re-export environments
pub use classic::{CartPoleEnv, MountainCarEnv, PendulumEnv};
pub use gridworld::GridGoalEnv;
pub use normalize::{NormalizationStats, RunningMeanStd, VecNormalize};
pub use registry::{
    is_atari, list_envs, make_env, register_env, register_package, spec, EnvFamily, EnvRegistry,
    EnvSpec,
};
pub use vec_env::{make_vec_env, DummyVecEnv, VecEnvOptions, VecFrameStack};
pub use wrappers::{apply_wrappers, ClipAction, Monitor, TimeLimit, WrapperSpec};

// Re-export core types
pub use zoo_rl_core::{
    Action, EnvKwargs, Environment, Reward, Space, Step, StepInfo, VecEnv, VecStep,
    VectorObservation,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{make_env, make_vec_env, DummyVecEnv, Monitor, TimeLimit, VecEnvOptions};
    pub use zoo_rl_core::prelude::*;
}
