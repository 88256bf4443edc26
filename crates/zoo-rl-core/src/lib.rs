//! Core reinforcement learning traits and types for the zoo evaluation tools
//!
//! This crate provides the abstractions the evaluation driver is written
//! against: observation/action spaces, single and vectorized environments,
//! and inference-only policies.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod environment;
pub mod error;
pub mod observation;
pub mod policy;
pub mod reward;
pub mod vec_env;

// Re-export core traits and types
pub use action::{Action, BoxSpace, DiscreteSpace, Space};
pub use environment::{EnvKwargs, Environment, EpisodeInfo, RenderMode, Step, StepInfo};
pub use error::{RLError, Result};
pub use observation::VectorObservation;
pub use policy::{Policy, RandomPolicy, RecurrentState};
pub use reward::Reward;
pub use vec_env::{VecEnv, VecStep};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Action, EnvKwargs, Environment, Policy, RenderMode, Result, Reward, Space, Step,
        StepInfo, VecEnv, VecStep, VectorObservation,
    };
}
