//! Evaluation of trained RL agents
//!
//! This crate provides:
//! - Checkpoint resolution in experiment folders, with a hub fallback
//! - Sidecar configuration loading and test environment construction
//! - The rollout loop and its statistics
//! - The append-only results log

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod driver;
pub mod env;
pub mod hub;
pub mod hyperparams;
pub mod interrupt;
pub mod report;
pub mod resolver;
pub mod rollout;
pub mod stats;

pub use cli::Args;
pub use driver::{run, run_until, EnjoyReport};
pub use env::{create_test_env, TestEnvConfig};
pub use hub::{HttpModelHub, HubError, HubRequest, ModelHub};
pub use hyperparams::{get_saved_hyperparams, load_env_kwargs, ConfigError, SavedHyperparams};
pub use interrupt::{Interrupt, InterruptHandle};
pub use report::ResultsLog;
pub use resolver::{
    resolve, resolve_or_download, CheckpointSelection, ModelLocation, ResolveError,
    ResolveRequest,
};
pub use rollout::{rollout, RolloutBudget, RolloutConfig};
pub use stats::{AgentAggregate, FinalAggregate, RunStats, Summary};
