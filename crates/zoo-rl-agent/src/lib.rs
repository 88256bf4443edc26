//! Trained-agent loading for the zoo evaluation tools
//!
//! This crate provides:
//! - The catalogue of training algorithms a checkpoint can come from
//! - Checkpoint archives with version migration and load-time overrides
//! - Inference-only MLP policies, optionally recurrent

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod algos;
pub mod checkpoint;
pub mod policy;

pub use algos::{Algo, ParseAlgoError};
pub use checkpoint::{
    load_model, Checkpoint, CheckpointError, Device, LoadOptions, LoadedModel, FORMAT_VERSION,
};
pub use policy::{Activation, DenseLayer, MlpPolicy, PolicyParams, RecurrentCell};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{load_model, Algo, Checkpoint, LoadOptions, LoadedModel, MlpPolicy};
    pub use zoo_rl_core::prelude::*;
}
