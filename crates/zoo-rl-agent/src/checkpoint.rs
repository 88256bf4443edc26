//! Checkpoint archives: gzip-compressed JSON written at training time
//!
//! Layout of the current format:
//!
//! ```json
//! {
//!   "format_version": 2,
//!   "algo": "ppo",
//!   "observation_space": {"type": "box", ...},
//!   "action_space": {"type": "discrete", "n": 2},
//!   "policy": { ... },
//!   "data": {"learning_rate": 0.0003, "num_timesteps": 100000}
//! }
//! ```
//!
//! Version 1 archives named the spaces `obs_space`/`act_space` and the
//! parameters `policy_params`; they are migrated on load.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use zoo_rl_core::Space;

use crate::algos::Algo;
use crate::policy::{MlpPolicy, PolicyParams};

/// Version written by [`Checkpoint::save`]
pub const FORMAT_VERSION: u32 = 2;

/// Errors raised while loading a checkpoint
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The archive could not be read
    #[error("cannot read checkpoint {path}: {source}")]
    Io {
        /// Archive path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The archive is not valid checkpoint JSON
    #[error("malformed checkpoint {path}: {source}")]
    Decode {
        /// Archive path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// Written by a newer version of the tooling
    #[error("unsupported checkpoint format version {0}")]
    UnsupportedVersion(u64),

    /// The archive belongs to another algorithm
    #[error("checkpoint was trained with {found}, expected {expected}")]
    AlgoMismatch {
        /// Requested algorithm
        expected: Algo,
        /// Algorithm stored in the archive
        found: Algo,
    },

    /// The archive's spaces do not match the environment
    #[error("{kind} space mismatch: environment has {env:?}, checkpoint has {saved:?}")]
    SpaceMismatch {
        /// `observation` or `action`
        kind: &'static str,
        /// Space of the environment
        env: Box<Space>,
        /// Space stored in the archive
        saved: Box<Space>,
    },

    /// The stored parameters do not fit the spaces
    #[error("invalid policy parameters: {0}")]
    InvalidParams(String),
}

/// Where inference runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Device {
    /// Best available device
    #[default]
    Auto,
    /// Host CPU
    Cpu,
    /// CUDA GPU
    Cuda,
}

impl Device {
    /// Device actually used; inference always runs on the CPU
    #[must_use]
    pub fn resolve(self) -> Device {
        if self == Device::Cuda {
            tracing::warn!("CUDA inference is not available, falling back to CPU");
        }
        Device::Cpu
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Device::Auto => "auto",
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        })
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Device::Auto),
            "cpu" => Ok(Device::Cpu),
            d if d == "cuda" || d.starts_with("cuda:") => Ok(Device::Cuda),
            other => Err(format!("unknown device `{other}`")),
        }
    }
}

/// Overrides applied while loading
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Replace the replay buffer size stored in `data`
    pub buffer_size: Option<u64>,
    /// Force `optimize_memory_usage` when the archive has the field
    pub optimize_memory_usage: Option<bool>,
    /// Neutralize training schedules even for current archives
    pub custom_objects: bool,
    /// Requested inference device
    pub device: Device,
    /// Seed for stochastic action sampling
    pub seed: Option<u64>,
}

impl LoadOptions {
    /// Options used for evaluating a checkpoint of `algo`
    #[must_use]
    pub fn for_algo(algo: Algo) -> Self {
        if algo.is_off_policy() {
            Self {
                buffer_size: Some(1),
                optimize_memory_usage: Some(false),
                ..Self::default()
            }
        } else {
            Self::default()
        }
    }
}

/// Training-time entries that cannot be restored across versions
const SCHEDULE_KEYS: [&str; 3] = ["learning_rate", "lr_schedule", "clip_range"];

/// Decoded checkpoint archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Archive format version
    pub format_version: u32,
    /// Algorithm that produced the archive
    pub algo: Algo,
    /// Observation space trained on
    pub observation_space: Space,
    /// Action space trained on
    pub action_space: Space,
    /// Policy parameters
    pub policy: PolicyParams,
    /// Training attributes (schedules, counters, hyperparameters)
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Checkpoint {
    /// Read and decode an archive, applying `options`
    pub fn load(path: &Path, options: &LoadOptions) -> Result<Self, CheckpointError> {
        let io_err = |source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        };
        let decode_err = |source| CheckpointError::Decode {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(io_err)?;
        let mut raw: Value =
            serde_json::from_reader(GzDecoder::new(BufReader::new(file))).map_err(decode_err)?;

        let version = raw
            .get("format_version")
            .and_then(Value::as_u64)
            .unwrap_or(1);
        if version > u64::from(FORMAT_VERSION) {
            return Err(CheckpointError::UnsupportedVersion(version));
        }
        if let Value::Object(fields) = &mut raw {
            if version < 2 {
                migrate_v1(fields);
            }
            let data = fields
                .entry("data")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(data) = data {
                if options.custom_objects || version < u64::from(FORMAT_VERSION) {
                    tracing::debug!(version, "neutralizing training schedules");
                    for key in SCHEDULE_KEYS {
                        data.insert(key.to_owned(), Value::from(0.0));
                    }
                }
                if let Some(size) = options.buffer_size {
                    data.insert("buffer_size".to_owned(), Value::from(size));
                }
                if let Some(optimize) = options.optimize_memory_usage {
                    if data.contains_key("optimize_memory_usage") {
                        data.insert("optimize_memory_usage".to_owned(), Value::Bool(optimize));
                    }
                }
            }
        }

        let checkpoint: Checkpoint = serde_json::from_value(raw).map_err(decode_err)?;
        tracing::debug!(
            path = %path.display(),
            algo = %checkpoint.algo,
            version = checkpoint.format_version,
            "decoded checkpoint"
        );
        Ok(checkpoint)
    }

    /// Write the archive
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let io_err = |source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut encoder, self).map_err(|source| CheckpointError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        encoder.finish().map_err(io_err)?.flush().map_err(io_err)?;
        Ok(())
    }

    /// Check the archive against the requested algorithm and the env spaces
    pub fn validate(
        &self,
        algo: Algo,
        observation_space: &Space,
        action_space: &Space,
    ) -> Result<(), CheckpointError> {
        if self.algo != algo {
            return Err(CheckpointError::AlgoMismatch {
                expected: algo,
                found: self.algo,
            });
        }
        for (kind, env, saved) in [
            ("observation", observation_space, &self.observation_space),
            ("action", action_space, &self.action_space),
        ] {
            if env != saved {
                return Err(CheckpointError::SpaceMismatch {
                    kind,
                    env: Box::new(env.clone()),
                    saved: Box::new(saved.clone()),
                });
            }
        }
        Ok(())
    }
}

fn migrate_v1(fields: &mut Map<String, Value>) {
    for (old, new) in [
        ("obs_space", "observation_space"),
        ("act_space", "action_space"),
        ("policy_params", "policy"),
    ] {
        if let Some(value) = fields.remove(old) {
            fields.entry(new).or_insert(value);
        }
    }
    fields.insert("format_version".to_owned(), Value::from(FORMAT_VERSION));
}

/// A checkpoint bound to an environment, ready for inference
#[derive(Debug)]
pub struct LoadedModel {
    /// Algorithm of the checkpoint
    pub algo: Algo,
    /// Training attributes after overrides
    pub data: Map<String, Value>,
    /// Inference policy
    pub policy: MlpPolicy,
    /// Device inference runs on
    pub device: Device,
}

impl LoadedModel {
    /// Total training steps recorded in the archive
    #[must_use]
    pub fn num_timesteps(&self) -> Option<u64> {
        self.data.get("num_timesteps").and_then(Value::as_u64)
    }
}

/// Load the checkpoint at `path` for an environment with the given spaces
pub fn load_model(
    path: &Path,
    algo: Algo,
    observation_space: &Space,
    action_space: &Space,
    options: &LoadOptions,
) -> Result<LoadedModel, CheckpointError> {
    let device = options.device.resolve();
    let checkpoint = Checkpoint::load(path, options)?;
    checkpoint.validate(algo, observation_space, action_space)?;

    let policy = MlpPolicy::new(
        checkpoint.policy,
        checkpoint.observation_space,
        checkpoint.action_space,
        options.seed,
    )
    .map_err(|e| CheckpointError::InvalidParams(e.to_string()))?;

    tracing::info!(path = %path.display(), %algo, %device, "loaded model");
    Ok(LoadedModel {
        algo,
        data: checkpoint.data,
        policy,
        device,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use zoo_rl_core::{BoxSpace, DiscreteSpace};

    fn spaces() -> (Space, Space) {
        (
            Space::Box(BoxSpace::uniform(-1.0, 1.0, 4).unwrap()),
            Space::Discrete(DiscreteSpace::new(2)),
        )
    }

    fn checkpoint(algo: Algo) -> Checkpoint {
        let (obs, act) = spaces();
        let mut data = Map::new();
        data.insert("learning_rate".into(), Value::from(3e-4));
        data.insert("buffer_size".into(), Value::from(1_000_000));
        data.insert("optimize_memory_usage".into(), Value::Bool(true));
        data.insert("num_timesteps".into(), Value::from(50_000));
        Checkpoint {
            format_version: FORMAT_VERSION,
            algo,
            observation_space: obs,
            action_space: act,
            policy: PolicyParams::random(4, &[16], 2, None, 3),
            data,
        }
    }

    fn write_gz(path: &Path, value: &Value) {
        let file = File::create(path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::fast());
        serde_json::to_writer(&mut encoder, value).unwrap();
        encoder.finish().unwrap();
    }

    #[test]
    fn save_then_load_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CartPole-v1.model.gz");
        checkpoint(Algo::Ppo).save(&path).unwrap();

        let (obs, act) = spaces();
        let model = load_model(&path, Algo::Ppo, &obs, &act, &LoadOptions::default()).unwrap();
        assert_eq!(model.algo, Algo::Ppo);
        assert_eq!(model.num_timesteps(), Some(50_000));
        assert_eq!(model.device, Device::Cpu);
        // Current archives keep their schedules unless asked
        assert_eq!(model.data["learning_rate"], Value::from(3e-4));
    }

    #[test]
    fn off_policy_overrides_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dqn.model.gz");
        checkpoint(Algo::Dqn).save(&path).unwrap();

        let loaded = Checkpoint::load(&path, &LoadOptions::for_algo(Algo::Dqn)).unwrap();
        assert_eq!(loaded.data["buffer_size"], Value::from(1));
        assert_eq!(loaded.data["optimize_memory_usage"], Value::Bool(false));
    }

    #[test]
    fn custom_objects_zero_schedules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a2c.model.gz");
        checkpoint(Algo::A2c).save(&path).unwrap();

        let options = LoadOptions {
            custom_objects: true,
            ..LoadOptions::default()
        };
        let loaded = Checkpoint::load(&path, &options).unwrap();
        for key in SCHEDULE_KEYS {
            assert_eq!(loaded.data[key], Value::from(0.0));
        }
    }

    #[test]
    fn v1_archives_are_migrated_and_patched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.model.gz");
        let current = serde_json::to_value(checkpoint(Algo::Ppo)).unwrap();
        let v1 = serde_json::json!({
            "algo": "ppo",
            "obs_space": current["observation_space"],
            "act_space": current["action_space"],
            "policy_params": current["policy"],
            "data": {"learning_rate": 0.001},
        });
        write_gz(&path, &v1);

        let loaded = Checkpoint::load(&path, &LoadOptions::default()).unwrap();
        assert_eq!(loaded.format_version, FORMAT_VERSION);
        assert_eq!(loaded.data["learning_rate"], Value::from(0.0));
        assert_eq!(loaded.data["lr_schedule"], Value::from(0.0));
    }

    #[test]
    fn newer_versions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.model.gz");
        write_gz(&path, &serde_json::json!({"format_version": 99}));
        assert!(matches!(
            Checkpoint::load(&path, &LoadOptions::default()),
            Err(CheckpointError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn mismatches_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ppo.model.gz");
        checkpoint(Algo::Ppo).save(&path).unwrap();
        let (obs, act) = spaces();

        let err = load_model(&path, Algo::Sac, &obs, &act, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, CheckpointError::AlgoMismatch { .. }));

        let wrong = Space::Discrete(DiscreteSpace::new(3));
        let err = load_model(&path, Algo::Ppo, &obs, &wrong, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, CheckpointError::SpaceMismatch { kind: "action", .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Checkpoint::load(Path::new("/nonexistent/x.model.gz"), &LoadOptions::default())
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Io { .. }));
    }

    #[test]
    fn device_parsing() {
        assert_eq!("cuda:0".parse::<Device>().unwrap(), Device::Cuda);
        assert_eq!("AUTO".parse::<Device>().unwrap(), Device::Auto);
        assert!("tpu".parse::<Device>().is_err());
        assert_eq!(Device::Cuda.resolve(), Device::Cpu);
    }
}
