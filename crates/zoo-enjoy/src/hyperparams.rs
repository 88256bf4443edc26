//! Sidecar files saved next to a checkpoint
//!
//! `<log_path>/<env>/config.yml` holds the training hyperparameters and
//! `<log_path>/<env>/args.yml` the command line of the training run,
//! including the environment keyword arguments.

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use zoo_rl_core::{EnvKwargs, RLError};
use zoo_rl_env::WrapperSpec;

/// Errors raised while reading sidecar files
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// File
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A file is not valid YAML for its schema
    #[error("malformed {path}: {source}")]
    Yaml {
        /// File
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_yaml::Error,
    },

    /// A `normalize` entry could not be understood
    #[error("invalid normalize setting `{0}`")]
    Normalize(String),

    /// An environment keyword argument was rejected
    #[error(transparent)]
    Kwargs(#[from] RLError),
}

/// Keyword arguments of observation/reward normalization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizeKwargs {
    /// Normalize observations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub norm_obs: Option<bool>,
    /// Normalize rewards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub norm_reward: Option<bool>,
    /// Observation clip bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_obs: Option<f64>,
    /// Reward clip bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_reward: Option<f64>,
    /// Discount of the running return
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
}

/// The `normalize` hyperparameter: a flag or a set of kwargs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Normalize {
    /// Enabled with default settings, or disabled
    Flag(bool),
    /// Enabled with explicit settings
    Kwargs(NormalizeKwargs),
}

impl Default for Normalize {
    fn default() -> Self {
        Normalize::Flag(false)
    }
}

impl Normalize {
    /// Settings when enabled
    pub fn kwargs(&self) -> Option<NormalizeKwargs> {
        match self {
            Normalize::Flag(false) => None,
            Normalize::Flag(true) => Some(NormalizeKwargs::default()),
            Normalize::Kwargs(kwargs) => Some(kwargs.clone()),
        }
    }
}

impl<'de> Deserialize<'de> for Normalize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(Normalize::Flag(false)),
            Value::Bool(flag) => Ok(Normalize::Flag(flag)),
            Value::String(text) => parse_dict_literal(&text)
                .map(Normalize::Kwargs)
                .map_err(serde::de::Error::custom),
            other => serde_yaml::from_value(other)
                .map(Normalize::Kwargs)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Read a dict literal such as `{'norm_obs': True, 'norm_reward': False}`
fn parse_dict_literal(text: &str) -> Result<NormalizeKwargs, ConfigError> {
    let json = text
        .replace('\'', "\"")
        .replace("True", "true")
        .replace("False", "false")
        .replace("None", "null");
    serde_json::from_str(&json).map_err(|_| ConfigError::Normalize(text.to_owned()))
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<WrapperSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<WrapperSpec>),
        One(WrapperSpec),
    }
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::Many(specs)) => specs,
        Some(OneOrMany::One(spec)) => vec![spec],
    })
}

/// Hyperparameters saved by a training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavedHyperparams {
    /// Observation/reward normalization
    #[serde(default)]
    pub normalize: Normalize,
    /// Number of stacked frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_stack: Option<usize>,
    /// Extra wrappers around every environment
    #[serde(default, deserialize_with = "one_or_many")]
    pub env_wrapper: Vec<WrapperSpec>,
    /// Environments used during training
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_envs: Option<usize>,
    /// Policy class name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    /// Replay buffer size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<u64>,
    /// Replay memory optimization switch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimize_memory_usage: Option<bool>,
    /// Training budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_timesteps: Option<f64>,
    /// Entries not used for evaluation
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl SavedHyperparams {
    /// Parse `config.yml` text, either a mapping or a list of `[key, value]` pairs
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        let value: Value = serde_yaml::from_str(text)?;
        let value = match value {
            Value::Sequence(items) => {
                let mut mapping = Mapping::new();
                for item in items {
                    if let Value::Sequence(pair) = item {
                        if let [key, value] = pair.as_slice() {
                            mapping.insert(key.clone(), value.clone());
                        }
                    }
                }
                Value::Mapping(mapping)
            }
            Value::Null => Value::Mapping(Mapping::new()),
            other => other,
        };
        serde_yaml::from_value(value)
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the hyperparameters of a run for evaluation
///
/// Returns the hyperparameters and the stats folder, `None` when the run
/// has no sidecar folder. When normalization is enabled its `norm_reward`
/// is forced to `norm_reward`. Without `config.yml`, normalization is
/// enabled iff a legacy `obs_rms.json` is present.
pub fn get_saved_hyperparams(
    stats_path: &Path,
    norm_reward: bool,
) -> Result<(SavedHyperparams, Option<PathBuf>), ConfigError> {
    if !stats_path.is_dir() {
        tracing::debug!(path = %stats_path.display(), "no saved hyperparameters");
        return Ok((SavedHyperparams::default(), None));
    }

    let config_file = stats_path.join("config.yml");
    let mut hyperparams = if config_file.is_file() {
        SavedHyperparams::from_yaml(&read(&config_file)?).map_err(|source| ConfigError::Yaml {
            path: config_file.clone(),
            source,
        })?
    } else {
        SavedHyperparams {
            normalize: Normalize::Flag(stats_path.join("obs_rms.json").is_file()),
            ..SavedHyperparams::default()
        }
    };

    if let Some(mut kwargs) = hyperparams.normalize.kwargs() {
        kwargs.norm_reward = Some(norm_reward);
        hyperparams.normalize = Normalize::Kwargs(kwargs);
    }
    Ok((hyperparams, Some(stats_path.to_path_buf())))
}

#[derive(Debug, Default, Deserialize)]
struct SavedArgs {
    #[serde(default)]
    env_kwargs: Option<EnvKwargs>,
}

/// Environment keyword arguments recorded in `args.yml`, if present
pub fn load_env_kwargs(args_path: &Path) -> Result<EnvKwargs, ConfigError> {
    if !args_path.is_file() {
        return Ok(EnvKwargs::default());
    }
    let args: Option<SavedArgs> =
        serde_yaml::from_str(&read(args_path)?).map_err(|source| ConfigError::Yaml {
            path: args_path.to_path_buf(),
            source,
        })?;
    Ok(args.and_then(|a| a.env_kwargs).unwrap_or_default())
}

/// Apply `key:value` overrides from the command line on top of `kwargs`
pub fn apply_overrides(
    mut kwargs: EnvKwargs,
    overrides: &[(String, String)],
) -> Result<EnvKwargs, ConfigError> {
    for (key, value) in overrides {
        kwargs.set(key, value)?;
    }
    Ok(kwargs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn pairs_layout_is_accepted() {
        let text = "\
- - n_envs
  - 8
- - normalize
  - true
- - policy
  - MlpPolicy
- - learning_rate
  - 0.0003
";
        let hp = SavedHyperparams::from_yaml(text).unwrap();
        assert_eq!(hp.n_envs, Some(8));
        assert_eq!(hp.normalize, Normalize::Flag(true));
        assert_eq!(hp.policy.as_deref(), Some("MlpPolicy"));
        assert!(hp.extra.contains_key("learning_rate"));
    }

    #[test]
    fn normalize_accepts_dict_literal_and_mapping() {
        let hp = SavedHyperparams::from_yaml(
            "normalize: \"{'norm_obs': True, 'norm_reward': False}\"\n",
        )
        .unwrap();
        let kwargs = hp.normalize.kwargs().unwrap();
        assert_eq!(kwargs.norm_obs, Some(true));
        assert_eq!(kwargs.norm_reward, Some(false));

        let hp = SavedHyperparams::from_yaml("normalize:\n  gamma: 0.9\n").unwrap();
        assert_eq!(hp.normalize.kwargs().unwrap().gamma, Some(0.9));

        assert!(SavedHyperparams::from_yaml("normalize: \"not a dict\"\n").is_err());
    }

    #[test]
    fn env_wrapper_single_or_list() {
        let hp = SavedHyperparams::from_yaml("env_wrapper: clip_action\n").unwrap();
        assert_eq!(hp.env_wrapper, vec![WrapperSpec::ClipAction]);
        let hp = SavedHyperparams::from_yaml(
            "env_wrapper:\n  - time_limit:\n      max_episode_steps: 100\n  - clip_action\n",
        )
        .unwrap();
        assert_eq!(hp.env_wrapper.len(), 2);
    }

    #[test]
    fn missing_stats_folder_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (hp, stats) = get_saved_hyperparams(&dir.path().join("missing"), false).unwrap();
        assert_eq!(hp, SavedHyperparams::default());
        assert!(stats.is_none());
    }

    #[test]
    fn norm_reward_follows_flag() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yml"),
            "normalize: \"{'norm_obs': True, 'norm_reward': True}\"\n",
        )
        .unwrap();
        let (hp, stats) = get_saved_hyperparams(dir.path(), false).unwrap();
        assert_eq!(stats.as_deref(), Some(dir.path()));
        assert_eq!(hp.normalize.kwargs().unwrap().norm_reward, Some(false));

        let (hp, _) = get_saved_hyperparams(dir.path(), true).unwrap();
        assert_eq!(hp.normalize.kwargs().unwrap().norm_reward, Some(true));
    }

    #[test]
    fn legacy_stats_enable_normalization() {
        let dir = tempfile::tempdir().unwrap();
        let (hp, _) = get_saved_hyperparams(dir.path(), false).unwrap();
        assert!(hp.normalize.kwargs().is_none());

        fs::write(dir.path().join("obs_rms.json"), "{}").unwrap();
        let (hp, _) = get_saved_hyperparams(dir.path(), false).unwrap();
        assert!(hp.normalize.kwargs().is_some());
    }

    #[test]
    fn env_kwargs_from_args_file_and_cli() {
        let dir = tempfile::tempdir().unwrap();
        let args = dir.path().join("args.yml");
        assert_eq!(load_env_kwargs(&args).unwrap(), EnvKwargs::default());

        fs::write(&args, "algo: ppo\nenv_kwargs: null\n").unwrap();
        assert_eq!(load_env_kwargs(&args).unwrap(), EnvKwargs::default());

        fs::write(&args, "algo: ppo\nenv_kwargs:\n  gravity: 3.7\n  force_mag: 5.0\n").unwrap();
        let loaded = load_env_kwargs(&args).unwrap();
        assert_eq!(loaded.gravity, Some(3.7));

        let merged =
            apply_overrides(loaded, &[("gravity".into(), "9.8".into())]).unwrap();
        assert_eq!(merged.gravity, Some(9.8));
        assert_eq!(merged.force_mag, Some(5.0));

        fs::write(&args, "env_kwargs:\n  warp: 1\n").unwrap();
        assert!(load_env_kwargs(&args).is_err());
    }
}
