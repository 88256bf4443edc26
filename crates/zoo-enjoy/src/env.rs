//! Building the evaluation environment of a checkpoint

use std::path::{Path, PathBuf};

use zoo_rl_core::{EnvKwargs, Result, VecEnv};
use zoo_rl_env::{make_vec_env, VecEnvOptions, VecFrameStack, VecNormalize};

use crate::hyperparams::SavedHyperparams;

/// File holding frozen normalization statistics inside the stats folder
pub const VECNORMALIZE_FILE: &str = "vecnormalize.json";

/// Everything needed to rebuild the environment a model was trained on
#[derive(Debug, Clone, Default)]
pub struct TestEnvConfig {
    /// Number of sub-environments
    pub n_envs: usize,
    /// Sidecar folder of the run, `None` when it has none
    pub stats_path: Option<PathBuf>,
    /// Base seed; sub-environment `i` gets `seed + i`
    pub seed: u64,
    /// Directory receiving monitor CSV files
    pub log_dir: Option<PathBuf>,
    /// Saved training hyperparameters
    pub hyperparams: SavedHyperparams,
    /// Constructor keyword arguments
    pub env_kwargs: EnvKwargs,
}

/// Create the vectorized environment used to evaluate a model
///
/// Normalization statistics are frozen and rewards are only normalized when
/// the saved settings ask for it.
pub fn create_test_env(env_id: &str, config: &TestEnvConfig) -> Result<Box<dyn VecEnv>> {
    let venv = make_vec_env(
        env_id,
        &VecEnvOptions {
            n_envs: config.n_envs,
            seed: Some(config.seed),
            env_kwargs: config.env_kwargs.clone(),
            wrappers: config.hyperparams.env_wrapper.clone(),
            monitor_dir: config.log_dir.clone(),
        },
    )?;
    let mut venv: Box<dyn VecEnv> = Box::new(venv);

    if let (Some(kwargs), Some(stats_path)) =
        (config.hyperparams.normalize.kwargs(), config.stats_path.as_deref())
    {
        venv = Box::new(load_normalization(venv, stats_path, kwargs.norm_reward)?);
    }

    if let Some(n_stack) = config.hyperparams.frame_stack.filter(|&n| n > 0) {
        tracing::info!(n_stack, "stacking frames");
        venv = Box::new(VecFrameStack::new(venv, n_stack)?);
    }

    Ok(venv)
}

fn load_normalization(
    venv: Box<dyn VecEnv>,
    stats_path: &Path,
    norm_reward: Option<bool>,
) -> Result<VecNormalize<Box<dyn VecEnv>>> {
    let mut normalized = VecNormalize::load(&stats_path.join(VECNORMALIZE_FILE), venv)?;
    if let Some(norm_reward) = norm_reward {
        normalized.set_norm_reward(norm_reward);
    }
    tracing::debug!(
        norm_obs = normalized.stats().norm_obs,
        norm_reward = normalized.stats().norm_reward,
        "normalizing environment"
    );
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparams::{Normalize, NormalizeKwargs};
    use zoo_rl_core::Action;

    #[test]
    fn plain_env_matches_registry_spaces() {
        let env = create_test_env(
            "CartPole-v1",
            &TestEnvConfig {
                n_envs: 2,
                ..TestEnvConfig::default()
            },
        )
        .unwrap();
        assert_eq!(env.num_envs(), 2);
        assert_eq!(env.observation_space().flat_dim(), 4);
    }

    #[tokio::test]
    async fn frame_stack_widens_observations() {
        let mut env = create_test_env(
            "CartPole-v1",
            &TestEnvConfig {
                n_envs: 1,
                hyperparams: SavedHyperparams {
                    frame_stack: Some(3),
                    ..SavedHyperparams::default()
                },
                ..TestEnvConfig::default()
            },
        )
        .unwrap();
        assert_eq!(env.observation_space().flat_dim(), 12);
        let obs = env.reset().await.unwrap();
        assert_eq!(obs[0].len(), 12);
        env.step(&[Action::Discrete(0)]).await.unwrap();
    }

    #[test]
    fn normalization_needs_saved_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let config = TestEnvConfig {
            n_envs: 1,
            stats_path: Some(dir.path().to_path_buf()),
            hyperparams: SavedHyperparams {
                normalize: Normalize::Kwargs(NormalizeKwargs {
                    norm_reward: Some(false),
                    ..NormalizeKwargs::default()
                }),
                ..SavedHyperparams::default()
            },
            ..TestEnvConfig::default()
        };
        assert!(create_test_env("CartPole-v1", &config).is_err());

        std::fs::write(
            dir.path().join(VECNORMALIZE_FILE),
            r#"{"obs_rms": {"mean": [0.0, 0.0, 0.0, 0.0], "var": [1.0, 1.0, 1.0, 1.0], "count": 10.0},
                "ret_rms": {"mean": 0.0, "var": 1.0, "count": 10.0}}"#,
        )
        .unwrap();
        assert!(create_test_env("CartPole-v1", &config).is_ok());
    }

    #[test]
    fn unknown_env_is_rejected() {
        assert!(create_test_env("NoSuchEnv-v0", &TestEnvConfig::default()).is_err());
    }
}
