//! Command line of the `enjoy` binary

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::path::PathBuf;

use zoo_rl_agent::{Algo, Device};

use crate::hub::{DEFAULT_ENDPOINT, DEFAULT_ORGANIZATION};
use crate::resolver::CheckpointSelection;

/// Evaluate trained RL agents
#[derive(Parser, Debug, Clone)]
#[command(name = "enjoy")]
#[command(about = "Roll out trained RL agents and report their returns", version)]
pub struct Args {
    /// Environment ID
    #[arg(long, default_value = "CartPole-v1")]
    pub env: String,

    /// Log folder
    #[arg(short, long, default_value = "rl-trained-agents")]
    pub folder: PathBuf,

    /// RL algorithm
    #[arg(long, default_value = "ppo")]
    pub algo: Algo,

    /// Number of episodes to complete in each run
    #[arg(short = 'n', long, default_value = "1000")]
    pub n_timesteps: usize,

    /// Also stop a run after this many lockstep steps
    #[arg(long)]
    pub max_steps: Option<u64>,

    /// Number of inference threads (-1 for the default)
    #[arg(long, default_value = "-1", allow_negative_numbers = true)]
    pub num_threads: i64,

    /// Number of environments
    #[arg(long, default_value = "1")]
    pub n_envs: usize,

    /// Experiment ID (0: latest, -1: no experiment folder)
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    pub exp_id: i64,

    /// Verbosity (0: warnings only, 1: info, 2: debug)
    #[arg(long, default_value = "1")]
    pub verbose: u8,

    /// Do not render the environment
    #[arg(long)]
    pub no_render: bool,

    /// Use deterministic actions
    #[arg(long)]
    pub deterministic: bool,

    /// Use stochastic actions
    #[arg(long)]
    pub stochastic: bool,

    /// Inference device (auto, cpu, cuda)
    #[arg(long, default_value = "auto")]
    pub device: Device,

    /// Load the best model instead of the last one
    #[arg(long)]
    pub load_best: bool,

    /// Load the checkpoint saved after this many timesteps
    #[arg(long)]
    pub load_checkpoint: Option<u64>,

    /// Load the most recent checkpoint instead of the last model
    #[arg(long)]
    pub load_last_checkpoint: bool,

    /// Normalize rewards if the model was trained with normalization
    #[arg(long)]
    pub norm_reward: bool,

    /// Random generator seed of the first run
    #[arg(long, default_value = "0")]
    pub seed: u64,

    /// Directory receiving per-environment monitor CSV files
    #[arg(long)]
    pub reward_log: Option<PathBuf>,

    /// Extra environment packages to register
    #[arg(long, num_args = 1..)]
    pub gym_packages: Vec<String>,

    /// Environment keyword arguments as `key:value`
    #[arg(long, num_args = 1.., value_parser = parse_key_val)]
    pub env_kwargs: Vec<(String, String)>,

    /// Neutralize training schedules even for current checkpoints
    #[arg(long)]
    pub custom_objects: bool,

    /// Number of agents (consecutive experiment ids) to evaluate
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
    pub n_agents: u32,

    /// Number of runs per agent, each with its own seed
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
    pub n_runs: u32,

    /// Evaluate checkpoint `interval * run` in run `run`
    #[arg(long)]
    pub checkpoint_interval: Option<u64>,

    /// Append-only results log
    #[arg(long, default_value = "enjoy_results.txt")]
    pub results_file: PathBuf,

    /// Hub organization to download pretrained agents from
    #[arg(long, env = "ZOO_HUB_ORG", default_value = DEFAULT_ORGANIZATION)]
    pub hub_org: String,

    /// Hub endpoint
    #[arg(long, env = "ZOO_HUB_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub hub_endpoint: String,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected key:value, got `{s}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{s}`"));
    }
    Ok((key.to_owned(), value.to_owned()))
}

impl Args {
    /// Reject flag combinations whose derived seeds or checkpoint steps
    /// do not fit in 64 bits
    pub fn validate(&self) -> Result<(), clap::Error> {
        let runs = u64::from(self.n_runs);
        if self.seed.checked_add(runs.saturating_sub(1)).is_none() {
            return Err(Self::command().error(
                ErrorKind::ValueValidation,
                format!("--seed {} leaves no room for {runs} runs", self.seed),
            ));
        }
        if let Some(interval) = self.checkpoint_interval {
            if interval.checked_mul(runs).is_none() {
                return Err(Self::command().error(
                    ErrorKind::ValueValidation,
                    format!("--checkpoint-interval {interval} overflows over {runs} runs"),
                ));
            }
        }
        Ok(())
    }

    /// Experiment id of agent `k` (1-based)
    ///
    /// A single agent keeps `--exp-id` as given, so 0 still means latest.
    /// Several agents use consecutive ids starting at `max(exp_id, 1)`.
    #[must_use]
    pub fn agent_exp_id(&self, k: u32) -> i64 {
        if self.n_agents == 1 {
            self.exp_id
        } else {
            self.exp_id.max(1) + i64::from(k) - 1
        }
    }

    /// Seed of run `j` (1-based)
    #[must_use]
    pub fn run_seed(&self, j: u32) -> u64 {
        self.seed.saturating_add(u64::from(j).saturating_sub(1))
    }

    /// Checkpoint evaluated in run `j` (1-based)
    #[must_use]
    pub fn selection_for_run(&self, j: u32) -> CheckpointSelection {
        match self.checkpoint_interval {
            Some(interval) => CheckpointSelection::Step(interval.saturating_mul(u64::from(j))),
            None => CheckpointSelection::from_flags(
                self.load_best,
                self.load_checkpoint,
                self.load_last_checkpoint,
            ),
        }
    }

    /// Whether frames are rendered
    #[must_use]
    pub fn render(&self) -> bool {
        !self.no_render
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("enjoy").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let args = parse(&[]);
        assert_eq!(args.env, "CartPole-v1");
        assert_eq!(args.folder, PathBuf::from("rl-trained-agents"));
        assert_eq!(args.algo, Algo::Ppo);
        assert_eq!(args.n_timesteps, 1000);
        assert_eq!(args.max_steps, None);
        assert_eq!(args.exp_id, 0);
        assert_eq!(args.device, Device::Auto);
        assert_eq!(args.results_file, PathBuf::from("enjoy_results.txt"));
        assert!(args.render());
        assert_eq!(args.selection_for_run(1), CheckpointSelection::Last);
    }

    #[test]
    fn negative_ids_and_kwargs() {
        let args = parse(&[
            "--exp-id",
            "-1",
            "--num-threads",
            "-1",
            "--env-kwargs",
            "gravity:3.7",
            "render_mode:human",
            "--algo",
            "SAC",
        ]);
        assert_eq!(args.exp_id, -1);
        assert_eq!(args.algo, Algo::Sac);
        assert_eq!(
            args.env_kwargs,
            vec![
                ("gravity".to_owned(), "3.7".to_owned()),
                ("render_mode".to_owned(), "human".to_owned())
            ]
        );
        assert!(Args::try_parse_from(["enjoy", "--env-kwargs", "novalue"]).is_err());
        assert!(Args::try_parse_from(["enjoy", "--n-runs", "0"]).is_err());
    }

    #[test]
    fn agents_and_runs_layout() {
        let args = parse(&["--n-agents", "3", "--n-runs", "2", "--seed", "10"]);
        assert_eq!(args.agent_exp_id(1), 1);
        assert_eq!(args.agent_exp_id(3), 3);
        assert_eq!(args.run_seed(1), 10);
        assert_eq!(args.run_seed(2), 11);

        let single = parse(&["--exp-id", "0"]);
        assert_eq!(single.agent_exp_id(1), 0);

        let stepped = parse(&["--checkpoint-interval", "500000", "--load-best"]);
        assert_eq!(stepped.selection_for_run(2), CheckpointSelection::Step(1_000_000));
    }

    #[test]
    fn overflowing_seeds_and_steps_are_rejected() {
        let max = u64::MAX.to_string();
        let seeds = parse(&["--seed", max.as_str(), "--n-runs", "2"]);
        let err = seeds.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
        assert!(parse(&["--seed", max.as_str()]).validate().is_ok());

        let steps = parse(&["--checkpoint-interval", max.as_str(), "--n-runs", "2"]);
        assert!(steps.validate().is_err());
        assert_eq!(steps.run_seed(3), 2);
        assert_eq!(steps.selection_for_run(2), CheckpointSelection::Step(u64::MAX));
        assert!(parse(&["--checkpoint-interval", "100", "--n-runs", "3"])
            .validate()
            .is_ok());
    }
}
