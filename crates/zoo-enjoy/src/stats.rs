//! Episode statistics and their reduction across runs and agents

use std::fmt;

/// Mean and population standard deviation of a sample
///
/// An empty sample has `NaN` mean and std, so reports can still be written
/// when no episode completed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    /// Arithmetic mean
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    /// Sample size
    pub count: usize,
}

impl Summary {
    /// Summarize `xs`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn of(xs: &[f64]) -> Self {
        if xs.is_empty() {
            return Self {
                mean: f64::NAN,
                std: f64::NAN,
                count: 0,
            };
        }
        let n = xs.len() as f64;
        let mean = xs.iter().sum::<f64>() / n;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: var.sqrt(),
            count: xs.len(),
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} +/- {:.2}", self.mean, self.std)
    }
}

/// Everything recorded during one rollout
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    /// Return of each completed episode, in completion order
    pub episode_rewards: Vec<f64>,
    /// Length of each completed episode
    pub episode_lengths: Vec<usize>,
    /// Auxiliary value of each completed episode (reserved, currently 0.0)
    pub episode_values: Vec<f64>,
    /// Goal-achieved flags of episodes whose env reports them
    pub successes: Vec<bool>,
    /// Lockstep steps taken
    pub steps: u64,
    /// Whether the rollout was cut short by an interrupt
    pub interrupted: bool,
}

impl RunStats {
    /// Number of completed episodes
    #[must_use]
    pub fn episodes(&self) -> usize {
        self.episode_rewards.len()
    }

    /// Reward summary
    #[must_use]
    pub fn reward(&self) -> Summary {
        Summary::of(&self.episode_rewards)
    }

    /// Episode length summary
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn length(&self) -> Summary {
        let lengths: Vec<f64> = self.episode_lengths.iter().map(|&l| l as f64).collect();
        Summary::of(&lengths)
    }

    /// Mean auxiliary value
    #[must_use]
    pub fn value_mean(&self) -> f64 {
        Summary::of(&self.episode_values).mean
    }

    /// Fraction of flagged episodes that succeeded
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> Option<f64> {
        if self.successes.is_empty() {
            return None;
        }
        let hits = self.successes.iter().filter(|&&s| s).count();
        Some(hits as f64 / self.successes.len() as f64)
    }
}

/// Per-run results of one agent, in run order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentAggregate {
    /// Mean reward of each run
    pub rewards: Vec<f64>,
    /// Reward standard deviation of each run
    pub stds: Vec<f64>,
    /// Mean value of each run
    pub values: Vec<f64>,
}

impl AgentAggregate {
    /// Fold in a finished run
    ///
    /// Runs without a completed episode contribute nothing. Returns whether
    /// the run was kept.
    pub fn push_run(&mut self, run: &RunStats) -> bool {
        if run.episodes() == 0 {
            return false;
        }
        let reward = run.reward();
        self.rewards.push(reward.mean);
        self.stds.push(reward.std);
        self.values.push(run.value_mean());
        true
    }

    /// Summary of per-run mean rewards
    #[must_use]
    pub fn reward(&self) -> Summary {
        Summary::of(&self.rewards)
    }

    /// Summary of per-run reward stds
    #[must_use]
    pub fn std(&self) -> Summary {
        Summary::of(&self.stds)
    }

    /// Summary of per-run values
    #[must_use]
    pub fn value(&self) -> Summary {
        Summary::of(&self.values)
    }
}

/// Element-wise mean of agent aggregates
///
/// Position `k` averages the `k`-th run of every agent that has one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalAggregate {
    rewards: Vec<f64>,
    stds: Vec<f64>,
    values: Vec<f64>,
    counts: Vec<usize>,
}

impl FinalAggregate {
    /// Fold in one agent
    pub fn add(&mut self, agent: &AgentAggregate) {
        let n = agent.rewards.len();
        if self.counts.len() < n {
            self.rewards.resize(n, 0.0);
            self.stds.resize(n, 0.0);
            self.values.resize(n, 0.0);
            self.counts.resize(n, 0);
        }
        for k in 0..n {
            self.rewards[k] += agent.rewards[k];
            self.stds[k] += agent.stds[k];
            self.values[k] += agent.values[k];
            self.counts[k] += 1;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn averaged(&self, sums: &[f64]) -> Vec<f64> {
        sums.iter()
            .zip(&self.counts)
            .map(|(s, &c)| s / c as f64)
            .collect()
    }

    /// Averaged per-run mean rewards
    #[must_use]
    pub fn rewards(&self) -> Vec<f64> {
        self.averaged(&self.rewards)
    }

    /// Averaged per-run reward stds
    #[must_use]
    pub fn stds(&self) -> Vec<f64> {
        self.averaged(&self.stds)
    }

    /// Averaged per-run values
    #[must_use]
    pub fn values(&self) -> Vec<f64> {
        self.averaged(&self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn known_sample() {
        let s = Summary::of(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_relative_eq!(s.mean, 5.0);
        assert_relative_eq!(s.std, 2.0);
        assert_eq!(s.count, 8);
        assert_eq!(s.to_string(), "5.00 +/- 2.00");
    }

    #[test]
    fn empty_sample_is_nan() {
        let s = Summary::of(&[]);
        assert!(s.mean.is_nan());
        assert!(s.std.is_nan());
        assert_eq!(s.count, 0);
        assert_eq!(s.to_string(), "NaN +/- NaN");
    }

    #[test]
    fn run_stats_success_rate() {
        let run = RunStats {
            episode_rewards: vec![1.0, 3.0],
            episode_lengths: vec![10, 30],
            episode_values: vec![0.0, 0.0],
            successes: vec![true, false, true, true],
            ..RunStats::default()
        };
        assert_relative_eq!(run.success_rate().unwrap(), 0.75);
        assert_relative_eq!(run.length().mean, 20.0);
        assert_relative_eq!(run.value_mean(), 0.0);
        assert_eq!(RunStats::default().success_rate(), None);
    }

    #[test]
    fn empty_runs_are_skipped() {
        let mut agent = AgentAggregate::default();
        assert!(!agent.push_run(&RunStats::default()));
        assert!(agent.reward().mean.is_nan());
    }

    #[test]
    fn final_divides_by_contributing_agents() {
        let mut total = FinalAggregate::default();
        total.add(&AgentAggregate {
            rewards: vec![10.0, 20.0],
            stds: vec![1.0, 2.0],
            values: vec![0.0, 0.0],
        });
        total.add(&AgentAggregate {
            rewards: vec![30.0],
            stds: vec![3.0],
            values: vec![0.0],
        });
        assert_eq!(total.rewards(), vec![20.0, 20.0]);
        assert_eq!(total.stds(), vec![2.0, 2.0]);
        assert_eq!(total.values(), vec![0.0, 0.0]);
    }

    proptest! {
        #[test]
        fn mean_and_std_match_definition(xs in prop::collection::vec(-1e6f64..1e6, 1..64)) {
            let s = Summary::of(&xs);
            let n = xs.len() as f64;
            let mean = xs.iter().sum::<f64>() / n;
            let var = xs.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n;
            prop_assert!((s.mean - mean).abs() <= 1e-9 * mean.abs().max(1.0));
            prop_assert!((s.std - var.sqrt()).abs() <= 1e-6 * var.sqrt().max(1.0));
            prop_assert!(s.std >= 0.0);
        }

        #[test]
        fn repeated_value_aggregates_to_itself(v in -1e4f64..1e4, agents in 1usize..12, runs in 1usize..6) {
            let mut total = FinalAggregate::default();
            for _ in 0..agents {
                let mut agent = AgentAggregate::default();
                for _ in 0..runs {
                    agent.push_run(&RunStats {
                        episode_rewards: vec![v; 3],
                        episode_lengths: vec![1; 3],
                        episode_values: vec![0.0; 3],
                        ..RunStats::default()
                    });
                }
                let global = agent.reward();
                prop_assert!((global.mean - v).abs() <= 1e-9 * v.abs().max(1.0));
                total.add(&agent);
            }
            let grand = Summary::of(&total.rewards());
            prop_assert!((grand.mean - v).abs() <= 1e-9 * v.abs().max(1.0));
            prop_assert!(grand.std.abs() <= 1e-9 * v.abs().max(1.0));
        }
    }
}
