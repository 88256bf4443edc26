//! The evaluation loop: act, step, account for finished episodes

use zoo_rl_core::{Policy, RenderMode, Result, VecEnv, VecStep};

use crate::interrupt::Interrupt;
use crate::stats::RunStats;

/// When a rollout stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutBudget {
    /// Stop once this many episodes completed
    pub max_episodes: usize,
    /// Optional cap on lockstep steps
    pub max_steps: Option<u64>,
}

impl RolloutBudget {
    fn exhausted(&self, stats: &RunStats) -> bool {
        stats.episodes() >= self.max_episodes
            || self.max_steps.is_some_and(|max| stats.steps >= max)
    }
}

/// How a rollout behaves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RolloutConfig {
    /// Take the most likely action instead of sampling
    pub deterministic: bool,
    /// Render the first sub-environment after every step in this mode
    pub render: Option<RenderMode>,
    /// Score episodes with the monitor's `episode` info when available
    pub is_atari: bool,
}

impl RolloutConfig {
    /// Deterministic by default, except for Atari games which sample unless
    /// asked not to
    #[must_use]
    pub fn deterministic_for(is_atari: bool, stochastic: bool, deterministic: bool) -> bool {
        let stochastic = stochastic || (is_atari && !deterministic);
        !stochastic
    }

    /// Render mode of a rollout: the `render_mode` kwarg when given, human
    /// otherwise, nothing when rendering is off
    #[must_use]
    pub fn render_mode(render: bool, requested: Option<RenderMode>) -> Option<RenderMode> {
        render.then(|| requested.unwrap_or(RenderMode::Human))
    }
}

struct Accumulator {
    rewards: Vec<f64>,
    lengths: Vec<usize>,
}

impl Accumulator {
    fn new(n: usize) -> Self {
        Self {
            rewards: vec![0.0; n],
            lengths: vec![0; n],
        }
    }

    fn take(&mut self, i: usize) -> (f64, usize) {
        let out = (self.rewards[i], self.lengths[i]);
        self.rewards[i] = 0.0;
        self.lengths[i] = 0;
        out
    }
}

/// Roll `policy` out in `venv` until the budget is spent or `interrupt` is
/// raised
///
/// An interrupt is not an error: the statistics gathered so far are returned
/// with `interrupted` set. Exactly `max_episodes` episodes are recorded when
/// that limit is hit, even if several sub-environments finish on the same
/// step.
pub async fn rollout<V, P>(
    venv: &mut V,
    policy: &mut P,
    budget: RolloutBudget,
    config: RolloutConfig,
    interrupt: &Interrupt,
) -> Result<RunStats>
where
    V: VecEnv + ?Sized,
    P: Policy + ?Sized,
{
    let mut stats = RunStats::default();
    if budget.exhausted(&stats) {
        return Ok(stats);
    }

    let n_envs = venv.num_envs();
    let mut observations = venv.reset().await?;
    let mut state = None;
    let mut episode_start = vec![true; n_envs];
    let mut acc = Accumulator::new(n_envs);

    'run: while !budget.exhausted(&stats) {
        // Stepping never suspends on its own; yield so the runtime can
        // deliver a pending Ctrl-C
        tokio::task::yield_now().await;
        if interrupt.is_raised() {
            tracing::warn!(steps = stats.steps, "rollout interrupted");
            stats.interrupted = true;
            break;
        }

        let (actions, next_state) = policy
            .predict(&observations, state.take(), &episode_start, config.deterministic)
            .await?;
        let step = venv.step(&actions).await?;
        state = next_state;
        stats.steps += 1;

        if let Some(mode) = config.render {
            venv.render(mode).await?;
        }

        let VecStep {
            observations: next_obs,
            rewards,
            dones,
            infos,
        } = step;

        for i in 0..n_envs {
            acc.rewards[i] += rewards[i];
            acc.lengths[i] += 1;
            if !dones[i] {
                continue;
            }

            let (mut reward, mut length) = acc.take(i);
            if config.is_atari {
                if let Some(episode) = infos[i].episode() {
                    tracing::info!(score = episode.r, length = episode.l, "atari episode");
                    reward = episode.r;
                    length = episode.l;
                }
            }
            tracing::info!(env = i, reward, length, "episode finished");
            stats.episode_rewards.push(reward);
            stats.episode_lengths.push(length);
            stats.episode_values.push(0.0);

            if let Some(success) = infos[i].is_success() {
                tracing::debug!(env = i, success, "goal check");
                stats.successes.push(success);
            }

            if stats.episodes() >= budget.max_episodes {
                break 'run;
            }
        }

        observations = next_obs;
        episode_start = dones;
    }

    if let Some(rate) = stats.success_rate() {
        tracing::info!("Success rate: {:.2}%", rate * 100.0);
    }
    if stats.episodes() > 0 {
        tracing::info!("{} Episodes", stats.episodes());
        tracing::info!("Mean reward: {}", stats.reward());
        tracing::info!("Mean episode length: {}", stats.length());
    }
    Ok(stats)
}
