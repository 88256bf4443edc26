//! Environment wrappers for common transformations

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use zoo_rl_core::{
    Action, Environment, EpisodeInfo, RenderMode, Result, Space, Step, StepInfo,
    VectorObservation,
};

/// Time limit wrapper
///
/// Ends an episode after `max_steps` by setting `truncated` and the
/// `TimeLimit.truncated` info flag.
pub struct TimeLimit<E> {
    /// Inner environment
    pub env: E,
    /// Maximum steps
    pub max_steps: usize,
    /// Current step count
    pub steps: usize,
}

impl<E> TimeLimit<E> {
    /// Create a new time limit wrapper
    pub fn new(env: E, max_steps: usize) -> Self {
        Self {
            env,
            max_steps,
            steps: 0,
        }
    }
}

#[async_trait]
impl<E> Environment for TimeLimit<E>
where
    E: Environment,
{
    fn observation_space(&self) -> Space {
        self.env.observation_space()
    }

    fn action_space(&self) -> Space {
        self.env.action_space()
    }

    async fn reset(&mut self, seed: Option<u64>) -> Result<(VectorObservation, StepInfo)> {
        self.steps = 0;
        self.env.reset(seed).await
    }

    async fn step(&mut self, action: &Action) -> Result<Step> {
        self.steps += 1;
        let mut step = self.env.step(action).await?;

        if self.steps >= self.max_steps && !step.done {
            step.truncated = true;
            step.info.set_time_limit_truncated(true);
        }

        Ok(step)
    }

    async fn render(&self, mode: RenderMode) -> Result<()> {
        self.env.render(mode).await
    }

    async fn close(&mut self) -> Result<()> {
        self.env.close().await
    }
}

/// Clips continuous actions into the bounds of the action space
pub struct ClipAction<E> {
    /// Inner environment
    pub env: E,
}

impl<E> ClipAction<E> {
    /// Create a new clipping wrapper
    pub fn new(env: E) -> Self {
        Self { env }
    }
}

#[async_trait]
impl<E> Environment for ClipAction<E>
where
    E: Environment,
{
    fn observation_space(&self) -> Space {
        self.env.observation_space()
    }

    fn action_space(&self) -> Space {
        self.env.action_space()
    }

    async fn reset(&mut self, seed: Option<u64>) -> Result<(VectorObservation, StepInfo)> {
        self.env.reset(seed).await
    }

    async fn step(&mut self, action: &Action) -> Result<Step> {
        match (action, self.env.action_space()) {
            (Action::Continuous(values), Space::Box(bounds)) => {
                let clipped = Action::Continuous(bounds.clip(values));
                self.env.step(&clipped).await
            }
            _ => self.env.step(action).await,
        }
    }

    async fn render(&self, mode: RenderMode) -> Result<()> {
        self.env.render(mode).await
    }

    async fn close(&mut self) -> Result<()> {
        self.env.close().await
    }
}

/// Records episode statistics
///
/// At the end of every episode the undiscounted return, length and elapsed
/// time are attached to the step info under `episode`, and appended to a
/// CSV file when one was requested.
pub struct Monitor<E> {
    /// Inner environment
    pub env: E,
    started: Instant,
    rewards: Vec<f64>,
    episode_count: usize,
    writer: Option<BufWriter<File>>,
}

impl<E> Monitor<E> {
    /// Suffix of monitor files
    pub const EXT: &'static str = "monitor.csv";

    /// Wrap `env`, writing episodes to `filename` when given
    ///
    /// A path without the `.monitor.csv` suffix gets it appended. The file
    /// starts with a JSON comment line holding the start time and env id.
    pub fn new(env: E, env_id: &str, filename: Option<&Path>) -> Result<Self> {
        let writer = match filename {
            Some(path) => Some(Self::open(path, env_id)?),
            None => None,
        };
        Ok(Self {
            env,
            started: Instant::now(),
            rewards: Vec::new(),
            episode_count: 0,
            writer,
        })
    }

    fn open(path: &Path, env_id: &str) -> Result<BufWriter<File>> {
        let path: PathBuf = if path.to_string_lossy().ends_with(Self::EXT) {
            path.to_path_buf()
        } else if path.is_dir() {
            path.join(Self::EXT)
        } else {
            PathBuf::from(format!("{}.{}", path.display(), Self::EXT))
        };
        let mut writer = BufWriter::new(File::create(&path)?);
        let header = serde_json::json!({
            "t_start": chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            "env_id": env_id,
        });
        writeln!(writer, "#{header}")?;
        writeln!(writer, "r,l,t")?;
        writer.flush()?;
        tracing::debug!(path = %path.display(), "writing monitor file");
        Ok(writer)
    }

    /// Number of completed episodes
    pub fn episode_count(&self) -> usize {
        self.episode_count
    }

    fn finish_episode(&mut self) -> Result<EpisodeInfo> {
        let episode = EpisodeInfo {
            r: self.rewards.iter().sum(),
            l: self.rewards.len(),
            t: (self.started.elapsed().as_secs_f64() * 1e6).round() / 1e6,
        };
        self.episode_count += 1;
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{},{},{}", episode.r, episode.l, episode.t)?;
            writer.flush()?;
        }
        Ok(episode)
    }
}

#[async_trait]
impl<E> Environment for Monitor<E>
where
    E: Environment,
{
    fn observation_space(&self) -> Space {
        self.env.observation_space()
    }

    fn action_space(&self) -> Space {
        self.env.action_space()
    }

    async fn reset(&mut self, seed: Option<u64>) -> Result<(VectorObservation, StepInfo)> {
        self.rewards.clear();
        self.env.reset(seed).await
    }

    async fn step(&mut self, action: &Action) -> Result<Step> {
        let mut step = self.env.step(action).await?;
        self.rewards.push(step.reward.value());
        if step.is_boundary() {
            let episode = self.finish_episode()?;
            step.info.set_episode(episode);
        }
        Ok(step)
    }

    async fn render(&self, mode: RenderMode) -> Result<()> {
        self.env.render(mode).await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        self.env.close().await
    }
}

/// Extra wrapper named in saved hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapperSpec {
    /// Cap episode length
    TimeLimit {
        /// Step limit
        max_episode_steps: usize,
    },
    /// Clip continuous actions into bounds
    ClipAction,
}

/// Apply `wrappers` in order, innermost first
pub fn apply_wrappers(
    mut env: Box<dyn Environment>,
    wrappers: &[WrapperSpec],
) -> Box<dyn Environment> {
    for wrapper in wrappers {
        env = match wrapper {
            WrapperSpec::TimeLimit { max_episode_steps } => {
                Box::new(TimeLimit::new(env, *max_episode_steps))
            }
            WrapperSpec::ClipAction => Box::new(ClipAction::new(env)),
        };
    }
    env
}
