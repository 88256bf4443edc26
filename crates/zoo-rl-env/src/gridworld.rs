//! Goal-reaching grid task reporting `is_success`

use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};

use zoo_rl_core::{
    Action, BoxSpace, DiscreteSpace, EnvKwargs, Environment, RLError, RenderMode, Result, Reward,
    Space, Step, StepInfo, VectorObservation,
};

const SIZE: usize = 5;

/// Agent on a square grid that must reach a randomly placed goal
///
/// Observations are `[agent_x, agent_y, goal_x, goal_y]` scaled to `[0, 1]`.
/// Actions are 0 up, 1 down, 2 left, 3 right. Every step costs 0.1 and
/// reaching the goal pays 1.0 and ends the episode.
pub struct GridGoalEnv {
    agent: (usize, usize),
    goal: (usize, usize),
    rng: StdRng,
}

impl GridGoalEnv {
    /// Create a new grid environment
    #[must_use]
    pub fn new(_kwargs: &EnvKwargs) -> Self {
        Self {
            agent: (0, 0),
            goal: (SIZE - 1, SIZE - 1),
            rng: StdRng::from_entropy(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn get_observation(&self) -> VectorObservation {
        let scale = (SIZE - 1) as f64;
        VectorObservation::new(vec![
            self.agent.0 as f64 / scale,
            self.agent.1 as f64 / scale,
            self.goal.0 as f64 / scale,
            self.goal.1 as f64 / scale,
        ])
    }
}

#[async_trait]
impl Environment for GridGoalEnv {
    fn observation_space(&self) -> Space {
        Space::Box(BoxSpace {
            low: vec![0.0; 4],
            high: vec![1.0; 4],
            shape: vec![4],
        })
    }

    fn action_space(&self) -> Space {
        Space::Discrete(DiscreteSpace::new(4))
    }

    async fn reset(&mut self, seed: Option<u64>) -> Result<(VectorObservation, StepInfo)> {
        if let Some(seed) = seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.agent = (self.rng.gen_range(0..SIZE), self.rng.gen_range(0..SIZE));
        loop {
            self.goal = (self.rng.gen_range(0..SIZE), self.rng.gen_range(0..SIZE));
            if self.goal != self.agent {
                break;
            }
        }
        Ok((self.get_observation(), StepInfo::default()))
    }

    async fn step(&mut self, action: &Action) -> Result<Step> {
        let (x, y) = self.agent;
        self.agent = match action.discrete()? {
            0 => (x, y.saturating_sub(1)),
            1 => (x, (y + 1).min(SIZE - 1)),
            2 => (x.saturating_sub(1), y),
            3 => ((x + 1).min(SIZE - 1), y),
            a => return Err(RLError::InvalidAction(format!("Invalid action: {a}"))),
        };

        let reached = self.agent == self.goal;
        let mut info = StepInfo::default();
        info.set_success(reached);

        Ok(Step {
            observation: self.get_observation(),
            reward: Reward(if reached { 1.0 } else { -0.1 }),
            done: reached,
            truncated: false,
            info,
        })
    }

    async fn render(&self, mode: RenderMode) -> Result<()> {
        let grid: Vec<String> = (0..SIZE)
            .map(|row| {
                (0..SIZE)
                    .map(|col| match (col, row) {
                        p if p == self.agent => 'A',
                        p if p == self.goal => 'G',
                        _ => '.',
                    })
                    .collect()
            })
            .collect();
        match mode {
            RenderMode::Human => println!("{}\n", grid.join("\n")),
            RenderMode::Ansi => tracing::debug!(frame = %grid.join("/"), "grid"),
        }
        Ok(())
    }
}
