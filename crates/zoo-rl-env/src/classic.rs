//! Classic control environments

use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::f64::consts::PI;

use zoo_rl_core::{
    Action, BoxSpace, DiscreteSpace, EnvKwargs, Environment, RLError, RenderMode, Result, Reward,
    Space, Step, StepInfo, VectorObservation,
};

const TRACK_WIDTH: usize = 41;

/// Draw a one-line track with a marker at `position` in `[low, high]`
fn track(position: f64, low: f64, high: f64, marker: char) -> String {
    let span = (high - low).max(f64::EPSILON);
    let frac = ((position - low) / span).clamp(0.0, 1.0);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let idx = (frac * (TRACK_WIDTH - 1) as f64).round() as usize;
    (0..TRACK_WIDTH)
        .map(|i| if i == idx { marker } else { '-' })
        .collect()
}

/// CartPole environment
pub struct CartPoleEnv {
    /// Current state
    state: CartPoleState,
    /// Configuration
    config: CartPoleConfig,
    rng: StdRng,
    /// Set once the pole has fallen; stepping past it is a caller bug
    terminated: bool,
}

#[derive(Debug, Clone, Default)]
struct CartPoleState {
    x: f64,         // Cart position
    x_dot: f64,     // Cart velocity
    theta: f64,     // Pole angle
    theta_dot: f64, // Pole angular velocity
}

#[derive(Debug, Clone)]
struct CartPoleConfig {
    gravity: f64,
    mass_cart: f64,
    mass_pole: f64,
    length: f64,
    force_mag: f64,
    tau: f64,
    x_threshold: f64,
    theta_threshold: f64,
}

impl Default for CartPoleConfig {
    fn default() -> Self {
        Self {
            gravity: 9.8,
            mass_cart: 1.0,
            mass_pole: 0.1,
            length: 0.5,
            force_mag: 10.0,
            tau: 0.02,
            x_threshold: 2.4,
            theta_threshold: 12.0 * 2.0 * PI / 360.0,
        }
    }
}

impl CartPoleEnv {
    /// Create a new CartPole environment
    #[must_use]
    pub fn new(kwargs: &EnvKwargs) -> Self {
        let defaults = CartPoleConfig::default();
        Self {
            state: CartPoleState::default(),
            config: CartPoleConfig {
                gravity: kwargs.gravity.unwrap_or(defaults.gravity),
                force_mag: kwargs.force_mag.unwrap_or(defaults.force_mag),
                length: kwargs.pole_length.unwrap_or(defaults.length),
                ..defaults
            },
            rng: StdRng::from_entropy(),
            terminated: false,
        }
    }

    fn get_observation(&self) -> VectorObservation {
        VectorObservation::new(vec![
            self.state.x,
            self.state.x_dot,
            self.state.theta,
            self.state.theta_dot,
        ])
    }

    fn is_done(&self) -> bool {
        self.state.x.abs() > self.config.x_threshold
            || self.state.theta.abs() > self.config.theta_threshold
    }
}

#[async_trait]
impl Environment for CartPoleEnv {
    fn observation_space(&self) -> Space {
        let high = vec![
            self.config.x_threshold * 2.0,
            f64::from(f32::MAX),
            self.config.theta_threshold * 2.0,
            f64::from(f32::MAX),
        ];
        let low = high.iter().map(|&x| -x).collect();
        Space::Box(BoxSpace {
            low,
            high,
            shape: vec![4],
        })
    }

    fn action_space(&self) -> Space {
        Space::Discrete(DiscreteSpace::new(2)) // 0: push left, 1: push right
    }

    async fn reset(&mut self, seed: Option<u64>) -> Result<(VectorObservation, StepInfo)> {
        if let Some(seed) = seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.state = CartPoleState {
            x: self.rng.gen_range(-0.05..0.05),
            x_dot: self.rng.gen_range(-0.05..0.05),
            theta: self.rng.gen_range(-0.05..0.05),
            theta_dot: self.rng.gen_range(-0.05..0.05),
        };
        self.terminated = false;

        Ok((self.get_observation(), StepInfo::default()))
    }

    async fn step(&mut self, action: &Action) -> Result<Step> {
        if self.terminated {
            tracing::warn!("step() called on a finished CartPole episode; call reset() first");
        }
        let force = match action.discrete()? {
            0 => -self.config.force_mag,
            1 => self.config.force_mag,
            a => return Err(RLError::InvalidAction(format!("Invalid action: {a}"))),
        };

        let cos_theta = self.state.theta.cos();
        let sin_theta = self.state.theta.sin();

        let total_mass = self.config.mass_cart + self.config.mass_pole;
        let pole_mass_length = self.config.mass_pole * self.config.length;

        let temp =
            (force + pole_mass_length * self.state.theta_dot.powi(2) * sin_theta) / total_mass;
        let theta_acc = (self.config.gravity * sin_theta - cos_theta * temp)
            / (self.config.length
                * (4.0 / 3.0 - self.config.mass_pole * cos_theta.powi(2) / total_mass));
        let x_acc = temp - pole_mass_length * theta_acc * cos_theta / total_mass;

        // Euler integration
        let dt = self.config.tau;
        self.state.x += dt * self.state.x_dot;
        self.state.x_dot += dt * x_acc;
        self.state.theta += dt * self.state.theta_dot;
        self.state.theta_dot += dt * theta_acc;

        let done = self.is_done();
        self.terminated = done;

        Ok(Step {
            observation: self.get_observation(),
            reward: Reward(1.0), // Reward of 1 for each step survived
            done,
            truncated: false,
            info: StepInfo::default(),
        })
    }

    async fn render(&self, mode: RenderMode) -> Result<()> {
        let line = track(
            self.state.x,
            -self.config.x_threshold,
            self.config.x_threshold,
            if self.state.theta < 0.0 { '\\' } else { '/' },
        );
        match mode {
            RenderMode::Human => println!("|{line}| theta={:+.3}", self.state.theta),
            RenderMode::Ansi => tracing::debug!(frame = %line, "cartpole"),
        }
        Ok(())
    }
}

/// Mountain Car environment
pub struct MountainCarEnv {
    /// Current state
    state: MountainCarState,
    /// Configuration
    config: MountainCarConfig,
    rng: StdRng,
}

#[derive(Debug, Clone)]
struct MountainCarState {
    position: f64,
    velocity: f64,
}

#[derive(Debug, Clone)]
struct MountainCarConfig {
    min_position: f64,
    max_position: f64,
    max_speed: f64,
    goal_position: f64,
    goal_velocity: f64,
    force: f64,
    gravity: f64,
}

impl Default for MountainCarConfig {
    fn default() -> Self {
        Self {
            min_position: -1.2,
            max_position: 0.6,
            max_speed: 0.07,
            goal_position: 0.5,
            goal_velocity: 0.0,
            force: 0.001,
            gravity: 0.0025,
        }
    }
}

impl MountainCarEnv {
    /// Create a new Mountain Car environment
    #[must_use]
    pub fn new(kwargs: &EnvKwargs) -> Self {
        let defaults = MountainCarConfig::default();
        Self {
            state: MountainCarState {
                position: -0.5,
                velocity: 0.0,
            },
            config: MountainCarConfig {
                goal_velocity: kwargs.goal_velocity.unwrap_or(defaults.goal_velocity),
                max_speed: kwargs.max_speed.unwrap_or(defaults.max_speed),
                gravity: kwargs.gravity.unwrap_or(defaults.gravity),
                ..defaults
            },
            rng: StdRng::from_entropy(),
        }
    }

    fn get_observation(&self) -> VectorObservation {
        VectorObservation::new(vec![self.state.position, self.state.velocity])
    }
}

#[async_trait]
impl Environment for MountainCarEnv {
    fn observation_space(&self) -> Space {
        Space::Box(BoxSpace {
            low: vec![self.config.min_position, -self.config.max_speed],
            high: vec![self.config.max_position, self.config.max_speed],
            shape: vec![2],
        })
    }

    fn action_space(&self) -> Space {
        Space::Discrete(DiscreteSpace::new(3)) // 0: push left, 1: no push, 2: push right
    }

    async fn reset(&mut self, seed: Option<u64>) -> Result<(VectorObservation, StepInfo)> {
        if let Some(seed) = seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.state = MountainCarState {
            position: self.rng.gen_range(-0.6..-0.4),
            velocity: 0.0,
        };

        Ok((self.get_observation(), StepInfo::default()))
    }

    async fn step(&mut self, action: &Action) -> Result<Step> {
        let force = match action.discrete()? {
            0 => -1.0,
            1 => 0.0,
            2 => 1.0,
            a => return Err(RLError::InvalidAction(format!("Invalid action: {a}"))),
        };

        self.state.velocity +=
            force * self.config.force + (3.0 * self.state.position).cos() * (-self.config.gravity);
        self.state.velocity = self
            .state
            .velocity
            .clamp(-self.config.max_speed, self.config.max_speed);

        self.state.position += self.state.velocity;
        self.state.position = self
            .state
            .position
            .clamp(self.config.min_position, self.config.max_position);

        // Inelastic left wall
        if self.state.position <= self.config.min_position && self.state.velocity < 0.0 {
            self.state.velocity = 0.0;
        }

        let done = self.state.position >= self.config.goal_position
            && self.state.velocity >= self.config.goal_velocity;

        Ok(Step {
            observation: self.get_observation(),
            reward: Reward(-1.0),
            done,
            truncated: false,
            info: StepInfo::default(),
        })
    }

    async fn render(&self, mode: RenderMode) -> Result<()> {
        let line = track(
            self.state.position,
            self.config.min_position,
            self.config.max_position,
            'o',
        );
        match mode {
            RenderMode::Human => println!("|{line}| v={:+.4}", self.state.velocity),
            RenderMode::Ansi => tracing::debug!(frame = %line, "mountain car"),
        }
        Ok(())
    }
}

/// Inverted pendulum swing-up with continuous torque
pub struct PendulumEnv {
    theta: f64,
    theta_dot: f64,
    max_speed: f64,
    max_torque: f64,
    gravity: f64,
    rng: StdRng,
}

impl PendulumEnv {
    const DT: f64 = 0.05;
    const MASS: f64 = 1.0;
    const LENGTH: f64 = 1.0;

    /// Create a new pendulum environment
    #[must_use]
    pub fn new(kwargs: &EnvKwargs) -> Self {
        Self {
            theta: 0.0,
            theta_dot: 0.0,
            max_speed: kwargs.max_speed.unwrap_or(8.0),
            max_torque: kwargs.max_torque.unwrap_or(2.0),
            gravity: kwargs.gravity.unwrap_or(10.0),
            rng: StdRng::from_entropy(),
        }
    }

    fn get_observation(&self) -> VectorObservation {
        VectorObservation::new(vec![self.theta.cos(), self.theta.sin(), self.theta_dot])
    }

    fn angle_normalize(x: f64) -> f64 {
        (x + PI).rem_euclid(2.0 * PI) - PI
    }
}

#[async_trait]
impl Environment for PendulumEnv {
    fn observation_space(&self) -> Space {
        Space::Box(BoxSpace {
            low: vec![-1.0, -1.0, -self.max_speed],
            high: vec![1.0, 1.0, self.max_speed],
            shape: vec![3],
        })
    }

    fn action_space(&self) -> Space {
        Space::Box(BoxSpace {
            low: vec![-self.max_torque],
            high: vec![self.max_torque],
            shape: vec![1],
        })
    }

    async fn reset(&mut self, seed: Option<u64>) -> Result<(VectorObservation, StepInfo)> {
        if let Some(seed) = seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.theta = self.rng.gen_range(-PI..PI);
        self.theta_dot = self.rng.gen_range(-1.0..1.0);
        Ok((self.get_observation(), StepInfo::default()))
    }

    async fn step(&mut self, action: &Action) -> Result<Step> {
        let torque = match action.continuous()? {
            [u] => u.clamp(-self.max_torque, self.max_torque),
            other => {
                return Err(RLError::DimensionMismatch {
                    expected: 1,
                    actual: other.len(),
                })
            }
        };

        let cost = Self::angle_normalize(self.theta).powi(2)
            + 0.1 * self.theta_dot.powi(2)
            + 0.001 * torque.powi(2);

        let new_theta_dot = self.theta_dot
            + (3.0 * self.gravity / (2.0 * Self::LENGTH) * self.theta.sin()
                + 3.0 / (Self::MASS * Self::LENGTH.powi(2)) * torque)
                * Self::DT;
        self.theta_dot = new_theta_dot.clamp(-self.max_speed, self.max_speed);
        self.theta += self.theta_dot * Self::DT;

        Ok(Step {
            observation: self.get_observation(),
            reward: Reward(-cost),
            done: false,
            truncated: false,
            info: StepInfo::default(),
        })
    }

    async fn render(&self, mode: RenderMode) -> Result<()> {
        let line = track(Self::angle_normalize(self.theta), -PI, PI, '|');
        match mode {
            RenderMode::Human => println!("|{line}| omega={:+.3}", self.theta_dot),
            RenderMode::Ansi => tracing::debug!(frame = %line, "pendulum"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cartpole_is_reproducible_with_seed() {
        let mut a = CartPoleEnv::new(&EnvKwargs::default());
        let mut b = CartPoleEnv::new(&EnvKwargs::default());
        let (obs_a, _) = a.reset(Some(42)).await.unwrap();
        let (obs_b, _) = b.reset(Some(42)).await.unwrap();
        assert_eq!(obs_a, obs_b);
    }

    #[tokio::test]
    async fn cartpole_falls_when_pushed_one_way() {
        let mut env = CartPoleEnv::new(&EnvKwargs::default());
        env.reset(Some(0)).await.unwrap();
        let mut steps = 0;
        loop {
            let step = env.step(&Action::Discrete(1)).await.unwrap();
            steps += 1;
            assert!((step.reward.value() - 1.0).abs() < f64::EPSILON);
            if step.done {
                break;
            }
            assert!(steps < 500, "pole never fell");
        }
    }

    #[tokio::test]
    async fn cartpole_rejects_continuous_actions() {
        let mut env = CartPoleEnv::new(&EnvKwargs::default());
        env.reset(Some(0)).await.unwrap();
        assert!(env.step(&Action::Continuous(vec![0.5])).await.is_err());
    }

    #[tokio::test]
    async fn kwargs_change_physics() {
        let kwargs = EnvKwargs {
            force_mag: Some(30.0),
            ..EnvKwargs::default()
        };
        let mut strong = CartPoleEnv::new(&kwargs);
        let mut normal = CartPoleEnv::new(&EnvKwargs::default());
        strong.reset(Some(1)).await.unwrap();
        normal.reset(Some(1)).await.unwrap();
        let s = strong.step(&Action::Discrete(1)).await.unwrap();
        let n = normal.step(&Action::Discrete(1)).await.unwrap();
        assert!(s.observation.data[1] > n.observation.data[1]);
    }

    #[tokio::test]
    async fn mountain_car_velocity_is_bounded() {
        let mut env = MountainCarEnv::new(&EnvKwargs::default());
        env.reset(Some(3)).await.unwrap();
        for _ in 0..300 {
            let step = env.step(&Action::Discrete(2)).await.unwrap();
            assert!(step.observation.data[1].abs() <= 0.07 + 1e-12);
            assert!((step.reward.value() + 1.0).abs() < f64::EPSILON);
        }
    }

    #[tokio::test]
    async fn pendulum_clips_torque_and_never_terminates() {
        let mut env = PendulumEnv::new(&EnvKwargs::default());
        env.reset(Some(5)).await.unwrap();
        for _ in 0..50 {
            let step = env.step(&Action::Continuous(vec![100.0])).await.unwrap();
            assert!(!step.done);
            assert!(step.reward.value() <= 0.0);
            assert!(step.observation.data[2].abs() <= 8.0);
        }
        assert!(env.step(&Action::Discrete(0)).await.is_err());
    }
}
