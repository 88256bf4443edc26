//! Training algorithms a checkpoint can come from

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Algorithm that produced a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algo {
    /// Advantage actor-critic
    A2c,
    /// Proximal policy optimization
    Ppo,
    /// Trust region policy optimization
    Trpo,
    /// Augmented random search
    Ars,
    /// Recurrent PPO
    PpoLstm,
    /// Deep Q-network
    Dqn,
    /// Quantile-regression DQN
    Qrdqn,
    /// Deep deterministic policy gradient
    Ddpg,
    /// Soft actor-critic
    Sac,
    /// Twin delayed DDPG
    Td3,
    /// Truncated quantile critics
    Tqc,
    /// Hindsight experience replay
    Her,
}

impl Algo {
    /// Every known algorithm
    pub const ALL: [Algo; 12] = [
        Algo::A2c,
        Algo::Ppo,
        Algo::Trpo,
        Algo::Ars,
        Algo::PpoLstm,
        Algo::Dqn,
        Algo::Qrdqn,
        Algo::Ddpg,
        Algo::Sac,
        Algo::Td3,
        Algo::Tqc,
        Algo::Her,
    ];

    /// Short lowercase name, as used in folder layouts
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Algo::A2c => "a2c",
            Algo::Ppo => "ppo",
            Algo::Trpo => "trpo",
            Algo::Ars => "ars",
            Algo::PpoLstm => "ppo_lstm",
            Algo::Dqn => "dqn",
            Algo::Qrdqn => "qrdqn",
            Algo::Ddpg => "ddpg",
            Algo::Sac => "sac",
            Algo::Td3 => "td3",
            Algo::Tqc => "tqc",
            Algo::Her => "her",
        }
    }

    /// Whether the algorithm learns from a replay buffer
    ///
    /// Such checkpoints are evaluated in a single environment and loaded
    /// with a minimal buffer.
    #[must_use]
    pub fn is_off_policy(self) -> bool {
        matches!(
            self,
            Algo::Qrdqn | Algo::Dqn | Algo::Ddpg | Algo::Sac | Algo::Her | Algo::Td3 | Algo::Tqc
        )
    }

    /// Whether the policy carries recurrent state
    #[must_use]
    pub fn is_recurrent(self) -> bool {
        self == Algo::PpoLstm
    }
}

impl fmt::Display for Algo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unrecognized algorithm name
#[derive(Debug, Clone, Error)]
#[error("unknown algorithm `{0}`")]
pub struct ParseAlgoError(pub String);

impl FromStr for Algo {
    type Err = ParseAlgoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        Algo::ALL
            .into_iter()
            .find(|a| a.name() == lowered)
            .ok_or_else(|| ParseAlgoError(s.to_owned()))
    }
}
