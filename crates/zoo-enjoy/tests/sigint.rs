//! A real SIGINT stops a CPU-bound rollout
//!
//! Kept in its own test binary: the signal is sent to the whole process.
#![cfg(unix)]

use std::process::Command;
use std::time::{Duration, Instant};

use zoo_enjoy::{create_test_env, rollout, Interrupt, RolloutBudget, RolloutConfig, TestEnvConfig};
use zoo_rl_core::RandomPolicy;

#[tokio::test]
async fn sigint_stops_a_running_rollout() {
    let interrupt = Interrupt::on_ctrl_c().unwrap();
    let mut venv = create_test_env(
        "CartPole-v1",
        &TestEnvConfig {
            n_envs: 1,
            ..TestEnvConfig::default()
        },
    )
    .unwrap();
    let mut policy = RandomPolicy::new(venv.observation_space(), venv.action_space(), 0);

    let pid = std::process::id().to_string();
    let sender = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        Command::new("kill").args(["-INT", &pid]).status().unwrap()
    });

    let started = Instant::now();
    let stats = rollout(
        &mut *venv,
        &mut policy,
        RolloutBudget {
            max_episodes: usize::MAX,
            max_steps: Some(50_000_000),
        },
        RolloutConfig::default(),
        &interrupt,
    )
    .await
    .unwrap();

    assert!(sender.join().unwrap().success());
    assert!(stats.interrupted);
    assert!(stats.steps < 50_000_000);
    assert!(started.elapsed() < Duration::from_secs(60));
    assert!(interrupt.is_raised());
}
