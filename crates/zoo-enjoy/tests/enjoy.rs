//! End-to-end evaluation over experiment folders on disk

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::Parser;
use zoo_enjoy::{run, run_until, Args, HttpModelHub, HubError, HubRequest, Interrupt, ModelHub};
use zoo_rl_agent::{Algo, Checkpoint, PolicyParams, FORMAT_VERSION};
use zoo_rl_core::{EnvKwargs, Environment};
use zoo_rl_env::make_env;

/// Hub that must not be reached
#[derive(Default)]
struct NoHub {
    calls: AtomicUsize,
}

#[async_trait]
impl ModelHub for NoHub {
    async fn download(&self, request: &HubRequest) -> Result<PathBuf, HubError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HubError::Status {
            url: request.repo_name(),
            status: 404,
        })
    }
}

fn cartpole_checkpoint(seed: u64) -> Checkpoint {
    let env = make_env("CartPole-v1", &EnvKwargs::default()).unwrap();
    let observation_space = env.observation_space();
    let action_space = env.action_space();
    Checkpoint {
        format_version: FORMAT_VERSION,
        algo: Algo::Ppo,
        policy: PolicyParams::random(observation_space.flat_dim(), &[8], 2, None, seed),
        observation_space,
        action_space,
        data: serde_json::Map::new(),
    }
}

fn write_run(folder: &Path, exp_id: u32, file: &str) -> PathBuf {
    let run = folder.join(format!("ppo/CartPole-v1_{exp_id}"));
    std::fs::create_dir_all(&run).unwrap();
    cartpole_checkpoint(u64::from(exp_id))
        .save(&run.join(file))
        .unwrap();
    run
}

fn args(folder: &Path, results: &Path, extra: &[&str]) -> Args {
    let mut argv = vec![
        "enjoy".to_owned(),
        "--folder".to_owned(),
        folder.display().to_string(),
        "--results-file".to_owned(),
        results.display().to_string(),
        "--no-render".to_owned(),
        "--verbose".to_owned(),
        "0".to_owned(),
    ];
    argv.extend(extra.iter().map(|s| (*s).to_owned()));
    Args::try_parse_from(argv).unwrap()
}

#[tokio::test]
async fn single_agent_report() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("logs");
    write_run(&folder, 1, "CartPole-v1.model.gz");
    let results = dir.path().join("results.txt");

    let hub = NoHub::default();
    let report = run(
        &args(&folder, &results, &["-n", "2"]),
        &hub,
    )
    .await
    .unwrap();

    assert_eq!(hub.calls.load(Ordering::SeqCst), 0);
    assert!(!report.interrupted);
    assert_eq!(report.agents.len(), 1);
    assert_eq!(report.agents[0].rewards.len(), 1);
    assert_eq!(report.total.rewards(), report.agents[0].rewards);

    let text = std::fs::read_to_string(&results).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "======== Agent 1 ========");
    assert!(lines[1].starts_with("Checkpoint last: 2 episodes, reward "));
    assert!(lines[2].starts_with("Global reward: "));
    assert!(lines[4].starts_with("Global std: "));
    assert_eq!(lines[7], "[0.0]");
    assert!(lines[8].starts_with("Final reward: "));
    assert_eq!(lines.len(), 14);
}

#[tokio::test]
async fn agents_and_checkpoint_runs() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("logs");
    for exp_id in [1, 2] {
        write_run(&folder, exp_id, "rl_model_100_steps.model.gz");
        write_run(&folder, exp_id, "rl_model_200_steps.model.gz");
    }
    let results = dir.path().join("results.txt");

    let report = run(
        &args(
            &folder,
            &results,
            &[
                "--n-agents",
                "2",
                "--n-runs",
                "2",
                "--checkpoint-interval",
                "100",
                "-n",
                "1",
            ],
        ),
        &NoHub::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.agents.len(), 2);
    assert!(report.agents.iter().all(|a| a.rewards.len() == 2));
    assert_eq!(report.total.rewards().len(), 2);

    let text = std::fs::read_to_string(&results).unwrap();
    assert!(text.contains("======== Agent 2 ========"));
    assert!(text.contains("Checkpoint 100: 1 episodes"));
    assert!(text.contains("Checkpoint 200: 1 episodes"));
    assert_eq!(text.matches("Global reward").count(), 2);
    assert_eq!(text.matches("Final reward").count(), 1);
}

#[tokio::test]
async fn runs_without_episodes_report_nan() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("logs");
    write_run(&folder, 1, "CartPole-v1.model.gz");
    let results = dir.path().join("results.txt");

    let report = run(&args(&folder, &results, &["--max-steps", "3"]), &NoHub::default())
        .await
        .unwrap();
    assert!(report.agents[0].rewards.is_empty());

    let text = std::fs::read_to_string(&results).unwrap();
    assert!(text.contains("Checkpoint last: 0 episodes, reward NaN +/- NaN"));
    assert!(text.contains("Global reward: NaN +/- NaN\n[]\n"));
    assert!(text.contains("Final reward: NaN +/- NaN\n[]\n"));
}

#[tokio::test]
async fn results_are_appended_across_invocations() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("logs");
    write_run(&folder, 1, "CartPole-v1.model.gz");
    let results = dir.path().join("results.txt");
    let argv = args(&folder, &results, &["-n", "1"]);

    run(&argv, &NoHub::default()).await.unwrap();
    run(&argv, &NoHub::default()).await.unwrap();
    let text = std::fs::read_to_string(&results).unwrap();
    assert_eq!(text.matches("======== Agent 1 ========").count(), 2);
}

#[tokio::test]
async fn sidecars_shape_the_environment() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("logs");
    let run_dir = write_run(&folder, 1, "CartPole-v1.model.gz");
    let stats = run_dir.join("CartPole-v1");
    std::fs::create_dir_all(&stats).unwrap();
    std::fs::write(
        stats.join("config.yml"),
        "- - normalize\n  - \"{'norm_obs': True, 'norm_reward': False}\"\n- - n_envs\n  - 4\n",
    )
    .unwrap();
    std::fs::write(
        stats.join("vecnormalize.json"),
        r#"{"obs_rms": {"mean": [0.0, 0.0, 0.0, 0.0], "var": [1.0, 1.0, 1.0, 1.0], "count": 100.0},
            "ret_rms": {"mean": 0.0, "var": 1.0, "count": 100.0}}"#,
    )
    .unwrap();
    std::fs::write(stats.join("args.yml"), "env_kwargs:\n  max_episode_steps: 20\n").unwrap();
    let results = dir.path().join("results.txt");

    run(
        &args(&folder, &results, &["-n", "3", "--n-envs", "2"]),
        &NoHub::default(),
    )
    .await
    .unwrap();

    let text = std::fs::read_to_string(&results).unwrap();
    let line = text.lines().nth(1).unwrap();
    assert!(line.starts_with("Checkpoint last: 3 episodes"), "{line}");
    // Episodes are capped by the saved step limit
    let length = line.split("length ").nth(1).unwrap();
    let mean: f64 = length.split(' ').next().unwrap().parse().unwrap();
    assert!(mean <= 20.0);
}

#[tokio::test]
async fn bad_kwargs_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("logs");
    write_run(&folder, 1, "CartPole-v1.model.gz");
    let results = dir.path().join("results.txt");

    let err = run(
        &args(&folder, &results, &["--env-kwargs", "warp_factor:9"]),
        &NoHub::default(),
    )
    .await
    .unwrap_err();
    assert!(format!("{err:#}").contains("warp_factor"));
}

#[tokio::test]
async fn private_folder_missing_model_fails_without_download() {
    let dir = tempfile::tempdir().unwrap();
    let hub = NoHub::default();
    let results = dir.path().join("results.txt");
    let err = run(&args(&dir.path().join("logs"), &results, &[]), &hub)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("was not found"));
    assert_eq!(hub.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn shared_folder_downloads_from_hub_once() {
    let staging = tempfile::tempdir().unwrap();
    let archive = staging.path().join("model.gz");
    cartpole_checkpoint(7).save(&archive).unwrap();
    let model_bytes = std::fs::read(&archive).unwrap();

    let mut server = mockito::Server::new_async().await;
    let base = "/sb3/ppo-CartPole-v1/resolve/main";
    let model = server
        .mock("GET", format!("{base}/ppo-CartPole-v1.model.gz").as_str())
        .with_body(model_bytes)
        .expect(1)
        .create_async()
        .await;
    let _config = server
        .mock("GET", format!("{base}/config.yml").as_str())
        .with_body("n_envs: 8\n")
        .create_async()
        .await;
    let _missing = server
        .mock("GET", mockito::Matcher::Regex(r"(env_kwargs\.yml|vecnormalize\.json)$".into()))
        .with_status(404)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("rl-trained-agents");
    let results = dir.path().join("results.txt");
    let hub = HttpModelHub::new(server.url());

    let report = run(
        &args(&folder, &results, &["-n", "1"]),
        &hub,
    )
    .await
    .unwrap();
    model.assert_async().await;
    assert_eq!(report.agents[0].rewards.len(), 1);
    assert!(folder.join("ppo/CartPole-v1_1/CartPole-v1.model.gz").is_file());
    assert!(folder.join("ppo/CartPole-v1_1/CartPole-v1/args.yml").is_file());
}

#[tokio::test]
async fn default_budget_counts_episodes() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("logs");
    write_run(&folder, 1, "CartPole-v1.model.gz");
    let results = dir.path().join("results.txt");

    let argv = args(&folder, &results, &["--env-kwargs", "max_episode_steps:5"]);
    assert_eq!(argv.n_timesteps, 1000);
    run(&argv, &NoHub::default()).await.unwrap();

    let text = std::fs::read_to_string(&results).unwrap();
    assert!(text.contains("Checkpoint last: 1000 episodes"), "{text}");
}

#[tokio::test]
async fn raised_interrupt_skips_runs_but_reports() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("logs");
    write_run(&folder, 1, "CartPole-v1.model.gz");
    write_run(&folder, 2, "CartPole-v1.model.gz");
    let results = dir.path().join("results.txt");

    let (handle, interrupt) = Interrupt::new();
    handle.raise();
    let report = run_until(
        &args(&folder, &results, &["--n-agents", "2", "-n", "1"]),
        &NoHub::default(),
        &interrupt,
    )
    .await
    .unwrap();

    assert!(report.interrupted);
    assert_eq!(report.agents.len(), 1);
    assert!(report.agents[0].rewards.is_empty());

    let text = std::fs::read_to_string(&results).unwrap();
    assert!(!text.contains("Checkpoint last"));
    assert!(!text.contains("======== Agent 2 ========"));
    assert!(text.contains("Global reward: NaN +/- NaN"));
    assert!(text.contains("Final global: NaN +/- NaN"));
}

#[tokio::test]
async fn ansi_render_mode_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("logs");
    write_run(&folder, 1, "CartPole-v1.model.gz");
    let results = dir.path().join("results.txt");

    let mut argv = args(&folder, &results, &["-n", "1", "--env-kwargs", "render_mode:ansi"]);
    argv.no_render = false;
    let report = run(&argv, &NoHub::default()).await.unwrap();
    assert_eq!(report.agents[0].rewards.len(), 1);
}

#[tokio::test]
async fn overflowing_seed_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("results.txt");
    let max = u64::MAX.to_string();
    let err = run(
        &args(
            &dir.path().join("logs"),
            &results,
            &["--seed", max.as_str(), "--n-runs", "2"],
        ),
        &NoHub::default(),
    )
    .await
    .unwrap_err();
    assert!(format!("{err:#}").contains("--seed"));
    assert!(!results.exists());
}
