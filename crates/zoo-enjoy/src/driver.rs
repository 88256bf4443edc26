//! Orchestration of agents and runs

use anyhow::{Context, Result};

use zoo_rl_agent::{load_model, LoadOptions};
use zoo_rl_core::VecEnv;
use zoo_rl_env::{is_atari, register_package};

use crate::cli::Args;
use crate::env::{create_test_env, TestEnvConfig};
use crate::hub::ModelHub;
use crate::hyperparams::{apply_overrides, get_saved_hyperparams, load_env_kwargs};
use crate::interrupt::Interrupt;
use crate::report::{agent_header, final_block, global_block, run_line, ResultsLog};
use crate::resolver::{resolve_or_download, CheckpointSelection, ResolveRequest};
use crate::rollout::{rollout, RolloutBudget, RolloutConfig};
use crate::stats::{AgentAggregate, FinalAggregate, RunStats};

/// Results of a whole evaluation
#[derive(Debug, Clone, Default)]
pub struct EnjoyReport {
    /// Per-agent aggregates, in agent order
    pub agents: Vec<AgentAggregate>,
    /// Cross-agent aggregate
    pub total: FinalAggregate,
    /// Whether a run was interrupted, which ends the evaluation early
    pub interrupted: bool,
}

/// Evaluate every agent and run requested by `args`, stopping on Ctrl-C
///
/// Results are appended to the results log as soon as they are known, so
/// a failing run leaves the blocks of earlier runs in place.
pub async fn run<H>(args: &Args, hub: &H) -> Result<EnjoyReport>
where
    H: ModelHub + ?Sized,
{
    let interrupt = Interrupt::on_ctrl_c().context("installing the Ctrl-C handler")?;
    run_until(args, hub, &interrupt).await
}

/// Same as [`run`], stopping once `interrupt` is raised
///
/// The flag is checked before every run and throughout each rollout. The
/// Global and Final blocks are written for whatever completed.
pub async fn run_until<H>(args: &Args, hub: &H, interrupt: &Interrupt) -> Result<EnjoyReport>
where
    H: ModelHub + ?Sized,
{
    args.validate()?;
    for package in &args.gym_packages {
        register_package(package)
            .with_context(|| format!("importing environment package `{package}`"))?;
    }
    if args.num_threads > 0 {
        tracing::debug!(
            num_threads = args.num_threads,
            "inference runs on the calling thread, ignoring --num-threads"
        );
    }

    let log = ResultsLog::new(&args.results_file);
    let append = |block: &str| {
        log.append(block)
            .with_context(|| format!("writing {}", log.path().display()))
    };

    let mut report = EnjoyReport::default();
    for k in 1..=args.n_agents {
        let exp_id = args.agent_exp_id(k);
        append(&agent_header(k))?;

        let mut agent = AgentAggregate::default();
        for j in 1..=args.n_runs {
            if interrupt.is_raised() {
                tracing::warn!(agent = k, run = j, "interrupted before the run started");
                report.interrupted = true;
                break;
            }
            let selection = args.selection_for_run(j);
            println!("======== Agent {k} Checkpoint {selection} ========");
            let stats = evaluate_run(args, hub, exp_id, args.run_seed(j), selection, interrupt)
                .await
                .with_context(|| format!("agent {k}, run {j}"))?;

            append(&run_line(&selection.to_string(), &stats))?;
            if !agent.push_run(&stats) {
                tracing::warn!(agent = k, run = j, "no episode completed, run left out");
            }
            if stats.interrupted {
                report.interrupted = true;
                break;
            }
        }

        let block = global_block(&agent);
        print!("{block}");
        append(&block)?;
        report.total.add(&agent);
        report.agents.push(agent);
        if report.interrupted {
            break;
        }
    }

    let block = final_block(&report.total);
    print!("{block}");
    append(&block)?;
    Ok(report)
}

/// One run: resolve, build, load, roll out, close
async fn evaluate_run<H>(
    args: &Args,
    hub: &H,
    exp_id: i64,
    seed: u64,
    selection: CheckpointSelection,
    interrupt: &Interrupt,
) -> Result<RunStats>
where
    H: ModelHub + ?Sized,
{
    let request = ResolveRequest {
        folder: args.folder.clone(),
        algo: args.algo,
        env_id: args.env.clone(),
        exp_id,
        selection,
    };
    let location = resolve_or_download(&request, hub, &args.hub_org)
        .await
        .context("locating the model")?;
    println!("Loading {}", location.model_path.display());

    // Off-policy algorithms only support one env
    let n_envs = if args.algo.is_off_policy() {
        1
    } else {
        args.n_envs
    };
    let atari = is_atari(&args.env);

    let stats_dir = location.stats_path(&args.env);
    let (hyperparams, stats_path) = get_saved_hyperparams(&stats_dir, args.norm_reward)?;
    let env_kwargs = apply_overrides(load_env_kwargs(&stats_dir.join("args.yml"))?, &args.env_kwargs)?;
    let render_mode = env_kwargs.render_mode;

    let mut options = LoadOptions::for_algo(args.algo);
    if hyperparams.optimize_memory_usage.is_none() {
        options.optimize_memory_usage = None;
    }
    options.custom_objects = args.custom_objects;
    options.device = args.device;
    options.seed = Some(seed);

    let mut venv = create_test_env(
        &args.env,
        &TestEnvConfig {
            n_envs,
            stats_path,
            seed,
            log_dir: args.reward_log.clone(),
            hyperparams,
            env_kwargs,
        },
    )
    .context("creating the environment")?;

    let mut model = load_model(
        &location.model_path,
        args.algo,
        &venv.observation_space(),
        &venv.action_space(),
        &options,
    )?;
    if let Some(steps) = model.num_timesteps() {
        tracing::info!(num_timesteps = steps, "checkpoint training length");
    }

    let budget = RolloutBudget {
        max_episodes: args.n_timesteps,
        max_steps: args.max_steps,
    };
    let config = RolloutConfig {
        deterministic: RolloutConfig::deterministic_for(atari, args.stochastic, args.deterministic),
        render: RolloutConfig::render_mode(args.render(), render_mode),
        is_atari: atari,
    };
    let stats = rollout(&mut *venv, &mut model.policy, budget, config, interrupt).await;
    venv.close().await?;
    Ok(stats?)
}
