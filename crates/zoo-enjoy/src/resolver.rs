//! Locating checkpoint files in an experiment folder
//!
//! Training runs are laid out as
//!
//! ```text
//! <folder>/<algo>/<env>_<exp_id>/
//!     <env>.model.gz                 final model
//!     best_model.model.gz            best model seen during evaluation
//!     rl_model_<steps>_steps.model.gz
//!     <env>/config.yml, args.yml, vecnormalize.json
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use zoo_rl_agent::Algo;

use crate::hub::{HubError, HubRequest, ModelHub};

/// Folders containing this marker are mirrors of the public model hub
pub const SHARED_REPOSITORY_MARKER: &str = "rl-trained-agents";

/// Extension of checkpoint archives
pub const MODEL_EXT: &str = "model.gz";

/// Errors raised while resolving a checkpoint
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The experiment folder does not exist
    #[error("the folder {0} was not found")]
    FolderNotFound(PathBuf),

    /// No intermediate checkpoint exists
    #[error("no checkpoint found in {0}")]
    NoCheckpoint(PathBuf),

    /// The selected model file does not exist
    #[error("no model found for {algo} on {env_id}, path: {path}")]
    ModelNotFound {
        /// Algorithm
        algo: Algo,
        /// Environment id
        env_id: String,
        /// Expected file
        path: PathBuf,
    },

    /// The folder could not be listed
    #[error("cannot list {path}: {source}")]
    Io {
        /// Folder
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The fallback download failed
    #[error("downloading the pretrained model failed: {0}")]
    Download(#[from] HubError),
}

/// Which checkpoint of a training run to load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CheckpointSelection {
    /// Model saved at the end of training
    #[default]
    Last,
    /// Best model according to periodic evaluation
    Best,
    /// Checkpoint saved after this many steps
    Step(u64),
    /// Most recent intermediate checkpoint
    LastCheckpoint,
}

impl CheckpointSelection {
    /// Selection from the command line flags; `--load-best` wins, then a step
    pub fn from_flags(load_best: bool, load_checkpoint: Option<u64>, load_last: bool) -> Self {
        match (load_best, load_checkpoint, load_last) {
            (true, _, _) => Self::Best,
            (false, Some(step), _) => Self::Step(step),
            (false, None, true) => Self::LastCheckpoint,
            (false, None, false) => Self::Last,
        }
    }
}

impl fmt::Display for CheckpointSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Last => f.write_str("last"),
            Self::Best => f.write_str("best"),
            Self::Step(step) => write!(f, "{step}"),
            Self::LastCheckpoint => f.write_str("latest checkpoint"),
        }
    }
}

/// What to resolve
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    /// Root log folder
    pub folder: PathBuf,
    /// Algorithm
    pub algo: Algo,
    /// Environment id
    pub env_id: String,
    /// Experiment id: 0 for the latest, -1 for no experiment sub-folder
    pub exp_id: i64,
    /// Which checkpoint to load
    pub selection: CheckpointSelection,
}

/// A checkpoint found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelLocation {
    /// Display name of the model
    pub name_prefix: String,
    /// Checkpoint archive
    pub model_path: PathBuf,
    /// Folder of the training run
    pub log_path: PathBuf,
    /// Experiment id after resolving "latest"
    pub exp_id: i64,
}

impl ModelLocation {
    /// Folder holding the sidecar files of the run
    pub fn stats_path(&self, env_id: &str) -> PathBuf {
        self.log_path.join(env_id)
    }
}

/// Highest `N` among `<env_id>_<N>` directories in `log_path`, 0 if none
pub fn latest_run_id(log_path: &Path, env_id: &str) -> u64 {
    let prefix = format!("{env_id}_");
    let Ok(entries) = std::fs::read_dir(log_path) else {
        return 0;
    };
    entries
        .filter_map(std::result::Result::ok)
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            e.file_name()
                .to_str()
                .and_then(|name| name.strip_prefix(&prefix))
                .and_then(|id| id.parse::<u64>().ok())
        })
        .max()
        .unwrap_or(0)
}

/// Folder of run `exp_id` (already resolved, so never 0 unless none exists)
pub fn run_folder(folder: &Path, algo: Algo, env_id: &str, exp_id: i64) -> PathBuf {
    let algo_folder = folder.join(algo.name());
    if exp_id > 0 {
        algo_folder.join(format!("{env_id}_{exp_id}"))
    } else {
        algo_folder
    }
}

/// Resolve a checkpoint path on disk, without touching the network
pub fn resolve(request: &ResolveRequest) -> Result<ModelLocation, ResolveError> {
    let ResolveRequest {
        folder,
        algo,
        env_id,
        selection,
        ..
    } = request;
    let algo = *algo;

    let exp_id = if request.exp_id == 0 {
        let latest = latest_run_id(&folder.join(algo.name()), env_id);
        tracing::info!(exp_id = latest, "loading latest experiment");
        i64::try_from(latest).unwrap_or(i64::MAX)
    } else {
        request.exp_id
    };
    let log_path = run_folder(folder, algo, env_id, exp_id);
    if !log_path.is_dir() {
        return Err(ResolveError::FolderNotFound(log_path));
    }

    let (name_prefix, model_path) = match selection {
        CheckpointSelection::Last => (
            format!("final-model-{algo}-{env_id}"),
            log_path.join(format!("{env_id}.{MODEL_EXT}")),
        ),
        CheckpointSelection::Best => (
            format!("best-model-{algo}-{env_id}"),
            log_path.join(format!("best_model.{MODEL_EXT}")),
        ),
        CheckpointSelection::Step(step) => (
            format!("checkpoint-{step}-{algo}-{env_id}"),
            log_path.join(format!("rl_model_{step}_steps.{MODEL_EXT}")),
        ),
        CheckpointSelection::LastCheckpoint => {
            let step = last_checkpoint_step(&log_path)?
                .ok_or_else(|| ResolveError::NoCheckpoint(log_path.clone()))?;
            (
                format!("checkpoint-{step}-{algo}-{env_id}"),
                log_path.join(format!("rl_model_{step}_steps.{MODEL_EXT}")),
            )
        }
    };

    if !model_path.is_file() {
        return Err(ResolveError::ModelNotFound {
            algo,
            env_id: env_id.clone(),
            path: model_path,
        });
    }

    Ok(ModelLocation {
        name_prefix,
        model_path,
        log_path,
        exp_id,
    })
}

fn last_checkpoint_step(log_path: &Path) -> Result<Option<u64>, ResolveError> {
    let suffix = format!("_steps.{MODEL_EXT}");
    let entries = std::fs::read_dir(log_path).map_err(|source| ResolveError::Io {
        path: log_path.to_path_buf(),
        source,
    })?;
    Ok(entries
        .filter_map(std::result::Result::ok)
        .filter_map(|e| {
            e.file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("rl_model_"))
                .and_then(|rest| rest.strip_suffix(suffix.as_str()))
                .and_then(|steps| steps.parse::<u64>().ok())
        })
        .max())
}

/// Whether `folder` is a local mirror of the public model hub
pub fn is_shared_repository(folder: &Path) -> bool {
    folder.to_string_lossy().contains(SHARED_REPOSITORY_MARKER)
}

/// Resolve a checkpoint, downloading it once when a hub mirror lacks it
///
/// Outside a shared-repository folder the resolution error is returned as
/// is. Inside one, the hub is asked exactly once and resolution is retried
/// exactly once; the retry's error is final.
pub async fn resolve_or_download<H>(
    request: &ResolveRequest,
    hub: &H,
    organization: &str,
) -> Result<ModelLocation, ResolveError>
where
    H: ModelHub + ?Sized,
{
    match resolve(request) {
        Ok(location) => Ok(location),
        Err(err) if !is_shared_repository(&request.folder) => Err(err),
        Err(err) => {
            tracing::warn!(
                error = %err,
                organization,
                "pretrained model not found, trying to download it from the hub"
            );
            hub.download(&HubRequest {
                algo: request.algo,
                env_id: request.env_id.clone(),
                exp_id: request.exp_id,
                folder: request.folder.clone(),
                organization: organization.to_owned(),
                force: false,
            })
            .await?;
            resolve(request)
        }
    }
}
