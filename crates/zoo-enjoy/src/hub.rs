//! Downloading pretrained agents from a model hub

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use zoo_rl_agent::Algo;

use crate::resolver::{latest_run_id, run_folder, MODEL_EXT};

/// Default hub organization
pub const DEFAULT_ORGANIZATION: &str = "sb3";

/// Default hub endpoint
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Errors raised while downloading
#[derive(Debug, Error)]
pub enum HubError {
    /// Transport failure
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an error status
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL
        url: String,
        /// Status code
        status: u16,
    },

    /// Writing a downloaded file failed
    #[error("cannot write {path}: {source}")]
    Io {
        /// Target file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A downloaded YAML file is malformed
    #[error("malformed YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// What to download and where to put it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubRequest {
    /// Algorithm
    pub algo: Algo,
    /// Environment id
    pub env_id: String,
    /// Experiment id; 0 creates a new run after the latest one
    pub exp_id: i64,
    /// Root log folder
    pub folder: PathBuf,
    /// Hub organization owning the repositories
    pub organization: String,
    /// Overwrite an existing model
    pub force: bool,
}

impl HubRequest {
    /// Hub repository name, e.g. `ppo-CartPole-v1`
    pub fn repo_name(&self) -> String {
        format!("{}-{}", self.algo, self.env_id)
    }

    /// Local run folder the files are laid out in
    pub fn target_folder(&self) -> PathBuf {
        let exp_id = if self.exp_id == 0 {
            let next = latest_run_id(&self.folder.join(self.algo.name()), &self.env_id) + 1;
            i64::try_from(next).unwrap_or(i64::MAX)
        } else {
            self.exp_id
        };
        run_folder(&self.folder, self.algo, &self.env_id, exp_id)
    }
}

/// Source of pretrained agents
#[async_trait]
pub trait ModelHub: Send + Sync {
    /// Download the agent described by `request` into its run folder
    ///
    /// Returns the run folder.
    async fn download(&self, request: &HubRequest) -> Result<PathBuf, HubError>;
}

/// Hub served over HTTP with `<endpoint>/<org>/<repo>/resolve/main/<file>` URLs
#[derive(Debug, Clone)]
pub struct HttpModelHub {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpModelHub {
    /// Hub at `endpoint`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_owned(),
        }
    }

    fn url(&self, request: &HubRequest, file: &str) -> String {
        format!(
            "{}/{}/{}/resolve/main/{file}",
            self.endpoint,
            request.organization,
            request.repo_name()
        )
    }

    /// Fetch a file; `Ok(None)` when it does not exist and is optional
    async fn fetch(
        &self,
        request: &HubRequest,
        file: &str,
        required: bool,
    ) -> Result<Option<Vec<u8>>, HubError> {
        let url = self.url(request, file);
        tracing::debug!(%url, "fetching");
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND && !required {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(HubError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(Some(response.bytes().await?.to_vec()))
    }
}

impl Default for HttpModelHub {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), HubError> {
    let io_err = |source| HubError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    tokio::fs::write(path, contents).await.map_err(io_err)
}

#[async_trait]
impl ModelHub for HttpModelHub {
    async fn download(&self, request: &HubRequest) -> Result<PathBuf, HubError> {
        let log_path = request.target_folder();
        let model_path = log_path.join(format!("{}.{MODEL_EXT}", request.env_id));
        let stats_path = log_path.join(&request.env_id);

        if model_path.exists() && !request.force {
            tracing::info!(path = %model_path.display(), "model already present, skipping download");
            return Ok(log_path);
        }

        tracing::info!(
            repo = %format!("{}/{}", request.organization, request.repo_name()),
            dest = %log_path.display(),
            "downloading pretrained agent"
        );

        let model_file = format!("{}.{MODEL_EXT}", request.repo_name());
        // Required files come first so a failure leaves nothing behind
        let model = self.fetch(request, &model_file, true).await?;
        let config = self.fetch(request, "config.yml", true).await?;
        let env_kwargs = self.fetch(request, "env_kwargs.yml", false).await?;
        let vecnormalize = self.fetch(request, "vecnormalize.json", false).await?;

        if let Some(model) = model {
            write_file(&model_path, &model).await?;
        }
        if let Some(config) = config {
            write_file(&stats_path.join("config.yml"), &config).await?;
        }
        if let Some(stats) = vecnormalize {
            write_file(&stats_path.join("vecnormalize.json"), &stats).await?;
        }

        let kwargs: serde_yaml::Value = match env_kwargs {
            Some(raw) => serde_yaml::from_slice(&raw)?,
            None => serde_yaml::Value::Null,
        };
        let mut args = BTreeMap::new();
        args.insert("env_kwargs", kwargs);
        write_file(&stats_path.join("args.yml"), serde_yaml::to_string(&args)?.as_bytes()).await?;

        Ok(log_path)
    }
}
