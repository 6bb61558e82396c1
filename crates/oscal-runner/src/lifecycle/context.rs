use oscal_runner_core::{RunnerConfig, RunnerError};
use std::path::{Path, PathBuf};
use url::Url;

/// Everything the lifecycle manager needs, passed explicitly
#[derive(Debug, Clone)]
pub struct ServiceRuntimeContext {
    config: RunnerConfig,
    record_path: PathBuf,
    base_url: Url,
}

impl ServiceRuntimeContext {
    pub fn new(config: RunnerConfig) -> Result<Self, RunnerError> {
        let base_url = Url::parse(&config.server_base_url())
            .map_err(|e| RunnerError::Configuration(format!("invalid server URL: {e}")))?;
        Ok(Self {
            record_path: config.pid_file(),
            config,
            base_url,
        })
    }

    /// Probe a server somewhere other than `localhost:<port>`
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn record_path(&self) -> &Path {
        &self.record_path
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn health_url(&self) -> Result<Url, RunnerError> {
        self.base_url
            .join("health")
            .map_err(|e| RunnerError::Configuration(format!("invalid health URL: {e}")))
    }
}
