use crate::error::RunnerError;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Per-attempt time limits for local tool runs and server requests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    /// Limit for one local tool run (in milliseconds, 0 disables the limit)
    #[serde(default = "default_process_timeout_ms")]
    pub process_timeout_ms: u64,

    /// Limit for one HTTP request including the response body (in milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Limit for establishing the TCP connection to the server (in milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            process_timeout_ms: default_process_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl TimeoutConfig {
    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(anyhow::anyhow!("request_timeout_ms must be greater than 0"));
        }

        if self.connect_timeout_ms == 0 {
            return Err(anyhow::anyhow!("connect_timeout_ms must be greater than 0"));
        }

        if self.connect_timeout_ms > self.request_timeout_ms {
            return Err(anyhow::anyhow!(
                "connect_timeout_ms cannot be greater than request_timeout_ms"
            ));
        }

        Ok(())
    }

    /// Get the local process limit, `None` when disabled
    pub fn process_timeout(&self) -> Option<Duration> {
        (self.process_timeout_ms > 0).then(|| Duration::from_millis(self.process_timeout_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// How long `start` waits for a freshly spawned server to answer its health probe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessConfig {
    /// Number of health probes after spawning (0 skips the wait)
    #[serde(default = "default_readiness_attempts")]
    pub max_attempts: u32,

    /// Minimum delay between probes (in milliseconds)
    #[serde(default = "default_readiness_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Maximum delay between probes (in milliseconds)
    #[serde(default = "default_readiness_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_readiness_attempts(),
            min_delay_ms: default_readiness_min_delay_ms(),
            max_delay_ms: default_readiness_max_delay_ms(),
        }
    }
}

impl ReadinessConfig {
    /// Skip the readiness wait entirely
    pub fn no_wait() -> Self {
        Self {
            max_attempts: 0,
            min_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_delay_ms > self.max_delay_ms {
            return Err(anyhow::anyhow!(
                "min_delay_ms cannot be greater than max_delay_ms"
            ));
        }

        if self.max_attempts > 60 {
            return Err(anyhow::anyhow!("max_attempts should not exceed 60"));
        }

        if self.max_delay_ms > 30_000 {
            return Err(anyhow::anyhow!("max_delay_ms should not exceed 30 seconds"));
        }

        Ok(())
    }

    pub fn enabled(&self) -> bool {
        self.max_attempts > 0
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Main runner configuration
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(
    setter(into, strip_option),
    build_fn(validate = "Self::validate")
)]
pub struct RunnerConfig {
    /// Binary name of the command-line tool
    #[builder(default = "default_cli_binary()")]
    pub cli_binary: String,
    /// Binary name of the HTTP service
    #[builder(default = "default_server_binary()")]
    pub server_binary: String,
    #[builder(default = "default_server_port()")]
    pub server_port: u16,
    /// Per-user state directory holding the PID record and local installs
    #[builder(default = "default_home_dir()")]
    pub home_dir: PathBuf,
    /// Well-known install directory searched after PATH
    #[builder(default)]
    pub install_dir: Option<PathBuf>,
    /// Explicit tool location, bypassing the search
    #[builder(default)]
    pub cli_path: Option<PathBuf>,
    /// Explicit server location, bypassing the search
    #[builder(default)]
    pub server_path: Option<PathBuf>,
    #[builder(default = "default_package_manager_markers()")]
    #[builder(setter(custom))]
    pub package_manager_markers: Vec<String>,
    #[builder(default)]
    pub timeouts: TimeoutConfig,
    #[builder(default)]
    pub readiness: ReadinessConfig,
    /// Send local documents to the server as POST bodies instead of file:// references
    #[builder(default)]
    pub upload_local_documents: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            cli_binary: default_cli_binary(),
            server_binary: default_server_binary(),
            server_port: default_server_port(),
            home_dir: default_home_dir(),
            install_dir: None,
            cli_path: None,
            server_path: None,
            package_manager_markers: default_package_manager_markers(),
            timeouts: TimeoutConfig::default(),
            readiness: ReadinessConfig::default(),
            upload_local_documents: false,
        }
    }
}

impl RunnerConfig {
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder::default()
    }

    /// Build the configuration from defaults overlaid with `OSCAL_*` environment variables
    pub fn from_env() -> Result<Self, RunnerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RunnerConfig::from_env`] with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RunnerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(port) = lookup("OSCAL_SERVER_PORT") {
            let port: u16 = port.trim().parse().map_err(|e| {
                RunnerError::Configuration(format!("OSCAL_SERVER_PORT={port:?} is not a port: {e}"))
            })?;
            builder.server_port(port);
        }
        if let Some(home) = lookup("OSCAL_HOME") {
            builder.home_dir(home);
        }
        if let Some(path) = lookup("OSCAL_CLI_PATH") {
            builder.cli_path(path);
        }
        if let Some(path) = lookup("OSCAL_SERVER_PATH") {
            builder.server_path(path);
        }

        builder
            .build()
            .map_err(|e| RunnerError::Configuration(e.to_string()))
    }

    /// Base URL of the local service instance
    pub fn server_base_url(&self) -> String {
        format!("http://localhost:{}/", self.server_port)
    }

    /// Location of the persisted process record
    pub fn pid_file(&self) -> PathBuf {
        self.home_dir.join("PID")
    }

    /// Directory searched for installs that are not on PATH
    pub fn local_install_dir(&self) -> PathBuf {
        self.install_dir
            .clone()
            .unwrap_or_else(|| self.home_dir.join("bin"))
    }
}

impl RunnerConfigBuilder {
    pub fn package_manager_markers<S: ToString, I: IntoIterator<Item = S>>(
        &mut self,
        iter: I,
    ) -> &mut Self {
        let markers: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.package_manager_markers = Some(markers);
        self
    }

    fn validate(&self) -> Result<(), String> {
        if self.server_port == Some(0) {
            return Err("server_port must be greater than 0".to_string());
        }
        if let Some(binary) = &self.cli_binary {
            if binary.trim().is_empty() {
                return Err("cli_binary cannot be empty".to_string());
            }
        }
        if let Some(binary) = &self.server_binary {
            if binary.trim().is_empty() {
                return Err("server_binary cannot be empty".to_string());
            }
        }
        if let Some(timeouts) = &self.timeouts {
            timeouts
                .validate()
                .map_err(|e| format!("Invalid timeout config: {e}"))?;
        }
        if let Some(readiness) = &self.readiness {
            readiness
                .validate()
                .map_err(|e| format!("Invalid readiness config: {e}"))?;
        }
        Ok(())
    }
}

// Default value functions for serde and the builder
fn default_process_timeout_ms() -> u64 {
    300_000
}
fn default_request_timeout_ms() -> u64 {
    300_000
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_readiness_attempts() -> u32 {
    10
}
fn default_readiness_min_delay_ms() -> u64 {
    200
}
fn default_readiness_max_delay_ms() -> u64 {
    2_000
}
fn default_cli_binary() -> String {
    "oscal-cli".to_string()
}
fn default_server_binary() -> String {
    "oscal-server".to_string()
}
fn default_server_port() -> u16 {
    8888
}
fn default_home_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".oscal")
}
fn default_package_manager_markers() -> Vec<String> {
    ["node_modules", ".npm", "npm", "homebrew", "Cellar", ".cargo"]
        .into_iter()
        .map(String::from)
        .collect()
}
