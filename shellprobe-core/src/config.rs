use crate::error::{ProbeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_VAR: &str = "XDG_CONFIG_HOME";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
/// Per-stream capture limit, 1 MiB
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Settings for running commands under a fixture configuration directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Environment variable pointed at `config_dir`
    pub config_var: String,
    pub config_dir: Option<PathBuf>,
    pub timeout_ms: u64,
    /// Shell program; the platform shell when unset
    pub shell: Option<String>,
    /// Bytes kept from each of stdout and stderr
    pub max_output_bytes: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            config_var: DEFAULT_CONFIG_VAR.to_string(),
            config_dir: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            shell: None,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl ProbeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ProbeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn with_config_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.config_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_config_var(mut self, var: impl Into<String>) -> Self {
        self.config_var = var.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.config_var.is_empty() {
            return Err(ProbeError::InvalidConfiguration(
                "config_var must not be empty".to_string(),
            ));
        }
        if self.config_var.contains('=') || self.config_var.contains('\0') {
            return Err(ProbeError::InvalidConfiguration(format!(
                "config_var {:?} is not a valid environment variable name",
                self.config_var
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ProbeError::InvalidConfiguration(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(ProbeError::InvalidConfiguration(
                "max_output_bytes must be greater than zero".to_string(),
            ));
        }
        if matches!(&self.shell, Some(shell) if shell.trim().is_empty()) {
            return Err(ProbeError::InvalidConfiguration(
                "shell must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
