use crate::environment::Environment;
use crate::process::{self, ProcessConfig, ShellCommand};
use chrono::Utc;
use shellprobe_core::{ProbeConfig, Result, RunOutput};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Runs shell commands against a fixed environment snapshot
///
/// The environment is captured once, when the runner is built, with the
/// configured config-directory variable overridden. Every command run by the
/// same runner sees the same variables.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    config: ProbeConfig,
    env: Environment,
    shell: ShellCommand,
    work_dir: Option<PathBuf>,
}

impl CommandRunner {
    pub fn new(config: ProbeConfig) -> Result<Self> {
        config.validate()?;
        let shell = ShellCommand::resolve(config.shell.as_deref())?;

        let mut env = Environment::snapshot();
        if let Some(dir) = &config.config_dir {
            env.set(&config.config_var, dir);
        }

        Ok(Self {
            config,
            env,
            shell,
            work_dir: None,
        })
    }

    /// Default working directory for commands run without an explicit `cwd`
    pub fn with_work_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// The variables every child process receives
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn shell(&self) -> &ShellCommand {
        &self.shell
    }

    /// Run `cmd` and return its trimmed stdout followed by its trimmed stderr
    pub async fn run(&self, cmd: &str, cwd: Option<&Path>) -> Result<String> {
        Ok(self.run_detailed(cmd, cwd).await?.combined())
    }

    pub async fn run_detailed(&self, cmd: &str, cwd: Option<&Path>) -> Result<RunOutput> {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let start_instant = std::time::Instant::now();

        let process_config = self.process_config(cwd);

        info!(
            run_id = %id,
            command = %cmd,
            cwd = ?process_config.working_directory,
            "Running command"
        );

        let captured = process::execute(cmd, &process_config).await?;

        let duration_ms = start_instant.elapsed().as_millis() as u64;
        let exit_code = captured.status.and_then(|s| s.code());

        if captured.timed_out {
            warn!(
                run_id = %id,
                command = %cmd,
                timeout_ms = self.config.timeout_ms,
                "Command did not finish before the timeout"
            );
        } else {
            info!(
                run_id = %id,
                exit_code = ?exit_code,
                duration_ms,
                "Command completed"
            );
        }

        Ok(RunOutput {
            id,
            command: cmd.to_string(),
            stdout: String::from_utf8_lossy(&captured.stdout).to_string(),
            stderr: String::from_utf8_lossy(&captured.stderr).to_string(),
            exit_code,
            timed_out: captured.timed_out,
            truncated: captured.truncated,
            duration_ms,
            started_at,
            completed_at: Utc::now(),
        })
    }

    fn process_config(&self, cwd: Option<&Path>) -> ProcessConfig {
        ProcessConfig {
            timeout: Some(self.config.timeout()),
            env: self.env.clone(),
            working_directory: cwd.map(Path::to_path_buf).or_else(|| self.work_dir.clone()),
            shell: self.shell.clone(),
            max_output_bytes: self.config.max_output_bytes,
        }
    }
}
