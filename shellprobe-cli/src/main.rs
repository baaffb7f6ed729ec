use clap::{Args, Parser, Subcommand};
use shellprobe_core::{ProbeConfig, RunOutput};
use shellprobe_runner::{CommandRunner, Environment};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::debug;

/// Exit code reported when the command was killed by the timeout
const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Parser)]
#[command(name = "shellprobe")]
#[command(about = "Run shell commands under a fixture configuration directory", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command and print its trimmed stdout followed by its trimmed stderr
    Run {
        #[command(flatten)]
        probe: ProbeArgs,

        /// Working directory for the command
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Shell used to run the command
        #[arg(long)]
        shell: Option<String>,

        /// Bytes kept from each of stdout and stderr
        #[arg(long)]
        max_output_bytes: Option<usize>,

        /// Print the full run result as JSON
        #[arg(long)]
        json: bool,

        /// Command to run; multiple words are joined with spaces
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        cmd: Vec<String>,
    },

    /// Print the environment commands would receive
    Env {
        #[command(flatten)]
        probe: ProbeArgs,
    },
}

#[derive(Args)]
struct ProbeArgs {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory the config variable points at (defaults to the current directory)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Name of the config variable to override
    #[arg(long)]
    config_var: Option<String>,
}

impl ProbeArgs {
    fn load(&self) -> anyhow::Result<ProbeConfig> {
        let mut config = match &self.config {
            Some(path) => ProbeConfig::load(path)?,
            None => ProbeConfig::default(),
        };

        if let Some(dir) = &self.config_dir {
            config = config.with_config_dir(dir);
        }
        if config.config_dir.is_none() {
            config = config.with_config_dir(std::env::current_dir()?);
        }
        if let Some(var) = &self.config_var {
            config = config.with_config_var(var.clone());
        }

        debug!(config = ?config, "Resolved probe config");
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            probe,
            cwd,
            timeout_ms,
            shell,
            max_output_bytes,
            json,
            cmd,
        } => {
            let mut config = probe.load()?;
            if let Some(ms) = timeout_ms {
                config = config.with_timeout(Duration::from_millis(ms));
            }
            if let Some(shell) = shell {
                config = config.with_shell(shell);
            }
            if let Some(bytes) = max_output_bytes {
                config = config.with_max_output_bytes(bytes);
            }

            let runner = CommandRunner::new(config)?;
            let output = runner.run_detailed(&cmd.join(" "), cwd.as_deref()).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                let combined = output.combined();
                if !combined.is_empty() {
                    println!("{}", combined);
                }
            }

            process::exit(exit_code(&output));
        }
        Commands::Env { probe } => {
            let runner = CommandRunner::new(probe.load()?)?;
            write_env(&mut io::stdout().lock(), runner.environment())?;
        }
    }

    Ok(())
}

/// One `KEY=VALUE` line per variable, in key order
fn write_env<W: Write>(out: &mut W, env: &Environment) -> io::Result<()> {
    for (key, value) in env.iter() {
        writeln!(out, "{}={}", key.to_string_lossy(), value.to_string_lossy())?;
    }
    Ok(())
}

fn exit_code(output: &RunOutput) -> i32 {
    if output.timed_out {
        TIMEOUT_EXIT_CODE
    } else {
        output.exit_code.unwrap_or(1)
    }
}
