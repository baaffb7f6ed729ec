use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Failed to spawn shell: {0}")]
    Spawn(String),

    #[error("Shell not found: {0}")]
    ShellNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, ProbeError>;
