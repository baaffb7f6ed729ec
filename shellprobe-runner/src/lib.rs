pub mod environment;
pub mod executor;
pub mod process;

pub use environment::Environment;
pub use executor::CommandRunner;
pub use process::{ProcessConfig, ShellCommand};
