use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything captured from one shell command run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunOutput {
    pub id: Uuid,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed, either by the timeout or a signal
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Output went past the capture limit; the streams hold only its prefix
    #[serde(default)]
    pub truncated: bool,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunOutput {
    /// Trimmed stdout immediately followed by trimmed stderr, no separator.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        let mut out = String::with_capacity(stdout.len() + stderr.len());
        out.push_str(stdout);
        out.push_str(stderr);
        out
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}
