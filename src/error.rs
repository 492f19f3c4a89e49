//! Error kinds surfaced by a deployment run.
//!
//! Component-level problems (a malformed checksum line, an unparsable glob) are logged and
//! skipped where they occur. Everything in [`DeployError`] is fatal to the run: the first one
//! aborts the remaining sequence and is reported with its captured output.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a deployment.
#[derive(Error, Debug)]
pub enum DeployError {
    /// Missing local directories, missing ignore-file, unreadable config.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A remote command exited non-zero.
    #[error("remote command failed ({exit_code}): {command}{}", format_output(.stdout, .stderr))]
    RemoteCommand {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// A file could not be read locally or written remotely.
    #[error("transfer failed for {}: {reason}", .path.display())]
    Transfer { path: PathBuf, reason: String },

    /// The SSH session could not be established.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A remote command or transfer exceeded its deadline.
    #[error("{operation} timed out after {seconds} seconds")]
    Timeout { operation: String, seconds: u64 },
}

impl DeployError {
    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Configuration(_) => 2,
            Self::Connection(_) => 3,
            Self::RemoteCommand { .. } => 4,
            Self::Transfer { .. } => 5,
            Self::Timeout { .. } => 6,
        }
    }

    /// Short machine-friendly kind name, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Connection(_) => "connection",
            Self::RemoteCommand { .. } => "remote-command",
            Self::Transfer { .. } => "transfer",
            Self::Timeout { .. } => "timeout",
        }
    }

    pub(crate) fn transfer(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Transfer {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

fn format_output(stdout: &str, stderr: &str) -> String {
    let mut out = String::new();
    if !stdout.trim().is_empty() {
        out.push_str("\n--- stdout ---\n");
        out.push_str(stdout.trim_end());
    }
    if !stderr.trim().is_empty() {
        out.push_str("\n--- stderr ---\n");
        out.push_str(stderr.trim_end());
    }
    out
}

pub type Result<T, E = DeployError> = std::result::Result<T, E>;
