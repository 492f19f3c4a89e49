//! Session that never touches the network and only logs what it would do.

use std::path::Path;

use super::{CommandOutput, RemoteSession};
use crate::error::Result;

/// Log-only stand-in for a real session. Commands "succeed" with empty output and every
/// remote file reads as absent.
#[derive(Debug, Default)]
pub struct DryRunSession {
    commands: Vec<String>,
    uploads: Vec<String>,
}

impl DryRunSession {
    pub fn new() -> Self {
        tracing::info!("[dry-run] skipping SSH connection");
        Self::default()
    }

    /// Commands that would have been run, in order.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Remote paths that would have been written, in order.
    pub fn uploads(&self) -> &[String] {
        &self.uploads
    }
}

impl RemoteSession for DryRunSession {
    fn run_command(&mut self, command: &str) -> Result<CommandOutput> {
        tracing::info!(command = %command, "[dry-run] remote command");
        self.commands.push(command.to_string());
        Ok(CommandOutput::default())
    }

    fn write_file(&mut self, local: &Path, remote: &str) -> Result<()> {
        tracing::info!(local = %local.display(), remote = %remote, "[dry-run] upload");
        self.uploads.push(remote.to_string());
        Ok(())
    }

    fn read_file(&mut self, remote: &str) -> Result<Option<String>> {
        tracing::info!(remote = %remote, "[dry-run] read remote file");
        Ok(None)
    }

    fn is_dry_run(&self) -> bool {
        true
    }

    fn upload_file(&mut self, local: &Path, remote: &str) -> Result<()> {
        self.write_file(local, &remote.replace('\\', "/"))
    }
}
