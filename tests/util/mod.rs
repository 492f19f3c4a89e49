#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use rpi_deploy::error::{DeployError, Result};
use rpi_deploy::remote::{CommandOutput, RemoteSession};

/// Session whose "remote" is a local directory. Commands run through `bash -c` with the
/// mirror as working directory, so remote-relative paths resolve inside it.
pub struct LocalMirrorSession {
    root: PathBuf,
    pub commands: Vec<String>,
    pub writes: Vec<String>,
}

impl LocalMirrorSession {
    pub fn new(root: &Path) -> Self {
        fs::create_dir_all(root).unwrap();
        Self {
            root: root.to_path_buf(),
            commands: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub fn path(&self, remote: &str) -> PathBuf {
        self.root.join(remote)
    }

    /// Writes excluding the checksum table.
    pub fn file_writes(&self) -> Vec<&str> {
        self.writes
            .iter()
            .map(String::as_str)
            .filter(|w| !w.ends_with(".checksums.csv"))
            .collect()
    }
}

impl RemoteSession for LocalMirrorSession {
    fn run_command(&mut self, command: &str) -> Result<CommandOutput> {
        self.commands.push(command.to_string());
        let output = Command::new("bash")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .output()
            .map_err(|e| DeployError::Connection(format!("spawning bash: {e}")))?;
        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn write_file(&mut self, local: &Path, remote: &str) -> Result<()> {
        fs::copy(local, self.root.join(remote)).map_err(|e| DeployError::Transfer {
            path: local.to_path_buf(),
            reason: e.to_string(),
        })?;
        self.writes.push(remote.to_string());
        Ok(())
    }

    fn read_file(&mut self, remote: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.root.join(remote)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DeployError::Transfer {
                path: PathBuf::from(remote),
                reason: e.to_string(),
            }),
        }
    }
}

/// Write `content` to `root/rel`, creating parents.
pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}
