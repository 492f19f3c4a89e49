//! Remote session abstraction used by the sync engine and the deploy pipeline.
//!
//! A session owns one command channel and one file-transfer channel against a single host.
//! Two implementations ship with the crate:
//!
//! - [`ssh::SshSession`]: `ssh2` session with an SFTP subsystem
//! - [`dry_run::DryRunSession`]: performs no I/O and logs what would happen
//!
//! Sessions are not reentrant: one command or transfer is in flight at a time, which is why
//! every method takes `&mut self`.
//!
//! # Example
//!
//! ```rust,ignore
//! use rpi_deploy::remote::{RemoteSession, ssh::SshSession};
//!
//! let mut session = SshSession::connect(&config.session)?;
//! session.ensure_directory("dash/engine")?;
//! session.upload_file(Path::new("CMakeLists.txt"), "dash/engine/CMakeLists.txt")?;
//! session.must_run("cd dash/engine && ls")?;
//! ```

pub mod dry_run;
pub mod ssh;

use std::path::Path;

use crate::error::{DeployError, Result};

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Quote a single argument for a POSIX shell.
pub fn quote(arg: &str) -> String {
    shell_words::quote(arg).into_owned()
}

/// Parent directory of a POSIX remote path, if it has one.
pub fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    let parent = &trimmed[..idx];
    if parent.is_empty() { Some("/") } else { Some(parent) }
}

/// Join a relative POSIX path onto a remote root.
pub fn remote_join(root: &str, rel: &str) -> String {
    let rel = rel.trim_start_matches('/');
    if root.is_empty() {
        rel.to_string()
    } else if rel.is_empty() {
        root.to_string()
    } else {
        format!("{}/{}", root.trim_end_matches('/'), rel)
    }
}

/// Operations the deployment needs from a remote host.
pub trait RemoteSession {
    /// Run `command` in an interactive login shell. The exit code is returned, not judged.
    fn run_command(&mut self, command: &str) -> Result<CommandOutput>;

    /// Copy a local file to `remote`. The parent directory must already exist.
    fn write_file(&mut self, local: &Path, remote: &str) -> Result<()>;

    /// Read a remote file; `Ok(None)` when it does not exist.
    fn read_file(&mut self, remote: &str) -> Result<Option<String>>;

    /// Whether mutating operations are only logged.
    fn is_dry_run(&self) -> bool {
        false
    }

    /// Run `command` and fail with [`DeployError::RemoteCommand`] on a non-zero exit.
    ///
    /// Captured output is echoed so the operator sees the remote log either way.
    fn must_run(&mut self, command: &str) -> Result<CommandOutput> {
        let output = self.run_command(command)?;
        if !output.stdout.trim().is_empty() {
            print!("{}", output.stdout);
        }
        if !output.stderr.trim().is_empty() {
            eprint!("{}", output.stderr);
        }

        if !output.success() {
            return Err(DeployError::RemoteCommand {
                command: command.to_string(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// `mkdir -p`; idempotent.
    fn ensure_directory(&mut self, remote: &str) -> Result<()> {
        self.must_run(&format!("mkdir -p {}", quote(remote)))
            .map(drop)
    }

    /// Create the parent directory, then transfer the file bytes.
    fn upload_file(&mut self, local: &Path, remote: &str) -> Result<()> {
        if !local.is_file() {
            return Err(DeployError::transfer(local, "local file does not exist"));
        }
        let remote = remote.replace('\\', "/");
        if let Some(parent) = remote_parent(&remote) {
            self.ensure_directory(parent)?;
        }
        self.write_file(local, &remote)
    }

    /// `rm -rf`.
    fn remove_all(&mut self, remote: &str) -> Result<()> {
        self.must_run(&format!("rm -rf {}", quote(remote))).map(drop)
    }

    /// `chmod +x`.
    fn make_executable(&mut self, remote: &str) -> Result<()> {
        self.must_run(&format!("chmod +x {}", quote(remote))).map(drop)
    }

    /// Strip carriage returns at line ends in place.
    fn normalize_line_endings(&mut self, remote: &str) -> Result<()> {
        self.must_run(&format!("sed -i 's/\\r$//' {}", quote(remote)))
            .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct ScriptedSession {
        commands: Vec<String>,
        writes: Vec<String>,
        fail_with: Option<i32>,
    }

    impl RemoteSession for ScriptedSession {
        fn run_command(&mut self, command: &str) -> Result<CommandOutput> {
            self.commands.push(command.to_string());
            Ok(CommandOutput {
                exit_code: self.fail_with.unwrap_or(0),
                stdout: String::new(),
                stderr: "boom".into(),
            })
        }

        fn write_file(&mut self, _local: &Path, remote: &str) -> Result<()> {
            self.writes.push(remote.to_string());
            Ok(())
        }

        fn read_file(&mut self, _remote: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[test]
    fn test_remote_parent() {
        assert_eq!(remote_parent("dash/engine/a.txt"), Some("dash/engine"));
        assert_eq!(remote_parent("/a.txt"), Some("/"));
        assert_eq!(remote_parent("a.txt"), None);
        assert_eq!(remote_parent("dash/engine/"), Some("dash"));
    }

    #[test]
    fn test_remote_join() {
        assert_eq!(remote_join("dash/engine", "b/c.txt"), "dash/engine/b/c.txt");
        assert_eq!(remote_join("dash/engine/", "/b/c.txt"), "dash/engine/b/c.txt");
        assert_eq!(remote_join("", "a.txt"), "a.txt");
        assert_eq!(remote_join("dash", ""), "dash");
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("dash/engine"), "dash/engine");
        assert_eq!(quote("my dir"), "'my dir'");
        assert_eq!(quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_must_run_surfaces_exit_code() {
        let mut session = ScriptedSession {
            fail_with: Some(3),
            ..Default::default()
        };
        let err = session.must_run("okay br").unwrap_err();
        match err {
            DeployError::RemoteCommand {
                command,
                exit_code,
                stderr,
                ..
            } => {
                assert_eq!(command, "okay br");
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_upload_file_creates_parent_first() {
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("a.txt");
        std::fs::write(&local, b"x").unwrap();

        let mut session = ScriptedSession::default();
        session.upload_file(&local, "dash\\engine\\a.txt").unwrap();
        assert_eq!(session.commands, vec!["mkdir -p dash/engine"]);
        assert_eq!(session.writes, vec!["dash/engine/a.txt"]);
    }

    #[test]
    fn test_upload_file_missing_local_is_transfer_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut session = ScriptedSession::default();
        let err = session
            .upload_file(&tmp.path().join("missing"), "dash/missing")
            .unwrap_err();
        assert!(matches!(err, DeployError::Transfer { .. }));
        assert!(session.commands.is_empty());
    }

    #[test]
    fn test_upload_file_stops_when_mkdir_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("a.txt");
        std::fs::write(&local, b"x").unwrap();

        let mut session = ScriptedSession {
            fail_with: Some(1),
            ..Default::default()
        };
        let err = session.upload_file(&local, "dash/a.txt").unwrap_err();
        assert!(matches!(err, DeployError::RemoteCommand { .. }));
        assert!(session.writes.is_empty());
    }

    #[test]
    fn test_helper_commands_are_quoted() {
        let mut session = ScriptedSession::default();
        session.make_executable("dash/my engine/install.bash").unwrap();
        session.normalize_line_endings("dash/install.bash").unwrap();
        session.remove_all("dash").unwrap();
        assert_eq!(
            session.commands,
            vec![
                "chmod +x 'dash/my engine/install.bash'",
                "sed -i 's/\\r$//' dash/install.bash",
                "rm -rf dash",
            ]
        );
    }
}
