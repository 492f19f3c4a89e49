//! End-to-end deployment: engine tree, install script, application tree, build.
//!
//! Remote layout:
//!
//! ```text
//! <deploy_dir>/
//! ├── .checksums.csv              checksum table shared by both passes
//! ├── engine/                     local engine root
//! │   └── okay/scripts/install.bash
//! └── applications/<app>/         local <applications>/<app>
//! ```
//!
//! The install script runs, and must succeed, before any application file is uploaded,
//! since it may change how the application tree is interpreted.

use std::time::Instant;

use colored::Colorize;

use crate::checksum::ChecksumStore;
use crate::config::{DeployConfig, SessionConfig};
use crate::error::Result;
use crate::ignore::IgnoreMatcher;
use crate::remote::dry_run::DryRunSession;
use crate::remote::ssh::SshSession;
use crate::remote::{RemoteSession, quote};
use crate::sync::{SyncEngine, SyncReport, load_checksums};

/// Open the session described by `config`: a log-only one in dry-run mode, SSH otherwise.
pub fn open_session(config: &SessionConfig) -> Result<Box<dyn RemoteSession>> {
    if config.dry_run {
        Ok(Box::new(DryRunSession::new()))
    } else {
        Ok(Box::new(SshSession::connect(config)?))
    }
}

/// Print an operator-facing step banner.
pub fn step(message: &str) {
    println!("{} {}", "==>".blue().bold(), message.bold());
}

/// Outcome of a full deployment.
#[derive(Debug, Clone, Default)]
pub struct DeployReport {
    pub engine: SyncReport,
    pub application: SyncReport,
    pub duration_ms: u64,
}

impl DeployReport {
    pub fn files_uploaded(&self) -> usize {
        self.engine.files_uploaded() + self.application.files_uploaded()
    }
}

/// A validated deployment, ready to run against a session.
pub struct Deployment<'a> {
    config: &'a DeployConfig,
    matcher: IgnoreMatcher,
    show_progress: bool,
}

impl<'a> Deployment<'a> {
    /// Validate local paths and read the ignore-file.
    pub fn new(config: &'a DeployConfig) -> Result<Self> {
        config.validate()?;
        let matcher = IgnoreMatcher::from_file(&config.ignore_file())?;
        Ok(Self {
            config,
            matcher,
            show_progress: false,
        })
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Describe what is about to happen.
    pub fn print_plan(&self) {
        let layout = &self.config.layout;
        println!("Target: {}", self.config.session.target());
        println!("Local engine: {}", self.config.engine.display());
        println!("Remote engine dir: {}", layout.remote_engine());
        println!("Local app : {}", self.config.local_app().display());
        println!("Remote app dir : {}", layout.remote_app());
        println!("Checksum mode: {}", self.config.checksum_mode);
    }

    /// Run the whole sequence. The first failure aborts everything after it.
    pub fn run(&self, session: &mut dyn RemoteSession) -> Result<DeployReport> {
        let start = Instant::now();
        let layout = &self.config.layout;
        let remote_engine = layout.remote_engine();
        let remote_app = layout.remote_app();
        let table_path = layout.remote_checksum_table();

        if self.config.clear {
            step("Clearing remote dirs...");
            session.remove_all(&layout.deploy_dir)?;
            if !is_under(&table_path, &layout.deploy_dir) {
                session.remove_all(&table_path)?;
            }
        }

        step("Ensuring remote dirs...");
        session.ensure_directory(&remote_engine)?;
        session.ensure_directory(&layout.remote_applications())?;
        session.ensure_directory(&remote_app)?;

        // A cleared remote starts from an empty table wherever the table lives.
        let mut store = if self.config.checksum_mode.records() && !self.config.clear {
            load_checksums(session, &table_path)?
        } else {
            ChecksumStore::new()
        };

        let engine = SyncEngine::new(&self.matcher, table_path)
            .with_checksum_mode(self.config.checksum_mode)
            .with_progress(self.show_progress);

        step(&format!("Uploading engine files into {remote_engine} ..."));
        let engine_report =
            engine.sync_tree(session, &self.config.engine, &remote_engine, &mut store)?;
        println!("{}", engine_report.summary());

        let install_script = layout.remote_install_script();
        step("Ensuring install script is executable ...");
        session.make_executable(&install_script)?;

        step("Ensuring install script has unix line endings ...");
        session.normalize_line_endings(&install_script)?;

        step("Running install script ...");
        session.must_run(&install_script)?;

        step(&format!("Uploading app payload into {remote_app} ..."));
        let app_report =
            engine.sync_tree(session, &self.config.local_app(), &remote_app, &mut store)?;
        println!("{}", app_report.summary());

        step(&format!("Running {} ...", layout.build_command));
        session.must_run(&format!("cd {} && {}", quote(&remote_app), layout.build_command))?;

        let report = DeployReport {
            engine: engine_report,
            application: app_report,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        tracing::info!(
            uploaded = report.files_uploaded(),
            duration_ms = report.duration_ms,
            "deployment finished"
        );
        Ok(report)
    }
}

/// Whether remote `path` is `dir` itself or lies below it.
fn is_under(path: &str, dir: &str) -> bool {
    let dir = dir.trim_end_matches('/');
    path == dir
        || path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChecksumMode, LayoutConfig};
    use crate::error::DeployError;
    use std::fs;
    use std::path::Path;

    fn fixture(root: &Path) -> DeployConfig {
        let engine = root.join("engine");
        let applications = root.join("applications");
        fs::create_dir_all(engine.join("okay/scripts")).unwrap();
        fs::write(engine.join("okay/scripts/install.bash"), "#!/bin/bash\r\necho hi\r\n").unwrap();
        fs::create_dir_all(applications.join("dash/src")).unwrap();
        fs::write(applications.join("dash/src/main.cpp"), "int main() {}").unwrap();
        fs::write(applications.join(".rpiignore"), ".git/\n").unwrap();

        DeployConfig {
            session: SessionConfig {
                dry_run: true,
                ..SessionConfig::default()
            },
            layout: LayoutConfig::default(),
            engine,
            applications,
            checksum_mode: ChecksumMode::Incremental,
            clear: false,
        }
    }

    #[test]
    fn test_new_requires_ignore_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config = fixture(tmp.path());
        fs::remove_file(config.ignore_file()).unwrap();
        let err = Deployment::new(&config).err().unwrap();
        assert!(matches!(err, DeployError::Configuration(_)));
    }

    #[test]
    fn test_dry_run_sequence() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = fixture(tmp.path());
        config.clear = true;

        let deployment = Deployment::new(&config).unwrap();
        let mut session = DryRunSession::new();
        let report = deployment.run(&mut session).unwrap();

        assert_eq!(
            report.engine.uploaded,
            vec!["dash/engine/okay/scripts/install.bash"]
        );
        assert_eq!(
            report.application.uploaded,
            vec!["dash/applications/dash/src/main.cpp"]
        );
        assert!(!report.engine.checksums_persisted);
        assert_eq!(
            session.commands(),
            [
                "rm -rf dash",
                "mkdir -p dash/engine",
                "mkdir -p dash/applications",
                "mkdir -p dash/applications/dash",
                "chmod +x dash/engine/okay/scripts/install.bash",
                "sed -i 's/\\r$//' dash/engine/okay/scripts/install.bash",
                "dash/engine/okay/scripts/install.bash",
                "cd dash/applications/dash && okay br",
            ]
        );
    }

    #[test]
    fn test_clear_removes_table_outside_deploy_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = fixture(tmp.path());
        config.clear = true;
        config.layout.checksum_table = Some("state/sums.csv".into());

        let deployment = Deployment::new(&config).unwrap();
        let mut session = DryRunSession::new();
        deployment.run(&mut session).unwrap();

        assert_eq!(
            &session.commands()[..3],
            ["rm -rf dash", "rm -rf state/sums.csv", "mkdir -p dash/engine"]
        );
    }

    #[test]
    fn test_is_under() {
        assert!(is_under("dash/.checksums.csv", "dash"));
        assert!(is_under("dash/.checksums.csv", "dash/"));
        assert!(is_under("dash", "dash"));
        assert!(!is_under("dashboard/sums.csv", "dash"));
        assert!(!is_under("state/sums.csv", "dash"));
    }

    #[test]
    fn test_open_session_dry_run_skips_network() {
        let config = SessionConfig {
            host: "unreachable.invalid".into(),
            dry_run: true,
            ..SessionConfig::default()
        };
        let session = open_session(&config).unwrap();
        assert!(session.is_dry_run());
    }
}
