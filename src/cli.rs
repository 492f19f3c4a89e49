//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{ChecksumMode, DeployConfig, FileConfig};
use crate::error::{DeployError, Result};

/// Deploy the engine and an application to the car's Raspberry Pi over SSH.
#[derive(Debug, Parser)]
#[command(name = "rpi-deploy", version, about)]
pub struct Cli {
    /// Local engine root (run `okay where` to get this).
    #[arg(long)]
    pub engine: Option<PathBuf>,

    /// Local directory holding the applications and the ignore-file [default: .]
    #[arg(long)]
    pub applications: Option<PathBuf>,

    /// TOML config file [default: ~/.config/rpi-deploy/config.toml if present]
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, env = "RPI_DEPLOY_HOST")]
    pub host: Option<String>,

    #[arg(long, env = "RPI_DEPLOY_USER")]
    pub user: Option<String>,

    #[arg(long, env = "RPI_DEPLOY_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    /// Remote deployment root directory.
    #[arg(long = "dash-dir")]
    pub dash_dir: Option<String>,

    /// Application to deploy.
    #[arg(long)]
    pub app: Option<String>,

    /// Command run inside the remote application directory after upload.
    #[arg(long)]
    pub build_command: Option<String>,

    /// Reject host keys missing from ~/.ssh/known_hosts.
    #[arg(long)]
    pub no_autoadd_hostkey: bool,

    /// Log what would be done without connecting.
    #[arg(long)]
    pub dry_run: bool,

    /// Clear remote directories before upload.
    #[arg(long)]
    pub clear: bool,

    /// How the checksum table filters uploads.
    #[arg(long, value_enum)]
    pub checksum_mode: Option<ChecksumMode>,

    /// Per-command deadline in seconds (0 = none).
    #[arg(long)]
    pub command_timeout: Option<u64>,

    /// Per-file transfer deadline in seconds (0 = none).
    #[arg(long)]
    pub transfer_timeout: Option<u64>,

    /// Hide the upload progress bar.
    #[arg(long)]
    pub no_progress: bool,

    /// Debug logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Merge flags over the config file over the defaults.
    pub fn resolve(&self, file: FileConfig) -> Result<DeployConfig> {
        let FileConfig {
            mut session,
            mut layout,
            engine,
            applications,
            checksum_mode,
        } = file;

        if let Some(host) = &self.host {
            session.host = host.clone();
        }
        if let Some(user) = &self.user {
            session.user = user.clone();
        }
        if let Some(password) = &self.password {
            session.password = Some(password.clone()).filter(|p| !p.is_empty());
        }
        if let Some(port) = self.port {
            session.port = port;
        }
        if let Some(secs) = self.command_timeout {
            session.command_timeout_secs = secs;
        }
        if let Some(secs) = self.transfer_timeout {
            session.transfer_timeout_secs = secs;
        }
        if self.no_autoadd_hostkey {
            session.accept_unknown_host_keys = false;
        }
        session.dry_run = self.dry_run;

        if let Some(dir) = &self.dash_dir {
            layout.deploy_dir = dir.clone();
        }
        if let Some(app) = &self.app {
            layout.app = app.clone();
        }
        if let Some(cmd) = &self.build_command {
            layout.build_command = cmd.clone();
        }

        let engine = self.engine.clone().or(engine).ok_or_else(|| {
            DeployError::Configuration(
                "no engine root given; pass --engine (see `okay where`)".into(),
            )
        })?;
        let applications = self
            .applications
            .clone()
            .or(applications)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(DeployConfig {
            session,
            layout,
            engine,
            applications,
            checksum_mode: self.checksum_mode.unwrap_or(checksum_mode),
            clear: self.clear,
        })
    }
}
