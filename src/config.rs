//! Deployment configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then CLI flags.
//! The file is read from `--config <path>` or `~/.config/rpi-deploy/config.toml`:
//!
//! ```toml
//! [session]
//! host = "nfr.local"
//! user = "nfr"
//! port = 22
//! command_timeout_secs = 1800
//!
//! [layout]
//! deploy_dir = "dash"
//! app = "dash"
//! build_command = "okay br"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};
use crate::ignore::DEFAULT_IGNORE_FILE;

/// How the checksum table takes part in a sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumMode {
    /// Skip unchanged files, record and persist digests.
    #[default]
    Incremental,
    /// Upload everything but still record and persist digests.
    Record,
    /// No checksum table at all.
    Off,
}

impl ChecksumMode {
    pub fn filters(self) -> bool {
        self == Self::Incremental
    }

    pub fn records(self) -> bool {
        self != Self::Off
    }
}

impl std::fmt::Display for ChecksumMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incremental => write!(f, "incremental"),
            Self::Record => write!(f, "record"),
            Self::Off => write!(f, "off"),
        }
    }
}

/// Connection parameters for one target host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub host: String,
    pub user: String,
    pub password: Option<String>,
    pub port: u16,
    /// Accept host keys not present in `~/.ssh/known_hosts`.
    pub accept_unknown_host_keys: bool,
    pub connect_timeout_secs: u64,
    /// Deadline for a single remote command (0 = none).
    pub command_timeout_secs: u64,
    /// Deadline for a single file transfer (0 = none).
    pub transfer_timeout_secs: u64,
    /// Log mutating actions instead of performing them; no connection is opened.
    #[serde(skip)]
    pub dry_run: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "nfr.local".into(),
            user: "nfr".into(),
            password: None,
            port: 22,
            accept_unknown_host_keys: true,
            connect_timeout_secs: 15,
            command_timeout_secs: 1800,
            transfer_timeout_secs: 300,
            dry_run: false,
        }
    }
}

impl SessionConfig {
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Remote directory layout and the commands run inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Root deployment directory on the remote, relative to the login directory.
    pub deploy_dir: String,
    /// Application name; selects `<applications>/<app>` locally and remotely.
    pub app: String,
    /// Install script path relative to the remote engine directory.
    pub install_script: String,
    /// Command run inside the remote application directory after upload.
    pub build_command: String,
    /// Remote checksum table path; defaults to `<deploy_dir>/.checksums.csv`.
    pub checksum_table: Option<String>,
    /// Ignore-file name, looked up in the local applications directory.
    pub ignore_file: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            deploy_dir: "dash".into(),
            app: "dash".into(),
            install_script: "okay/scripts/install.bash".into(),
            build_command: "okay br".into(),
            checksum_table: None,
            ignore_file: DEFAULT_IGNORE_FILE.into(),
        }
    }
}

impl LayoutConfig {
    pub fn remote_engine(&self) -> String {
        format!("{}/engine", self.deploy_dir)
    }

    pub fn remote_applications(&self) -> String {
        format!("{}/applications", self.deploy_dir)
    }

    pub fn remote_app(&self) -> String {
        format!("{}/{}", self.remote_applications(), self.app)
    }

    pub fn remote_install_script(&self) -> String {
        crate::remote::remote_join(&self.remote_engine(), &self.install_script)
    }

    pub fn remote_checksum_table(&self) -> String {
        self.checksum_table
            .clone()
            .unwrap_or_else(|| format!("{}/.checksums.csv", self.deploy_dir))
    }
}

/// Contents of the TOML config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub session: SessionConfig,
    pub layout: LayoutConfig,
    /// Local engine root, if not given on the command line.
    pub engine: Option<PathBuf>,
    /// Local applications directory, if not given on the command line.
    pub applications: Option<PathBuf>,
    pub checksum_mode: ChecksumMode,
}

impl FileConfig {
    /// Load the config file. An explicit path must exist; the default location may not.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.is_file() {
                    return Err(DeployError::Configuration(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                path.to_path_buf()
            }
            None => match Self::default_path() {
                Some(path) if path.is_file() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = fs::read_to_string(&path).map_err(|e| {
            DeployError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::parse(&content).map_err(|e| {
            DeployError::Configuration(format!("invalid config {}: {e}", path.display()))
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("rpi-deploy").join("config.toml"))
    }
}

/// Fully resolved settings for one deployment run.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub session: SessionConfig,
    pub layout: LayoutConfig,
    /// Local engine source root.
    pub engine: PathBuf,
    /// Local directory holding the application directories and the ignore-file.
    pub applications: PathBuf,
    pub checksum_mode: ChecksumMode,
    /// Remove the remote deployment directory before uploading.
    pub clear: bool,
}

impl DeployConfig {
    pub fn local_app(&self) -> PathBuf {
        self.applications.join(&self.layout.app)
    }

    pub fn ignore_file(&self) -> PathBuf {
        self.applications.join(&self.layout.ignore_file)
    }

    /// Check everything that can be checked before connecting.
    pub fn validate(&self) -> Result<()> {
        if self.session.host.trim().is_empty() {
            return Err(DeployError::Configuration("host must not be empty".into()));
        }
        if self.session.user.trim().is_empty() {
            return Err(DeployError::Configuration("user must not be empty".into()));
        }
        if self.session.port == 0 {
            return Err(DeployError::Configuration("port must be non-zero".into()));
        }
        if self.layout.deploy_dir.trim_matches('/').is_empty() {
            return Err(DeployError::Configuration(
                "deploy directory must not be empty or the filesystem root".into(),
            ));
        }
        if !self.engine.is_dir() {
            return Err(DeployError::Configuration(format!(
                "engine directory does not exist: {}",
                self.engine.display()
            )));
        }
        let local_app = self.local_app();
        if !local_app.is_dir() {
            return Err(DeployError::Configuration(format!(
                "application directory does not exist: {}",
                local_app.display()
            )));
        }
        let ignore_file = self.ignore_file();
        if !ignore_file.is_file() {
            return Err(DeployError::Configuration(format!(
                "{} file not found at {}",
                self.layout.ignore_file,
                ignore_file.display()
            )));
        }
        Ok(())
    }
}
