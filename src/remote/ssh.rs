//! `ssh2`-backed remote session: one exec channel per command, one SFTP subsystem for files.

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ssh2::{CheckResult, ErrorCode, KnownHostFileKind, Session, Sftp};

use super::{CommandOutput, RemoteSession, quote};
use crate::config::SessionConfig;
use crate::error::{DeployError, Result};

/// libssh2's `LIBSSH2_FX_NO_SUCH_FILE` and `LIBSSH2_FX_NO_SUCH_PATH`.
const SFTP_NO_SUCH_FILE: i32 = 2;
const SFTP_NO_SUCH_PATH: i32 = 10;

/// Private key files tried after the agent, relative to `~/.ssh`.
const DEFAULT_IDENTITIES: &[&str] = &["id_ed25519", "id_ecdsa", "id_rsa"];

/// An authenticated SSH connection. Dropping it closes SFTP and disconnects.
pub struct SshSession {
    session: Session,
    sftp: Option<Sftp>,
    host: String,
    command_timeout: u64,
    transfer_timeout: u64,
}

impl SshSession {
    /// Connect, verify the host key if requested, authenticate and open SFTP.
    pub fn connect(config: &SessionConfig) -> Result<Self> {
        let target = format!("{}@{}:{}", config.user, config.host, config.port);
        tracing::info!(target = %target, "connecting");

        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| DeployError::Connection(format!("cannot resolve {}: {e}", config.host)))?
            .next()
            .ok_or_else(|| {
                DeployError::Connection(format!("no address found for {}", config.host))
            })?;

        let tcp = match config.connect_timeout_secs {
            0 => TcpStream::connect(addr),
            secs => TcpStream::connect_timeout(&addr, Duration::from_secs(secs)),
        }
        .map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut => DeployError::Timeout {
                operation: format!("connecting to {target}"),
                seconds: config.connect_timeout_secs,
            },
            _ => DeployError::Connection(format!("{target}: {e}")),
        })?;

        let mut session =
            Session::new().map_err(|e| DeployError::Connection(format!("ssh init: {e}")))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout_ms(config.connect_timeout_secs));
        session
            .handshake()
            .map_err(|e| DeployError::Connection(format!("handshake with {target}: {e}")))?;

        if !config.accept_unknown_host_keys {
            verify_host_key(&session, &config.host, config.port)?;
        }
        authenticate(&session, config)?;

        let sftp = session
            .sftp()
            .map_err(|e| DeployError::Connection(format!("opening sftp on {target}: {e}")))?;

        tracing::info!(target = %target, "connected");
        Ok(Self {
            session,
            sftp: Some(sftp),
            host: config.host.clone(),
            command_timeout: config.command_timeout_secs,
            transfer_timeout: config.transfer_timeout_secs,
        })
    }

    fn sftp(&self) -> Result<&Sftp> {
        self.sftp
            .as_ref()
            .ok_or_else(|| DeployError::Connection("sftp channel is closed".into()))
    }

    /// Close the SFTP channel and disconnect. Also done on drop.
    pub fn close(&mut self) {
        if self.sftp.take().is_some() {
            if let Err(e) = self.session.disconnect(None, "deployment finished", None) {
                tracing::debug!(host = %self.host, error = %e, "disconnect failed");
            }
            tracing::debug!(host = %self.host, "disconnected");
        }
    }

    fn exec(&mut self, full: &str) -> io::Result<CommandOutput> {
        let mut channel = self.session.channel_session()?;
        channel.request_pty("xterm", None, None)?;
        channel.exec(full)?;

        let mut stdout = Vec::new();
        channel.read_to_end(&mut stdout)?;
        let mut stderr = Vec::new();
        channel.stderr().read_to_end(&mut stderr)?;

        channel.wait_close()?;
        Ok(CommandOutput {
            exit_code: channel.exit_status()?,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl RemoteSession for SshSession {
    fn run_command(&mut self, command: &str) -> Result<CommandOutput> {
        let full = format!("bash -lic {}", quote(command));
        tracing::info!(host = %self.host, command = %full, "remote exec");

        let seconds = self.command_timeout;
        self.session.set_timeout(timeout_ms(seconds));
        let output = self.exec(&full).map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut => DeployError::Timeout {
                operation: format!("remote command `{command}`"),
                seconds,
            },
            _ => DeployError::Connection(format!("running `{command}`: {e}")),
        })?;

        tracing::debug!(command = %command, exit_code = output.exit_code, "remote exec finished");
        Ok(output)
    }

    fn write_file(&mut self, local: &Path, remote: &str) -> Result<()> {
        self.session.set_timeout(timeout_ms(self.transfer_timeout));
        let seconds = self.transfer_timeout;
        let map_io = |e: io::Error| match e.kind() {
            io::ErrorKind::TimedOut => DeployError::Timeout {
                operation: format!("upload of {}", local.display()),
                seconds,
            },
            _ => DeployError::transfer(local, e),
        };

        let mut src = File::open(local).map_err(|e| DeployError::transfer(local, e))?;
        let mut dst = self
            .sftp()?
            .create(Path::new(remote))
            .map_err(|e| map_io(e.into()))?;
        let bytes = copy_and_close(&mut src, &mut dst).map_err(map_io)?;

        tracing::debug!(local = %local.display(), remote = %remote, bytes, "uploaded");
        Ok(())
    }

    fn read_file(&mut self, remote: &str) -> Result<Option<String>> {
        self.session.set_timeout(timeout_ms(self.transfer_timeout));
        let mut file = match self.sftp()?.open(Path::new(remote)) {
            Ok(file) => file,
            Err(e) if is_not_found(&e) => {
                tracing::debug!(remote = %remote, "remote file absent");
                return Ok(None);
            }
            Err(e) => return Err(DeployError::transfer(PathBuf::from(remote), e)),
        };

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| DeployError::transfer(PathBuf::from(remote), e))?;
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }
}

/// Remote file handle whose close reports errors of its own (quota, disk full).
trait RemoteFile: Write {
    fn finish(&mut self) -> io::Result<()>;
}

impl RemoteFile for ssh2::File {
    fn finish(&mut self) -> io::Result<()> {
        self.close().map_err(io::Error::from)
    }
}

/// Copy `src` into `dst` and close it. The upload is only confirmed once the close succeeds.
fn copy_and_close(src: &mut impl Read, dst: &mut impl RemoteFile) -> io::Result<u64> {
    let bytes = io::copy(src, dst)?;
    dst.flush()?;
    dst.finish()?;
    Ok(bytes)
}

fn verify_host_key(session: &Session, host: &str, port: u16) -> Result<()> {
    let (key, _) = session
        .host_key()
        .ok_or_else(|| DeployError::Connection(format!("{host} sent no host key")))?;

    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| DeployError::Connection(format!("known_hosts init: {e}")))?;
    if let Some(path) = dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
        && path.is_file()
    {
        known_hosts
            .read_file(&path, KnownHostFileKind::OpenSSH)
            .map_err(|e| DeployError::Connection(format!("reading {}: {e}", path.display())))?;
    }

    match known_hosts.check_port(host, port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound => Err(DeployError::Connection(format!(
            "host key for {host} is not in known_hosts"
        ))),
        CheckResult::Mismatch => Err(DeployError::Connection(format!(
            "host key for {host} does not match known_hosts"
        ))),
        CheckResult::Failure => Err(DeployError::Connection(format!(
            "could not check host key for {host}"
        ))),
    }
}

/// Agent first, then default identity files, then the password if one is configured.
fn authenticate(session: &Session, config: &SessionConfig) -> Result<()> {
    let user = config.user.as_str();

    if let Err(e) = session.userauth_agent(user) {
        tracing::debug!(user = %user, error = %e, "agent authentication failed");
    }

    if !session.authenticated()
        && let Some(ssh_dir) = dirs::home_dir().map(|home| home.join(".ssh"))
    {
        for name in DEFAULT_IDENTITIES {
            let key = ssh_dir.join(name);
            if !key.is_file() {
                continue;
            }
            match session.userauth_pubkey_file(user, None, &key, None) {
                Ok(()) => break,
                Err(e) => {
                    tracing::debug!(key = %key.display(), error = %e, "key authentication failed")
                }
            }
        }
    }

    if !session.authenticated()
        && let Some(password) = config.password.as_deref()
    {
        session
            .userauth_password(user, password)
            .map_err(|e| DeployError::Connection(format!("password authentication: {e}")))?;
    }

    if session.authenticated() {
        Ok(())
    } else {
        Err(DeployError::Connection(format!(
            "authentication failed for {user}@{}",
            config.host
        )))
    }
}

fn timeout_ms(secs: u64) -> u32 {
    u32::try_from(secs.saturating_mul(1000)).unwrap_or(u32::MAX)
}

fn is_not_found(e: &ssh2::Error) -> bool {
    matches!(
        e.code(),
        ErrorCode::SFTP(SFTP_NO_SUCH_FILE) | ErrorCode::SFTP(SFTP_NO_SUCH_PATH)
    )
}
