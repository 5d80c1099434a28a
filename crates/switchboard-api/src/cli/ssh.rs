// SSH CLI session built on the system OpenSSH client.
//
// `connect()` starts a background control master (`ssh -M -f -N`) bound to a
// private control socket. Every `execute()` runs a short-lived client over
// that socket with the command batch on stdin, so authentication happens
// exactly once per pooled session.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use super::CliSession;
use crate::error::Error;

const SSH_CMD: &str = "ssh";

/// Exit status OpenSSH reserves for its own (transport-level) failures.
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Where and how to reach a switch's CLI.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Private key used for authentication. When unset the user's SSH
    /// agent and default identities apply.
    pub key_file: Option<PathBuf>,
    pub connect_timeout: Duration,
    /// Longest one command batch may run, from spawn to exit.
    pub command_timeout: Duration,
    /// Directory for control sockets. Defaults to the system temp dir.
    pub socket_dir: Option<PathBuf>,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            key_file: None,
            connect_timeout: Duration::from_secs(15),
            command_timeout: Duration::from_secs(60),
            socket_dir: None,
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }

    fn base_args(&self, control_path: &Path) -> Vec<String> {
        let mut args = vec![
            "-o".to_owned(),
            "BatchMode=yes".to_owned(),
            "-o".to_owned(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_owned(),
            format!("ControlPath={}", control_path.display()),
            "-p".to_owned(),
            self.port.to_string(),
        ];
        if let Some(ref key) = self.key_file {
            args.push("-i".to_owned());
            args.push(key.display().to_string());
        }
        args
    }

    /// Open a new control master and return the session bound to it.
    pub async fn connect(&self) -> Result<SshSession, Error> {
        let dir = self.socket_dir.clone().unwrap_or_else(std::env::temp_dir);
        let control_path = dir.join(format!("switchboard-{}.sock", uuid::Uuid::new_v4().simple()));

        debug!(host = %self.host, port = self.port, "opening SSH control master");

        let output = Command::new(SSH_CMD)
            .args(self.base_args(&control_path))
            .args(["-M", "-N", "-f", "-o", "ControlPersist=yes"])
            .arg(self.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(if stderr.contains("Permission denied") {
                Error::Authentication { message: stderr }
            } else {
                Error::Session {
                    host: self.host.clone(),
                    message: stderr,
                }
            });
        }

        Ok(SshSession {
            target: self.clone(),
            control_path,
            open: true,
        })
    }
}

/// One multiplexed SSH connection to a switch CLI.
#[derive(Debug)]
pub struct SshSession {
    target: SshTarget,
    control_path: PathBuf,
    open: bool,
}

impl SshSession {
    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    fn exit_command(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(SSH_CMD);
        cmd.args(self.target.base_args(&self.control_path))
            .args(["-O", "exit"])
            .arg(self.target.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }
}

#[async_trait]
impl CliSession for SshSession {
    async fn execute(&mut self, commands: &[String]) -> Result<String, Error> {
        if !self.open {
            return Err(Error::Session {
                host: self.target.host.clone(),
                message: "session already closed".into(),
            });
        }

        let mut batch = commands.join("\n");
        batch.push('\n');
        trace!(host = %self.target.host, batch = %batch, "sending command batch");

        let mut child = Command::new(SSH_CMD)
            .args(self.target.base_args(&self.control_path))
            .args(["-o", "ControlMaster=no", "-T"])
            .arg(self.target.destination())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // On expiry the child is dropped, which kills it. The session stays
        // open so the pool discards it and `Drop` stops the master.
        let output = within(self.target.command_timeout, async {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(batch.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, Error>(child.wait_with_output().await?)
        })
        .await
        .inspect_err(|e| {
            if matches!(e, Error::Timeout { .. }) {
                warn!(host = %self.target.host, error = %e, "command batch timed out");
            }
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = if stderr.trim().is_empty() {
            stdout.into_owned()
        } else {
            format!("{stdout}\n{stderr}")
        };

        match output.status.code() {
            Some(0) => Ok(combined),
            Some(SSH_TRANSPORT_FAILURE) | None => {
                self.open = false;
                Err(Error::Session {
                    host: self.target.host.clone(),
                    message: stderr.trim().to_owned(),
                })
            }
            Some(exit_code) => Err(Error::CommandFailed {
                host: self.target.host.clone(),
                exit_code,
                output: combined,
            }),
        }
    }

    async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        let status = Command::from(self.exit_command()).status().await;
        if let Err(e) = status {
            warn!(host = %self.target.host, error = %e, "failed to stop SSH control master");
        }
    }
}

/// `fut`, or [`Error::Timeout`] once `limit` passes.
async fn within<T>(limit: Duration, fut: impl Future<Output = Result<T, Error>>) -> Result<T, Error> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout {
            timeout_secs: limit.as_secs(),
        })?
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if self.open {
            // Best effort: the master would otherwise persist until the
            // device idles it out.
            let _ = self.exit_command().spawn();
        }
    }
}
