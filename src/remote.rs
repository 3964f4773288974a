//! Remote command execution on deployed nodes
//!
//! Checks that cannot be answered by the compute API or IPA (certmonger
//! state, IPA client configuration) run commands on the node over SSH.
//! Each check opens its own session and closes it before returning.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::config::SshConfig;
use crate::{Error, Result};

/// Output of one remote command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// An open command channel to one host
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a shell command and capture its output
    async fn run(&self, command: &str) -> Result<CommandOutput>;

    /// Tear down the channel
    async fn close(&self) -> Result<()>;
}

/// Opens sessions to hosts
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Connect to `address` as `account`
    async fn open(&self, address: &str, account: &str) -> Result<Box<dyn RemoteSession>>;
}

/// Run one command in a fresh session.
///
/// The session is closed whether the command succeeded, failed or errored.
pub async fn execute(
    executor: &dyn RemoteExecutor,
    address: &str,
    account: &str,
    command: &str,
) -> Result<CommandOutput> {
    let session = executor.open(address, account).await?;
    let result = session.run(command).await;
    if let Err(e) = session.close().await {
        warn!(address = %address, error = %e, "Failed to close remote session");
    }
    result
}

/// OpenSSH-backed executor using a ControlMaster socket per session
pub struct SshExecutor {
    config: SshConfig,
    sessions: AtomicU64,
}

impl SshExecutor {
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            sessions: AtomicU64::new(0),
        }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
            "-o".to_string(),
            format!(
                "StrictHostKeyChecking={}",
                if self.config.strict_host_key_checking {
                    "yes"
                } else {
                    "no"
                }
            ),
        ];
        if !self.config.strict_host_key_checking {
            args.push("-o".to_string());
            args.push("UserKnownHostsFile=/dev/null".to_string());
        }
        if let Some(ref identity) = self.config.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args
    }

    fn control_path(&self) -> PathBuf {
        let n = self.sessions.fetch_add(1, Ordering::Relaxed);
        self.config
            .control_dir
            .join(format!("novajoin-verify-{}-{}.sock", std::process::id(), n))
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn open(&self, address: &str, account: &str) -> Result<Box<dyn RemoteSession>> {
        let target = format!("{}@{}", account, address);
        let control_path = self.control_path();

        let mut cmd = Command::new("ssh");
        cmd.args(self.base_args())
            .arg("-M")
            .arg("-S")
            .arg(&control_path)
            .args(["-f", "-N"])
            .arg(&target);

        // the forked master keeps inherited pipes open, so only wait for the exit status
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let timeout = Duration::from_secs(self.config.connect_timeout_secs + 5);
        let status = tokio::time::timeout(timeout, cmd.status())
            .await
            .map_err(|_| Error::connectivity(format!("ssh to {} timed out after {:?}", target, timeout)))?
            .map_err(|e| Error::connectivity(format!("ssh to {}: failed to execute: {}", target, e)))?;
        if !status.success() {
            return Err(Error::connectivity(format!(
                "ssh to {} failed: {}",
                target, status
            )));
        }

        info!(target = %target, "Opened SSH session");
        Ok(Box::new(SshSession {
            target,
            control_path,
            base_args: self.base_args(),
            command_timeout: self.config.command_timeout(),
        }))
    }
}

struct SshSession {
    target: String,
    control_path: PathBuf,
    base_args: Vec<String>,
    command_timeout: Duration,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let mut cmd = Command::new("ssh");
        cmd.args(&self.base_args)
            .arg("-S")
            .arg(&self.control_path)
            .arg(&self.target)
            .arg("--")
            .arg(command);
        run_command(
            &mut cmd,
            self.command_timeout,
            &format!("{} on {}", command, self.target),
        )
        .await
    }

    async fn close(&self) -> Result<()> {
        let mut cmd = Command::new("ssh");
        cmd.arg("-S")
            .arg(&self.control_path)
            .args(["-O", "exit"])
            .arg(&self.target);
        let output = run_command(
            &mut cmd,
            Duration::from_secs(10),
            &format!("ssh close {}", self.target),
        )
        .await?;
        if !output.success() {
            return Err(Error::connectivity(format!(
                "closing ssh session to {} failed: {}",
                self.target,
                output.stderr.trim()
            )));
        }
        debug!(target = %self.target, "Closed SSH session");
        Ok(())
    }
}

async fn run_command(cmd: &mut Command, timeout: Duration, description: &str) -> Result<CommandOutput> {
    debug!("{}", description);
    cmd.kill_on_drop(true);
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| Error::connectivity(format!("{} timed out after {:?}", description, timeout)))?
        .map_err(|e| Error::connectivity(format!("{}: failed to execute: {}", description, e)))?;

    Ok(CommandOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(status: i32, stdout: &str) -> CommandOutput {
        CommandOutput {
            status: Some(status),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    #[tokio::test]
    async fn execute_closes_session_after_success() {
        let mut executor = MockRemoteExecutor::new();
        executor
            .expect_open()
            .withf(|address, account| address == "192.168.24.17" && account == "heat-admin")
            .times(1)
            .returning(|_, _| {
                let mut session = MockRemoteSession::new();
                session
                    .expect_run()
                    .times(1)
                    .returning(|_| Ok(output(0, "ok\n")));
                session.expect_close().times(1).returning(|| Ok(()));
                Ok(Box::new(session) as Box<dyn RemoteSession>)
            });

        let out = execute(&executor, "192.168.24.17", "heat-admin", "true")
            .await
            .unwrap();
        assert!(out.success());
    }

    #[tokio::test]
    async fn execute_closes_session_when_command_errors() {
        let mut executor = MockRemoteExecutor::new();
        executor.expect_open().returning(|_, _| {
            let mut session = MockRemoteSession::new();
            session
                .expect_run()
                .returning(|_| Err(Error::connectivity("broken pipe")));
            session.expect_close().times(1).returning(|| Ok(()));
            Ok(Box::new(session) as Box<dyn RemoteSession>)
        });

        let err = execute(&executor, "192.168.24.17", "heat-admin", "true")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connectivity(_)));
    }

    #[tokio::test]
    async fn close_failure_does_not_mask_result() {
        let mut executor = MockRemoteExecutor::new();
        executor.expect_open().returning(|_, _| {
            let mut session = MockRemoteSession::new();
            session.expect_run().returning(|_| Ok(output(1, "")));
            session
                .expect_close()
                .times(1)
                .returning(|| Err(Error::connectivity("control socket gone")));
            Ok(Box::new(session) as Box<dyn RemoteSession>)
        });

        let out = execute(&executor, "10.0.0.1", "stack", "false").await.unwrap();
        assert_eq!(out.status, Some(1));
    }

    #[tokio::test]
    async fn open_failure_propagates() {
        let mut executor = MockRemoteExecutor::new();
        executor
            .expect_open()
            .returning(|_, _| Err(Error::connectivity("no route to host")));

        assert!(execute(&executor, "10.0.0.1", "stack", "true").await.is_err());
    }

    #[test]
    fn ssh_args_follow_config() {
        let executor = SshExecutor::new(SshConfig {
            identity_file: Some(PathBuf::from("/home/stack/.ssh/id_rsa")),
            strict_host_key_checking: true,
            ..Default::default()
        });
        let args = executor.base_args();
        assert!(args.contains(&"StrictHostKeyChecking=yes".to_string()));
        assert!(!args.contains(&"UserKnownHostsFile=/dev/null".to_string()));
        assert!(args.ends_with(&["-i".to_string(), "/home/stack/.ssh/id_rsa".to_string()]));
    }

    #[test]
    fn control_paths_are_unique() {
        let executor = SshExecutor::new(SshConfig::default());
        assert_ne!(executor.control_path(), executor.control_path());
    }
}
