use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use tracing as log;

use crate::{
    config::Cloud,
    error::MigrateError,
    utils::process::{CmdSpec, Runner},
};

pub const REQ_BINS: &[&str] = &["ssh"];

/// Where a remote command runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub gateway: Option<String>,
    pub key: Option<PathBuf>,
}

impl SshTarget {
    /// The cloud's storage service host, reached through its gateway if any.
    pub fn endpoint(cloud: &Cloud) -> Self {
        Self {
            host: cloud.endpoint_host.clone(),
            user: cloud.ssh.user.clone(),
            gateway: cloud.ssh.gateway.clone(),
            key: cloud.ssh.key.clone(),
        }
    }
}

pub trait RemotePort: Send + Sync {
    /// Runs `cmd` on the target and returns its stdout. Connection problems and
    /// non-zero exits surface as `MigrateError::Transient`.
    fn exec(&self, target: &SshTarget, cmd: &str) -> Result<String>;

    /// Like `exec`, but retried on transient failure up to the attempt budget.
    fn exec_retrying(&self, target: &SshTarget, cmd: &str) -> Result<String>;

    fn exec_lines(&self, target: &SshTarget, cmd: &str) -> Result<Vec<String>> {
        Ok(split_lines(&self.exec(target, cmd)?))
    }

    /// `exec_lines` over `exec_retrying`.
    fn exec_lines_retrying(&self, target: &SshTarget, cmd: &str) -> Result<Vec<String>> {
        Ok(split_lines(&self.exec_retrying(target, cmd)?))
    }
}

fn split_lines(out: &str) -> Vec<String> {
    out.lines()
        .map(|l| l.trim_end_matches('\r').trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

type DynRunner = dyn Runner + Send + Sync;

pub struct SshCli {
    runner: Arc<DynRunner>,
    attempts: u32,
    retry_delay: Duration,
}

impl SshCli {
    pub fn new(runner: Arc<DynRunner>, attempts: u32, retry_delay: Duration) -> Self {
        Self {
            runner,
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    fn ssh(&self, target: &SshTarget, cmd: &str) -> CmdSpec {
        let mut spec = CmdSpec::new("ssh").args([
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
        ]);
        spec = spec.arg(format!("ConnectionAttempts={}", self.attempts));
        if let Some(ref key) = target.key {
            spec = spec.arg("-i").arg(key.display().to_string());
        }
        if let Some(ref gw) = target.gateway {
            let jump = if gw.contains('@') {
                gw.clone()
            } else {
                format!("{}@{}", target.user, gw)
            };
            spec = spec.arg("-J").arg(jump);
        }
        spec.arg(format!("{}@{}", target.user, target.host))
            .arg("--")
            .arg(cmd)
    }
}

impl RemotePort for SshCli {
    fn exec(&self, target: &SshTarget, cmd: &str) -> Result<String> {
        log::debug!("[remote] {}: {cmd}", target.host);
        self.runner
            .run_capture(&self.ssh(target, cmd))
            .map_err(|e| {
                MigrateError::Transient {
                    host: target.host.clone(),
                    reason: format!("{e:#}"),
                }
                .into()
            })
    }

    fn exec_retrying(&self, target: &SshTarget, cmd: &str) -> Result<String> {
        let mut attempt = 1;
        loop {
            match self.exec(target, cmd) {
                Ok(out) => return Ok(out),
                Err(e) if attempt < self.attempts && MigrateError::is_transient(&e) => {
                    log::warn!(
                        "[remote] attempt {attempt}/{} on {} failed, retrying: {e:#}",
                        self.attempts,
                        target.host
                    );
                    attempt += 1;
                    if !self.retry_delay.is_zero() {
                        std::thread::sleep(self.retry_delay);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
