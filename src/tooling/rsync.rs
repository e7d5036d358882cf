use std::sync::Arc;

use anyhow::{Context, Result};
use tracing as log;

use super::remote::{RemotePort, SshTarget};
use crate::utils::process::CmdSpec;

/// Destination of a copy, addressed from the source host.
#[derive(Debug, Clone)]
pub struct RsyncDest<'a> {
    pub user: &'a str,
    pub host: &'a str,
    pub dir: &'a str,
}

pub trait RsyncPort: Send + Sync {
    /// Copies `src_path` (on `from`) into `dest.dir`, resumable and in place.
    fn copy(&self, from: &SshTarget, src_path: &str, dest: &RsyncDest<'_>) -> Result<()>;
}

pub struct RsyncCli {
    remote: Arc<dyn RemotePort>,
    dry_run: bool,
}

impl RsyncCli {
    pub fn new(remote: Arc<dyn RemotePort>, dry_run: bool) -> Self {
        Self { remote, dry_run }
    }

    /// Runs on the source host and talks to the destination directly.
    pub fn cmd(src_path: &str, dest: &RsyncDest<'_>) -> String {
        CmdSpec::new("rsync")
            .args(["--inplace", "-a", "-e", "ssh -o StrictHostKeyChecking=no"])
            .arg(src_path)
            .arg(format!("{}@{}:{}", dest.user, dest.host, dest.dir))
            .render()
    }
}

impl RsyncPort for RsyncCli {
    fn copy(&self, from: &SshTarget, src_path: &str, dest: &RsyncDest<'_>) -> Result<()> {
        let cmd = Self::cmd(src_path, dest);
        if self.dry_run {
            log::info!("[DRY-RUN] {}: {cmd}", from.host);
            return Ok(());
        }
        self.remote
            .exec_retrying(from, &cmd)
            .with_context(|| format!("rsync {src_path} -> {}:{}", dest.host, dest.dir))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingRemote {
        retrying: Mutex<Vec<String>>,
    }

    impl RemotePort for RecordingRemote {
        fn exec(&self, _target: &SshTarget, _cmd: &str) -> Result<String> {
            unreachable!("copies always go through exec_retrying")
        }
        fn exec_retrying(&self, _target: &SshTarget, cmd: &str) -> Result<String> {
            self.retrying.lock().unwrap().push(cmd.to_string());
            Ok(String::new())
        }
    }

    fn src() -> SshTarget {
        SshTarget {
            host: "src_cinder".into(),
            user: "src_user".into(),
            gateway: Some("src_ssh_host".into()),
            key: None,
        }
    }

    const DEST: RsyncDest<'static> = RsyncDest {
        user: "dst_user",
        host: "dst_cinder",
        dir: "/var/lib/cinder/dstdir0a",
    };

    #[test]
    fn copy_command_matches_resumable_inplace_form() {
        let remote = Arc::new(RecordingRemote::default());
        let rsync = RsyncCli::new(remote.clone(), false);
        rsync
            .copy(&src(), "/var/lib/cinder/abc/volume-vol-1", &DEST)
            .unwrap();
        assert_eq!(
            remote.retrying.lock().unwrap().as_slice(),
            ["rsync --inplace -a -e 'ssh -o StrictHostKeyChecking=no' \
              /var/lib/cinder/abc/volume-vol-1 dst_user@dst_cinder:/var/lib/cinder/dstdir0a"]
        );
    }

    #[test]
    fn dry_run_issues_nothing() {
        let remote = Arc::new(RecordingRemote::default());
        let rsync = RsyncCli::new(remote.clone(), true);
        rsync.copy(&src(), "/x/volume-1", &DEST).unwrap();
        assert!(remote.retrying.lock().unwrap().is_empty());
    }
}
