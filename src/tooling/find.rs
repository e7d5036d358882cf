use std::sync::Arc;

use anyhow::{Context, Result};
use tracing as log;

use super::remote::{RemotePort, SshTarget};
use crate::{error::MigrateError, utils::process::sh_quote};

pub trait FindPort: Send + Sync {
    /// First regular file named `file_name` below any of `dirs`. A miss is
    /// only reported when every candidate could be searched.
    fn find_file(
        &self,
        target: &SshTarget,
        dirs: &[String],
        file_name: &str,
    ) -> Result<Option<String>>;
}

pub struct FindCli {
    remote: Arc<dyn RemotePort>,
}

impl FindCli {
    pub fn new(remote: Arc<dyn RemotePort>) -> Self {
        Self { remote }
    }

    fn cmd(dirs: &[String], file_name: &str) -> String {
        let paths: Vec<String> = dirs
            .iter()
            .map(|d| format!("-path {}", sh_quote(&format!("{}/*", d.trim_end_matches('/')))))
            .collect();
        format!(
            "find / \\( {} \\) -type f -name {} -print -quit 2>&1 || true",
            paths.join(" -o "),
            sh_quote(file_name)
        )
    }
}

impl FindPort for FindCli {
    fn find_file(
        &self,
        target: &SshTarget,
        dirs: &[String],
        file_name: &str,
    ) -> Result<Option<String>> {
        if dirs.is_empty() {
            return Ok(None);
        }
        let lines = self
            .remote
            .exec_lines_retrying(target, &Self::cmd(dirs, file_name))
            .with_context(|| format!("search {file_name} on {}", target.host))?;

        let mut found = None;
        let mut unreadable = Vec::new();
        for line in lines {
            if line.starts_with('/') {
                if found.is_none() {
                    found = Some(line);
                }
            } else if dirs.iter().any(|d| line.contains(d.trim_end_matches('/'))) {
                unreadable.push(line);
            } else {
                log::debug!("[find] {}: {line}", target.host);
            }
        }

        match found {
            Some(path) => {
                for line in &unreadable {
                    log::warn!("[find] {}: {line}", target.host);
                }
                Ok(Some(path))
            }
            None if unreadable.is_empty() => Ok(None),
            None => Err(MigrateError::Transient {
                host: target.host.clone(),
                reason: format!(
                    "search {file_name} could not read every candidate: {}",
                    unreadable.join("; ")
                ),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use anyhow::bail;

    use super::*;
    use crate::{
        tooling::remote::SshCli,
        utils::process::{CmdSpec, Runner},
    };

    struct CannedRemote {
        out: String,
        cmds: Mutex<Vec<String>>,
    }

    impl RemotePort for CannedRemote {
        fn exec(&self, _target: &SshTarget, cmd: &str) -> Result<String> {
            self.cmds.lock().unwrap().push(cmd.to_string());
            Ok(self.out.clone())
        }
        fn exec_retrying(&self, target: &SshTarget, cmd: &str) -> Result<String> {
            self.exec(target, cmd)
        }
    }

    fn target() -> SshTarget {
        SshTarget {
            host: "src_cinder".into(),
            user: "root".into(),
            gateway: None,
            key: None,
        }
    }

    fn remote(out: &str) -> Arc<CannedRemote> {
        Arc::new(CannedRemote {
            out: out.into(),
            cmds: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn empty_candidates_skip_remote_call() {
        let r = remote("/should/not/be/used");
        let find = FindCli::new(r.clone());
        assert_eq!(find.find_file(&target(), &[], "volume-1").unwrap(), None);
        assert!(r.cmds.lock().unwrap().is_empty());
    }

    #[test]
    fn search_is_restricted_to_candidates() {
        let r = remote("/var/lib/cinder/dir1a/volume-vol-1\n");
        let find = FindCli::new(r.clone());
        let dirs = vec![
            "/var/lib/cinder/dir1a".to_string(),
            "/var/lib/cinder/dir1b/".to_string(),
        ];
        let got = find.find_file(&target(), &dirs, "volume-vol-1").unwrap();
        assert_eq!(got.as_deref(), Some("/var/lib/cinder/dir1a/volume-vol-1"));
        assert_eq!(
            r.cmds.lock().unwrap()[0],
            "find / \\( -path '/var/lib/cinder/dir1a/*' -o -path '/var/lib/cinder/dir1b/*' \\) \
             -type f -name volume-vol-1 -print -quit 2>&1 || true"
        );
    }

    #[test]
    fn nothing_found_is_none() {
        let find = FindCli::new(remote(""));
        let dirs = vec!["/var/lib/cinder/dir1a".to_string()];
        assert_eq!(find.find_file(&target(), &dirs, "volume-x").unwrap(), None);
    }

    #[test]
    fn unrelated_find_noise_is_still_a_miss() {
        let find = FindCli::new(remote(
            "find: '/proc/4242/task': No such file or directory\n",
        ));
        let dirs = vec!["/var/lib/cinder/dir1a".to_string()];
        assert_eq!(find.find_file(&target(), &dirs, "volume-x").unwrap(), None);
    }

    #[test]
    fn unreadable_candidate_is_not_a_miss() {
        let find = FindCli::new(remote(
            "find: '/var/lib/cinder/dir1b/sub': Stale file handle\n",
        ));
        let dirs = vec![
            "/var/lib/cinder/dir1a".to_string(),
            "/var/lib/cinder/dir1b".to_string(),
        ];
        let err = find.find_file(&target(), &dirs, "volume-x").unwrap_err();
        assert!(MigrateError::is_transient(&err));
        assert!(format!("{err:#}").contains("Stale file handle"));
    }

    #[test]
    fn hit_wins_over_unreadable_sibling() {
        let find = FindCli::new(remote(
            "find: '/var/lib/cinder/dir1b': Stale file handle\n\
             /var/lib/cinder/dir1a/volume-x\n",
        ));
        let dirs = vec![
            "/var/lib/cinder/dir1a".to_string(),
            "/var/lib/cinder/dir1b".to_string(),
        ];
        let got = find.find_file(&target(), &dirs, "volume-x").unwrap();
        assert_eq!(got.as_deref(), Some("/var/lib/cinder/dir1a/volume-x"));
    }

    struct DropOnceRunner {
        calls: Mutex<u32>,
    }

    impl Runner for DropOnceRunner {
        fn run_capture(&self, _cmd: &CmdSpec) -> Result<String> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                bail!("ssh: exit 255 Connection reset");
            }
            Ok("/var/lib/cinder/dir1a/volume-x\n".to_string())
        }
    }

    #[test]
    fn search_retries_transient_failures() {
        let runner = Arc::new(DropOnceRunner {
            calls: Mutex::new(0),
        });
        let find = FindCli::new(Arc::new(SshCli::new(runner.clone(), 3, Duration::ZERO)));
        let dirs = vec!["/var/lib/cinder/dir1a".to_string()];
        let got = find.find_file(&target(), &dirs, "volume-x").unwrap();
        assert_eq!(got.as_deref(), Some("/var/lib/cinder/dir1a/volume-x"));
        assert_eq!(*runner.calls.lock().unwrap(), 2);
    }
}
