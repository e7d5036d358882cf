use anyhow::Result;
use tracing as log;

use crate::{
    error::MigrateError,
    tooling::{RsyncPort, remote::SshTarget, rsync::RsyncDest},
};

/// Copies one file to the first destination candidate that accepts it.
pub struct Transfer<'a> {
    rsync: &'a dyn RsyncPort,
    from: &'a SshTarget,
    to: &'a SshTarget,
}

impl<'a> Transfer<'a> {
    /// `from` issues the copy; `to` is reached directly from it.
    pub fn new(rsync: &'a dyn RsyncPort, from: &'a SshTarget, to: &'a SshTarget) -> Self {
        Self { rsync, from, to }
    }

    /// Returns the candidate the file landed in. Every candidate is tried in
    /// order; each one already retries transient failures on its own.
    pub fn place<'c>(&self, volume: &str, src_path: &str, candidates: &'c [String]) -> Result<&'c str> {
        if candidates.is_empty() {
            return Err(MigrateError::Precondition(format!(
                "volume {volume}: no destination candidate directory"
            ))
            .into());
        }
        for dir in candidates {
            let dest = RsyncDest {
                user: &self.to.user,
                host: &self.to.host,
                dir: dir.as_str(),
            };
            match self.rsync.copy(self.from, src_path, &dest) {
                Ok(()) => {
                    log::info!("[transfer] {volume}: {src_path} -> {}:{dir}", self.to.host);
                    return Ok(dir.as_str());
                }
                Err(e) => log::warn!("[transfer] {volume}: {dir} failed: {e:#}"),
            }
        }
        Err(MigrateError::PlacementExhausted {
            volume: volume.to_string(),
            candidates: candidates.to_vec(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::bail;

    use super::*;

    struct PickyRsync {
        accept: Option<&'static str>,
        tried: Mutex<Vec<String>>,
    }

    impl RsyncPort for PickyRsync {
        fn copy(&self, _from: &SshTarget, _src: &str, dest: &RsyncDest<'_>) -> Result<()> {
            self.tried.lock().unwrap().push(dest.dir.to_string());
            if self.accept == Some(dest.dir) {
                Ok(())
            } else {
                bail!("rsync: write failed on {}: No space left on device", dest.dir)
            }
        }
    }

    fn target(host: &str) -> SshTarget {
        SshTarget {
            host: host.into(),
            user: format!("{host}_user"),
            gateway: None,
            key: None,
        }
    }

    fn dirs() -> Vec<String> {
        vec!["/d/1a".into(), "/d/1b".into(), "/d/3a".into()]
    }

    #[test]
    fn falls_through_to_next_candidate() {
        let rsync = PickyRsync {
            accept: Some("/d/1b"),
            tried: Mutex::new(Vec::new()),
        };
        let (src, dst) = (target("src"), target("dst"));
        let candidates = dirs();
        let used = Transfer::new(&rsync, &src, &dst)
            .place("v", "/s/volume-v", &candidates)
            .unwrap();
        assert_eq!(used, "/d/1b");
        assert_eq!(*rsync.tried.lock().unwrap(), vec!["/d/1a", "/d/1b"]);
    }

    #[test]
    fn exhaustion_names_every_candidate() {
        let rsync = PickyRsync {
            accept: None,
            tried: Mutex::new(Vec::new()),
        };
        let (src, dst) = (target("src"), target("dst"));
        let err = Transfer::new(&rsync, &src, &dst)
            .place("v", "/s/volume-v", &dirs())
            .unwrap_err();
        match err.downcast_ref::<MigrateError>() {
            Some(MigrateError::PlacementExhausted { volume, candidates }) => {
                assert_eq!(volume, "v");
                assert_eq!(candidates, &dirs());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn no_candidates_is_a_precondition_failure() {
        let rsync = PickyRsync {
            accept: None,
            tried: Mutex::new(Vec::new()),
        };
        let (src, dst) = (target("src"), target("dst"));
        let err = Transfer::new(&rsync, &src, &dst)
            .place("v", "/s/volume-v", &[])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MigrateError>(),
            Some(MigrateError::Precondition(_))
        ));
        assert!(rsync.tried.lock().unwrap().is_empty());
    }
}
