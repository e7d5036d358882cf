use std::{collections::BTreeSet, sync::Arc};

use anyhow::Result;

use crate::{
    config::Config,
    utils::{bins::ensure_bins, process::Runner},
};

pub mod find;
pub mod mounts;
pub mod remote;
pub mod rsync;
pub mod services;

pub use find::{FindCli, FindPort};
pub use mounts::{MountCli, MountPort};
pub use remote::{RemotePort, SshCli};
pub use rsync::{RsyncCli, RsyncPort};
pub use services::{OpenstackCli, ServicePort};

pub struct Toolbox {
    mounts: Arc<dyn MountPort>,
    find: Arc<dyn FindPort>,
    rsync: Arc<dyn RsyncPort>,
    services: Arc<dyn ServicePort>,
}

impl Toolbox {
    pub fn new(cfg: &Config, runner: Arc<dyn Runner + Send + Sync>, dry_run: bool) -> Result<Self> {
        ensure_bins_for_run()?;

        let remote: Arc<dyn RemotePort> = Arc::new(SshCli::new(
            runner.clone(),
            cfg.migrate.ssh_connection_attempts,
            cfg.migrate.retry_delay,
        ));
        let mounts = Arc::new(MountCli::new(
            remote.clone(),
            cfg.migrate.mount_filter.clone(),
        )) as Arc<dyn MountPort>;
        let find = Arc::new(FindCli::new(remote.clone())) as Arc<dyn FindPort>;
        let rsync = Arc::new(RsyncCli::new(remote, dry_run)) as Arc<dyn RsyncPort>;
        let services = Arc::new(OpenstackCli::new(runner)) as Arc<dyn ServicePort>;

        Ok(Self {
            mounts,
            find,
            rsync,
            services,
        })
    }

    #[inline]
    pub fn mounts(&self) -> &dyn MountPort {
        self.mounts.as_ref()
    }
    #[inline]
    pub fn find(&self) -> &dyn FindPort {
        self.find.as_ref()
    }
    #[inline]
    pub fn rsync(&self) -> &dyn RsyncPort {
        self.rsync.as_ref()
    }
    #[inline]
    pub fn services(&self) -> &dyn ServicePort {
        self.services.as_ref()
    }
}

fn ensure_bins_for_run() -> Result<()> {
    let all: BTreeSet<&'static str> = remote::REQ_BINS
        .iter()
        .chain(services::REQ_BINS)
        .copied()
        .collect();
    ensure_bins(all)
}
