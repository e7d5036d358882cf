use std::path::Path;

use anyhow::{Context, Result};
use tracing as log;

use super::{
    catalog::{TypeMap, map_volume_types},
    hosts::HostResolver,
    paths::{CloudPaths, ExportIndex},
    transfer::Transfer,
};
use crate::{
    config::Cloud,
    dump::DumpStore,
    error::MigrateError,
    model::{Document, TypeCatalog, Volume},
    tooling::{FindPort, MountPort, RsyncPort, ServicePort, remote::SshTarget},
};

/// Borrowed collaborators of one run.
#[derive(Clone, Copy)]
pub struct Ports<'a> {
    pub mounts: &'a dyn MountPort,
    pub find: &'a dyn FindPort,
    pub rsync: &'a dyn RsyncPort,
    pub services: &'a dyn ServicePort,
}

/// Where a volume's file is going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// The destination already holds the file in this directory.
    Existing(String),
    /// Try these directories in order.
    Candidates(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumePlan {
    pub volume_id: String,
    pub src_type_id: Option<String>,
    pub dst_type_id: Option<String>,
    pub src_path: String,
    pub placement: Placement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeReport {
    pub volume_id: String,
    pub volume_type_id: Option<String>,
    pub dir: String,
    pub host: String,
    pub provider_location: String,
    pub transferred: bool,
}

#[derive(Debug)]
pub struct Outcome {
    pub document: Document,
    pub reports: Vec<VolumeReport>,
}

/// Moves volume files from the source cloud to the destination cloud and
/// rewrites their rows to match. All lookups are built up front and live as
/// long as the reconciler.
pub struct Reconciler<'a> {
    ports: Ports<'a>,
    src: SshTarget,
    dst: SshTarget,
    type_map: TypeMap,
    src_paths: CloudPaths,
    dst_paths: CloudPaths,
    dst_index: ExportIndex,
    hosts: HostResolver,
    resync_existing: bool,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        ports: Ports<'a>,
        src: &Cloud,
        dst: &Cloud,
        src_catalog: &TypeCatalog,
        dst_catalog: &TypeCatalog,
        resync_existing: bool,
    ) -> Result<Self> {
        let type_map = map_volume_types(src_catalog, dst_catalog);
        log::info!(
            "[migrate] {} of {} source volume type(s) matched",
            type_map.len(),
            src_catalog.types().len()
        );
        let src_paths = CloudPaths::discover(ports.mounts, src, src_catalog)?;
        let dst_paths = CloudPaths::discover(ports.mounts, dst, dst_catalog)?;
        let dst_index = ExportIndex::new(&dst_paths);
        let hosts = HostResolver::discover(ports.services, dst, dst_catalog)?;

        Ok(Self {
            ports,
            src: SshTarget::endpoint(src),
            dst: SshTarget::endpoint(dst),
            type_map,
            src_paths,
            dst_paths,
            dst_index,
            hosts,
            resync_existing,
        })
    }

    /// Resolves types and locates the file on both sides without moving it.
    pub fn plan(&self, vol: &Volume) -> Result<VolumePlan> {
        let file = vol.file_name();
        let src_type_id = vol.volume_type_id.clone();
        let dst_type_id = src_type_id
            .as_deref()
            .and_then(|id| self.type_map.get(id))
            .cloned();

        let src_dirs = self
            .src_paths
            .candidates(src_type_id.as_deref())
            .with_context(|| format!("volume {}: source candidates", vol.id))?;
        let src_path = self
            .ports
            .find
            .find_file(&self.src, src_dirs, &file)?
            .ok_or_else(|| {
                MigrateError::Precondition(format!(
                    "volume {}: {file} not found on {}",
                    vol.id, self.src.host
                ))
            })?;

        let dst_dirs = self.dst_paths.candidates(dst_type_id.as_deref())?;
        let placement = match self.ports.find.find_file(&self.dst, dst_dirs, &file)? {
            Some(found) => Placement::Existing(containing_dir(&found, dst_dirs)?),
            None => Placement::Candidates(dst_dirs.to_vec()),
        };

        Ok(VolumePlan {
            volume_id: vol.id.clone(),
            src_type_id,
            dst_type_id,
            src_path,
            placement,
        })
    }

    /// Runs the copy a plan calls for; returns the directory used and whether
    /// anything was copied.
    fn transfer(&self, plan: &VolumePlan) -> Result<(String, bool)> {
        let transfer = Transfer::new(self.ports.rsync, &self.src, &self.dst);
        match &plan.placement {
            Placement::Existing(dir) if !self.resync_existing => {
                log::info!(
                    "[migrate] {}: already in {dir}, skipping transfer",
                    plan.volume_id
                );
                Ok((dir.clone(), false))
            }
            Placement::Existing(dir) => {
                let used = transfer.place(&plan.volume_id, &plan.src_path, std::slice::from_ref(dir))?;
                Ok((used.to_string(), true))
            }
            Placement::Candidates(dirs) => {
                let used = transfer.place(&plan.volume_id, &plan.src_path, dirs)?;
                Ok((used.to_string(), true))
            }
        }
    }

    pub fn reconcile_volume(&self, vol: &mut Volume) -> Result<VolumeReport> {
        let plan = self.plan(vol)?;
        let (dir, transferred) = self.transfer(&plan)?;

        let export = self.dst_index.export_of(&dir)?.to_string();
        let host = self
            .hosts
            .host_for(self.dst_index.type_of(&export)?)
            .to_string();

        vol.volume_type_id = plan.dst_type_id.clone();
        vol.provider_location = Some(export.clone());
        vol.host = Some(host.clone());
        log::info!("[migrate] {}: host={host} location={export}", vol.id);

        Ok(VolumeReport {
            volume_id: vol.id.clone(),
            volume_type_id: plan.dst_type_id,
            dir,
            host,
            provider_location: export,
            transferred,
        })
    }

    /// Reconciles every volume in order. The first fatal error aborts the
    /// whole document.
    pub fn reconcile(&self, mut doc: Document) -> Result<Outcome> {
        let total = doc.volumes.len();
        let mut reports = Vec::with_capacity(total);
        for (i, vol) in doc.volumes.iter_mut().enumerate() {
            log::info!("[migrate] ({}/{total}) volume {}", i + 1, vol.id);
            reports.push(self.reconcile_volume(vol)?);
        }
        finalize(&mut doc);
        Ok(Outcome {
            document: doc,
            reports,
        })
    }

    /// Reconciles and hands the result to `writer` once.
    pub fn run(&self, doc: Document, writer: &dyn DumpStore) -> Result<Vec<VolumeReport>> {
        let outcome = self.reconcile(doc)?;
        writer
            .write_dump(&outcome.document)
            .context("write reconciled volumes")?;
        Ok(outcome.reports)
    }
}

/// Output shape: nothing attached, no type catalog.
pub fn finalize(doc: &mut Document) {
    for vol in &mut doc.volumes {
        vol.detach();
    }
    doc.volume_types = None;
}

/// The candidate directory holding `path`, or its parent directory.
fn containing_dir(path: &str, candidates: &[String]) -> Result<String> {
    if let Some(dir) = candidates.iter().find(|d| {
        path.strip_prefix(d.trim_end_matches('/'))
            .is_some_and(|rest| rest.starts_with('/'))
    }) {
        return Ok(dir.clone());
    }
    Path::new(path)
        .parent()
        .map(|p| p.display().to_string())
        .ok_or_else(|| MigrateError::LookupMiss(format!("{path} has no parent directory")).into())
}
