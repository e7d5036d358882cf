use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use time::OffsetDateTime;
use tracing as log;

use crate::{
    model::{Document, Volume, VolumeStatus},
    utils::time::parse_db_datetime,
};

/// Which rows of the volumes table take part in a run. Empty or absent
/// fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct DumpFilter {
    pub tenant: Option<String>,
    pub volume_ids: Vec<String>,
    pub created_since: Option<OffsetDateTime>,
    pub valid_statuses: Vec<VolumeStatus>,
}

impl DumpFilter {
    fn created_at(vol: &Volume) -> Result<Option<OffsetDateTime>> {
        match vol.extra.get("created_at") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => parse_db_datetime(s)
                .map(Some)
                .with_context(|| format!("volume {}: created_at", vol.id)),
            Some(other) => Err(anyhow!("volume {}: created_at is not a string: {other}", vol.id)),
        }
    }

    fn keep(&self, vol: &Volume) -> Result<bool> {
        if !self.valid_statuses.is_empty() && !self.valid_statuses.contains(&vol.status) {
            log::debug!("[dump] skip {}: status {}", vol.id, vol.status);
            return Ok(false);
        }
        if let Some(ref tenant) = self.tenant
            && vol.project_id.as_deref() != Some(tenant.as_str())
        {
            return Ok(false);
        }
        if !self.volume_ids.is_empty() && !self.volume_ids.contains(&vol.id) {
            return Ok(false);
        }
        if let Some(since) = self.created_since {
            return Ok(Self::created_at(vol)?.is_some_and(|at| at >= since));
        }
        Ok(true)
    }

    /// Drops every volume the filter rejects; returns how many were dropped.
    pub fn apply(&self, doc: &mut Document) -> Result<usize> {
        let before = doc.volumes.len();
        let mut kept = Vec::with_capacity(before);
        for vol in doc.volumes.drain(..) {
            if self.keep(&vol)? {
                kept.push(vol);
            }
        }
        doc.volumes = kept;
        Ok(before - doc.volumes.len())
    }
}

/// The database collaborator: one read before the run, one write after it.
pub trait DumpStore {
    fn read_dump(&self, filter: &DumpFilter) -> Result<Document>;
    fn write_dump(&self, doc: &Document) -> Result<()>;
}

/// JSON dump files on local disk.
pub struct FileDump {
    input: PathBuf,
    output: Option<PathBuf>,
    dry_run: bool,
}

impl FileDump {
    pub fn reader(input: &Path) -> Self {
        Self {
            input: input.to_path_buf(),
            output: None,
            dry_run: false,
        }
    }

    pub fn new(input: &Path, output: Option<&Path>, dry_run: bool) -> Self {
        Self {
            input: input.to_path_buf(),
            output: output.map(Path::to_path_buf),
            dry_run,
        }
    }
}

impl DumpStore for FileDump {
    fn read_dump(&self, filter: &DumpFilter) -> Result<Document> {
        let raw = fs::read_to_string(&self.input)
            .with_context(|| format!("read dump {}", self.input.display()))?;
        let mut doc: Document = serde_json::from_str(&raw)
            .with_context(|| format!("parse dump {}", self.input.display()))?;
        let dropped = filter.apply(&mut doc)?;
        log::info!(
            "[dump] {}: {} volume(s), {dropped} filtered out",
            self.input.display(),
            doc.volumes.len()
        );
        Ok(doc)
    }

    fn write_dump(&self, doc: &Document) -> Result<()> {
        let out = self
            .output
            .as_deref()
            .ok_or_else(|| anyhow!("no output configured for {}", self.input.display()))?;
        let body = serde_json::to_string_pretty(doc).context("serialize dump")?;

        if self.dry_run {
            log::info!(
                "[DRY-RUN] would write {} volume(s) to {}",
                doc.volumes.len(),
                out.display()
            );
            log::debug!("[DRY-RUN] {body}");
            return Ok(());
        }

        write_atomic(out, body.as_bytes())?;
        log::info!("[dump] wrote {} volume(s) to {}", doc.volumes.len(), out.display());
        Ok(())
    }
}

/// Temp file next to `path`, then rename over it.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("output path has no file name: {}", path.display()))?;
    let tmp = dir.join(format!(
        ".{}.tmp-{}",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    let result = (|| -> Result<()> {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(data)?;
        f.write_all(b"\n")?;
        f.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result.with_context(|| format!("write {}", path.display()))
}
