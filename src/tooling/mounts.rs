use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;
use tracing as log;

use super::remote::{RemotePort, SshTarget};
use crate::{config::Cloud, model::VolumeType, utils::process::sh_quote};

/// Separates directory and export in enumeration output.
pub const SEP: char = '|';

/// An NFS export as seen on the storage host: where it is mounted and the
/// share string it was mounted from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportBinding {
    pub dir: String,
    pub export: String,
}

impl ExportBinding {
    pub fn new(dir: impl Into<String>, export: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            export: export.into(),
        }
    }
}

pub trait MountPort: Send + Sync {
    /// Mounted exports of `vt`'s shares config, or every NFS mount of the
    /// volume service when `vt` is `None`. Empty output is an empty list.
    fn exports(&self, cloud: &Cloud, vt: Option<&VolumeType>) -> Result<Vec<ExportBinding>>;
}

pub struct MountCli {
    remote: Arc<dyn RemotePort>,
    dir_filter: Regex,
}

impl MountCli {
    pub fn new(remote: Arc<dyn RemotePort>, dir_filter: Regex) -> Self {
        Self { remote, dir_filter }
    }

    /// Reads `nfs_shares_config` from the `[<type>]` section of the service
    /// config and prints `dir|export` for each listed share that is mounted.
    fn typed_cmd(cinder_conf: &str, type_name: &str) -> String {
        format!(
            "cfg=$(awk -F= -v s={section} '$0 == s {{i=1; next}} /^\\[/ {{i=0}} \
             i && $1 ~ /^[ \\t]*nfs_shares_config[ \\t]*$/ {{gsub(/[ \\t]/, \"\", $2); print $2; exit}}' {conf}); \
             [ -n \"$cfg\" ] || exit 0; \
             for exp in $(grep -v '^[[:space:]]*#' \"$cfg\"); do \
             mount | awk -v e=\"$exp\" '$1 == e {{print $3 \"{SEP}\" $1}}'; done",
            section = sh_quote(&format!("[{type_name}]")),
            conf = sh_quote(cinder_conf),
        )
    }

    fn default_cmd() -> String {
        format!("mount -t nfs,nfs4 | awk '{{print $3 \"{SEP}\" $1}}'")
    }

    fn parse(&self, lines: &[String]) -> Vec<ExportBinding> {
        let mut out: Vec<ExportBinding> = Vec::with_capacity(lines.len());
        for line in lines {
            let Some((dir, export)) = line.split_once(SEP) else {
                log::debug!("[mounts] skip malformed line: {line}");
                continue;
            };
            let (dir, export) = (dir.trim(), export.trim());
            if dir.is_empty() || export.is_empty() || !self.dir_filter.is_match(dir) {
                continue;
            }
            let binding = ExportBinding::new(dir, export);
            if !out.contains(&binding) {
                out.push(binding);
            }
        }
        out
    }
}

impl MountPort for MountCli {
    fn exports(&self, cloud: &Cloud, vt: Option<&VolumeType>) -> Result<Vec<ExportBinding>> {
        let cmd = match vt {
            Some(t) => Self::typed_cmd(&cloud.cinder_conf, &t.name),
            None => Self::default_cmd(),
        };
        let label = vt.map(|t| t.name.as_str()).unwrap_or("default");
        let lines = self
            .remote
            .exec_lines_retrying(&SshTarget::endpoint(cloud), &cmd)
            .with_context(|| format!("enumerate {} exports for '{label}'", cloud.position))?;

        let bindings = self.parse(&lines);
        log::debug!(
            "[mounts] {} '{label}': {} export(s)",
            cloud.position,
            bindings.len()
        );
        Ok(bindings)
    }
}
