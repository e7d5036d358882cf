use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing as log;

use crate::{
    config::Cloud,
    error::MigrateError,
    model::TypeCatalog,
    tooling::{ServicePort, services::VOLUME_BINARY},
};

/// Backend suffix of `hostname@suffix[#pool]`.
fn backend_of(host: &str) -> Option<&str> {
    let (_, rest) = host.split_once('@')?;
    let suffix = rest.split_once('#').map_or(rest, |(b, _)| b);
    (!suffix.is_empty()).then_some(suffix)
}

/// Destination `type id -> volume service host`, with the first listed host
/// as the default backend.
#[derive(Debug, Clone)]
pub struct HostResolver {
    hosts: Vec<String>,
    by_type: BTreeMap<String, String>,
}

impl HostResolver {
    pub fn discover(services: &dyn ServicePort, cloud: &Cloud, catalog: &TypeCatalog) -> Result<Self> {
        let hosts = services
            .active_hosts(cloud, VOLUME_BINARY)
            .with_context(|| format!("{} volume service hosts", cloud.position))?;
        Self::new(hosts, catalog)
    }

    pub fn new(hosts: Vec<String>, catalog: &TypeCatalog) -> Result<Self> {
        if hosts.is_empty() {
            return Err(MigrateError::Precondition(format!(
                "no active {VOLUME_BINARY} host"
            ))
            .into());
        }
        let names = catalog.name_index();
        let mut by_type = BTreeMap::new();
        for h in &hosts {
            let Some(type_id) = backend_of(h).and_then(|b| names.get(b)) else {
                continue;
            };
            by_type
                .entry((*type_id).to_string())
                .or_insert_with(|| h.clone());
        }
        log::debug!(
            "[hosts] default {} ({} typed backends)",
            hosts[0],
            by_type.len()
        );
        Ok(Self { hosts, by_type })
    }

    pub fn default_host(&self) -> &str {
        &self.hosts[0]
    }

    pub fn host_for(&self, type_id: Option<&str>) -> &str {
        type_id
            .and_then(|id| self.by_type.get(id))
            .map_or(self.default_host(), String::as_str)
    }
}
