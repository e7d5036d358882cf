use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use tracing as log;

use crate::{
    config::Cloud,
    error::MigrateError,
    model::TypeCatalog,
    tooling::{MountPort, mounts::ExportBinding},
};

/// Exports of one volume type; `type_id` is `None` for the default bucket of
/// an untyped cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub type_id: Option<String>,
    pub bindings: Vec<ExportBinding>,
}

/// Candidate directories of one cloud, computed once per run.
#[derive(Debug, Clone)]
pub enum CloudPaths {
    Typed {
        buckets: Vec<Bucket>,
        by_type: BTreeMap<String, Vec<String>>,
        all: Vec<String>,
    },
    Untyped {
        default: Bucket,
        dirs: Vec<String>,
    },
}

fn dirs_of(bindings: &[ExportBinding]) -> Vec<String> {
    bindings.iter().map(|b| b.dir.clone()).collect()
}

impl CloudPaths {
    /// One enumeration per type of `catalog` (in type id order), or a single
    /// default enumeration when the cloud has no types.
    pub fn discover(mounts: &dyn MountPort, cloud: &Cloud, catalog: &TypeCatalog) -> Result<Self> {
        let paths = match catalog {
            TypeCatalog::Typed(types) => {
                let mut buckets = Vec::with_capacity(types.len());
                for t in types {
                    let bindings = mounts.exports(cloud, Some(t)).with_context(|| {
                        format!("{} exports of volume type {}", cloud.position, t.name)
                    })?;
                    buckets.push(Bucket {
                        type_id: Some(t.id.clone()),
                        bindings,
                    });
                }
                Self::typed(buckets)
            }
            TypeCatalog::Untyped => {
                let bindings = mounts
                    .exports(cloud, None)
                    .with_context(|| format!("{} default exports", cloud.position))?;
                Self::untyped(bindings)
            }
        };
        log::info!(
            "[paths] {}: {} candidate director{}",
            cloud.position,
            paths.all_dirs().len(),
            if paths.all_dirs().len() == 1 { "y" } else { "ies" }
        );
        Ok(paths)
    }

    pub fn typed(mut buckets: Vec<Bucket>) -> Self {
        buckets.sort_by(|a, b| a.type_id.cmp(&b.type_id));
        let mut by_type = BTreeMap::new();
        let mut all = Vec::new();
        for b in &buckets {
            let dirs = dirs_of(&b.bindings);
            all.extend(dirs.iter().cloned());
            if let Some(ref id) = b.type_id {
                by_type.insert(id.clone(), dirs);
            }
        }
        CloudPaths::Typed {
            buckets,
            by_type,
            all,
        }
    }

    pub fn untyped(bindings: Vec<ExportBinding>) -> Self {
        let dirs = dirs_of(&bindings);
        CloudPaths::Untyped {
            default: Bucket {
                type_id: None,
                bindings,
            },
            dirs,
        }
    }

    /// Where a volume of `type_id` may live. An untyped cloud always answers
    /// with its default bucket; a typed cloud answers with every directory
    /// when `type_id` is `None`.
    pub fn candidates(&self, type_id: Option<&str>) -> Result<&[String]> {
        match (self, type_id) {
            (CloudPaths::Untyped { dirs, .. }, _) => Ok(dirs.as_slice()),
            (CloudPaths::Typed { all, .. }, None) => Ok(all.as_slice()),
            (CloudPaths::Typed { by_type, .. }, Some(id)) => by_type
                .get(id)
                .map(Vec::as_slice)
                .ok_or_else(|| {
                    MigrateError::LookupMiss(format!("volume type {id} is not in the catalog")).into()
                }),
        }
    }

    pub fn all_dirs(&self) -> &[String] {
        match self {
            CloudPaths::Typed { all, .. } => all,
            CloudPaths::Untyped { dirs, .. } => dirs,
        }
    }

    pub fn buckets(&self) -> &[Bucket] {
        match self {
            CloudPaths::Typed { buckets, .. } => buckets,
            CloudPaths::Untyped { default, .. } => std::slice::from_ref(default),
        }
    }
}

/// Directory -> export and export -> type id, inverted from the destination
/// export map. First occurrence in type id order wins.
#[derive(Debug, Clone, Default)]
pub struct ExportIndex {
    export_by_dir: HashMap<String, String>,
    type_by_export: HashMap<String, Option<String>>,
}

impl ExportIndex {
    pub fn new(paths: &CloudPaths) -> Self {
        let mut idx = ExportIndex::default();
        for bucket in paths.buckets() {
            for b in &bucket.bindings {
                idx.export_by_dir
                    .entry(b.dir.clone())
                    .or_insert_with(|| b.export.clone());
                idx.type_by_export
                    .entry(b.export.clone())
                    .or_insert_with(|| bucket.type_id.clone());
            }
        }
        idx
    }

    pub fn export_of(&self, dir: &str) -> Result<&str> {
        self.export_by_dir
            .get(dir.trim_end_matches('/'))
            .map(String::as_str)
            .ok_or_else(|| MigrateError::LookupMiss(format!("no export mounted at {dir}")).into())
    }

    /// `Ok(None)` means the export belongs to the default bucket.
    pub fn type_of(&self, export: &str) -> Result<Option<&str>> {
        self.type_by_export
            .get(export)
            .map(Option::as_deref)
            .ok_or_else(|| {
                MigrateError::LookupMiss(format!("export {export} has no volume type")).into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(dir: &str, export: &str) -> ExportBinding {
        ExportBinding::new(dir, export)
    }

    fn dst_typed() -> CloudPaths {
        CloudPaths::typed(vec![
            Bucket {
                type_id: Some("nfs_other_id".into()),
                bindings: vec![
                    b("/var/lib/cinder/dstdir2a", "/var/exports/dst2a"),
                    b("/var/lib/cinder/dstdir2b", "/var/exports/dst2b"),
                ],
            },
            Bucket {
                type_id: Some("nfs1_dst_id".into()),
                bindings: vec![
                    b("/var/lib/cinder/dstdir1a", "/var/exports/dst1a"),
                    b("/var/lib/cinder/dstdir1b", "/var/exports/dst1b"),
                ],
            },
            Bucket {
                type_id: Some("nfs3_dst_id".into()),
                bindings: vec![b("/var/lib/cinder/dstdir3a", "/var/exports/dst3a")],
            },
        ])
    }

    #[test]
    fn all_is_concatenated_in_type_id_order() {
        let p = dst_typed();
        assert_eq!(
            p.candidates(None).unwrap(),
            [
                "/var/lib/cinder/dstdir1a",
                "/var/lib/cinder/dstdir1b",
                "/var/lib/cinder/dstdir3a",
                "/var/lib/cinder/dstdir2a",
                "/var/lib/cinder/dstdir2b",
            ]
        );
    }

    #[test]
    fn by_type_returns_only_that_bucket() {
        let p = dst_typed();
        assert_eq!(
            p.candidates(Some("nfs3_dst_id")).unwrap(),
            ["/var/lib/cinder/dstdir3a"]
        );
    }

    #[test]
    fn unknown_type_is_a_lookup_miss() {
        let err = dst_typed().candidates(Some("ghost")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MigrateError>(),
            Some(MigrateError::LookupMiss(_))
        ));
    }

    #[test]
    fn untyped_ignores_the_type_argument() {
        let p = CloudPaths::untyped(vec![b("/var/lib/cinder/dstdir0a", "/var/exports/dst0a")]);
        assert_eq!(p.candidates(None).unwrap(), ["/var/lib/cinder/dstdir0a"]);
        assert_eq!(
            p.candidates(Some("nfs1_id")).unwrap(),
            ["/var/lib/cinder/dstdir0a"]
        );
    }

    #[test]
    fn index_inverts_both_directions() {
        let idx = ExportIndex::new(&dst_typed());
        assert_eq!(
            idx.export_of("/var/lib/cinder/dstdir3a").unwrap(),
            "/var/exports/dst3a"
        );
        assert_eq!(
            idx.export_of("/var/lib/cinder/dstdir1b/").unwrap(),
            "/var/exports/dst1b"
        );
        assert_eq!(
            idx.type_of("/var/exports/dst1b").unwrap(),
            Some("nfs1_dst_id")
        );
        assert!(idx.export_of("/nowhere").is_err());
        assert!(idx.type_of("/var/exports/unknown").is_err());
    }

    #[test]
    fn default_bucket_exports_have_no_type() {
        let p = CloudPaths::untyped(vec![b("/var/lib/cinder/dstdir0a", "/var/exports/dst0a")]);
        let idx = ExportIndex::new(&p);
        assert_eq!(idx.type_of("/var/exports/dst0a").unwrap(), None);
    }
}
