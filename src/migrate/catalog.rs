use std::collections::BTreeMap;

use crate::model::{TypeCatalog, VolumeType};

/// Source type id -> destination type id, matched by type name.
pub type TypeMap = BTreeMap<String, String>;

pub fn map_volume_types(src: &TypeCatalog, dst: &TypeCatalog) -> TypeMap {
    let dst_by_name = dst.name_index();
    src.types()
        .iter()
        .filter_map(|t| {
            dst_by_name
                .get(t.name.as_str())
                .map(|dst_id| (t.id.clone(), (*dst_id).to_string()))
        })
        .collect()
}

/// One row of the type correspondence report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMatch<'a> {
    pub src: &'a VolumeType,
    pub dst_id: Option<&'a str>,
}

pub fn type_matches<'a>(src: &'a TypeCatalog, map: &'a TypeMap) -> Vec<TypeMatch<'a>> {
    src.types()
        .iter()
        .map(|t| TypeMatch {
            src: t,
            dst_id: map.get(&t.id).map(String::as_str),
        })
        .collect()
}
