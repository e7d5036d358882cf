use anyhow::Result;
use prettytable::{Cell, Row, Table};

use crate::migrate::{
    catalog::TypeMatch,
    reconcile::{Placement, VolumePlan, VolumeReport},
};

const NONE: &str = "-";

fn opt(s: Option<&str>) -> &str {
    s.unwrap_or(NONE)
}

fn titles(names: &[&str]) -> Row {
    Row::new(names.iter().map(|n| Cell::new(n)).collect())
}

pub fn print_type_map(rows: &[TypeMatch<'_>]) {
    if rows.is_empty() {
        tracing::info!("<source cloud has no volume types>");
        return;
    }
    let mut table = Table::new();
    table.set_titles(titles(&["Type", "Source ID", "Destination ID"]));
    for r in rows {
        table.add_row(Row::new(vec![
            Cell::new(&r.src.name),
            Cell::new(&r.src.id),
            Cell::new(r.dst_id.unwrap_or("<unmatched>")),
        ]));
    }
    table.printstd();
}

pub fn print_plan(plans: &[(String, Result<VolumePlan>)]) {
    if plans.is_empty() {
        tracing::info!("<no volumes>");
        return;
    }
    let mut table = Table::new();
    table.set_titles(titles(&["Volume", "Type", "Source file", "Destination"]));
    for (id, plan) in plans {
        let row = match plan {
            Ok(p) => {
                let dest = match &p.placement {
                    Placement::Existing(dir) => format!("{dir} (present)"),
                    Placement::Candidates(dirs) => dirs.join("\n"),
                };
                let ty = format!(
                    "{} -> {}",
                    opt(p.src_type_id.as_deref()),
                    opt(p.dst_type_id.as_deref())
                );
                vec![
                    Cell::new(id),
                    Cell::new(&ty),
                    Cell::new(&p.src_path),
                    Cell::new(&dest),
                ]
            }
            Err(e) => vec![
                Cell::new(id),
                Cell::new(NONE),
                Cell::new(&format!("error: {e:#}")),
                Cell::new(NONE),
            ],
        };
        table.add_row(Row::new(row));
    }
    table.printstd();
}

pub fn print_results(reports: &[VolumeReport]) {
    if reports.is_empty() {
        tracing::info!("<no volumes>");
        return;
    }
    let mut table = Table::new();
    table.set_titles(titles(&["Volume", "Type", "Host", "Location", "Directory", "Copied"]));
    for r in reports {
        table.add_row(Row::new(vec![
            Cell::new(&r.volume_id),
            Cell::new(opt(r.volume_type_id.as_deref())),
            Cell::new(&r.host),
            Cell::new(&r.provider_location),
            Cell::new(&r.dir),
            Cell::new(if r.transferred { "yes" } else { "no" }),
        ]));
    }
    table.printstd();
}
