use anyhow::{Context, Result};
use tracing as log;

use super::{
    catalog::{map_volume_types, type_matches},
    reconcile::{Ports, Reconciler, finalize},
};
use crate::{
    AppCtx,
    dump::{DumpFilter, DumpStore, FileDump},
    model::{Document, TypeCatalog},
    tooling::Toolbox,
    ui,
    utils::lock::LockGuard,
};

fn ports(tb: &Toolbox) -> Ports<'_> {
    Ports {
        mounts: tb.mounts(),
        find: tb.find(),
        rsync: tb.rsync(),
        services: tb.services(),
    }
}

fn read_src(ctx: &AppCtx, filter: &DumpFilter) -> Result<Document> {
    FileDump::reader(ctx.cfg.src.dump_path()?)
        .read_dump(filter)
        .context("read source volumes")
}

/// The destination dump only contributes its type catalog.
fn read_dst_catalog(store: &FileDump) -> Result<TypeCatalog> {
    let doc = store
        .read_dump(&DumpFilter::default())
        .context("read destination volume types")?;
    Ok(doc.catalog())
}

fn dst_store(ctx: &AppCtx, dry_run: bool) -> Result<FileDump> {
    Ok(FileDump::new(
        ctx.cfg.dst.dump_path()?,
        ctx.cfg.dst.output.as_deref(),
        dry_run,
    ))
}

pub fn run(ctx: &AppCtx, filter: &DumpFilter, dry_run: bool) -> Result<()> {
    let cfg = &ctx.cfg;
    let _lock = LockGuard::for_destination(&cfg.dst.endpoint_host)?;

    let mut doc = read_src(ctx, filter)?;
    let store = dst_store(ctx, dry_run)?;
    let src_catalog = doc.catalog();
    let dst_catalog = read_dst_catalog(&store)?;

    if doc.volumes.is_empty() {
        log::info!("[migrate] nothing to migrate");
        finalize(&mut doc);
        return store.write_dump(&doc);
    }

    let toolbox = Toolbox::new(cfg, ctx.runner.clone(), dry_run)?;
    let reconciler = Reconciler::new(
        ports(&toolbox),
        &cfg.src,
        &cfg.dst,
        &src_catalog,
        &dst_catalog,
        cfg.migrate.resync_existing,
    )?;

    log::info!(
        "[migrate] {} volume(s): {} -> {}",
        doc.volumes.len(),
        cfg.src.endpoint_host,
        cfg.dst.endpoint_host
    );
    let reports = reconciler.run(doc, &store)?;
    ui::print_results(&reports);
    log::info!("[migrate] done");
    Ok(())
}

pub fn plan(ctx: &AppCtx, filter: &DumpFilter) -> Result<()> {
    let cfg = &ctx.cfg;
    let doc = read_src(ctx, filter)?;
    if doc.volumes.is_empty() {
        log::info!("[migrate] nothing to migrate");
        return Ok(());
    }
    let src_catalog = doc.catalog();
    let dst_catalog = read_dst_catalog(&dst_store(ctx, true)?)?;

    let toolbox = Toolbox::new(cfg, ctx.runner.clone(), true)?;
    let reconciler = Reconciler::new(
        ports(&toolbox),
        &cfg.src,
        &cfg.dst,
        &src_catalog,
        &dst_catalog,
        cfg.migrate.resync_existing,
    )?;

    let plans: Vec<_> = doc
        .volumes
        .iter()
        .map(|v| (v.id.clone(), reconciler.plan(v)))
        .collect();
    let failed = plans.iter().filter(|(_, p)| p.is_err()).count();
    ui::print_plan(&plans);
    if failed > 0 {
        log::warn!("[migrate] {failed} volume(s) cannot be placed");
    }
    Ok(())
}

pub fn types(ctx: &AppCtx) -> Result<()> {
    let src_catalog = read_src(ctx, &DumpFilter::default())?.catalog();
    let dst_catalog = read_dst_catalog(&dst_store(ctx, true)?)?;

    if matches!(dst_catalog, TypeCatalog::Untyped) {
        log::info!("[migrate] destination cloud has no volume types; every volume goes to its default shares");
    }
    let map = map_volume_types(&src_catalog, &dst_catalog);
    ui::print_type_map(&type_matches(&src_catalog, &map));
    Ok(())
}
