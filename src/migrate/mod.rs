use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::{AppCtx, dump::DumpFilter, utils::time::parse_db_datetime};

pub mod catalog;
mod executor;
pub mod hosts;
pub mod paths;
pub mod reconcile;
pub mod transfer;

#[derive(Debug, Args)]
pub struct MigrateArgs {
    #[command(subcommand)]
    pub cmd: MigrateCmd,
}

impl MigrateArgs {
    pub fn run(&self, ctx: &AppCtx) -> Result<()> {
        self.cmd.run(ctx)
    }
}

#[derive(Debug, Subcommand)]
pub enum MigrateCmd {
    /// Copy volume files to the destination cloud and write the fixed-up dump.
    Run(RunArgs),
    /// Show where each volume would go, without copying or writing.
    Plan(PlanArgs),
    /// Show how source volume types map onto destination types.
    Types,
}

impl MigrateCmd {
    pub fn run(&self, ctx: &AppCtx) -> Result<()> {
        match self {
            MigrateCmd::Run(args) => args.run(ctx),
            MigrateCmd::Plan(args) => args.run(ctx),
            MigrateCmd::Types => executor::types(ctx),
        }
    }
}

/// Narrow the source volume set.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Only volumes of this project id.
    #[arg(long)]
    pub tenant: Option<String>,

    /// Only these volume ids (repeatable).
    #[arg(long = "volume", value_name = "ID")]
    pub volumes: Vec<String>,

    /// Only volumes created at or after this time (RFC3339).
    #[arg(long)]
    pub since: Option<String>,
}

impl FilterArgs {
    fn to_filter(&self, ctx: &AppCtx) -> Result<DumpFilter> {
        let created_since = match self.since.as_deref() {
            Some(s) => Some(parse_db_datetime(s).context("--since")?),
            None => None,
        };
        Ok(DumpFilter {
            tenant: self.tenant.clone(),
            volume_ids: self.volumes.clone(),
            created_since,
            valid_statuses: ctx.cfg.migrate.valid_statuses.clone(),
        })
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    #[arg(long)]
    pub dry_run: bool,
}

impl RunArgs {
    pub fn run(&self, ctx: &AppCtx) -> Result<()> {
        executor::run(ctx, &self.filter.to_filter(ctx)?, self.dry_run)
    }
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub filter: FilterArgs,
}

impl PlanArgs {
    pub fn run(&self, ctx: &AppCtx) -> Result<()> {
        executor::plan(ctx, &self.filter.to_filter(ctx)?)
    }
}
