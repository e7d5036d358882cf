use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::{EnvFilter, fmt};

mod config;
mod dump;
mod error;
mod migrate;
mod model;
mod tooling;
mod ui;
mod utils;

use config::Config;
use migrate::MigrateArgs;
use utils::process::{ProcessRunner, Runner};

pub struct AppCtx {
    pub cfg: Config,
    pub runner: Arc<dyn Runner + Send + Sync>,
}

#[derive(Parser, Debug)]
#[command(
    name = "volmigrate",
    about = "Relocate NFS-backed block storage volumes between clouds and fix up their records",
    arg_required_else_help = false,
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[arg(long, default_value = "./config.toml", global = true)]
    config: PathBuf,

    #[arg(long, global = true)]
    debug: bool,

    #[arg(long, global = true)]
    check_config: bool,

    #[arg(long, global = true)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    Migrate(MigrateArgs),
}

fn init_tracing(debug: bool) {
    let default = if debug { "trace" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(debug)
        .with_line_number(debug)
        .without_time()
        .try_init();
}

fn print_help() -> Result<()> {
    Cli::command().print_help()?;
    println!();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    if cli.command.is_none() && !cli.check_config && !cli.print_config {
        return print_help();
    }
    let cfg = Config::load(&cli.config)?;

    if cli.check_config {
        tracing::info!("config OK");
        return Ok(());
    }
    if cli.print_config {
        println!("{}", cfg.to_redacted_toml()?);
        return Ok(());
    }

    let Some(cmd) = cli.command else {
        return print_help();
    };

    let ctx = AppCtx {
        cfg,
        runner: Arc::new(ProcessRunner::new()),
    };

    match cmd {
        Cmd::Migrate(args) => args.run(&ctx),
    }
}
