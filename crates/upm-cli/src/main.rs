//! Unreal Plugin Manager CLI
//!
//! The `upm` command: resolve, build, install and publish engine plugins.

mod cli;
mod commands;
mod context;
mod error;

use std::path::Path;

use clap::Parser;
use colored::Colorize;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cli::{Cli, Commands};
use error::Result;

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Some(cmd) => execute_command(cmd, cli.config.as_deref()),
        None => {
            println!("{} Unreal Plugin Manager", "upm".green().bold());
            println!();
            println!("Run {} for available commands.", "upm --help".cyan());
            Ok(())
        }
    }
}

/// Logs go to stderr so `--json` output stays machine readable.
fn init_tracing(verbose: bool) {
    let result = if verbose {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_target(true)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
    };
    if result.is_ok() {
        tracing::debug!("Verbose mode enabled");
    }
}

fn execute_command(cmd: Commands, config: Option<&Path>) -> Result<()> {
    let ctx = context::Context::open(config)?;
    match cmd {
        Commands::Resolve {
            path,
            engine,
            platforms,
            json,
        } => commands::run_resolve(&ctx, &path, engine.as_deref(), &platforms, json),
        Commands::Build {
            path,
            engines,
            platforms,
            publish,
        } => commands::run_build(&ctx, &path, &engines, &platforms, publish),
        Commands::Install {
            target,
            constraint,
            engine,
            allow_downgrade,
        } => commands::run_install(
            &ctx,
            &target,
            constraint.as_deref(),
            engine.as_deref(),
            allow_downgrade,
        ),
        Commands::Uninstall { name, engine } => {
            commands::run_uninstall(&ctx, &name, engine.as_deref())
        }
        Commands::List { engine, json } => commands::run_list(&ctx, engine.as_deref(), json),
        Commands::Engines { json } => commands::run_engines(&ctx, json),
        Commands::Search { term, json } => commands::run_search(&ctx, &term, json),
        Commands::Upload {
            path,
            icon,
            patches,
        } => commands::run_upload(&ctx, &path, icon.as_deref(), &patches),
    }
}
