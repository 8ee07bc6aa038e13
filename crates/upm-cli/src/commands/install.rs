//! Install, uninstall and list plugins of an engine

use std::path::Path;

use colored::Colorize;
use upm_core::{InstallRequest, Session};
use upm_engine::VersionChange;
use upm_resolve::VersionConstraint;

use crate::context::Context;
use crate::error::Result;

/// Run the install command
///
/// A target that names an existing path is installed from source;
/// anything else is looked up in the registry.
pub fn run_install(
    ctx: &Context,
    target: &str,
    constraint: Option<&str>,
    engine: Option<&str>,
    allow_downgrade: bool,
) -> Result<()> {
    let mut request = if constraint.is_none() && Path::new(target).exists() {
        InstallRequest::from_directory(target)
    } else {
        let constraint = match constraint {
            Some(c) => VersionConstraint::parse(c)?,
            None => VersionConstraint::any(),
        };
        InstallRequest::from_registry(target, constraint)
    };
    if let Some(engine) = engine {
        request = request.on_engine(engine);
    }
    if allow_downgrade {
        request = request.allow_downgrade(true);
    }

    let outcome = ctx.block_on(ctx.session.install(request))??;
    super::build::print_report(&outcome.report);

    println!(
        "{} {} {} into {}",
        "Target".bold(),
        outcome.root.name().cyan().bold(),
        outcome.root.version(),
        outcome.engine.display_name()
    );
    if outcome.changes.is_empty() {
        println!("Already up to date.");
    }
    for change in &outcome.changes {
        println!("  {}", describe(change));
    }
    Ok(())
}

fn describe(change: &VersionChange) -> String {
    match &change.previous {
        None => format!("{} {} {}", "installed ".green(), change.plugin, change.new),
        Some(previous) if *previous < change.new => format!(
            "{} {} {} -> {}",
            "upgraded  ".green(),
            change.plugin,
            previous,
            change.new
        ),
        Some(previous) if *previous > change.new => format!(
            "{} {} {} -> {}",
            "downgraded".yellow(),
            change.plugin,
            previous,
            change.new
        ),
        Some(_) => format!("{} {} {}", "reinstalled".cyan(), change.plugin, change.new),
    }
}

/// Run the uninstall command
pub fn run_uninstall(ctx: &Context, name: &str, engine: Option<&str>) -> Result<()> {
    match ctx.session.uninstall(name, engine)? {
        Some(removed) => println!("Removed {} {}", removed.name.cyan(), removed.version),
        None => println!("{} is not installed.", name),
    }
    Ok(())
}

/// Run the list command
pub fn run_list(ctx: &Context, engine: Option<&str>, json: bool) -> Result<()> {
    let session: &Session = &ctx.session;
    let plugins = session.installed(engine)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plugins)?);
        return Ok(());
    }

    let engine = session.engines().select(engine)?;
    println!("{}", engine.display_name().bold());
    if plugins.is_empty() {
        println!("  No plugins installed.");
    }
    for plugin in &plugins {
        let platforms: Vec<&str> = plugin.platforms.iter().map(String::as_str).collect();
        println!(
            "  {:<24} {:<10} {}",
            plugin.name.green(),
            plugin.version,
            platforms.join(", ").dimmed()
        );
    }
    Ok(())
}
