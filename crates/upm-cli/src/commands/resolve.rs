//! Dependency resolution without building

use std::collections::BTreeMap;
use std::path::Path;

use colored::Colorize;
use serde::Serialize;
use upm_resolve::PluginManifest;

use crate::context::Context;
use crate::error::Result;

#[derive(Serialize)]
struct ResolutionView {
    plugin: String,
    version: String,
    engine: String,
    platforms: Vec<String>,
    dependencies: BTreeMap<String, String>,
}

/// Run the resolve command
pub fn run_resolve(
    ctx: &Context,
    path: &Path,
    engine: Option<&str>,
    platforms: &[String],
    json: bool,
) -> Result<()> {
    let root = PluginManifest::load(path)?;
    let engine = super::engine_version(ctx, engine)?;
    let resolved = ctx.session.resolve(&root, &engine, platforms)?;

    let view = ResolutionView {
        plugin: root.name().to_string(),
        version: root.version().to_string(),
        engine: engine.to_string(),
        platforms: resolved.platforms().iter().cloned().collect(),
        dependencies: resolved
            .versions()
            .into_iter()
            .map(|(name, version)| (name, version.to_string()))
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!(
        "{} {} for engine {} ({})",
        view.plugin.cyan().bold(),
        view.version,
        view.engine,
        view.platforms.join(", ")
    );
    if view.dependencies.is_empty() {
        println!("  No dependencies.");
    }
    for (name, version) in &view.dependencies {
        println!("  {:<24} {}", name.green(), version);
    }
    Ok(())
}
