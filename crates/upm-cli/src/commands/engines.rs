//! Show discovered engines

use colored::Colorize;

use crate::context::Context;
use crate::error::Result;

/// Run the engines command
pub fn run_engines(ctx: &Context, json: bool) -> Result<()> {
    let engines = ctx.session.engines().engines();

    if json {
        println!("{}", serde_json::to_string_pretty(engines)?);
        return Ok(());
    }

    if engines.is_empty() {
        println!("No engines found.");
        return Ok(());
    }
    for engine in engines {
        println!(
            "{:<28} {}",
            engine.display_name().cyan(),
            engine.root.display().to_string().dimmed()
        );
    }
    Ok(())
}
