//! Registry search

use colored::Colorize;

use crate::context::Context;
use crate::error::Result;

/// Run the search command
pub fn run_search(ctx: &Context, term: &str, json: bool) -> Result<()> {
    let results = ctx.session.search(term)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }
    for summary in &results {
        match &summary.description {
            Some(description) => println!("{}  {}", summary.name.cyan().bold(), description.dimmed()),
            None => println!("{}", summary.name.cyan().bold()),
        }
        for version in summary.versions.iter().rev() {
            println!("  - {}", version);
        }
    }
    Ok(())
}
