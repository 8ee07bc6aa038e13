//! Build a plugin into the binary cache

use std::path::Path;

use colored::Colorize;
use upm_build::{BuildReport, Resolution};
use upm_resolve::EngineVersion;

use crate::context::Context;
use crate::error::{CliError, Result};

/// Lines of tool output shown per failed unit.
const OUTPUT_TAIL: usize = 20;

/// Run the build command
pub fn run_build(
    ctx: &Context,
    path: &Path,
    engines: &[String],
    platforms: &[String],
    publish: bool,
) -> Result<()> {
    let engines = engines
        .iter()
        .map(|e| EngineVersion::parse(e))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let outcome = ctx.block_on(ctx.session.build(path, &engines, platforms))??;
    print_report(&outcome.report);

    if outcome.report.is_success() {
        println!(
            "{} {} unit(s): {} built, {} fetched, {} cached, {} joined",
            "Done".green().bold(),
            outcome.report.completed.len(),
            outcome.report.toolchain_invocations,
            outcome.report.downloaded.len(),
            outcome.report.hits(),
            outcome.report.joined()
        );
        if publish {
            let published = ctx.session.publish_packages(&outcome.report)?;
            println!("{} {} package(s)", "Published".green().bold(), published.len());
        }
        Ok(())
    } else {
        Err(CliError::user(format!(
            "{} unit(s) failed, {} cancelled",
            outcome.report.failures.len(),
            outcome.report.cancelled.len()
        )))
    }
}

pub(crate) fn print_report(report: &BuildReport) {
    for completed in &report.completed {
        let tag = match completed.resolution {
            Resolution::Built if report.was_downloaded(&completed.unit) => "fetched".green(),
            Resolution::Built => "built ".green(),
            Resolution::Hit => "cached".cyan(),
            Resolution::Joined => "joined".cyan(),
        };
        println!("  {} {}", tag, completed.unit);
    }
    for failure in &report.failures {
        println!("  {} {}: {}", "failed".red().bold(), failure.unit, failure.error);
        if let Some(output) = failure.error.tool_output() {
            let lines: Vec<&str> = output.lines().collect();
            let start = lines.len().saturating_sub(OUTPUT_TAIL);
            for line in &lines[start..] {
                println!("      {}", line.dimmed());
            }
        }
    }
    for unit in &report.cancelled {
        println!("  {} {}", "skipped".yellow(), unit);
    }
}
