//! Publish a plugin to the registry

use std::path::{Path, PathBuf};

use colored::Colorize;

use crate::context::Context;
use crate::error::Result;

/// Run the upload command
pub fn run_upload(ctx: &Context, path: &Path, icon: Option<&Path>, patches: &[PathBuf]) -> Result<()> {
    let receipt = ctx.session.upload(path, icon, patches)?;
    println!(
        "{} {} {} ({})",
        "Published".green().bold(),
        receipt.name,
        receipt.version,
        receipt.checksum.dimmed()
    );
    Ok(())
}
