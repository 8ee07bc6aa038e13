//! Command implementations for upm-cli

pub mod build;
pub mod engines;
pub mod install;
pub mod resolve;
pub mod search;
pub mod upload;

pub use build::run_build;
pub use engines::run_engines;
pub use install::{run_install, run_list, run_uninstall};
pub use resolve::run_resolve;
pub use search::run_search;
pub use upload::run_upload;

use upm_resolve::EngineVersion;

use crate::context::Context;
use crate::error::Result;

/// The explicitly requested engine version, or the default engine's.
fn engine_version(ctx: &Context, requested: Option<&str>) -> Result<EngineVersion> {
    match requested {
        Some(version) => Ok(EngineVersion::parse(version)?),
        None => Ok(ctx.session.engines().select(None)?.version),
    }
}
