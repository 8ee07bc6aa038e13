//! Session setup shared by every command

use std::future::Future;
use std::path::Path;

use upm_core::{Session, SettingsResolver};

use crate::error::Result;

pub struct Context {
    pub session: Session,
}

impl Context {
    /// Resolve settings from the working directory and open a session.
    pub fn open(config: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let mut resolver = SettingsResolver::new(&cwd);
        if let Some(path) = config {
            resolver = resolver.with_explicit(path);
        }
        let settings = resolver.resolve()?;
        tracing::debug!(
            registry = %settings.registry_dir.display(),
            cache = %settings.cache_dir.display(),
            "Resolved settings"
        );
        Ok(Self {
            session: Session::open(settings)?,
        })
    }

    /// Drive `future` to completion. Ctrl-C cancels the session, which
    /// stops dispatch and kills running builds.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let cancel = self.session.cancellation();
        Ok(runtime.block_on(async move {
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, cancelling");
                    cancel.cancel();
                }
            });
            future.await
        }))
    }
}
