//! Single-flight cache access.
//!
//! [`CoalescingCache::get_or_build`] treats "look up, build on a miss, store"
//! as one operation per [`BuildUnit`]. While one is in flight, every other
//! caller asking for the same unit awaits the same shared future instead of
//! starting a build of its own.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use upm_resolve::BuildUnit;

use crate::cache::{Artifact, CacheEntry, ProvenanceStore};
use crate::error::{Error, Result};

/// How a unit's entry was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// Already in the store.
    Hit,
    /// Built by this caller.
    Built,
    /// Built by a concurrent caller this one waited on.
    Joined,
}

type FlightOutput = std::result::Result<(CacheEntry, bool), Arc<Error>>;
type Flight = Shared<BoxFuture<'static, FlightOutput>>;

/// A [`ProvenanceStore`] wrapped with per-unit request coalescing.
pub struct CoalescingCache {
    store: Arc<dyn ProvenanceStore>,
    in_flight: Mutex<HashMap<BuildUnit, (u64, Flight)>>,
    next_flight: AtomicU64,
}

impl CoalescingCache {
    pub fn new(store: Arc<dyn ProvenanceStore>) -> Self {
        Self {
            store,
            in_flight: Mutex::new(HashMap::new()),
            next_flight: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn ProvenanceStore> {
        &self.store
    }

    /// Number of units currently being looked up or built.
    pub fn in_flight(&self) -> usize {
        self.flights().len()
    }

    fn flights(&self) -> MutexGuard<'_, HashMap<BuildUnit, (u64, Flight)>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-coalesced hit check, run off the async executor.
    pub async fn hit(&self, unit: &BuildUnit) -> Result<Option<CacheEntry>> {
        let store = Arc::clone(&self.store);
        let owned = unit.clone();
        tokio::task::spawn_blocking(move || store.hit(&owned))
            .await
            .map_err(|e| task_error(unit, e))?
    }

    /// Return the entry for `unit`, running `build` and storing its artifact
    /// only when neither the store nor an in-flight request can supply it.
    ///
    /// `build` is dropped unused when this call joins another request.
    pub async fn get_or_build<F, Fut>(&self, unit: &BuildUnit, build: F) -> Result<(CacheEntry, Resolution)>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Artifact>> + Send + 'static,
    {
        let (id, flight, leader) = {
            let mut flights = self.flights();
            match flights.get(unit) {
                Some((id, flight)) => (*id, flight.clone(), false),
                None => {
                    let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                    let flight = fly(Arc::clone(&self.store), unit.clone(), build)
                        .boxed()
                        .shared();
                    flights.insert(unit.clone(), (id, flight.clone()));
                    (id, flight, true)
                }
            }
        };
        if !leader {
            tracing::debug!(unit = %unit, "Joining in-flight build");
        }

        let outcome = flight.await;

        {
            let mut flights = self.flights();
            if flights.get(unit).is_some_and(|(current, _)| *current == id) {
                flights.remove(unit);
            }
        }

        let (entry, from_store) = outcome.map_err(Error::from_shared)?;
        let resolution = match (from_store, leader) {
            (true, _) => Resolution::Hit,
            (false, true) => Resolution::Built,
            (false, false) => Resolution::Joined,
        };
        Ok((entry, resolution))
    }
}

async fn fly<F, Fut>(store: Arc<dyn ProvenanceStore>, unit: BuildUnit, build: F) -> FlightOutput
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Artifact>> + Send + 'static,
{
    let run = async {
        let lookup_store = Arc::clone(&store);
        let lookup_unit = unit.clone();
        let hit = tokio::task::spawn_blocking(move || lookup_store.hit(&lookup_unit))
            .await
            .map_err(|e| task_error(&unit, e))??;
        if let Some(entry) = hit {
            tracing::debug!(unit = %unit, id = %entry.id, "Cache hit");
            return Ok((entry, true));
        }

        tracing::debug!(unit = %unit, "Cache miss");
        let artifact = build().await?;
        let store_unit = unit.clone();
        let entry = tokio::task::spawn_blocking(move || store.store(&store_unit, &artifact))
            .await
            .map_err(|e| task_error(&unit, e))??;
        Ok((entry, false))
    };
    run.await.map_err(Arc::new)
}

fn task_error(unit: &BuildUnit, error: tokio::task::JoinError) -> Error {
    Error::Task {
        unit: unit.to_string(),
        message: error.to_string(),
    }
}
