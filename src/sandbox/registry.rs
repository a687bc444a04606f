//! # Sandbox Cleanup Registry
//!
//! Append-only record of every sandbox database name handed out by a harness.
//! One finalizer drops them all at the end of the run.
//!
//! Finalization happens at most once, either explicitly through
//! [`CleanupRegistry::finalize`] or, as a fallback, when the last registry
//! handle is dropped. The fallback blocks on a helper thread so it also works
//! from inside a runtime that is shutting down.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use crate::database::DatabaseAdmin;

/// Outcome of a finalization sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Names dropped successfully, in drop order
    pub dropped: Vec<String>,
    /// Names whose drop failed, with the error text
    pub failed: Vec<(String, String)>,
}

impl CleanupReport {
    pub fn attempted(&self) -> usize {
        self.dropped.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Default)]
struct RegistryInner {
    names: Mutex<Vec<String>>,
    finalizer: OnceLock<Arc<dyn DatabaseAdmin>>,
    finalized: AtomicBool,
}

/// Shared handle; clones refer to the same registry
#[derive(Clone, Default)]
pub struct CleanupRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("names", &*self.inner.names.lock())
            .field("has_finalizer", &self.has_finalizer())
            .field("finalized", &self.is_finalized())
            .finish()
    }
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a database name for the final sweep. Duplicates are kept.
    pub fn register(&self, name: impl Into<String>) {
        let name = name.into();
        if self.is_finalized() {
            warn!(database = %name, "Registering sandbox after registry was finalized; it will not be dropped");
        }
        self.inner.names.lock().push(name);
    }

    /// Every registered name, in registration order
    pub fn names(&self) -> Vec<String> {
        self.inner.names.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.names.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Install the admin used to drop databases at finalization.
    ///
    /// Only the first install takes effect; returns whether this call installed it.
    pub fn install_finalizer(&self, admin: Arc<dyn DatabaseAdmin>) -> bool {
        self.inner.finalizer.set(admin).is_ok()
    }

    pub fn has_finalizer(&self) -> bool {
        self.inner.finalizer.get().is_some()
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.finalized.load(Ordering::SeqCst)
    }

    /// Drop every registered database, in order, ignoring individual failures.
    ///
    /// Runs once; later calls return an empty report.
    pub async fn finalize(&self) -> CleanupReport {
        let Some(admin) = self.inner.finalizer.get().cloned() else {
            warn!(
                registered = self.len(),
                "No cleanup finalizer installed; sandbox databases left in place"
            );
            return CleanupReport::default();
        };

        if self.inner.finalized.swap(true, Ordering::SeqCst) {
            return CleanupReport::default();
        }

        let names = self.names();
        drop_all(admin.as_ref(), &names).await
    }
}

async fn drop_all(admin: &dyn DatabaseAdmin, names: &[String]) -> CleanupReport {
    let mut report = CleanupReport::default();

    for name in names {
        info!(database = %name, "dropping test db - {name}");
        match admin.drop_database(name).await {
            Ok(()) => report.dropped.push(name.clone()),
            Err(e) => {
                warn!(database = %name, error = %e, "Failed to drop test database");
                report.failed.push((name.clone(), e.to_string()));
            }
        }
    }

    info!(
        attempted = report.attempted(),
        failed = report.failed.len(),
        "Sandbox cleanup finished"
    );
    report
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        if *self.finalized.get_mut() {
            return;
        }
        let names = std::mem::take(self.names.get_mut());
        if names.is_empty() {
            return;
        }
        let Some(admin) = self.finalizer.get().cloned() else {
            warn!(?names, "Registry dropped without a finalizer; sandbox databases left in place");
            return;
        };

        let sweep = std::thread::spawn(move || {
            match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(drop_all(admin.as_ref(), &names)),
                Err(e) => {
                    warn!(error = %e, "Could not start cleanup runtime");
                    CleanupReport::default()
                }
            }
        });

        if sweep.join().is_err() {
            warn!("Sandbox cleanup thread panicked");
        }
    }
}
