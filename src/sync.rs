//! Run-scoped promotion state and the promotion entry point
//!
//! A [SyncContext] is built in two phases: manifests are validated and
//! their registry declarations merged, then every registry involved is
//! read in parallel. Reads finish entirely before planning starts;
//! afterward the inventory is never written again, so the planner and
//! pipeline share it without locking. Only the error list stays mutable
//! for the rest of the run.

use crate::{
    errors::{ManifestError, PromoteError},
    image::RegistryName,
    inventory::MasterInventory,
    manifest::{merge_registries, Manifest, RegistryContext},
    pipeline::{run_plan, PromotionResults},
    plan::{plan, PlanOptions},
    registry::{DryRun, InventorySource, OpExecutor},
};
use futures_util::{stream::FuturesUnordered, StreamExt};
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};
use tokio_util::sync::CancellationToken;

/// Worker-pool size used when nothing else is configured
pub const DEFAULT_THREADS: usize = 10;

/// Options for one promotion run
#[derive(Clone, Copy, Debug)]
pub struct SyncOptions {
    /// Parallelism for inventory reads and edge execution
    pub threads: usize,

    /// Produce and log operations without running any of them
    pub dry_run: bool,

    /// Authenticate writes with each destination's declared service account
    pub use_service_account: bool,

    /// Allow edges that reassign an existing tag to a different digest
    pub permit_moves: bool,

    /// Delete destination digests that no manifest references
    pub thin: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            threads: DEFAULT_THREADS,
            dry_run: false,
            use_service_account: false,
            permit_moves: false,
            thin: false,
        }
    }
}

/// Everything one promotion run carries: manifests, observed inventories,
/// options, and the errors accumulated along the way
pub struct SyncContext {
    manifests: Vec<Manifest>,
    registries: Vec<RegistryContext>,
    inv: MasterInventory,
    options: SyncOptions,
    errors: Mutex<Vec<PromoteError>>,
}

impl SyncContext {
    /// Validate manifests and merge their registry declarations
    ///
    /// This is phase one; nothing talks to the network yet. A manifest
    /// without exactly one source, or two manifests disagreeing about a
    /// registry's service account, abort construction.
    pub fn new(manifests: Vec<Manifest>, options: SyncOptions) -> Result<Self, ManifestError> {
        for manifest in &manifests {
            manifest.validate()?;
        }
        let registries = merge_registries(&manifests)?;
        Ok(SyncContext {
            manifests,
            registries,
            inv: MasterInventory::new(),
            options,
            errors: Mutex::new(Vec::new()),
        })
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Every registry any manifest references, deduplicated
    pub fn registries(&self) -> &[RegistryContext] {
        &self.registries
    }

    /// The observed inventory populated by [SyncContext::read_inventories]
    pub fn inventory(&self) -> &MasterInventory {
        &self.inv
    }

    pub fn record_error(&self, error: PromoteError) {
        self.errors.lock().expect("error lock poisoned").push(error);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.lock().expect("error lock poisoned").is_empty()
    }

    /// Drain the accumulated errors for reporting
    pub fn take_errors(&self) -> Vec<PromoteError> {
        std::mem::take(&mut *self.errors.lock().expect("error lock poisoned"))
    }

    /// Phase two: observe every registry the manifests reference
    ///
    /// Registries are read concurrently, bounded by the configured thread
    /// count. A registry that cannot be read is recorded and skipped; the
    /// planner will then drop the affected edges for want of observed
    /// source content rather than promote on faith.
    pub async fn read_inventories(&mut self, source: &dyn InventorySource) {
        let names: BTreeSet<RegistryName> = self
            .registries
            .iter()
            .map(|registry| registry.name.clone())
            .collect();
        let threads = self.options.threads.max(1);

        let mut names = names.into_iter();
        let mut pending = FuturesUnordered::new();
        loop {
            while pending.len() < threads {
                match names.next() {
                    Some(name) => pending.push(async move {
                        let observed = source.read_registry(&name).await;
                        (name, observed)
                    }),
                    None => break,
                }
            }
            match pending.next().await {
                Some((name, Ok(observed))) => {
                    log::debug!("observed {} images in {}", observed.len(), name);
                    self.inv.set_registry(name, observed);
                }
                Some((name, Err(err))) => {
                    log::error!("failed to read inventory of {}: {}", name, err);
                    self.record_error(PromoteError::Read {
                        registry: name,
                        source: err,
                    });
                }
                None => break,
            }
        }
    }

    /// Read, plan, and execute one promotion run
    ///
    /// Fatal manifest or plan problems return an error before any mutation.
    /// Per-edge problems are recorded on the context and reflected in the
    /// returned results; the aggregate verdict is
    /// [SyncContext::has_errors]. In dry-run mode the supplied executor is
    /// ignored and operations are only logged.
    pub async fn promote(
        &mut self,
        source: &dyn InventorySource,
        executor: Arc<dyn OpExecutor>,
        cancel: &CancellationToken,
    ) -> Result<PromotionResults, PromoteError> {
        self.read_inventories(source).await;

        let options = PlanOptions {
            permit_moves: self.options.permit_moves,
            thin: self.options.thin,
        };
        let (plan, dropped) = plan(&self.manifests, &self.inv, options)?;
        for error in dropped {
            self.record_error(error);
        }
        log::info!("planned {} edges", plan.len());

        let executor: Arc<dyn OpExecutor> = if self.options.dry_run {
            Arc::new(DryRun)
        } else {
            executor
        };
        let results = run_plan(&plan, &self.inv, executor, self.options.threads, cancel).await;
        for error in results.errors() {
            self.record_error(error);
        }
        Ok(results)
    }
}
