//! Bounded execution of promotion plans
//!
//! A classical fan-out/fan-in pool: one producer feeds edges into a channel
//! whose capacity equals the worker count, so huge plans never balloon in
//! memory; workers resolve each edge into its deferred operations and run
//! them through whatever [OpExecutor] the caller supplied; a collector
//! folds the outcomes into a [PromotionResults]. Edges are independent by
//! construction, so no ordering is guaranteed between them, while the
//! copy-before-tag order inside one edge is strict.

use crate::{
    errors::{PromoteError, RegistryError},
    inventory::MasterInventory,
    plan::{Plan, PromotionEdge},
    registry::{edge_ops, OpExecutor},
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// What happened to every edge of one plan
#[derive(Debug, Default)]
pub struct PromotionResults {
    pub succeeded: Vec<PromotionEdge>,
    pub failed: Vec<(PromotionEdge, RegistryError)>,
    pub cancelled: Vec<PromotionEdge>,
}

impl PromotionResults {
    /// Did every edge run to completion?
    pub fn ok(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty()
    }

    /// Per-edge errors in reportable form
    pub fn errors(&self) -> Vec<PromoteError> {
        let mut errors = Vec::new();
        for (edge, err) in &self.failed {
            errors.push(PromoteError::Exec {
                edge: edge.clone(),
                message: err.to_string(),
            });
        }
        for edge in &self.cancelled {
            errors.push(PromoteError::Cancelled(edge.clone()));
        }
        errors
    }
}

enum Outcome {
    Succeeded(PromotionEdge),
    Failed(PromotionEdge, RegistryError),
    Cancelled(PromotionEdge),
}

/// Run every operation one edge needs, in order
///
/// A failed copy is terminal for the edge; the tag binding that depended on
/// it is never attempted.
async fn run_edge(
    executor: &dyn OpExecutor,
    edge: &PromotionEdge,
    dst_has_digest: bool,
) -> Result<(), RegistryError> {
    for op in edge_ops(edge, dst_has_digest) {
        log::info!("applying {}", op);
        executor.execute(&op).await?;
    }
    Ok(())
}

/// Execute a plan with bounded parallelism
///
/// Every edge runs exactly once. Failures are per edge; the rest of the
/// plan continues around them and nothing is rolled back. After
/// cancellation, in-flight edges finish and queued edges are reported as
/// cancelled rather than failed.
pub async fn run_plan(
    plan: &Plan,
    inv: &MasterInventory,
    executor: Arc<dyn OpExecutor>,
    threads: usize,
    cancel: &CancellationToken,
) -> PromotionResults {
    let threads = threads.max(1);
    let work: Vec<(PromotionEdge, bool)> = plan
        .iter()
        .map(|edge| {
            let dst_has = inv.has_digest(&edge.dst_registry, &edge.dst_image, &edge.digest);
            (edge.clone(), dst_has)
        })
        .collect();
    log::info!("executing {} edges across {} workers", work.len(), threads);

    let (edge_tx, edge_rx) = mpsc::channel::<(PromotionEdge, bool)>(threads);
    let edge_rx = Arc::new(Mutex::new(edge_rx));
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<Outcome>(threads);

    let producer = tokio::spawn(async move {
        for item in work {
            if edge_tx.send(item).await.is_err() {
                break;
            }
        }
    });

    let mut workers = Vec::with_capacity(threads);
    for _ in 0..threads {
        let edge_rx = edge_rx.clone();
        let outcome_tx = outcome_tx.clone();
        let executor = executor.clone();
        let cancel = cancel.clone();
        workers.push(tokio::spawn(async move {
            loop {
                let next = { edge_rx.lock().await.recv().await };
                let (edge, dst_has) = match next {
                    Some(item) => item,
                    None => break,
                };
                let outcome = if cancel.is_cancelled() {
                    log::warn!("discarding queued edge {}", edge);
                    Outcome::Cancelled(edge)
                } else {
                    match run_edge(executor.as_ref(), &edge, dst_has).await {
                        Ok(()) => Outcome::Succeeded(edge),
                        Err(err) => {
                            log::error!("edge {} failed: {}", edge, err);
                            Outcome::Failed(edge, err)
                        }
                    }
                };
                if outcome_tx.send(outcome).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(outcome_tx);

    let mut results = PromotionResults::default();
    while let Some(outcome) = outcome_rx.recv().await {
        match outcome {
            Outcome::Succeeded(edge) => results.succeeded.push(edge),
            Outcome::Failed(edge, err) => results.failed.push((edge, err)),
            Outcome::Cancelled(edge) => results.cancelled.push(edge),
        }
    }

    if let Err(err) = producer.await {
        log::error!("producer task failed: {}", err);
    }
    for worker in workers {
        if let Err(err) = worker.await {
            log::error!("worker task failed: {}", err);
        }
    }

    // deterministic reporting regardless of completion order
    results.succeeded.sort();
    results.failed.sort_by(|(left, _), (right, _)| left.cmp(right));
    results.cancelled.sort();
    results
}
