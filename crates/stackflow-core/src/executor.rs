//! Plan execution
//!
//! Batches run strictly in sequence. Within a batch every stack is dispatched
//! on its own task, optionally capped by a semaphore, and the executor waits
//! for all of them before starting the next batch. A stack whose required
//! predecessor did not succeed is skipped without being dispatched.

use crate::context::ExecutionContext;
use crate::error::ErrorKind;
use crate::model::StackId;
use crate::plan::Plan;
use crate::resolver::ResolverCache;
use crate::result::{PlanResult, SkipReason, StackOutcome};
use crate::stack::Stack;
use stackflow_cloud::StackBackend;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

type Outcomes = Arc<Mutex<BTreeMap<StackId, StackOutcome>>>;

pub struct Executor {
    backend: Arc<dyn StackBackend>,
    ctx: ExecutionContext,
}

impl Executor {
    pub fn new(backend: Arc<dyn StackBackend>, ctx: &ExecutionContext) -> Self {
        Self {
            backend,
            ctx: ctx.clone(),
        }
    }

    /// Run every batch of `plan` and collect one outcome per stack
    #[instrument(skip_all, fields(command = %plan.command(), batches = plan.batches().len()))]
    pub async fn run(&self, plan: &Plan) -> PlanResult {
        let command = plan.command();
        let outcomes: Outcomes = Arc::new(Mutex::new(BTreeMap::new()));

        // Only changes made by this run have to land before dependents read them.
        // Without dependency ordering, resolvers read whatever is live.
        let pending = if command.is_mutating() && !plan.ignores_dependencies() {
            plan.members().clone()
        } else {
            BTreeSet::new()
        };
        let resolver = Arc::new(
            ResolverCache::new(self.backend.clone(), plan.graph().clone()).with_pending(pending),
        );
        let limiter = self.ctx.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));

        for batch in plan.batches() {
            info!(
                batch = batch.index,
                stacks = batch.stacks.len(),
                "Dispatching batch"
            );
            let mut tasks = JoinSet::new();

            for id in &batch.stacks {
                if self.ctx.cancel.is_cancelled() {
                    debug!(stack = %id, "Cancelled before dispatch");
                    record(&outcomes, id, skipped(SkipReason::Cancelled)).await;
                    continue;
                }

                if let Some(blocker) = failed_predecessor(plan, id, &outcomes).await {
                    warn!(stack = %id, upstream = %blocker, "Skipping stack, upstream did not succeed");
                    record(&outcomes, id, skipped(SkipReason::UpstreamFailed(blocker))).await;
                    continue;
                }

                let Some(config) = plan.graph().get(id).cloned() else {
                    record(&outcomes, id, internal_failure("stack missing from graph")).await;
                    continue;
                };

                let stack = Stack::new(config, self.backend.clone(), &self.ctx);
                let id = id.clone();
                let outcomes = Arc::clone(&outcomes);
                let resolver = Arc::clone(&resolver);
                let limiter = limiter.clone();
                let cancel = self.ctx.cancel.clone();

                tasks.spawn(async move {
                    let _permit = match limiter {
                        Some(semaphore) => tokio::select! {
                            permit = semaphore.acquire_owned() => permit.ok(),
                            _ = cancel.cancelled() => {
                                record(&outcomes, &id, skipped(SkipReason::Cancelled)).await;
                                return;
                            }
                        },
                        None => None,
                    };

                    debug!(stack = %id, "Running {}", command);
                    let outcome = match stack.run(command, &resolver).await {
                        Ok(value) => {
                            resolver.mark_completed(&id).await;
                            info!(stack = %id, "Stack {} succeeded", command);
                            StackOutcome::Succeeded { value }
                        }
                        Err(e) => {
                            error!(stack = %id, kind = %e.kind(), error = %e, "Stack {} failed", command);
                            StackOutcome::failed(&e)
                        }
                    };
                    record(&outcomes, &id, outcome).await;
                });
            }

            // Batch barrier
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Stack task aborted");
                }
            }

            let mut recorded = outcomes.lock().await;
            for id in &batch.stacks {
                recorded
                    .entry(id.clone())
                    .or_insert_with(|| internal_failure("stack task aborted"));
            }
        }

        let stacks = outcomes.lock().await.clone();
        let result = PlanResult {
            command,
            batches: plan.batches().to_vec(),
            stacks,
        };
        let summary = result.summary();
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Plan finished"
        );
        result
    }
}

async fn record(outcomes: &Outcomes, id: &StackId, outcome: StackOutcome) {
    outcomes.lock().await.insert(id.clone(), outcome);
}

/// First required predecessor of `id` that did not succeed
async fn failed_predecessor(plan: &Plan, id: &StackId, outcomes: &Outcomes) -> Option<StackId> {
    let recorded = outcomes.lock().await;
    plan.predecessors(id)
        .into_iter()
        .find(|p| !recorded.get(*p).is_some_and(StackOutcome::is_success))
        .cloned()
}

fn skipped(reason: SkipReason) -> StackOutcome {
    StackOutcome::Skipped { reason }
}

fn internal_failure(message: &str) -> StackOutcome {
    StackOutcome::Failed {
        kind: ErrorKind::Provider,
        message: message.to_string(),
    }
}
