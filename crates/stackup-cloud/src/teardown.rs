//! Reverse-order deletion of every topology resource

use crate::error::Result;
use crate::locator::ResourceLocator;
use crate::provider::CloudProvider;
use crate::report::TeardownReport;
use crate::resource::{ExternalId, ResourceHandle, ResourceKind, ResourceSpec};
use crate::retry::RetryPolicy;
use crate::topology::DeploymentTopology;
use crate::waiter::{Readiness, ReadinessWaiter};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Settle periods between dependent deletions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownTiming {
    pub settle_after_load_balancer: Duration,
    /// Upper bound on waiting for a terminated instance to disappear
    pub settle_after_instance: Duration,
}

impl Default for TeardownTiming {
    fn default() -> Self {
        Self {
            settle_after_load_balancer: Duration::from_secs(10),
            settle_after_instance: Duration::from_secs(30),
        }
    }
}

/// Deletes a deployment dependents-first.
///
/// Every resource ends up as exactly one of deleted, already absent or
/// failed. A failure is recorded and the next resource is still attempted;
/// only cancellation stops the walk early.
pub struct TeardownCoordinator {
    provider: Arc<dyn CloudProvider>,
    locator: ResourceLocator,
    waiter: ReadinessWaiter,
    retry: RetryPolicy,
    timing: TeardownTiming,
}

enum Step {
    Continue,
    Interrupted,
}

impl TeardownCoordinator {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        locator: ResourceLocator,
        waiter: ReadinessWaiter,
        retry: RetryPolicy,
        timing: TeardownTiming,
    ) -> Self {
        Self {
            provider,
            locator,
            waiter,
            retry,
            timing,
        }
    }

    pub async fn teardown(&self, topology: &DeploymentTopology) -> TeardownReport {
        let started = Instant::now();
        let mut report = TeardownReport::new();
        info!(deployment = %topology.name, "Tearing down deployment");

        for spec in topology.teardown_order() {
            if self.waiter.cancel_token().is_cancelled() {
                report.interrupted = true;
                break;
            }
            if let Step::Interrupted = self.remove(spec, &mut report).await {
                report.interrupted = true;
                break;
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(deployment = %topology.name, summary = %report, "Teardown finished");
        report
    }

    async fn remove(&self, spec: &ResourceSpec, report: &mut TeardownReport) -> Step {
        let kind = spec.kind();

        // Instances can share a Name tag; every one of them holds the
        // security group, so all are removed.
        let found = match self.locator.locate_all(spec).await {
            Ok(found) => found,
            Err(e) if e.is_cancelled() => return Step::Interrupted,
            Err(e) => {
                warn!(kind = %kind, name = %spec.name, error = %e, "Lookup failed during teardown");
                report.add_failure(kind, &spec.name, None, &e);
                return Step::Continue;
            }
        };
        if found.is_empty() {
            info!(kind = %kind, name = %spec.name, "Already absent");
            report.add_absent(kind, &spec.name, None);
            return Step::Continue;
        }

        let mut deleted = Vec::new();
        for located in found {
            let mut handle = ResourceHandle::for_spec(spec);
            handle.activate(located);
            handle.begin_delete();
            let Some(id) = handle.id.clone() else {
                continue;
            };

            let result = self
                .retry
                .run(&format!("delete {}", spec.key()), self.waiter.cancel_token(), || {
                    self.provider.delete(kind, &id)
                })
                .await;

            match result {
                Ok(()) => {
                    handle.mark_absent();
                    info!(kind = %kind, name = %spec.name, id = %id, "Deleted");
                    report.add_deleted(kind, &spec.name, id.clone());
                    deleted.push(id);
                }
                Err(e) if e.is_not_found() => {
                    handle.mark_absent();
                    info!(kind = %kind, name = %spec.name, "Disappeared before deletion");
                    report.add_absent(kind, &spec.name, Some(id));
                }
                Err(e) if e.is_cancelled() => return Step::Interrupted,
                Err(e) => {
                    warn!(kind = %kind, name = %spec.name, id = %id, error = %e, "Deletion failed");
                    report.add_failure(kind, &spec.name, Some(id), &e);
                }
            }
        }
        if deleted.is_empty() {
            return Step::Continue;
        }

        // Dependents need a moment to let go of what was just removed.
        let settled = match kind {
            ResourceKind::LoadBalancer => {
                self.waiter
                    .settle(self.timing.settle_after_load_balancer, "load balancer deletion")
                    .await
            }
            ResourceKind::ComputeInstance => self.await_termination(&deleted).await,
            _ => Ok(()),
        };

        match settled {
            Err(e) if e.is_cancelled() => Step::Interrupted,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Settle wait failed");
                Step::Continue
            }
            Ok(()) => Step::Continue,
        }
    }

    /// Waits on each instance in turn, all within one settle budget
    async fn await_termination(&self, ids: &[ExternalId]) -> Result<()> {
        let deadline = Instant::now() + self.timing.settle_after_instance;
        for id in ids {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.waiter.await_terminated(id, remaining).await? {
                Readiness::TimedOut { waited } => {
                    warn!(
                        id = %id,
                        waited_secs = waited.as_secs(),
                        "Instance still shutting down, continuing teardown"
                    );
                }
                Readiness::Ready { .. } => info!(id = %id, "Instance terminated"),
            }
        }
        Ok(())
    }
}
