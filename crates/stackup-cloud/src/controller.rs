//! Run controller: the single entry point composing every component
//!
//! ```text
//! [pre-clean teardown] ─▶ settle ─▶ compute tier ─▶ await instance
//!        ─▶ grace period ─▶ load-balancer tier ─▶ RunReport
//! ```

use crate::error::{CloudError, Result};
use crate::locator::ResourceLocator;
use crate::payload::BootPayload;
use crate::provider::CloudProvider;
use crate::reconcile::{ReconcileAction, Reconciler};
use crate::report::{Endpoints, RunFailure, RunReport, Stage, TeardownReport};
use crate::resource::{ExternalId, ResourceKind};
use crate::sequencer::DependencySequencer;
use crate::teardown::{TeardownCoordinator, TeardownTiming};
use crate::topology::{DeploymentConfig, DeploymentTopology};
use crate::waiter::{Readiness, ReadinessWaiter, WaitConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Waits and switches that shape a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    /// Tear everything down before provisioning
    pub pre_clean: bool,
    pub settle_after_clean: Duration,
    pub instance_timeout: Duration,
    /// Time the freshly booted instance gets to start its application
    pub grace_period: Duration,
    pub settle_after_load_balancer: Duration,
    pub settle_after_instance: Duration,
    /// Continue to the load-balancer tier when the instance wait times out
    pub proceed_on_timeout: bool,
    pub poll_initial_delay: Duration,
    pub poll_max_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            pre_clean: true,
            settle_after_clean: Duration::from_secs(10),
            instance_timeout: Duration::from_secs(600),
            grace_period: Duration::from_secs(300),
            settle_after_load_balancer: Duration::from_secs(10),
            settle_after_instance: Duration::from_secs(30),
            proceed_on_timeout: true,
            poll_initial_delay: Duration::from_secs(2),
            poll_max_delay: Duration::from_secs(15),
        }
    }
}

impl Timing {
    /// Near-zero waits for rehearsals against the simulated provider
    pub fn rehearsal() -> Self {
        Self {
            settle_after_clean: Duration::ZERO,
            instance_timeout: Duration::from_secs(5),
            grace_period: Duration::ZERO,
            settle_after_load_balancer: Duration::ZERO,
            settle_after_instance: Duration::from_secs(1),
            poll_initial_delay: Duration::from_millis(10),
            poll_max_delay: Duration::from_millis(100),
            ..Self::default()
        }
    }

    pub fn teardown_timing(&self) -> TeardownTiming {
        TeardownTiming {
            settle_after_load_balancer: self.settle_after_load_balancer,
            settle_after_instance: self.settle_after_instance,
        }
    }

    pub fn wait_config(&self) -> WaitConfig {
        WaitConfig {
            initial_delay: self.poll_initial_delay,
            max_delay: self.poll_max_delay,
            timeout: self.instance_timeout,
        }
    }
}

/// Presence of one topology resource, from a read-only lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub kind: ResourceKind,
    pub name: String,
    pub id: Option<ExternalId>,
    pub endpoint: Option<String>,
}

/// Drives one deployment against one provider
pub struct RunController {
    provider: Arc<dyn CloudProvider>,
    config: DeploymentConfig,
    topology: DeploymentTopology,
    payload: BootPayload,
    cancel: CancellationToken,
}

impl RunController {
    /// Validates `config` and derives the topology
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        config: DeploymentConfig,
        payload: BootPayload,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let topology = DeploymentTopology::from_config(&config)?;
        Ok(Self {
            provider,
            config,
            topology,
            payload,
            cancel,
        })
    }

    pub fn topology(&self) -> &DeploymentTopology {
        &self.topology
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    fn locator(&self) -> ResourceLocator {
        ResourceLocator::new(self.provider.clone(), self.config.retry.clone())
            .with_cancel(self.cancel.clone())
    }

    fn waiter(&self) -> ReadinessWaiter {
        ReadinessWaiter::new(
            self.provider.clone(),
            self.cancel.clone(),
            self.config.timing.wait_config(),
        )
    }

    fn sequencer(&self) -> DependencySequencer {
        DependencySequencer::new(
            self.provider.clone(),
            Reconciler::new(self.provider.clone(), self.locator()),
            self.config.retry.clone(),
            self.cancel.clone(),
        )
    }

    fn coordinator(&self) -> TeardownCoordinator {
        TeardownCoordinator::new(
            self.provider.clone(),
            self.locator(),
            self.waiter(),
            self.config.retry.clone(),
            self.config.timing.teardown_timing(),
        )
    }

    /// Delete every topology resource
    pub async fn teardown(&self) -> TeardownReport {
        self.coordinator().teardown(&self.topology).await
    }

    /// Look up every topology resource without changing anything
    pub async fn status(&self) -> Result<Vec<StatusEntry>> {
        let locator = self.locator();
        let mut entries = Vec::new();
        for spec in self.topology.specs() {
            let found = locator.locate(spec).await?;
            entries.push(StatusEntry {
                kind: spec.kind(),
                name: spec.name.clone(),
                id: found.as_ref().map(|l| l.id.clone()),
                endpoint: found.and_then(|l| l.endpoint),
            });
        }
        Ok(entries)
    }

    /// Provision the deployment and report what was resolved.
    ///
    /// Never fails as a whole: a stopped run is a report with `failure` set
    /// and every resource resolved before the stop.
    pub async fn run(&self) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport::new(&self.config.name, self.provider.name());

        info!(
            deployment = %self.config.name,
            provider = %self.provider.name(),
            region = %self.config.region,
            "Starting run"
        );

        if let Err((stage, e)) = self.provision(&mut report).await {
            warn!(stage = %stage, class = %e.class(), error = %e, "Run stopped");
            report.failure = Some(RunFailure::new(stage, &e));
        }

        // Endpoints come from whatever was resolved, so a stopped run still
        // shows the addresses of the resources it left in place.
        let endpoint_of = |kind| report.find(kind).and_then(|r| r.endpoint.clone());
        let dns_name = endpoint_of(ResourceKind::LoadBalancer);
        let public_ip = endpoint_of(ResourceKind::ComputeInstance);
        report.endpoints = Endpoints::build(&self.config, dns_name.as_deref(), public_ip.as_deref());
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            deployment = %self.config.name,
            created = report.created(),
            reused = report.reused(),
            success = report.is_success(),
            "Run finished"
        );
        report
    }

    async fn provision(&self, report: &mut RunReport) -> std::result::Result<(), (Stage, CloudError)> {
        let timing = &self.config.timing;
        let waiter = self.waiter();
        let sequencer = self.sequencer();

        if timing.pre_clean {
            let clean = self.teardown().await;
            let deleted_any = !clean.deleted().is_empty();
            let interrupted = clean.interrupted;
            if !clean.failed().is_empty() {
                warn!(summary = %clean, "Pre-clean left resources behind, they will be reused");
            }
            report.pre_clean = Some(clean);

            if interrupted {
                return Err((
                    Stage::PreClean,
                    CloudError::Cancelled("pre-clean teardown".to_string()),
                ));
            }
            if deleted_any {
                waiter
                    .settle(timing.settle_after_clean, "pre-clean")
                    .await
                    .map_err(|e| (Stage::PreClean, e))?;
            }
        }

        let compute = sequencer
            .provision_compute(&self.topology, &self.payload, report)
            .await
            .map_err(|e| (Stage::Compute, e))?;

        let readiness = waiter
            .await_ready(
                ResourceKind::ComputeInstance,
                &compute.instance,
                timing.instance_timeout,
            )
            .await
            .map_err(|e| (Stage::Readiness, e))?;
        report.instance_readiness = Some(readiness.clone());

        match readiness {
            Readiness::Ready { endpoint } => {
                if let Some(ip) = endpoint
                    && let Some(record) = report
                        .resources
                        .iter_mut()
                        .find(|r| r.kind == ResourceKind::ComputeInstance)
                {
                    record.endpoint = Some(ip);
                }
            }
            Readiness::TimedOut { waited } if timing.proceed_on_timeout => {
                warn!(
                    waited_secs = waited.as_secs(),
                    "Instance not running yet, continuing with the load balancer"
                );
            }
            Readiness::TimedOut { waited } => {
                return Err((
                    Stage::Readiness,
                    CloudError::Timeout(format!(
                        "instance {} not running after {}s",
                        compute.instance,
                        waited.as_secs()
                    )),
                ));
            }
        }

        // A reused instance booted in an earlier run.
        let fresh_instance = report
            .find(ResourceKind::ComputeInstance)
            .is_some_and(|r| r.action == ReconcileAction::Created);
        if fresh_instance {
            waiter
                .settle(timing.grace_period, "application boot grace period")
                .await
                .map_err(|e| (Stage::Readiness, e))?;
        }

        sequencer
            .provision_balancer(&self.topology, &compute, report)
            .await
            .map_err(|e| (Stage::Balancer, e))?;

        Ok(())
    }
}
