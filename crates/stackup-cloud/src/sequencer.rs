//! Ordered provisioning of the two tiers
//!
//! ```text
//! compute tier:   KeyPair ─┐
//!                 SecurityGroup ─┴─▶ ComputeInstance
//!
//! balancer tier:  SecurityGroup ─▶ LoadBalancer ─▶ TargetGroup(s) ─▶ Listener
//!                                                   ▲ register ComputeInstance
//! ```
//!
//! Each step starts only after the previous one returned its identifier.
//! The first error aborts the tier without rollback; every resource resolved
//! up to that point is already in the [`RunReport`].

use crate::error::{CloudError, Result};
use crate::payload::BootPayload;
use crate::provider::{CloudProvider, Dependencies};
use crate::reconcile::{Reconciled, Reconciler};
use crate::report::RunReport;
use crate::resource::{ExternalId, ResourceConfig, ResourceSpec};
use crate::retry::RetryPolicy;
use crate::topology::DeploymentTopology;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Identifiers produced by the compute tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeOutputs {
    pub key_name: String,
    pub security_group: ExternalId,
    pub instance: ExternalId,
    pub public_ip: Option<String>,
}

/// Identifiers produced by the load-balancer tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalancerOutputs {
    pub load_balancer: ExternalId,
    pub dns_name: Option<String>,
    pub target_groups: BTreeMap<String, ExternalId>,
    pub listener: ExternalId,
}

pub struct DependencySequencer {
    provider: Arc<dyn CloudProvider>,
    reconciler: Reconciler,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl DependencySequencer {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        reconciler: Reconciler,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider,
            reconciler,
            retry,
            cancel,
        }
    }

    /// Stop before the next provider mutation once the run is cancelled
    fn checkpoint(&self, next: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            tracing::info!(next = %next, "Run cancelled, not starting next step");
            return Err(CloudError::Cancelled(format!("before {}", next)));
        }
        Ok(())
    }

    async fn reconcile(
        &self,
        spec: &ResourceSpec,
        deps: Dependencies,
        report: &mut RunReport,
    ) -> Result<(Reconciled, ExternalId)> {
        self.checkpoint(&spec.key())?;
        let reconciled = self.reconciler.reconcile(spec, deps).await?;
        let id = report.record(&reconciled)?;
        Ok((reconciled, id))
    }

    /// KeyPair and SecurityGroup, then the instance that needs both
    pub async fn provision_compute(
        &self,
        topology: &DeploymentTopology,
        payload: &BootPayload,
        report: &mut RunReport,
    ) -> Result<ComputeOutputs> {
        self.reconcile(&topology.key_pair, Dependencies::None, report)
            .await?;
        let (_, security_group) = self
            .reconcile(&topology.security_group, Dependencies::None, report)
            .await?;

        let (instance, instance_id) = self
            .reconcile(
                &topology.instance,
                Dependencies::Instance {
                    key_name: topology.key_pair.name.clone(),
                    security_group: security_group.clone(),
                    payload: payload.clone(),
                },
                report,
            )
            .await?;

        Ok(ComputeOutputs {
            key_name: topology.key_pair.name.clone(),
            security_group,
            instance: instance_id,
            public_ip: instance.handle.endpoint.clone(),
        })
    }

    /// Load balancer, target groups with the instance registered, listener
    pub async fn provision_balancer(
        &self,
        topology: &DeploymentTopology,
        compute: &ComputeOutputs,
        report: &mut RunReport,
    ) -> Result<BalancerOutputs> {
        let (lb, load_balancer) = self
            .reconcile(
                &topology.load_balancer,
                Dependencies::LoadBalancer {
                    security_group: compute.security_group.clone(),
                },
                report,
            )
            .await?;

        let mut target_groups = BTreeMap::new();
        for spec in &topology.target_groups {
            let (_, tg_id) = self
                .reconcile(
                    spec,
                    Dependencies::TargetGroup {
                        load_balancer: load_balancer.clone(),
                    },
                    report,
                )
                .await?;

            let ResourceConfig::TargetGroup(config) = &spec.config else {
                return Err(CloudError::InvalidConfig(format!(
                    "'{}' is not a target group spec",
                    spec.name
                )));
            };

            // Registration is idempotent provider-side, so it runs on reuse too.
            let port = config.port;
            let what = format!("register {}", spec.name);
            self.checkpoint(&what)?;
            self.retry
                .run(&what, &self.cancel, || {
                    self.provider
                        .register_target(&tg_id, &compute.instance, port)
                })
                .await?;
            tracing::info!(
                target_group = %spec.name,
                instance = %compute.instance,
                port,
                "Registered instance"
            );

            target_groups.insert(spec.name.clone(), tg_id);
        }

        let (_, listener) = self
            .reconcile(
                &topology.listener,
                Dependencies::Listener {
                    load_balancer: load_balancer.clone(),
                    target_groups: target_groups.clone(),
                },
                report,
            )
            .await?;

        Ok(BalancerOutputs {
            load_balancer,
            dns_name: lb.handle.endpoint.clone(),
            target_groups,
            listener,
        })
    }
}
