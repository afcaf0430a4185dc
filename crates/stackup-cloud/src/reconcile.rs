//! Locate-then-create for a single resource

use crate::error::{CloudError, Result};
use crate::locator::ResourceLocator;
use crate::provider::{CloudProvider, CreateRequest, Dependencies};
use crate::resource::{ResourceHandle, ResourceSpec};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What reconciliation did for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    Created,
    Reused,
}

impl std::fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileAction::Created => write!(f, "created"),
            ReconcileAction::Reused => write!(f, "reused"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub handle: ResourceHandle,
    pub action: ReconcileAction,
}

/// Reuses an existing resource or creates it from its fixed spec.
///
/// Reconciling the same kind and name from two runs at once is not guarded
/// against; one in-flight run per deployment is a precondition.
#[derive(Clone)]
pub struct Reconciler {
    provider: Arc<dyn CloudProvider>,
    locator: ResourceLocator,
}

impl Reconciler {
    pub fn new(provider: Arc<dyn CloudProvider>, locator: ResourceLocator) -> Self {
        Self { provider, locator }
    }

    pub async fn reconcile(&self, spec: &ResourceSpec, deps: Dependencies) -> Result<Reconciled> {
        let mut handle = ResourceHandle::for_spec(spec);

        if let Some(existing) = self.locator.locate(spec).await? {
            tracing::info!(
                kind = %spec.kind(),
                name = %spec.name,
                id = %existing.id,
                "Reusing existing resource"
            );
            handle.activate(existing);
            return Ok(Reconciled {
                handle,
                action: ReconcileAction::Reused,
            });
        }

        if self.locator.cancel_token().is_cancelled() {
            return Err(CloudError::Cancelled(format!("before creating {}", spec.key())));
        }

        // Creates are not retried: a create that timed out on our side may
        // still have succeeded, and the next run's lookup resolves that.
        handle.begin_create();
        tracing::debug!(kind = %spec.kind(), name = %spec.name, "Creating resource");
        let created = self
            .provider
            .create(&CreateRequest::new(spec.clone(), deps))
            .await?;

        tracing::info!(
            kind = %spec.kind(),
            name = %spec.name,
            id = %created.id,
            "Created resource"
        );
        handle.activate(created);
        Ok(Reconciled {
            handle,
            action: ReconcileAction::Created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::resource::{IngressRule, Lifecycle, ResourceConfig, ResourceKind, SecurityGroupConfig};
    use crate::retry::RetryPolicy;
    use crate::simulated::{Fault, Operation, SimulatedProvider};

    fn reconciler(provider: &Arc<SimulatedProvider>) -> Reconciler {
        let provider: Arc<dyn CloudProvider> = provider.clone();
        Reconciler::new(
            provider.clone(),
            ResourceLocator::new(provider, RetryPolicy::none()),
        )
    }

    fn sg_spec() -> ResourceSpec {
        ResourceSpec::new(
            "demo-sg",
            ResourceConfig::SecurityGroup(SecurityGroupConfig {
                description: "demo".into(),
                ingress: vec![IngressRule::new(22, "0.0.0.0/0", "SSH")],
                allow_all_egress: true,
            }),
        )
    }

    #[tokio::test]
    async fn test_reconcile_twice_creates_once() {
        let provider = Arc::new(SimulatedProvider::new());
        let reconciler = reconciler(&provider);

        let first = reconciler.reconcile(&sg_spec(), Dependencies::None).await.unwrap();
        let second = reconciler.reconcile(&sg_spec(), Dependencies::None).await.unwrap();

        assert_eq!(first.action, ReconcileAction::Created);
        assert_eq!(second.action, ReconcileAction::Reused);
        assert_eq!(first.handle.id, second.handle.id);
        assert_eq!(second.handle.state, Lifecycle::Active);
        assert_eq!(provider.count(Operation::Create, ResourceKind::SecurityGroup), 1);
    }

    #[tokio::test]
    async fn test_permission_denied_never_creates() {
        let provider = Arc::new(SimulatedProvider::new());
        provider.inject(Fault::access_denied(Operation::Locate, ResourceKind::SecurityGroup));
        let reconciler = reconciler(&provider);

        let err = reconciler
            .reconcile(&sg_spec(), Dependencies::None)
            .await
            .unwrap_err();

        assert_eq!(err.class(), ErrorClass::Fatal);
        assert_eq!(provider.count(Operation::Create, ResourceKind::SecurityGroup), 0);
    }

    #[tokio::test]
    async fn test_create_conflict_surfaces() {
        let provider = Arc::new(SimulatedProvider::new());
        provider.inject(Fault::conflict(Operation::Create, ResourceKind::SecurityGroup));
        let reconciler = reconciler(&provider);

        let err = reconciler
            .reconcile(&sg_spec(), Dependencies::None)
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_cancelled_reconcile_never_creates() {
        let provider = Arc::new(SimulatedProvider::new());
        let cancel = tokio_util::sync::CancellationToken::new();
        cancel.cancel();
        let dyn_provider: Arc<dyn CloudProvider> = provider.clone();
        let reconciler = Reconciler::new(
            dyn_provider.clone(),
            ResourceLocator::new(dyn_provider, RetryPolicy::none()).with_cancel(cancel),
        );

        let err = reconciler
            .reconcile(&sg_spec(), Dependencies::None)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(provider.count(Operation::Create, ResourceKind::SecurityGroup), 0);
    }
}
