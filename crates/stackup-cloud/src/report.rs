//! Run and teardown reports

use crate::error::{CloudError, ErrorClass};
use crate::reconcile::{ReconcileAction, Reconciled};
use crate::resource::{ExternalId, ResourceKind};
use crate::topology::{DeploymentConfig, key_pair_name};
use crate::waiter::Readiness;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A resource resolved during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub kind: ResourceKind,
    pub name: String,
    pub id: ExternalId,
    pub endpoint: Option<String>,
    pub action: ReconcileAction,
}

impl TryFrom<&Reconciled> for ResourceRecord {
    type Error = CloudError;

    fn try_from(reconciled: &Reconciled) -> Result<Self, Self::Error> {
        let handle = &reconciled.handle;
        let id = handle.id.clone().ok_or_else(|| {
            CloudError::StateError(format!(
                "{} '{}' resolved without an identifier",
                handle.kind, handle.name
            ))
        })?;
        Ok(Self {
            kind: handle.kind,
            name: handle.name.clone(),
            id,
            endpoint: handle.endpoint.clone(),
            action: reconciled.action,
        })
    }
}

/// How one deletion ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownOutcome {
    Deleted,
    AlreadyAbsent,
    Failed,
}

impl std::fmt::Display for TeardownOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TeardownOutcome::Deleted => write!(f, "deleted"),
            TeardownOutcome::AlreadyAbsent => write!(f, "already absent"),
            TeardownOutcome::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownEntry {
    pub kind: ResourceKind,
    pub name: String,
    pub id: Option<ExternalId>,
    pub outcome: TeardownOutcome,
    pub error: Option<String>,
}

/// Result of a teardown, entries in the order deletions were attempted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    pub entries: Vec<TeardownEntry>,

    /// Set when cancellation stopped the teardown before every resource was visited
    pub interrupted: bool,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl TeardownReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_deleted(&mut self, kind: ResourceKind, name: &str, id: ExternalId) {
        self.entries.push(TeardownEntry {
            kind,
            name: name.to_string(),
            id: Some(id),
            outcome: TeardownOutcome::Deleted,
            error: None,
        });
    }

    pub fn add_absent(&mut self, kind: ResourceKind, name: &str, id: Option<ExternalId>) {
        self.entries.push(TeardownEntry {
            kind,
            name: name.to_string(),
            id,
            outcome: TeardownOutcome::AlreadyAbsent,
            error: None,
        });
    }

    pub fn add_failure(
        &mut self,
        kind: ResourceKind,
        name: &str,
        id: Option<ExternalId>,
        error: &CloudError,
    ) {
        self.entries.push(TeardownEntry {
            kind,
            name: name.to_string(),
            id,
            outcome: TeardownOutcome::Failed,
            error: Some(error.to_string()),
        });
    }

    fn with_outcome(&self, outcome: TeardownOutcome) -> Vec<&TeardownEntry> {
        self.entries.iter().filter(|e| e.outcome == outcome).collect()
    }

    pub fn deleted(&self) -> Vec<&TeardownEntry> {
        self.with_outcome(TeardownOutcome::Deleted)
    }

    pub fn already_absent(&self) -> Vec<&TeardownEntry> {
        self.with_outcome(TeardownOutcome::AlreadyAbsent)
    }

    pub fn failed(&self) -> Vec<&TeardownEntry> {
        self.with_outcome(TeardownOutcome::Failed)
    }

    /// Everything is gone and nothing failed
    pub fn is_clean(&self) -> bool {
        !self.interrupted && self.failed().is_empty()
    }

    pub fn outcome_of(&self, kind: ResourceKind, name: &str) -> Option<TeardownOutcome> {
        self.entries
            .iter()
            .find(|e| e.kind == kind && e.name == name)
            .map(|e| e.outcome)
    }
}

impl std::fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} deleted, {} already absent, {} failed",
            self.deleted().len(),
            self.already_absent().len(),
            self.failed().len()
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

/// Run stage a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PreClean,
    Compute,
    Readiness,
    Balancer,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::PreClean => write!(f, "pre-clean"),
            Stage::Compute => write!(f, "compute tier"),
            Stage::Readiness => write!(f, "readiness wait"),
            Stage::Balancer => write!(f, "load-balancer tier"),
        }
    }
}

/// Why a run stopped early
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: Stage,
    pub class: ErrorClass,
    pub cancelled: bool,
    pub message: String,
}

impl RunFailure {
    pub fn new(stage: Stage, error: &CloudError) -> Self {
        Self {
            stage,
            class: error.class(),
            cancelled: error.is_cancelled(),
            message: error.to_string(),
        }
    }
}

/// URL reachable through a listener route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEndpoint {
    pub target_group: String,
    pub url: String,
}

/// Public entry points of the deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub load_balancer: Option<String>,
    pub routes: Vec<RouteEndpoint>,
    pub public_ip: Option<String>,
    /// Instance URLs per target group, bypassing the load balancer
    pub direct: Vec<RouteEndpoint>,
    pub ssh: Option<String>,
}

impl Endpoints {
    pub fn build(
        config: &DeploymentConfig,
        load_balancer_dns: Option<&str>,
        public_ip: Option<&str>,
    ) -> Self {
        let mut endpoints = Self::default();
        let port = config.load_balancer.listener_port;

        if let Some(dns) = load_balancer_dns {
            let base = if port == 80 {
                format!("http://{}", dns)
            } else {
                format!("http://{}:{}", dns, port)
            };
            for (index, tg) in config.target_groups.iter().enumerate() {
                if index == 0 {
                    endpoints.routes.push(RouteEndpoint {
                        target_group: tg.name.clone(),
                        url: base.clone(),
                    });
                } else if let Some(route) = tg.routes.first() {
                    let path = route.trim_end_matches('*').trim_end_matches('/');
                    endpoints.routes.push(RouteEndpoint {
                        target_group: tg.name.clone(),
                        url: format!("{}{}", base, path),
                    });
                }
            }
            endpoints.load_balancer = Some(base);
        }

        if let Some(ip) = public_ip {
            for tg in &config.target_groups {
                endpoints.direct.push(RouteEndpoint {
                    target_group: tg.name.clone(),
                    url: format!("http://{}:{}", ip, tg.port),
                });
            }
            let key = config
                .key_dir
                .join(format!("{}.pem", key_pair_name(&config.name)));
            endpoints.ssh = Some(format!(
                "ssh -i {} {}@{}",
                key.display(),
                config.instance.ssh_user,
                ip
            ));
            endpoints.public_ip = Some(ip.to_string());
        }

        endpoints
    }
}

/// Everything a run resolved, produced even when it stopped early
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub deployment: String,
    pub provider: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub pre_clean: Option<TeardownReport>,
    /// Resolved resources in provisioning order
    pub resources: Vec<ResourceRecord>,
    pub instance_readiness: Option<Readiness>,
    pub endpoints: Endpoints,
    pub failure: Option<RunFailure>,
}

impl RunReport {
    pub fn new(deployment: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            deployment: deployment.into(),
            provider: provider.into(),
            started_at: Utc::now(),
            duration_ms: 0,
            pre_clean: None,
            resources: Vec::new(),
            instance_readiness: None,
            endpoints: Endpoints::default(),
            failure: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Add a resolved resource and return its identifier
    pub fn record(&mut self, reconciled: &Reconciled) -> crate::error::Result<ExternalId> {
        let record = ResourceRecord::try_from(reconciled)?;
        let id = record.id.clone();
        self.resources.push(record);
        Ok(id)
    }

    pub fn created(&self) -> usize {
        self.resources
            .iter()
            .filter(|r| r.action == ReconcileAction::Created)
            .count()
    }

    pub fn reused(&self) -> usize {
        self.resources
            .iter()
            .filter(|r| r.action == ReconcileAction::Reused)
            .count()
    }

    pub fn find(&self, kind: ResourceKind) -> Option<&ResourceRecord> {
        self.resources.iter().find(|r| r.kind == kind)
    }

    /// `kind:name` to identifier for every resolved resource
    pub fn resource_ids(&self) -> BTreeMap<String, ExternalId> {
        self.resources
            .iter()
            .map(|r| (format!("{}:{}", r.kind, r.name), r.id.clone()))
            .collect()
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Deployment '{}' on {}: {} created, {} reused",
            self.deployment,
            self.provider,
            self.created(),
            self.reused()
        )?;
        if let Some(pre_clean) = &self.pre_clean {
            writeln!(f, "  pre-clean: {}", pre_clean)?;
        }
        for r in &self.resources {
            writeln!(f, "  {:<15} {:<28} {} ({})", r.kind, r.name, r.id, r.action)?;
        }
        if let Some(readiness) = &self.instance_readiness {
            writeln!(f, "  instance: {}", readiness)?;
        }
        for route in &self.endpoints.routes {
            writeln!(f, "  {:<15} {}", route.target_group, route.url)?;
        }
        for direct in &self.endpoints.direct {
            writeln!(f, "  direct {:<8} {}", direct.target_group, direct.url)?;
        }
        if let Some(ssh) = &self.endpoints.ssh {
            writeln!(f, "  ssh: {}", ssh)?;
        }
        if let Some(failure) = &self.failure {
            writeln!(
                f,
                "  FAILED during {} ({}): {}",
                failure.stage, failure.class, failure.message
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_for_default_deployment() {
        let config = DeploymentConfig::default();
        let endpoints = Endpoints::build(
            &config,
            Some("newsbuddy-alb-1.us-east-1.elb.amazonaws.com"),
            Some("203.0.113.10"),
        );

        assert_eq!(
            endpoints.load_balancer.as_deref(),
            Some("http://newsbuddy-alb-1.us-east-1.elb.amazonaws.com")
        );
        assert_eq!(endpoints.routes.len(), 2);
        assert_eq!(
            endpoints.routes[1].url,
            "http://newsbuddy-alb-1.us-east-1.elb.amazonaws.com/api"
        );
        assert_eq!(endpoints.direct[0].url, "http://203.0.113.10:3000");
        assert_eq!(endpoints.direct[1].url, "http://203.0.113.10:5000");
        assert_eq!(
            endpoints.ssh.as_deref(),
            Some("ssh -i ./newsbuddy-key.pem ec2-user@203.0.113.10")
        );
    }

    #[test]
    fn test_endpoints_without_addresses() {
        let endpoints = Endpoints::build(&DeploymentConfig::default(), None, None);
        assert_eq!(endpoints, Endpoints::default());
    }

    #[test]
    fn test_teardown_report_counts() {
        let mut report = TeardownReport::new();
        report.add_deleted(ResourceKind::SecurityGroup, "sg", ExternalId::from("sg-1"));
        report.add_absent(ResourceKind::KeyPair, "key", None);
        report.add_failure(
            ResourceKind::LoadBalancer,
            "alb",
            Some(ExternalId::from("arn:lb")),
            &CloudError::AccessDenied("no".into()),
        );

        assert_eq!(report.deleted().len(), 1);
        assert_eq!(report.already_absent().len(), 1);
        assert_eq!(report.failed().len(), 1);
        assert!(!report.is_clean());
        assert_eq!(
            report.to_string(),
            "1 deleted, 1 already absent, 1 failed"
        );
    }

    #[test]
    fn test_run_report_serializes() {
        let mut report = RunReport::new("demo", "simulated");
        report.failure = Some(RunFailure::new(
            Stage::Compute,
            &CloudError::AccessDenied("UnauthorizedOperation".into()),
        ));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["deployment"], "demo");
        assert_eq!(json["failure"]["class"], "fatal");
        assert_eq!(json["failure"]["stage"], "compute");
    }

    #[test]
    fn test_record_without_identifier_is_rejected() {
        let mut report = RunReport::new("newsbuddy", "simulated");
        let unresolved = Reconciled {
            handle: crate::resource::ResourceHandle::new(ResourceKind::KeyPair, "newsbuddy-key"),
            action: ReconcileAction::Created,
        };

        let err = report.record(&unresolved).unwrap_err();
        assert!(matches!(err, CloudError::StateError(_)));
        assert!(report.resources.is_empty());
    }
}
