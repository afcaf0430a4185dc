//! Cloud provider trait definition

use crate::error::Result;
use crate::payload::BootPayload;
use crate::resource::{ExternalId, Located, ResourceKind, ResourceSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cloud provider abstraction trait
///
/// The orchestrator only relies on existence queries, a distinguishable
/// "not found" outcome and create calls that return an identifier. Every
/// component receives the provider explicitly so tests can swap in the
/// simulated one.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Returns the provider name (e.g., "aws", "simulated")
    fn name(&self) -> &str;

    /// Returns the provider display name for UI
    fn display_name(&self) -> &str;

    /// Check if the provider is properly configured and authenticated
    async fn check_auth(&self) -> Result<AuthStatus>;

    /// Find an existing resource matching the spec's kind and stable name.
    ///
    /// Absence is `Ok(None)` or `Err(CloudError::NotFound)`. Every other
    /// error means the query itself failed.
    async fn locate(&self, spec: &ResourceSpec) -> Result<Option<Located>>;

    /// Every resource carrying the spec's stable name, for teardown.
    ///
    /// Unlike [`locate`](Self::locate) this includes resources a run would
    /// not reuse, such as stopped instances and same-name duplicates.
    async fn locate_all(&self, spec: &ResourceSpec) -> Result<Vec<Located>> {
        Ok(self.locate(spec).await?.into_iter().collect())
    }

    /// Create the resource and return its identifier
    async fn create(&self, request: &CreateRequest) -> Result<Located>;

    /// Delete (or terminate) a resource by identifier
    async fn delete(&self, kind: ResourceKind, id: &ExternalId) -> Result<()>;

    /// Current state of a compute instance
    async fn instance_state(&self, id: &ExternalId) -> Result<InstanceState>;

    /// Register an instance with a target group on `port`
    async fn register_target(
        &self,
        target_group: &ExternalId,
        instance: &ExternalId,
        port: u16,
    ) -> Result<()>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Identifiers resolved earlier in the run that a create call needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependencies {
    None,
    Instance {
        key_name: String,
        security_group: ExternalId,
        payload: BootPayload,
    },
    LoadBalancer {
        security_group: ExternalId,
    },
    /// Target groups are created in the load balancer's VPC
    TargetGroup {
        load_balancer: ExternalId,
    },
    Listener {
        load_balancer: ExternalId,
        /// Target group stable name to identifier
        target_groups: BTreeMap<String, ExternalId>,
    },
}

/// A create call: the fixed spec plus resolved dependencies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub spec: ResourceSpec,
    pub deps: Dependencies,
}

impl CreateRequest {
    pub fn new(spec: ResourceSpec, deps: Dependencies) -> Self {
        Self { spec, deps }
    }
}

/// Provider-reported phase of a compute instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstancePhase {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
    Unknown,
}

impl InstancePhase {
    pub fn parse(value: &str) -> Self {
        match value {
            "pending" => InstancePhase::Pending,
            "running" => InstancePhase::Running,
            "shutting-down" => InstancePhase::ShuttingDown,
            "terminated" => InstancePhase::Terminated,
            "stopping" => InstancePhase::Stopping,
            "stopped" => InstancePhase::Stopped,
            _ => InstancePhase::Unknown,
        }
    }
}

impl std::fmt::Display for InstancePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstancePhase::Pending => "pending",
            InstancePhase::Running => "running",
            InstancePhase::ShuttingDown => "shutting-down",
            InstancePhase::Terminated => "terminated",
            InstancePhase::Stopping => "stopping",
            InstancePhase::Stopped => "stopped",
            InstancePhase::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceState {
    pub phase: InstancePhase,
    pub public_ip: Option<String>,
}

impl InstanceState {
    pub fn new(phase: InstancePhase) -> Self {
        Self {
            phase,
            public_ip: None,
        }
    }

    pub fn with_public_ip(mut self, ip: impl Into<String>) -> Self {
        self.public_ip = Some(ip.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_phase_parse() {
        assert_eq!(InstancePhase::parse("running"), InstancePhase::Running);
        assert_eq!(
            InstancePhase::parse("shutting-down"),
            InstancePhase::ShuttingDown
        );
        assert_eq!(InstancePhase::parse("rebooting"), InstancePhase::Unknown);
        assert_eq!(InstancePhase::Terminated.to_string(), "terminated");
    }

    #[test]
    fn test_auth_status() {
        let ok = AuthStatus::ok("123456789012");
        assert!(ok.authenticated);
        assert!(ok.error.is_none());

        let failed = AuthStatus::failed("ExpiredToken");
        assert!(!failed.authenticated);
        assert_eq!(failed.error.as_deref(), Some("ExpiredToken"));
    }
}
