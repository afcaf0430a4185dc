//! Resource model: kinds, specs, handles and lifecycle

use serde::{Deserialize, Serialize};

/// Kinds of resources in a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    KeyPair,
    SecurityGroup,
    ComputeInstance,
    LoadBalancer,
    TargetGroup,
    ListenerRule,
}

impl ResourceKind {
    /// All kinds in provisioning order
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::KeyPair,
        ResourceKind::SecurityGroup,
        ResourceKind::ComputeInstance,
        ResourceKind::LoadBalancer,
        ResourceKind::TargetGroup,
        ResourceKind::ListenerRule,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::KeyPair => "key-pair",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::ComputeInstance => "instance",
            ResourceKind::LoadBalancer => "load-balancer",
            ResourceKind::TargetGroup => "target-group",
            ResourceKind::ListenerRule => "listener",
        }
    }

    /// Position in teardown order (lower is deleted first)
    pub fn teardown_priority(&self) -> u8 {
        match self {
            ResourceKind::ListenerRule => 0,
            ResourceKind::TargetGroup => 1,
            ResourceKind::LoadBalancer => 2,
            ResourceKind::ComputeInstance => 3,
            ResourceKind::SecurityGroup => 4,
            ResourceKind::KeyPair => 5,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier assigned by the provider (ARN, instance id, group id, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(String);

impl ExternalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExternalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ExternalId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ExternalId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for ExternalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A resource the provider reported as existing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Located {
    pub id: ExternalId,

    /// Public address when the kind has one (load balancer DNS, instance IP)
    pub endpoint: Option<String>,
}

impl Located {
    pub fn new(id: impl Into<ExternalId>) -> Self {
        Self {
            id: id.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// Firewall ingress rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub port: u16,
    pub cidr: String,
    pub description: String,
}

impl IngressRule {
    pub fn new(port: u16, cidr: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port,
            cidr: cidr.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupConfig {
    pub description: String,
    pub ingress: Vec<IngressRule>,
    pub allow_all_egress: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub image_id: String,
    pub instance_type: String,
    pub volume_size_gib: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    pub internet_facing: bool,
    /// Number of default-VPC subnets the load balancer spans
    pub subnet_count: usize,
}

/// Target group health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub path: String,
    pub port: u16,
    pub interval_secs: u32,
    pub timeout_secs: u32,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroupConfig {
    /// Port the instance is registered on
    pub port: u16,
    pub health_check: HealthCheck,
}

/// Path-based forward rule on the listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub priority: u32,
    pub path_patterns: Vec<String>,
    /// Stable name of the target group traffic is forwarded to
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Stable name of the load balancer owning the listener
    pub load_balancer: String,
    pub port: u16,
    /// Stable name of the target group receiving unmatched traffic
    pub default_target: String,
    pub rules: Vec<RoutingRule>,
}

/// Kind-specific fixed configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceConfig {
    KeyPair,
    SecurityGroup(SecurityGroupConfig),
    ComputeInstance(InstanceConfig),
    LoadBalancer(LoadBalancerConfig),
    TargetGroup(TargetGroupConfig),
    ListenerRule(ListenerConfig),
}

impl ResourceConfig {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceConfig::KeyPair => ResourceKind::KeyPair,
            ResourceConfig::SecurityGroup(_) => ResourceKind::SecurityGroup,
            ResourceConfig::ComputeInstance(_) => ResourceKind::ComputeInstance,
            ResourceConfig::LoadBalancer(_) => ResourceKind::LoadBalancer,
            ResourceConfig::TargetGroup(_) => ResourceKind::TargetGroup,
            ResourceConfig::ListenerRule(_) => ResourceKind::ListenerRule,
        }
    }
}

/// Immutable description of one resource, identical across runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Stable name, unique per kind within the account/region
    pub name: String,
    pub config: ResourceConfig,
}

impl ResourceSpec {
    pub fn new(name: impl Into<String>, config: ResourceConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.config.kind()
    }

    /// Key used in logs and reports (kind:name)
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind(), self.name)
    }
}

/// Lifecycle of a resource within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Absent,
    Creating,
    Active,
    Deleting,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lifecycle::Absent => write!(f, "absent"),
            Lifecycle::Creating => write!(f, "creating"),
            Lifecycle::Active => write!(f, "active"),
            Lifecycle::Deleting => write!(f, "deleting"),
        }
    }
}

/// Per-run view of a resource. Never carried over between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub name: String,
    pub id: Option<ExternalId>,
    pub endpoint: Option<String>,
    pub state: Lifecycle,
}

impl ResourceHandle {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            id: None,
            endpoint: None,
            state: Lifecycle::Absent,
        }
    }

    pub fn for_spec(spec: &ResourceSpec) -> Self {
        Self::new(spec.kind(), spec.name.clone())
    }

    pub fn begin_create(&mut self) {
        self.state = Lifecycle::Creating;
    }

    pub fn activate(&mut self, located: Located) {
        self.id = Some(located.id);
        self.endpoint = located.endpoint;
        self.state = Lifecycle::Active;
    }

    pub fn begin_delete(&mut self) {
        self.state = Lifecycle::Deleting;
    }

    pub fn mark_absent(&mut self) {
        self.state = Lifecycle::Absent;
    }
}
