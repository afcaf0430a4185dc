//! Deployment configuration and the fixed resource topology derived from it
//!
//! A [`DeploymentConfig`] is what the operator writes (or the built-in
//! default). [`DeploymentTopology`] turns it into the immutable
//! [`ResourceSpec`]s the orchestrator reconciles, with stable names derived
//! from the deployment name so every run resolves the same resources.

use crate::controller::Timing;
use crate::error::{CloudError, Result};
use crate::resource::{
    HealthCheck, IngressRule, InstanceConfig, ListenerConfig, LoadBalancerConfig, ResourceConfig,
    ResourceKind, ResourceSpec, RoutingRule, SecurityGroupConfig, TargetGroupConfig,
};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Longest name the load balancer API accepts for load balancers and target groups
pub const MAX_BALANCER_NAME_LEN: usize = 32;

const DEFAULT_NAME: &str = "newsbuddy";
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_IMAGE: &str = "ami-0c02fb55956c7d316";
const DEFAULT_INSTANCE_TYPE: &str = "t3.medium";
const DEFAULT_REPOSITORY: &str = "https://github.com/virajkushwaha/NewsBuddy.git";

/// Compute instance settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSettings {
    pub image_id: String,
    pub instance_type: String,
    pub volume_size_gib: u32,

    /// Login user for the SSH hint in the report
    pub ssh_user: String,

    /// Boot script file handed to the instance verbatim
    pub boot_script: Option<PathBuf>,

    /// Repository cloned by the built-in boot script when no file is given
    pub repository: Option<String>,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            image_id: DEFAULT_IMAGE.to_string(),
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            volume_size_gib: 30,
            ssh_user: "ec2-user".to_string(),
            boot_script: None,
            repository: Some(DEFAULT_REPOSITORY.to_string()),
        }
    }
}

/// Load balancer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerSettings {
    pub listener_port: u16,
    pub internet_facing: bool,
    pub subnet_count: usize,
}

impl Default for LoadBalancerSettings {
    fn default() -> Self {
        Self {
            listener_port: 80,
            internet_facing: true,
            subnet_count: 2,
        }
    }
}

/// One target group behind the load balancer.
///
/// The first target group receives unmatched traffic. Every other one is
/// reached through its path routes at its rule priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroupSettings {
    /// Short name (`frontend`), expanded to `<deployment>-<name>-tg`
    pub name: String,

    /// Port the instance serves this tier on
    pub port: u16,

    pub health_check: HealthCheck,

    /// Path patterns routed here (`/api/*`)
    pub routes: Vec<String>,

    pub priority: Option<u32>,
}

impl TargetGroupSettings {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            health_check: HealthCheck {
                path: "/health".to_string(),
                port,
                interval_secs: 30,
                timeout_secs: 10,
                healthy_threshold: 2,
                unhealthy_threshold: 3,
            },
            routes: Vec::new(),
            priority: None,
        }
    }

    pub fn with_routes(mut self, priority: u32, routes: &[&str]) -> Self {
        self.priority = Some(priority);
        self.routes = routes.iter().map(|r| r.to_string()).collect();
        self
    }
}

/// Everything needed to provision one deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Deployment name, the root of every stable resource name
    pub name: String,
    pub region: String,

    /// Directory the private key is written to
    pub key_dir: PathBuf,

    pub security_group: SecurityGroupConfig,
    pub instance: InstanceSettings,
    pub load_balancer: LoadBalancerSettings,
    pub target_groups: Vec<TargetGroupSettings>,
    pub timing: Timing,
    pub retry: RetryPolicy,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            region: DEFAULT_REGION.to_string(),
            key_dir: PathBuf::from("."),
            security_group: SecurityGroupConfig {
                description: format!("Security group for {}", DEFAULT_NAME),
                ingress: vec![
                    IngressRule::new(22, "0.0.0.0/0", "SSH"),
                    IngressRule::new(80, "0.0.0.0/0", "HTTP"),
                    IngressRule::new(3000, "0.0.0.0/0", "Frontend"),
                    IngressRule::new(5000, "0.0.0.0/0", "Backend API"),
                    IngressRule::new(27017, "10.0.0.0/8", "MongoDB (private)"),
                ],
                allow_all_egress: true,
            },
            instance: InstanceSettings::default(),
            load_balancer: LoadBalancerSettings::default(),
            target_groups: vec![
                TargetGroupSettings::new("frontend", 3000),
                TargetGroupSettings::new("backend", 5000).with_routes(100, &["/api/*", "/health"]),
            ],
            timing: Timing::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl DeploymentConfig {
    /// Default deployment under another name
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut config = Self::default();
        config.security_group.description = format!("Security group for {}", name);
        config.name = name;
        config
    }

    fn ingress_covers(&self, port: u16) -> bool {
        self.security_group.ingress.iter().any(|r| r.port == port)
    }

    /// Check the configuration for problems the provider would reject
    /// halfway through a run. All problems are reported at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.name.is_empty() {
            problems.push("deployment name must not be empty".to_string());
        } else if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
            || self.name.starts_with('-')
            || self.name.ends_with('-')
        {
            problems.push(format!(
                "deployment name '{}' may only contain letters, digits and inner hyphens",
                self.name
            ));
        }

        if self.region.is_empty() {
            problems.push("region must not be empty".to_string());
        }

        let lb_name = load_balancer_name(&self.name);
        if lb_name.len() > MAX_BALANCER_NAME_LEN {
            problems.push(format!(
                "load balancer name '{}' exceeds {} characters",
                lb_name, MAX_BALANCER_NAME_LEN
            ));
        }

        if self.instance.volume_size_gib < 8 {
            problems.push(format!(
                "instance volume of {} GiB is below the 8 GiB minimum",
                self.instance.volume_size_gib
            ));
        }

        if self.load_balancer.subnet_count < 2 {
            problems.push("load balancer must span at least 2 subnets".to_string());
        }

        if !self.ingress_covers(self.load_balancer.listener_port) {
            problems.push(format!(
                "listener port {} is not opened by any ingress rule",
                self.load_balancer.listener_port
            ));
        }

        if self.target_groups.is_empty() {
            problems.push("at least one target group is required".to_string());
        }

        let mut names = HashSet::new();
        let mut priorities = HashSet::new();
        for (index, tg) in self.target_groups.iter().enumerate() {
            if !names.insert(tg.name.as_str()) {
                problems.push(format!("target group '{}' is defined twice", tg.name));
            }

            let tg_name = target_group_name(&self.name, &tg.name);
            if tg_name.len() > MAX_BALANCER_NAME_LEN {
                problems.push(format!(
                    "target group name '{}' exceeds {} characters",
                    tg_name, MAX_BALANCER_NAME_LEN
                ));
            }

            if !self.ingress_covers(tg.port) {
                problems.push(format!(
                    "target group '{}' port {} is not opened by any ingress rule",
                    tg.name, tg.port
                ));
            }

            let hc = &tg.health_check;
            if hc.port != tg.port && !self.ingress_covers(hc.port) {
                problems.push(format!(
                    "target group '{}' health-check port {} is not opened by any ingress rule",
                    tg.name, hc.port
                ));
            }
            if !hc.path.starts_with('/') {
                problems.push(format!(
                    "target group '{}' health-check path '{}' must start with '/'",
                    tg.name, hc.path
                ));
            }
            if hc.interval_secs <= hc.timeout_secs {
                problems.push(format!(
                    "target group '{}' health-check interval ({}s) must exceed its timeout ({}s)",
                    tg.name, hc.interval_secs, hc.timeout_secs
                ));
            }
            for (label, value) in [
                ("healthy", hc.healthy_threshold),
                ("unhealthy", hc.unhealthy_threshold),
            ] {
                if !(2..=10).contains(&value) {
                    problems.push(format!(
                        "target group '{}' {} threshold {} must be between 2 and 10",
                        tg.name, label, value
                    ));
                }
            }

            // The first target group is the listener default.
            if index > 0 {
                match tg.priority {
                    None => problems.push(format!(
                        "target group '{}' needs a rule priority",
                        tg.name
                    )),
                    Some(p) if !(1..=50000).contains(&p) => problems.push(format!(
                        "target group '{}' priority {} must be between 1 and 50000",
                        tg.name, p
                    )),
                    Some(p) => {
                        if !priorities.insert(p) {
                            problems.push(format!("rule priority {} is used twice", p));
                        }
                    }
                }
                if tg.routes.is_empty() {
                    problems.push(format!(
                        "target group '{}' is not the default and has no routes",
                        tg.name
                    ));
                }
            }
        }

        if self.timing.instance_timeout.is_zero() {
            problems.push("timing.instance-timeout must be greater than zero".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CloudError::InvalidConfig(problems.join("; ")))
        }
    }
}

pub fn key_pair_name(deployment: &str) -> String {
    format!("{}-key", deployment)
}

pub fn security_group_name(deployment: &str) -> String {
    format!("{}-sg", deployment)
}

pub fn load_balancer_name(deployment: &str) -> String {
    format!("{}-alb", deployment)
}

pub fn target_group_name(deployment: &str, target_group: &str) -> String {
    format!("{}-{}-tg", deployment, target_group)
}

pub fn listener_name(load_balancer: &str, port: u16) -> String {
    format!("{}-http-{}", load_balancer, port)
}

/// The fixed chain of resources for one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTopology {
    pub name: String,
    pub key_pair: ResourceSpec,
    pub security_group: ResourceSpec,
    pub instance: ResourceSpec,
    pub load_balancer: ResourceSpec,
    pub target_groups: Vec<ResourceSpec>,
    pub listener: ResourceSpec,
}

impl DeploymentTopology {
    /// Validate `config` and derive its resource specs
    pub fn from_config(config: &DeploymentConfig) -> Result<Self> {
        config.validate()?;

        let name = config.name.clone();
        let lb_name = load_balancer_name(&name);

        let target_groups: Vec<ResourceSpec> = config
            .target_groups
            .iter()
            .map(|tg| {
                ResourceSpec::new(
                    target_group_name(&name, &tg.name),
                    ResourceConfig::TargetGroup(TargetGroupConfig {
                        port: tg.port,
                        health_check: tg.health_check.clone(),
                    }),
                )
            })
            .collect();

        let default_target = target_groups
            .first()
            .map(|spec| spec.name.clone())
            .ok_or_else(|| CloudError::InvalidConfig("no target groups".to_string()))?;

        let rules = config
            .target_groups
            .iter()
            .skip(1)
            .filter_map(|tg| {
                tg.priority.map(|priority| RoutingRule {
                    priority,
                    path_patterns: tg.routes.clone(),
                    target: target_group_name(&name, &tg.name),
                })
            })
            .collect();

        Ok(Self {
            key_pair: ResourceSpec::new(key_pair_name(&name), ResourceConfig::KeyPair),
            security_group: ResourceSpec::new(
                security_group_name(&name),
                ResourceConfig::SecurityGroup(config.security_group.clone()),
            ),
            instance: ResourceSpec::new(
                name.clone(),
                ResourceConfig::ComputeInstance(InstanceConfig {
                    image_id: config.instance.image_id.clone(),
                    instance_type: config.instance.instance_type.clone(),
                    volume_size_gib: config.instance.volume_size_gib,
                }),
            ),
            load_balancer: ResourceSpec::new(
                lb_name.clone(),
                ResourceConfig::LoadBalancer(LoadBalancerConfig {
                    internet_facing: config.load_balancer.internet_facing,
                    subnet_count: config.load_balancer.subnet_count,
                }),
            ),
            listener: ResourceSpec::new(
                listener_name(&lb_name, config.load_balancer.listener_port),
                ResourceConfig::ListenerRule(ListenerConfig {
                    load_balancer: lb_name,
                    port: config.load_balancer.listener_port,
                    default_target,
                    rules,
                }),
            ),
            target_groups,
            name,
        })
    }

    /// All specs in provisioning order
    pub fn specs(&self) -> Vec<&ResourceSpec> {
        let mut specs = vec![
            &self.key_pair,
            &self.security_group,
            &self.instance,
            &self.load_balancer,
        ];
        specs.extend(self.target_groups.iter());
        specs.push(&self.listener);
        specs
    }

    /// All specs in teardown order (dependents first)
    pub fn teardown_order(&self) -> Vec<&ResourceSpec> {
        let mut specs = self.specs();
        specs.sort_by_key(|spec| spec.kind().teardown_priority());
        specs
    }

    pub fn target_group(&self, name: &str) -> Option<&ResourceSpec> {
        self.target_groups.iter().find(|spec| spec.name == name)
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.specs().iter().filter(|s| s.kind() == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        DeploymentConfig::default().validate().unwrap();
    }

    #[test]
    fn test_stable_names() {
        let topology = DeploymentTopology::from_config(&DeploymentConfig::default()).unwrap();

        assert_eq!(topology.key_pair.name, "newsbuddy-key");
        assert_eq!(topology.security_group.name, "newsbuddy-sg");
        assert_eq!(topology.instance.name, "newsbuddy");
        assert_eq!(topology.load_balancer.name, "newsbuddy-alb");
        assert_eq!(topology.target_groups[0].name, "newsbuddy-frontend-tg");
        assert_eq!(topology.target_groups[1].name, "newsbuddy-backend-tg");
        assert_eq!(topology.listener.name, "newsbuddy-alb-http-80");
    }

    #[test]
    fn test_listener_routes() {
        let topology = DeploymentTopology::from_config(&DeploymentConfig::default()).unwrap();
        let ResourceConfig::ListenerRule(listener) = &topology.listener.config else {
            panic!("listener spec has wrong config");
        };

        assert_eq!(listener.default_target, "newsbuddy-frontend-tg");
        assert_eq!(listener.rules.len(), 1);
        assert_eq!(listener.rules[0].priority, 100);
        assert_eq!(listener.rules[0].target, "newsbuddy-backend-tg");
        assert_eq!(listener.rules[0].path_patterns, vec!["/api/*", "/health"]);
    }

    #[test]
    fn test_provisioning_and_teardown_order() {
        let topology = DeploymentTopology::from_config(&DeploymentConfig::default()).unwrap();

        let kinds: Vec<_> = topology.specs().iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::KeyPair,
                ResourceKind::SecurityGroup,
                ResourceKind::ComputeInstance,
                ResourceKind::LoadBalancer,
                ResourceKind::TargetGroup,
                ResourceKind::TargetGroup,
                ResourceKind::ListenerRule,
            ]
        );

        let kinds: Vec<_> = topology.teardown_order().iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::ListenerRule,
                ResourceKind::TargetGroup,
                ResourceKind::TargetGroup,
                ResourceKind::LoadBalancer,
                ResourceKind::ComputeInstance,
                ResourceKind::SecurityGroup,
                ResourceKind::KeyPair,
            ]
        );
    }

    #[test]
    fn test_health_check_port_must_be_reachable() {
        let mut config = DeploymentConfig::default();
        config.target_groups[0].health_check.port = 8081;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("health-check port 8081"));
    }

    #[test]
    fn test_health_check_port_may_differ_when_opened() {
        let mut config = DeploymentConfig::default();
        config.target_groups[0].health_check.port = 5000;
        config.validate().unwrap();
    }

    #[test]
    fn test_target_port_must_be_reachable() {
        let mut config = DeploymentConfig::default();
        config.security_group.ingress.retain(|r| r.port != 5000);

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("'backend' port 5000"));
    }

    #[test]
    fn test_non_default_target_group_needs_routes() {
        let mut config = DeploymentConfig::default();
        config.target_groups.push(TargetGroupSettings::new("admin", 3000));

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("'admin' needs a rule priority"));
        assert!(err.contains("'admin' is not the default and has no routes"));
    }

    #[test]
    fn test_duplicate_priorities_rejected() {
        let mut config = DeploymentConfig::default();
        config
            .target_groups
            .push(TargetGroupSettings::new("admin", 3000).with_routes(100, &["/admin/*"]));

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("priority 100 is used twice"));
    }

    #[test]
    fn test_long_names_rejected() {
        let config = DeploymentConfig::named("a-deployment-name-that-is-too-long");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("exceeds 32 characters"));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let config = DeploymentConfig::named("bad_name");
        assert!(matches!(
            config.validate(),
            Err(CloudError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_interval_must_exceed_timeout() {
        let mut config = DeploymentConfig::default();
        config.target_groups[1].health_check.interval_secs = 5;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("interval (5s) must exceed its timeout (10s)"));
    }
}
