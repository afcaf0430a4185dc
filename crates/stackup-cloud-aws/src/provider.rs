//! AWS provider: EC2 for the compute tier, ELBv2 for the balancer tier
//!
//! Stable names map onto AWS lookups as follows:
//!
//! | kind            | lookup                                   | identifier      |
//! |-----------------|------------------------------------------|-----------------|
//! | key pair        | `DescribeKeyPairs` by key name            | key pair id     |
//! | security group  | `DescribeSecurityGroups` by group-name    | group id        |
//! | instance        | `DescribeInstances` by `Name` tag, live   | instance id     |
//! | load balancer   | `DescribeLoadBalancers` by name           | ARN             |
//! | target group    | `DescribeTargetGroups` by name            | ARN             |
//! | listener        | `DescribeListeners` on the LB, by port    | ARN             |

use crate::context::AwsContext;
use crate::error::sdk_err;
use async_trait::async_trait;
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::types::{
    BlockDeviceMapping, EbsBlockDevice, Filter, InstanceType, IpPermission, IpRange, KeyType,
    ResourceType, Tag, TagSpecification, VolumeType,
};
use aws_sdk_elasticloadbalancingv2::types::{
    Action, ActionTypeEnum, IpAddressType, LoadBalancerSchemeEnum, LoadBalancerTypeEnum,
    PathPatternConditionConfig, ProtocolEnum, RuleCondition, TargetDescription, TargetTypeEnum,
};
use base64::Engine;
use stackup_cloud::{
    AuthStatus, BootPayload, CloudError, CloudProvider, CreateRequest, Dependencies, ExternalId,
    IngressRule, InstanceConfig, InstancePhase, InstanceState, ListenerConfig, LoadBalancerConfig,
    Located, ResourceConfig, ResourceKind, ResourceSpec, Result, SecurityGroupConfig,
    TargetGroupConfig,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MANAGED_BY_TAG: &str = "ManagedBy";
const MANAGED_BY_VALUE: &str = "stackup";
const ROOT_DEVICE: &str = "/dev/xvda";
/// States a run will reuse an instance in
const REUSABLE_INSTANCE_STATES: &[&str] = &["pending", "running"];
/// States in which an instance still holds its security group
const LIVE_INSTANCE_STATES: &[&str] = &["pending", "running", "stopping", "stopped"];

pub struct AwsProvider {
    ctx: AwsContext,
    ec2: aws_sdk_ec2::Client,
    elb: aws_sdk_elasticloadbalancingv2::Client,
    /// Where newly created private keys are written
    key_dir: PathBuf,
}

impl AwsProvider {
    pub async fn new(region: &str, key_dir: impl Into<PathBuf>) -> Self {
        Self::from_context(AwsContext::new(region).await, key_dir)
    }

    pub fn from_context(ctx: AwsContext, key_dir: impl Into<PathBuf>) -> Self {
        Self {
            ec2: ctx.ec2_client(),
            elb: ctx.elb_client(),
            ctx,
            key_dir: key_dir.into(),
        }
    }

    pub fn region(&self) -> &str {
        self.ctx.region()
    }

    async fn default_vpc(&self) -> Result<String> {
        let response = self
            .ec2
            .describe_vpcs()
            .filters(Filter::builder().name("isDefault").values("true").build())
            .send()
            .await
            .map_err(sdk_err(ResourceKind::SecurityGroup, "default VPC"))?;

        response
            .vpcs()
            .first()
            .and_then(|v| v.vpc_id())
            .map(str::to_string)
            .ok_or_else(|| {
                CloudError::InvalidConfig(format!(
                    "No default VPC in region {}",
                    self.ctx.region()
                ))
            })
    }

    async fn default_subnets(&self, count: usize) -> Result<Vec<String>> {
        let vpc_id = self.default_vpc().await?;
        let response = self
            .ec2
            .describe_subnets()
            .filters(Filter::builder().name("vpc-id").values(&vpc_id).build())
            .send()
            .await
            .map_err(sdk_err(ResourceKind::LoadBalancer, &vpc_id))?;

        let subnets: Vec<(String, String)> = response
            .subnets()
            .iter()
            .filter_map(|s| {
                Some((
                    s.availability_zone()?.to_string(),
                    s.subnet_id()?.to_string(),
                ))
            })
            .collect();
        select_subnets(subnets, count)
    }

    async fn load_balancer_by_name(&self, name: &str) -> Result<Option<Located>> {
        let response = self
            .elb
            .describe_load_balancers()
            .names(name)
            .send()
            .await
            .map_err(sdk_err(ResourceKind::LoadBalancer, name))?;

        Ok(response.load_balancers().first().and_then(|lb| {
            let located = Located::new(lb.load_balancer_arn()?);
            Some(match lb.dns_name() {
                Some(dns) => located.with_endpoint(dns),
                None => located,
            })
        }))
    }

    // ---- lookups ----

    async fn locate_key_pair(&self, name: &str) -> Result<Option<Located>> {
        let response = self
            .ec2
            .describe_key_pairs()
            .key_names(name)
            .send()
            .await
            .map_err(sdk_err(ResourceKind::KeyPair, name))?;

        Ok(response
            .key_pairs()
            .first()
            .and_then(|k| k.key_pair_id().or(k.key_name()))
            .map(Located::new))
    }

    async fn locate_security_group(&self, name: &str) -> Result<Option<Located>> {
        let response = self
            .ec2
            .describe_security_groups()
            .filters(Filter::builder().name("group-name").values(name).build())
            .send()
            .await
            .map_err(sdk_err(ResourceKind::SecurityGroup, name))?;

        Ok(response
            .security_groups()
            .first()
            .and_then(|g| g.group_id())
            .map(Located::new))
    }

    /// Instances tagged `name` in any of `states`, oldest reservation first
    async fn instances_named(&self, name: &str, states: &[&str]) -> Result<Vec<Located>> {
        let response = self
            .ec2
            .describe_instances()
            .filters(Filter::builder().name("tag:Name").values(name).build())
            .filters(
                Filter::builder()
                    .name("instance-state-name")
                    .set_values(Some(states.iter().map(|s| s.to_string()).collect()))
                    .build(),
            )
            .send()
            .await
            .map_err(sdk_err(ResourceKind::ComputeInstance, name))?;

        Ok(response
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .filter_map(|i| {
                let located = Located::new(i.instance_id()?);
                Some(match i.public_ip_address() {
                    Some(ip) => located.with_endpoint(ip),
                    None => located,
                })
            })
            .collect())
    }

    async fn locate_instance(&self, name: &str) -> Result<Option<Located>> {
        let found = self.instances_named(name, REUSABLE_INSTANCE_STATES).await?;
        Ok(found.into_iter().next())
    }

    async fn locate_target_group(&self, name: &str) -> Result<Option<Located>> {
        let response = self
            .elb
            .describe_target_groups()
            .names(name)
            .send()
            .await
            .map_err(sdk_err(ResourceKind::TargetGroup, name))?;

        Ok(response
            .target_groups()
            .first()
            .and_then(|tg| tg.target_group_arn())
            .map(Located::new))
    }

    async fn locate_listener(&self, name: &str, config: &ListenerConfig) -> Result<Option<Located>> {
        let lb = match self.load_balancer_by_name(&config.load_balancer).await {
            Ok(Some(lb)) => lb,
            Ok(None) => return Ok(None),
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let response = self
            .elb
            .describe_listeners()
            .load_balancer_arn(lb.id.as_str())
            .send()
            .await
            .map_err(sdk_err(ResourceKind::ListenerRule, name))?;

        Ok(response
            .listeners()
            .iter()
            .find(|l| l.port() == Some(i32::from(config.port)))
            .and_then(|l| l.listener_arn())
            .map(Located::new))
    }

    // ---- creation ----

    async fn create_key_pair(&self, name: &str) -> Result<Located> {
        let response = self
            .ec2
            .create_key_pair()
            .key_name(name)
            .key_type(KeyType::Rsa)
            .tag_specifications(name_tags(ResourceType::KeyPair, name))
            .send()
            .await
            .map_err(sdk_err(ResourceKind::KeyPair, name))?;

        if let Some(material) = response.key_material() {
            let path = write_private_key(&self.key_dir, name, material).await?;
            info!(key = %name, path = %path.display(), "Saved private key");
        } else {
            warn!(key = %name, "Key pair created without key material");
        }

        let id = response
            .key_pair_id()
            .or(response.key_name())
            .unwrap_or(name);
        Ok(Located::new(id))
    }

    async fn create_security_group(&self, name: &str, config: &SecurityGroupConfig) -> Result<Located> {
        let vpc_id = self.default_vpc().await?;
        let response = self
            .ec2
            .create_security_group()
            .group_name(name)
            .description(&config.description)
            .vpc_id(&vpc_id)
            .tag_specifications(name_tags(ResourceType::SecurityGroup, name))
            .send()
            .await
            .map_err(sdk_err(ResourceKind::SecurityGroup, name))?;

        let group_id = response
            .group_id()
            .ok_or_else(|| CloudError::ApiError(format!("No group id returned for '{}'", name)))?
            .to_string();
        debug!(group_id = %group_id, vpc_id = %vpc_id, "Created security group");

        if !config.ingress.is_empty() {
            let result = self
                .ec2
                .authorize_security_group_ingress()
                .group_id(&group_id)
                .set_ip_permissions(Some(ingress_permissions(&config.ingress)))
                .send()
                .await;
            if let Err(e) = result {
                if e.code() != Some("InvalidPermission.Duplicate") {
                    return Err(crate::error::from_sdk(ResourceKind::SecurityGroup, name, e));
                }
            }
        }

        // New groups come with allow-all egress
        if !config.allow_all_egress {
            self.ec2
                .revoke_security_group_egress()
                .group_id(&group_id)
                .ip_permissions(
                    IpPermission::builder()
                        .ip_protocol("-1")
                        .ip_ranges(IpRange::builder().cidr_ip("0.0.0.0/0").build())
                        .build(),
                )
                .send()
                .await
                .map_err(sdk_err(ResourceKind::SecurityGroup, name))?;
        }

        Ok(Located::new(group_id))
    }

    async fn create_instance(
        &self,
        name: &str,
        config: &InstanceConfig,
        key_name: &str,
        security_group: &ExternalId,
        payload: &BootPayload,
    ) -> Result<Located> {
        let volume_size = i32::try_from(config.volume_size_gib).map_err(|_| {
            CloudError::InvalidConfig(format!("Volume size {} is too large", config.volume_size_gib))
        })?;

        let mut request = self
            .ec2
            .run_instances()
            .image_id(&config.image_id)
            .instance_type(InstanceType::from(config.instance_type.as_str()))
            .key_name(key_name)
            .security_group_ids(security_group.as_str())
            .min_count(1)
            .max_count(1)
            .block_device_mappings(
                BlockDeviceMapping::builder()
                    .device_name(ROOT_DEVICE)
                    .ebs(
                        EbsBlockDevice::builder()
                            .volume_size(volume_size)
                            .volume_type(VolumeType::Gp3)
                            .delete_on_termination(true)
                            .build(),
                    )
                    .build(),
            )
            .tag_specifications(name_tags(ResourceType::Instance, name))
            .tag_specifications(name_tags(ResourceType::Volume, name));

        if !payload.is_empty() {
            request = request.user_data(encode_user_data(payload));
        }

        let response = request
            .send()
            .await
            .map_err(sdk_err(ResourceKind::ComputeInstance, name))?;

        let instance = response
            .instances()
            .first()
            .ok_or_else(|| CloudError::ApiError(format!("No instance returned for '{}'", name)))?;
        let id = instance
            .instance_id()
            .ok_or_else(|| CloudError::ApiError(format!("No instance id returned for '{}'", name)))?;

        let located = Located::new(id);
        Ok(match instance.public_ip_address() {
            Some(ip) => located.with_endpoint(ip),
            None => located,
        })
    }

    async fn create_load_balancer(
        &self,
        name: &str,
        config: &LoadBalancerConfig,
        security_group: &ExternalId,
    ) -> Result<Located> {
        let subnets = self.default_subnets(config.subnet_count).await?;
        let scheme = if config.internet_facing {
            LoadBalancerSchemeEnum::InternetFacing
        } else {
            LoadBalancerSchemeEnum::Internal
        };

        let response = self
            .elb
            .create_load_balancer()
            .name(name)
            .set_subnets(Some(subnets))
            .security_groups(security_group.as_str())
            .scheme(scheme)
            .r#type(LoadBalancerTypeEnum::Application)
            .ip_address_type(IpAddressType::Ipv4)
            .send()
            .await
            .map_err(sdk_err(ResourceKind::LoadBalancer, name))?;

        let lb = response
            .load_balancers()
            .first()
            .ok_or_else(|| CloudError::ApiError(format!("No load balancer returned for '{}'", name)))?;
        let arn = lb
            .load_balancer_arn()
            .ok_or_else(|| CloudError::ApiError(format!("No ARN returned for '{}'", name)))?;

        let located = Located::new(arn);
        Ok(match lb.dns_name() {
            Some(dns) => located.with_endpoint(dns),
            None => located,
        })
    }

    async fn create_target_group(
        &self,
        name: &str,
        config: &TargetGroupConfig,
        load_balancer: &ExternalId,
    ) -> Result<Located> {
        let response = self
            .elb
            .describe_load_balancers()
            .load_balancer_arns(load_balancer.as_str())
            .send()
            .await
            .map_err(sdk_err(ResourceKind::LoadBalancer, load_balancer.as_str()))?;
        let vpc_id = response
            .load_balancers()
            .first()
            .and_then(|lb| lb.vpc_id())
            .ok_or_else(|| CloudError::not_found(ResourceKind::LoadBalancer, load_balancer.as_str()))?
            .to_string();

        let health = &config.health_check;
        let response = self
            .elb
            .create_target_group()
            .name(name)
            .protocol(ProtocolEnum::Http)
            .port(i32::from(config.port))
            .vpc_id(vpc_id)
            .target_type(TargetTypeEnum::Instance)
            .health_check_enabled(true)
            .health_check_protocol(ProtocolEnum::Http)
            .health_check_port(health.port.to_string())
            .health_check_path(&health.path)
            .health_check_interval_seconds(as_i32(health.interval_secs))
            .health_check_timeout_seconds(as_i32(health.timeout_secs))
            .healthy_threshold_count(as_i32(health.healthy_threshold))
            .unhealthy_threshold_count(as_i32(health.unhealthy_threshold))
            .send()
            .await
            .map_err(sdk_err(ResourceKind::TargetGroup, name))?;

        response
            .target_groups()
            .first()
            .and_then(|tg| tg.target_group_arn())
            .map(Located::new)
            .ok_or_else(|| CloudError::ApiError(format!("No target group returned for '{}'", name)))
    }

    async fn create_listener(
        &self,
        name: &str,
        config: &ListenerConfig,
        load_balancer: &ExternalId,
        target_groups: &BTreeMap<String, ExternalId>,
    ) -> Result<Located> {
        let default_target = target_arn(target_groups, &config.default_target)?;
        let response = self
            .elb
            .create_listener()
            .load_balancer_arn(load_balancer.as_str())
            .protocol(ProtocolEnum::Http)
            .port(i32::from(config.port))
            .default_actions(forward_to(default_target)?)
            .send()
            .await
            .map_err(sdk_err(ResourceKind::ListenerRule, name))?;

        let listener_arn = response
            .listeners()
            .first()
            .and_then(|l| l.listener_arn())
            .ok_or_else(|| CloudError::ApiError(format!("No listener returned for '{}'", name)))?
            .to_string();

        if let Err(e) = self.create_rules(name, &listener_arn, config, target_groups).await {
            // A listener without its rules would be reused as-is by the next run.
            warn!(listener = %name, error = %e, "Rule creation failed, removing listener");
            if let Err(cleanup) = self
                .elb
                .delete_listener()
                .listener_arn(&listener_arn)
                .send()
                .await
            {
                warn!(listener = %name, error = %cleanup, "Could not remove partial listener");
            }
            return Err(e);
        }

        Ok(Located::new(listener_arn))
    }

    async fn create_rules(
        &self,
        name: &str,
        listener_arn: &str,
        config: &ListenerConfig,
        target_groups: &BTreeMap<String, ExternalId>,
    ) -> Result<()> {
        for rule in &config.rules {
            let target = target_arn(target_groups, &rule.target)?;
            let priority = i32::try_from(rule.priority).map_err(|_| {
                CloudError::InvalidConfig(format!("Rule priority {} is out of range", rule.priority))
            })?;

            self.elb
                .create_rule()
                .listener_arn(listener_arn)
                .priority(priority)
                .conditions(path_condition(&rule.path_patterns))
                .actions(forward_to(target)?)
                .send()
                .await
                .map_err(sdk_err(ResourceKind::ListenerRule, name))?;
            debug!(listener = %name, priority, target = %rule.target, "Created routing rule");
        }
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for AwsProvider {
    fn name(&self) -> &str {
        "aws"
    }

    fn display_name(&self) -> &str {
        "Amazon Web Services"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        match self.default_vpc().await {
            Ok(vpc_id) => Ok(AuthStatus::ok(format!(
                "region {} (default VPC {})",
                self.ctx.region(),
                vpc_id
            ))),
            Err(e @ (CloudError::AuthenticationFailed(_) | CloudError::AccessDenied(_))) => {
                Ok(AuthStatus::failed(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn locate(&self, spec: &ResourceSpec) -> Result<Option<Located>> {
        let name = spec.name.as_str();
        match &spec.config {
            ResourceConfig::KeyPair => self.locate_key_pair(name).await,
            ResourceConfig::SecurityGroup(_) => self.locate_security_group(name).await,
            ResourceConfig::ComputeInstance(_) => self.locate_instance(name).await,
            ResourceConfig::LoadBalancer(_) => self.load_balancer_by_name(name).await,
            ResourceConfig::TargetGroup(_) => self.locate_target_group(name).await,
            ResourceConfig::ListenerRule(config) => self.locate_listener(name, config).await,
        }
    }

    async fn locate_all(&self, spec: &ResourceSpec) -> Result<Vec<Located>> {
        match &spec.config {
            ResourceConfig::ComputeInstance(_) => {
                self.instances_named(&spec.name, LIVE_INSTANCE_STATES).await
            }
            _ => Ok(self.locate(spec).await?.into_iter().collect()),
        }
    }

    async fn create(&self, request: &CreateRequest) -> Result<Located> {
        let name = request.spec.name.as_str();
        let located = match (&request.spec.config, &request.deps) {
            (ResourceConfig::KeyPair, _) => self.create_key_pair(name).await?,
            (ResourceConfig::SecurityGroup(config), _) => {
                self.create_security_group(name, config).await?
            }
            (
                ResourceConfig::ComputeInstance(config),
                Dependencies::Instance {
                    key_name,
                    security_group,
                    payload,
                },
            ) => {
                self.create_instance(name, config, key_name, security_group, payload)
                    .await?
            }
            (ResourceConfig::LoadBalancer(config), Dependencies::LoadBalancer { security_group }) => {
                self.create_load_balancer(name, config, security_group).await?
            }
            (ResourceConfig::TargetGroup(config), Dependencies::TargetGroup { load_balancer }) => {
                self.create_target_group(name, config, load_balancer).await?
            }
            (
                ResourceConfig::ListenerRule(config),
                Dependencies::Listener {
                    load_balancer,
                    target_groups,
                },
            ) => {
                self.create_listener(name, config, load_balancer, target_groups)
                    .await?
            }
            (config, deps) => {
                return Err(CloudError::InvalidConfig(format!(
                    "Cannot create {} '{}' from {:?}",
                    config.kind(),
                    name,
                    deps
                )));
            }
        };

        info!(kind = %request.spec.kind(), name = %name, id = %located.id, "Created resource");
        Ok(located)
    }

    async fn delete(&self, kind: ResourceKind, id: &ExternalId) -> Result<()> {
        let target = id.as_str();
        match kind {
            ResourceKind::KeyPair => {
                let request = self.ec2.delete_key_pair();
                let request = if target.starts_with("key-") {
                    request.key_pair_id(target)
                } else {
                    request.key_name(target)
                };
                request.send().await.map_err(sdk_err(kind, target))?;
            }
            ResourceKind::SecurityGroup => {
                self.ec2
                    .delete_security_group()
                    .group_id(target)
                    .send()
                    .await
                    .map_err(sdk_err(kind, target))?;
            }
            ResourceKind::ComputeInstance => {
                self.ec2
                    .terminate_instances()
                    .instance_ids(target)
                    .send()
                    .await
                    .map_err(sdk_err(kind, target))?;
            }
            ResourceKind::LoadBalancer => {
                self.elb
                    .delete_load_balancer()
                    .load_balancer_arn(target)
                    .send()
                    .await
                    .map_err(sdk_err(kind, target))?;
            }
            ResourceKind::TargetGroup => {
                self.elb
                    .delete_target_group()
                    .target_group_arn(target)
                    .send()
                    .await
                    .map_err(sdk_err(kind, target))?;
            }
            ResourceKind::ListenerRule => {
                self.elb
                    .delete_listener()
                    .listener_arn(target)
                    .send()
                    .await
                    .map_err(sdk_err(kind, target))?;
            }
        }
        Ok(())
    }

    async fn instance_state(&self, id: &ExternalId) -> Result<InstanceState> {
        let response = self
            .ec2
            .describe_instances()
            .instance_ids(id.as_str())
            .send()
            .await
            .map_err(sdk_err(ResourceKind::ComputeInstance, id.as_str()))?;

        let instance = response
            .reservations()
            .first()
            .and_then(|r| r.instances().first())
            .ok_or_else(|| CloudError::not_found(ResourceKind::ComputeInstance, id.as_str()))?;

        let phase = instance
            .state()
            .and_then(|s| s.name())
            .map(|name| InstancePhase::parse(name.as_str()))
            .unwrap_or(InstancePhase::Unknown);

        let state = InstanceState::new(phase);
        Ok(match instance.public_ip_address() {
            Some(ip) => state.with_public_ip(ip),
            None => state,
        })
    }

    async fn register_target(
        &self,
        target_group: &ExternalId,
        instance: &ExternalId,
        port: u16,
    ) -> Result<()> {
        let target = TargetDescription::builder()
            .id(instance.as_str())
            .port(i32::from(port))
            .build()
            .map_err(|e| CloudError::InvalidConfig(e.to_string()))?;

        self.elb
            .register_targets()
            .target_group_arn(target_group.as_str())
            .targets(target)
            .send()
            .await
            .map_err(sdk_err(ResourceKind::TargetGroup, target_group.as_str()))?;
        Ok(())
    }
}

fn name_tags(resource_type: ResourceType, name: &str) -> TagSpecification {
    TagSpecification::builder()
        .resource_type(resource_type)
        .tags(Tag::builder().key("Name").value(name).build())
        .tags(
            Tag::builder()
                .key(MANAGED_BY_TAG)
                .value(MANAGED_BY_VALUE)
                .build(),
        )
        .build()
}

fn ingress_permissions(rules: &[IngressRule]) -> Vec<IpPermission> {
    rules
        .iter()
        .map(|rule| {
            IpPermission::builder()
                .ip_protocol("tcp")
                .from_port(i32::from(rule.port))
                .to_port(i32::from(rule.port))
                .ip_ranges(
                    IpRange::builder()
                        .cidr_ip(&rule.cidr)
                        .description(&rule.description)
                        .build(),
                )
                .build()
        })
        .collect()
}

/// One subnet per availability zone, zones in name order
fn select_subnets(mut subnets: Vec<(String, String)>, count: usize) -> Result<Vec<String>> {
    subnets.sort();
    subnets.dedup_by(|a, b| a.0 == b.0);
    if subnets.len() < count {
        return Err(CloudError::InvalidConfig(format!(
            "Load balancer needs {} availability zones, default VPC has {}",
            count,
            subnets.len()
        )));
    }
    Ok(subnets.into_iter().take(count).map(|(_, id)| id).collect())
}

fn target_arn<'a>(target_groups: &'a BTreeMap<String, ExternalId>, name: &str) -> Result<&'a str> {
    target_groups
        .get(name)
        .map(|id| id.as_str())
        .ok_or_else(|| CloudError::InvalidConfig(format!("Unknown target group '{}'", name)))
}

fn forward_to(target_group_arn: &str) -> Result<Action> {
    Action::builder()
        .r#type(ActionTypeEnum::Forward)
        .target_group_arn(target_group_arn)
        .build()
        .map_err(|e| CloudError::InvalidConfig(e.to_string()))
}

fn path_condition(patterns: &[String]) -> RuleCondition {
    RuleCondition::builder()
        .field("path-pattern")
        .path_pattern_config(
            PathPatternConditionConfig::builder()
                .set_values(Some(patterns.to_vec()))
                .build(),
        )
        .build()
}

fn encode_user_data(payload: &BootPayload) -> String {
    base64::engine::general_purpose::STANDARD.encode(payload.as_bytes())
}

fn as_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

async fn write_private_key(dir: &Path, name: &str, material: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.pem", name));

    // A previous key file is read-only and belongs to a deleted key pair
    if tokio::fs::try_exists(&path).await? {
        tokio::fs::remove_file(&path).await?;
    }
    tokio::fs::write(&path, material).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o400)).await?;
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet(az: &str, id: &str) -> (String, String) {
        (az.to_string(), id.to_string())
    }

    #[test]
    fn test_select_subnets_one_per_zone() {
        let subnets = vec![
            subnet("us-east-1b", "subnet-b1"),
            subnet("us-east-1a", "subnet-a2"),
            subnet("us-east-1a", "subnet-a1"),
            subnet("us-east-1c", "subnet-c1"),
        ];

        let selected = select_subnets(subnets, 2).unwrap();
        assert_eq!(selected, vec!["subnet-a1", "subnet-b1"]);
    }

    #[test]
    fn test_teardown_sees_stopped_instances() {
        for state in REUSABLE_INSTANCE_STATES {
            assert!(LIVE_INSTANCE_STATES.contains(state));
        }
        assert!(LIVE_INSTANCE_STATES.contains(&"stopped"));
        assert!(!REUSABLE_INSTANCE_STATES.contains(&"stopped"));
    }

    #[test]
    fn test_select_subnets_needs_enough_zones() {
        let subnets = vec![subnet("us-east-1a", "subnet-a1"), subnet("us-east-1a", "subnet-a2")];
        assert!(matches!(
            select_subnets(subnets, 2),
            Err(CloudError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_ingress_permissions() {
        let rules = vec![
            IngressRule::new(22, "0.0.0.0/0", "SSH"),
            IngressRule::new(27017, "10.0.0.0/8", "MongoDB"),
        ];

        let permissions = ingress_permissions(&rules);
        assert_eq!(permissions.len(), 2);
        assert_eq!(permissions[0].ip_protocol(), Some("tcp"));
        assert_eq!(permissions[0].from_port(), Some(22));
        assert_eq!(permissions[0].to_port(), Some(22));
        assert_eq!(permissions[1].ip_ranges()[0].cidr_ip(), Some("10.0.0.0/8"));
    }

    #[test]
    fn test_target_arn_lookup() {
        let mut groups = BTreeMap::new();
        groups.insert("demo-api-tg".to_string(), ExternalId::from("arn:tg/api"));

        assert_eq!(target_arn(&groups, "demo-api-tg").unwrap(), "arn:tg/api");
        assert!(target_arn(&groups, "demo-web-tg").is_err());
    }

    #[test]
    fn test_forward_action_and_condition() {
        let action = forward_to("arn:tg/api").unwrap();
        assert_eq!(action.r#type(), &ActionTypeEnum::Forward);
        assert_eq!(action.target_group_arn(), Some("arn:tg/api"));

        let condition = path_condition(&["/api/*".to_string(), "/health".to_string()]);
        assert_eq!(condition.field(), Some("path-pattern"));
        let values = condition
            .path_pattern_config()
            .map(|c| c.values().to_vec())
            .unwrap_or_default();
        assert_eq!(values, vec!["/api/*", "/health"]);
    }

    #[test]
    fn test_user_data_is_base64() {
        let payload = BootPayload::new(b"#!/bin/bash\necho hi\n".to_vec());
        assert_eq!(encode_user_data(&payload), "IyEvYmluL2Jhc2gKZWNobyBoaQo=");
    }

    #[tokio::test]
    async fn test_private_key_written_read_only() {
        let dir = tempfile::tempdir().unwrap();

        let path = write_private_key(dir.path(), "demo-key", "first").await.unwrap();
        // Second write replaces the read-only file
        let again = write_private_key(dir.path(), "demo-key", "second").await.unwrap();

        assert_eq!(path, again);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o400);
        }
    }

    #[tokio::test]
    #[ignore = "requires AWS credentials"]
    async fn test_check_auth() {
        let dir = tempfile::tempdir().unwrap();
        let provider = AwsProvider::new("us-east-1", dir.path()).await;
        let status = provider.check_auth().await.unwrap();
        assert!(status.authenticated);
    }
}
