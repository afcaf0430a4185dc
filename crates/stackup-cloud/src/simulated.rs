//! In-memory provider for tests and rehearsal runs
//!
//! Behaves like the real provider where the orchestrator can observe it:
//! stable-name lookups, duplicate-name conflicts on create, instances that
//! boot and terminate over several polls, dependency violations when a
//! security group is still in use. Every call is recorded, and faults can be
//! injected per operation and kind.

use crate::error::{CloudError, Result};
use crate::provider::{
    AuthStatus, CloudProvider, CreateRequest, Dependencies, InstancePhase, InstanceState,
};
use crate::resource::{ExternalId, Located, ResourceConfig, ResourceKind, ResourceSpec};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Provider operations, as recorded in the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Locate,
    Create,
    Delete,
    InstanceState,
    RegisterTarget,
}

/// One recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub kind: ResourceKind,
    /// Stable name for lookups and creates, identifier otherwise
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultKind {
    AccessDenied,
    Throttled,
    Conflict,
    ApiError,
}

/// An injected failure for matching calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    operation: Operation,
    kind: ResourceKind,
    error: FaultKind,
    /// Remaining triggers, `None` for every call
    remaining: Option<u32>,
}

impl Fault {
    fn new(operation: Operation, kind: ResourceKind, error: FaultKind) -> Self {
        Self {
            operation,
            kind,
            error,
            remaining: None,
        }
    }

    pub fn access_denied(operation: Operation, kind: ResourceKind) -> Self {
        Self::new(operation, kind, FaultKind::AccessDenied)
    }

    pub fn throttled(operation: Operation, kind: ResourceKind) -> Self {
        Self::new(operation, kind, FaultKind::Throttled)
    }

    pub fn conflict(operation: Operation, kind: ResourceKind) -> Self {
        Self::new(operation, kind, FaultKind::Conflict)
    }

    pub fn api_error(operation: Operation, kind: ResourceKind) -> Self {
        Self::new(operation, kind, FaultKind::ApiError)
    }

    /// Trigger only for the next `n` matching calls
    pub fn times(mut self, n: u32) -> Self {
        self.remaining = Some(n);
        self
    }

    fn to_error(&self, target: &str) -> CloudError {
        match self.error {
            FaultKind::AccessDenied => CloudError::AccessDenied(format!(
                "UnauthorizedOperation: simulated denial for {} {}",
                self.kind, target
            )),
            FaultKind::Throttled => {
                CloudError::Transient("RequestLimitExceeded: simulated throttling".to_string())
            }
            FaultKind::Conflict => CloudError::Conflict(format!(
                "{} '{}' already exists (simulated)",
                self.kind, target
            )),
            FaultKind::ApiError => CloudError::ApiError(format!(
                "simulated failure for {} {}",
                self.kind, target
            )),
        }
    }
}

#[derive(Debug, Clone)]
struct SimResource {
    kind: ResourceKind,
    name: String,
    id: ExternalId,
    endpoint: Option<String>,
    /// Identifiers this resource holds on to (security group, load balancer, target groups)
    refs: Vec<ExternalId>,
}

#[derive(Debug, Clone)]
struct SimInstance {
    phase: InstancePhase,
    /// Polls left before the current transition completes
    polls_left: u32,
    public_ip: String,
}

#[derive(Debug, Default)]
struct Inner {
    seq: u32,
    /// Live resources in creation order; instances may share a name
    resources: Vec<SimResource>,
    instances: BTreeMap<ExternalId, SimInstance>,
    registrations: Vec<(ExternalId, ExternalId, u16)>,
    faults: Vec<Fault>,
    calls: Vec<Call>,
}

impl Inner {
    fn next_id(&mut self, kind: ResourceKind) -> ExternalId {
        self.seq += 1;
        let id = match kind {
            ResourceKind::KeyPair => format!("key-{:08x}", self.seq),
            ResourceKind::SecurityGroup => format!("sg-{:08x}", self.seq),
            ResourceKind::ComputeInstance => format!("i-{:08x}", self.seq),
            ResourceKind::LoadBalancer => {
                format!("arn:sim:elasticloadbalancing:loadbalancer/app/{:08x}", self.seq)
            }
            ResourceKind::TargetGroup => {
                format!("arn:sim:elasticloadbalancing:targetgroup/{:08x}", self.seq)
            }
            ResourceKind::ListenerRule => {
                format!("arn:sim:elasticloadbalancing:listener/app/{:08x}", self.seq)
            }
        };
        ExternalId::new(id)
    }

    fn record(&mut self, operation: Operation, kind: ResourceKind, target: &str) -> Result<()> {
        self.calls.push(Call {
            operation,
            kind,
            target: target.to_string(),
        });

        let fault = self
            .faults
            .iter_mut()
            .find(|f| f.operation == operation && f.kind == kind && f.remaining != Some(0));
        match fault {
            Some(fault) => {
                if let Some(n) = fault.remaining.as_mut() {
                    *n -= 1;
                }
                Err(fault.to_error(target))
            }
            None => Ok(()),
        }
    }

    fn find_by_id(&self, id: &ExternalId) -> Option<ResourceKind> {
        self.resources.iter().find(|r| &r.id == id).map(|r| r.kind)
    }

    fn named<'a>(&'a self, kind: ResourceKind, name: &'a str) -> impl Iterator<Item = &'a SimResource> {
        self.resources
            .iter()
            .filter(move |r| r.kind == kind && r.name == name)
    }

    /// Instances are only reused while pending or running
    fn reusable(&self, resource: &SimResource) -> bool {
        resource.kind != ResourceKind::ComputeInstance
            || self.instances.get(&resource.id).is_some_and(|i| {
                matches!(i.phase, InstancePhase::Pending | InstancePhase::Running)
            })
    }

    fn located(&self, resource: &SimResource) -> Located {
        let endpoint = match resource.kind {
            ResourceKind::ComputeInstance => self.instance_endpoint(&resource.id),
            _ => resource.endpoint.clone(),
        };
        Located {
            id: resource.id.clone(),
            endpoint,
        }
    }

    fn is_live(&self, id: &ExternalId) -> bool {
        self.find_by_id(id).is_some()
    }

    fn instance_endpoint(&self, id: &ExternalId) -> Option<String> {
        self.instances
            .get(id)
            .filter(|i| i.phase == InstancePhase::Running)
            .map(|i| i.public_ip.clone())
    }
}

/// In-memory [`CloudProvider`]
#[derive(Debug, Default)]
pub struct SimulatedProvider {
    inner: Mutex<Inner>,
    boot_polls: u32,
    termination_polls: u32,
    not_found_as_error: bool,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instances report `pending` for `polls` state queries before `running`
    pub fn with_boot_polls(mut self, polls: u32) -> Self {
        self.boot_polls = polls;
        self
    }

    /// Terminated instances report `shutting-down` for `polls` state queries
    pub fn with_termination_polls(mut self, polls: u32) -> Self {
        self.termination_polls = polls;
        self
    }

    /// Report absence from lookups as `Err(NotFound)` instead of `Ok(None)`
    pub fn not_found_as_error(mut self) -> Self {
        self.not_found_as_error = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pre-create a resource as if an earlier run had left it behind
    pub fn seed(&self, kind: ResourceKind, name: &str) -> ExternalId {
        let mut inner = self.lock();
        let id = inner.next_id(kind);
        let endpoint = match kind {
            ResourceKind::LoadBalancer => Some(format!("{}-{}.sim.elb.local", name, inner.seq)),
            _ => None,
        };
        if kind == ResourceKind::ComputeInstance {
            let public_ip = format!("198.51.100.{}", inner.seq % 250 + 1);
            inner.instances.insert(
                id.clone(),
                SimInstance {
                    phase: InstancePhase::Running,
                    polls_left: 0,
                    public_ip,
                },
            );
        }
        inner.resources.push(SimResource {
            kind,
            name: name.to_string(),
            id: id.clone(),
            endpoint,
            refs: Vec::new(),
        });
        id
    }

    /// Pre-create a running instance that holds `security_group`, as a
    /// leftover duplicate from an earlier run would
    pub fn seed_instance(&self, name: &str, security_group: &ExternalId) -> ExternalId {
        let id = self.seed(ResourceKind::ComputeInstance, name);
        let mut inner = self.lock();
        if let Some(resource) = inner.resources.iter_mut().find(|r| r.id == id) {
            resource.refs.push(security_group.clone());
        }
        id
    }

    /// Stop an instance; it keeps its security group but is no longer reused
    pub fn stop_instance(&self, id: &ExternalId) {
        if let Some(instance) = self.lock().instances.get_mut(id) {
            instance.phase = InstancePhase::Stopped;
            instance.polls_left = 0;
        }
    }

    pub fn inject(&self, fault: Fault) {
        self.lock().faults.push(fault);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn count(&self, operation: Operation, kind: ResourceKind) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation && c.kind == kind)
            .count()
    }

    /// Index of the first matching call in the log
    pub fn first_call(&self, operation: Operation, kind: ResourceKind) -> Option<usize> {
        self.lock()
            .calls
            .iter()
            .position(|c| c.operation == operation && c.kind == kind)
    }

    pub fn exists(&self, kind: ResourceKind, name: &str) -> bool {
        self.lock().named(kind, name).next().is_some()
    }

    /// Live resources of `kind` carrying `name`
    pub fn count_named(&self, kind: ResourceKind, name: &str) -> usize {
        self.lock().named(kind, name).count()
    }

    pub fn resource_count(&self) -> usize {
        self.lock().resources.len()
    }

    /// `(target group, instance, port)` for every registration
    pub fn registrations(&self) -> Vec<(ExternalId, ExternalId, u16)> {
        self.lock().registrations.clone()
    }

    fn ensure_live(inner: &Inner, id: &ExternalId, what: &str) -> Result<()> {
        if inner.is_live(id) {
            Ok(())
        } else {
            Err(CloudError::ApiError(format!(
                "{} '{}' does not exist (simulated)",
                what, id
            )))
        }
    }
}

#[async_trait]
impl CloudProvider for SimulatedProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    fn display_name(&self) -> &str {
        "Simulated (in-memory)"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        Ok(AuthStatus::ok("simulated account"))
    }

    async fn locate(&self, spec: &ResourceSpec) -> Result<Option<Located>> {
        let kind = spec.kind();
        let mut inner = self.lock();
        inner.record(Operation::Locate, kind, &spec.name)?;

        let found = inner
            .named(kind, &spec.name)
            .find(|r| inner.reusable(r))
            .map(|r| inner.located(r));

        match found {
            Some(located) => Ok(Some(located)),
            None if self.not_found_as_error => Err(CloudError::not_found(kind, &spec.name)),
            None => Ok(None),
        }
    }

    async fn locate_all(&self, spec: &ResourceSpec) -> Result<Vec<Located>> {
        let kind = spec.kind();
        let mut inner = self.lock();
        inner.record(Operation::Locate, kind, &spec.name)?;

        Ok(inner
            .named(kind, &spec.name)
            .map(|r| inner.located(r))
            .collect())
    }

    async fn create(&self, request: &CreateRequest) -> Result<Located> {
        let spec = &request.spec;
        let kind = spec.kind();
        let mut inner = self.lock();
        inner.record(Operation::Create, kind, &spec.name)?;

        // Instances may share a Name tag; everything else has a unique name.
        if kind != ResourceKind::ComputeInstance && inner.named(kind, &spec.name).next().is_some() {
            return Err(CloudError::Conflict(format!(
                "{} '{}' already exists",
                kind, spec.name
            )));
        }

        let refs = match &request.deps {
            Dependencies::None => Vec::new(),
            Dependencies::Instance { security_group, .. }
            | Dependencies::LoadBalancer { security_group } => {
                Self::ensure_live(&inner, security_group, "security group")?;
                vec![security_group.clone()]
            }
            Dependencies::TargetGroup { load_balancer } => {
                Self::ensure_live(&inner, load_balancer, "load balancer")?;
                vec![load_balancer.clone()]
            }
            Dependencies::Listener {
                load_balancer,
                target_groups,
            } => {
                Self::ensure_live(&inner, load_balancer, "load balancer")?;
                if let ResourceConfig::ListenerRule(listener) = &spec.config {
                    for target in std::iter::once(&listener.default_target)
                        .chain(listener.rules.iter().map(|r| &r.target))
                    {
                        if !target_groups.contains_key(target) {
                            return Err(CloudError::InvalidConfig(format!(
                                "listener references unknown target group '{}'",
                                target
                            )));
                        }
                    }
                }
                let mut refs = vec![load_balancer.clone()];
                refs.extend(target_groups.values().cloned());
                refs
            }
        };

        let id = inner.next_id(kind);
        let endpoint = match kind {
            ResourceKind::LoadBalancer => {
                Some(format!("{}-{}.sim.elb.local", spec.name, inner.seq))
            }
            _ => None,
        };

        if kind == ResourceKind::ComputeInstance {
            let public_ip = format!("198.51.100.{}", inner.seq % 250 + 1);
            let (phase, polls_left) = if self.boot_polls == 0 {
                (InstancePhase::Running, 0)
            } else {
                (InstancePhase::Pending, self.boot_polls)
            };
            inner.instances.insert(
                id.clone(),
                SimInstance {
                    phase,
                    polls_left,
                    public_ip,
                },
            );
        }

        inner.resources.push(SimResource {
            kind,
            name: spec.name.clone(),
            id: id.clone(),
            endpoint: endpoint.clone(),
            refs,
        });

        let endpoint = match kind {
            ResourceKind::ComputeInstance => inner.instance_endpoint(&id),
            _ => endpoint,
        };
        Ok(Located { id, endpoint })
    }

    async fn delete(&self, kind: ResourceKind, id: &ExternalId) -> Result<()> {
        let mut inner = self.lock();
        inner.record(Operation::Delete, kind, id.as_str())?;

        let Some(found_kind) = inner.find_by_id(id) else {
            return Err(CloudError::not_found(kind, id.as_str()));
        };
        if found_kind != kind {
            return Err(CloudError::ApiError(format!(
                "'{}' is a {}, not a {}",
                id, found_kind, kind
            )));
        }

        // Target groups only borrow the load balancer's VPC and outlive it.
        let in_use = inner.resources.iter().any(|r| {
            r.id != *id
                && r.refs.contains(id)
                && !(kind == ResourceKind::LoadBalancer && r.kind == ResourceKind::TargetGroup)
        });
        if in_use {
            return match kind {
                // The load balancer takes its listeners down with it.
                ResourceKind::LoadBalancer => {
                    inner.resources.retain(|r| {
                        r.id != *id
                            && !(r.kind == ResourceKind::ListenerRule && r.refs.contains(id))
                    });
                    Ok(())
                }
                ResourceKind::SecurityGroup => Err(CloudError::Transient(format!(
                    "DependencyViolation: resource {} has a dependent object",
                    id
                ))),
                _ => Err(CloudError::Transient(format!(
                    "ResourceInUse: {} is currently in use",
                    id
                ))),
            };
        }

        inner.resources.retain(|r| r.id != *id);
        if kind == ResourceKind::ComputeInstance {
            let polls = self.termination_polls;
            if let Some(instance) = inner.instances.get_mut(id) {
                if polls == 0 {
                    instance.phase = InstancePhase::Terminated;
                } else {
                    instance.phase = InstancePhase::ShuttingDown;
                    instance.polls_left = polls;
                }
            }
        }
        Ok(())
    }

    async fn instance_state(&self, id: &ExternalId) -> Result<InstanceState> {
        let mut inner = self.lock();
        inner.record(
            Operation::InstanceState,
            ResourceKind::ComputeInstance,
            id.as_str(),
        )?;

        let Some(instance) = inner.instances.get_mut(id) else {
            return Err(CloudError::not_found(
                ResourceKind::ComputeInstance,
                id.as_str(),
            ));
        };

        if instance.polls_left > 0 {
            instance.polls_left -= 1;
        } else {
            instance.phase = match instance.phase {
                InstancePhase::Pending => InstancePhase::Running,
                InstancePhase::ShuttingDown => InstancePhase::Terminated,
                phase => phase,
            };
        }

        let mut state = InstanceState::new(instance.phase);
        if instance.phase == InstancePhase::Running {
            state = state.with_public_ip(instance.public_ip.clone());
        }
        Ok(state)
    }

    async fn register_target(
        &self,
        target_group: &ExternalId,
        instance: &ExternalId,
        port: u16,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner.record(
            Operation::RegisterTarget,
            ResourceKind::TargetGroup,
            target_group.as_str(),
        )?;

        Self::ensure_live(&inner, target_group, "target group")?;
        match inner.instances.get(instance) {
            Some(i)
                if matches!(i.phase, InstancePhase::Pending | InstancePhase::Running) => {}
            _ => {
                return Err(CloudError::ApiError(format!(
                    "InvalidTarget: instance '{}' is not registrable",
                    instance
                )));
            }
        }

        let entry = (target_group.clone(), instance.clone(), port);
        if !inner.registrations.contains(&entry) {
            inner.registrations.push(entry);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_spec(name: &str) -> ResourceSpec {
        ResourceSpec::new(name, ResourceConfig::KeyPair)
    }

    #[tokio::test]
    async fn test_create_then_locate() {
        let provider = SimulatedProvider::new();
        let created = provider
            .create(&CreateRequest::new(key_spec("k"), Dependencies::None))
            .await
            .unwrap();

        let found = provider.locate(&key_spec("k")).await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(provider.count(Operation::Create, ResourceKind::KeyPair), 1);
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let provider = SimulatedProvider::new();
        provider.seed(ResourceKind::KeyPair, "k");

        let err = provider
            .create(&CreateRequest::new(key_spec("k"), Dependencies::None))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let provider = SimulatedProvider::new();
        let err = provider
            .delete(ResourceKind::KeyPair, &ExternalId::from("key-missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_fault_fires_limited_times() {
        let provider = SimulatedProvider::new();
        provider.inject(Fault::throttled(Operation::Locate, ResourceKind::KeyPair).times(1));

        assert!(provider.locate(&key_spec("k")).await.is_err());
        assert!(provider.locate(&key_spec("k")).await.is_ok());
    }

    #[tokio::test]
    async fn test_security_group_in_use() {
        let provider = SimulatedProvider::new();
        let sg = provider.seed(ResourceKind::SecurityGroup, "sg");
        let lb_spec = ResourceSpec::new(
            "lb",
            ResourceConfig::LoadBalancer(crate::resource::LoadBalancerConfig {
                internet_facing: true,
                subnet_count: 2,
            }),
        );
        provider
            .create(&CreateRequest::new(
                lb_spec,
                Dependencies::LoadBalancer {
                    security_group: sg.clone(),
                },
            ))
            .await
            .unwrap();

        let err = provider
            .delete(ResourceKind::SecurityGroup, &sg)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_instance_boots_and_terminates() {
        let provider = SimulatedProvider::new()
            .with_boot_polls(1)
            .with_termination_polls(1);
        let spec = ResourceSpec::new(
            "vm",
            ResourceConfig::ComputeInstance(crate::resource::InstanceConfig {
                image_id: "ami-1".into(),
                instance_type: "t3.micro".into(),
                volume_size_gib: 8,
            }),
        );
        let id = provider
            .create(&CreateRequest::new(spec, Dependencies::None))
            .await
            .unwrap()
            .id;

        assert_eq!(
            provider.instance_state(&id).await.unwrap().phase,
            InstancePhase::Pending
        );
        let running = provider.instance_state(&id).await.unwrap();
        assert_eq!(running.phase, InstancePhase::Running);
        assert!(running.public_ip.is_some());

        provider
            .delete(ResourceKind::ComputeInstance, &id)
            .await
            .unwrap();
        assert_eq!(
            provider.instance_state(&id).await.unwrap().phase,
            InstancePhase::ShuttingDown
        );
        assert_eq!(
            provider.instance_state(&id).await.unwrap().phase,
            InstancePhase::Terminated
        );
    }

    #[tokio::test]
    async fn test_same_name_instances_are_all_listed() {
        let provider = SimulatedProvider::new();
        let sg = provider.seed(ResourceKind::SecurityGroup, "sg");
        let running = provider.seed_instance("vm", &sg);
        let stopped = provider.seed_instance("vm", &sg);
        provider.stop_instance(&stopped);
        let spec = ResourceSpec::new(
            "vm",
            ResourceConfig::ComputeInstance(crate::resource::InstanceConfig {
                image_id: "ami-1".into(),
                instance_type: "t3.micro".into(),
                volume_size_gib: 8,
            }),
        );

        let reusable = provider.locate(&spec).await.unwrap().unwrap();
        assert_eq!(reusable.id, running);

        let all: Vec<ExternalId> = provider
            .locate_all(&spec)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(all, vec![running.clone(), stopped.clone()]);

        // Either instance alone keeps the security group busy.
        provider.delete(ResourceKind::ComputeInstance, &running).await.unwrap();
        let err = provider.delete(ResourceKind::SecurityGroup, &sg).await.unwrap_err();
        assert!(err.is_retryable());
        provider.delete(ResourceKind::ComputeInstance, &stopped).await.unwrap();
        provider.delete(ResourceKind::SecurityGroup, &sg).await.unwrap();
    }
}
