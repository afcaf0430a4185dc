//! End-to-end runs against the simulated provider

use stackup_cloud::simulated::{Fault, Operation};
use stackup_cloud::{
    BootPayload, CloudProvider, DeploymentConfig, ErrorClass, Readiness, ReconcileAction,
    ResourceKind, RunController, SimulatedProvider, Stage, TeardownOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn config(pre_clean: bool) -> DeploymentConfig {
    let mut config = DeploymentConfig::default();
    config.timing.pre_clean = pre_clean;
    config
}

fn controller(provider: &Arc<SimulatedProvider>, config: DeploymentConfig) -> RunController {
    controller_with_cancel(provider, config, CancellationToken::new())
}

fn controller_with_cancel(
    provider: &Arc<SimulatedProvider>,
    config: DeploymentConfig,
    cancel: CancellationToken,
) -> RunController {
    let provider: Arc<dyn CloudProvider> = provider.clone();
    RunController::new(provider, config, BootPayload::compose_app("https://example.com/app.git"), cancel)
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn fresh_environment_creates_everything() {
    let provider = Arc::new(SimulatedProvider::new().with_boot_polls(3));

    let report = controller(&provider, config(false)).run().await;

    assert!(report.is_success(), "{}", report);
    assert_eq!(report.created(), 7);
    assert_eq!(report.reused(), 0);
    assert!(report.pre_clean.is_none());
    assert!(matches!(
        report.instance_readiness,
        Some(Readiness::Ready { endpoint: Some(_) })
    ));

    let endpoints = &report.endpoints;
    assert!(endpoints.load_balancer.as_deref().is_some_and(|u| !u.is_empty()));
    assert!(endpoints.public_ip.as_deref().is_some_and(|ip| !ip.is_empty()));
    assert!(endpoints.ssh.as_deref().is_some_and(|s| s.starts_with("ssh -i ")));
    assert_eq!(endpoints.routes.len(), 2);
    assert_eq!(endpoints.direct.len(), 2);
    assert!(endpoints.routes.iter().all(|r| !r.url.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn second_run_reuses_everything() {
    let provider = Arc::new(SimulatedProvider::new());

    let first = controller(&provider, config(false)).run().await;
    let second = controller(&provider, config(false)).run().await;

    assert!(second.is_success(), "{}", second);
    assert_eq!(second.created(), 0);
    assert_eq!(second.reused(), 7);
    assert_eq!(first.resource_ids(), second.resource_ids());
    assert_eq!(provider.count(Operation::Create, ResourceKind::ComputeInstance), 1);
    assert_eq!(provider.resource_count(), 7);
}

#[tokio::test(start_paused = true)]
async fn reused_instance_skips_grace_period() {
    let provider = Arc::new(SimulatedProvider::new());
    controller(&provider, config(false)).run().await;

    let started = tokio::time::Instant::now();
    controller(&provider, config(false)).run().await;
    assert!(started.elapsed() < Duration::from_secs(300));
}

#[tokio::test(start_paused = true)]
async fn pre_clean_recreates_everything() {
    let provider = Arc::new(SimulatedProvider::new());
    controller(&provider, config(false)).run().await;

    let report = controller(&provider, config(true)).run().await;

    assert!(report.is_success(), "{}", report);
    let pre_clean = report.pre_clean.as_ref().unwrap();
    assert_eq!(pre_clean.deleted().len(), 7);
    assert_eq!(report.created(), 7);
    assert_eq!(provider.resource_count(), 7);
}

#[tokio::test(start_paused = true)]
async fn teardown_twice_is_all_absent_the_second_time() {
    let provider = Arc::new(SimulatedProvider::new().with_termination_polls(2));
    let controller = controller(&provider, config(false));
    controller.run().await;

    let first = controller.teardown().await;
    assert!(first.is_clean(), "{}", first);
    assert_eq!(first.deleted().len(), 7);
    assert_eq!(provider.resource_count(), 0);

    let second = controller.teardown().await;
    assert_eq!(second.already_absent().len(), 7);
    assert!(second.deleted().is_empty());
    assert!(second.failed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn teardown_deletes_balancer_before_security_group() {
    let provider = Arc::new(SimulatedProvider::new());
    let controller = controller(&provider, config(false));
    controller.run().await;

    let report = controller.teardown().await;
    let position = |kind: ResourceKind| {
        report
            .entries
            .iter()
            .rposition(|e| e.kind == kind)
            .unwrap()
    };

    assert!(position(ResourceKind::ListenerRule) < position(ResourceKind::TargetGroup));
    assert!(position(ResourceKind::TargetGroup) < position(ResourceKind::LoadBalancer));
    assert!(position(ResourceKind::LoadBalancer) < position(ResourceKind::SecurityGroup));
    assert!(position(ResourceKind::ComputeInstance) < position(ResourceKind::SecurityGroup));
    assert!(position(ResourceKind::SecurityGroup) < position(ResourceKind::KeyPair));
}

#[tokio::test(start_paused = true)]
async fn partial_environment_teardown() {
    let provider = Arc::new(SimulatedProvider::new());
    provider.seed(ResourceKind::SecurityGroup, "newsbuddy-sg");
    provider.seed(ResourceKind::KeyPair, "newsbuddy-key");

    let report = controller(&provider, config(false)).teardown().await;

    assert_eq!(
        report.outcome_of(ResourceKind::SecurityGroup, "newsbuddy-sg"),
        Some(TeardownOutcome::Deleted)
    );
    assert_eq!(
        report.outcome_of(ResourceKind::KeyPair, "newsbuddy-key"),
        Some(TeardownOutcome::Deleted)
    );
    assert_eq!(report.deleted().len(), 2);
    assert_eq!(report.already_absent().len(), 5);
    assert!(report.failed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn permission_denied_lookup_aborts_without_creating() {
    let provider = Arc::new(SimulatedProvider::new());
    provider.inject(Fault::access_denied(
        Operation::Locate,
        ResourceKind::SecurityGroup,
    ));

    let report = controller(&provider, config(false)).run().await;

    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.class, ErrorClass::Fatal);
    assert_eq!(failure.stage, Stage::Compute);
    assert_eq!(provider.count(Operation::Create, ResourceKind::SecurityGroup), 0);
    assert_eq!(provider.count(Operation::Create, ResourceKind::ComputeInstance), 0);
    // The key pair resolved before the failure stays in the partial report.
    assert_eq!(report.resources.len(), 1);
    assert_eq!(report.resources[0].action, ReconcileAction::Created);
}

#[tokio::test(start_paused = true)]
async fn balancer_failure_keeps_compute_tier_in_report() {
    let provider = Arc::new(SimulatedProvider::new());
    provider.inject(Fault::api_error(Operation::Create, ResourceKind::TargetGroup));

    let report = controller(&provider, config(false)).run().await;

    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.stage, Stage::Balancer);
    assert_eq!(report.resources.len(), 4);
    assert!(report.endpoints.public_ip.is_some());
    // The load balancer exists, so its address is still shown.
    let dns = report.find(ResourceKind::LoadBalancer).unwrap().endpoint.clone().unwrap();
    assert!(report.endpoints.load_balancer.as_deref().is_some_and(|url| url.contains(&dns)));
    assert!(report.endpoints.routes.iter().all(|r| r.url.contains(&dns)));
}

#[tokio::test(start_paused = true)]
async fn throttled_lookups_are_retried() {
    let provider = Arc::new(SimulatedProvider::new());
    provider.inject(Fault::throttled(Operation::Locate, ResourceKind::LoadBalancer).times(2));

    let report = controller(&provider, config(false)).run().await;

    assert!(report.is_success(), "{}", report);
    assert_eq!(provider.count(Operation::Locate, ResourceKind::LoadBalancer), 3);
}

#[tokio::test(start_paused = true)]
async fn instance_timeout_proceeds_by_default() {
    let provider = Arc::new(SimulatedProvider::new().with_boot_polls(u32::MAX));
    let mut config = config(false);
    config.timing.instance_timeout = Duration::from_secs(60);

    let report = controller(&provider, config).run().await;

    assert!(report.is_success(), "{}", report);
    assert!(matches!(
        report.instance_readiness,
        Some(Readiness::TimedOut { .. })
    ));
    assert!(report.find(ResourceKind::ListenerRule).is_some());
}

#[tokio::test(start_paused = true)]
async fn instance_timeout_can_stop_the_run() {
    let provider = Arc::new(SimulatedProvider::new().with_boot_polls(u32::MAX));
    let mut config = config(false);
    config.timing.instance_timeout = Duration::from_secs(60);
    config.timing.proceed_on_timeout = false;

    let report = controller(&provider, config).run().await;

    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.stage, Stage::Readiness);
    assert_eq!(failure.class, ErrorClass::Transient);
    assert!(report.find(ResourceKind::LoadBalancer).is_none());
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_run_during_grace_period() {
    let provider = Arc::new(SimulatedProvider::new());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        trigger.cancel();
    });

    let report = controller_with_cancel(&provider, config(false), cancel)
        .run()
        .await;

    let failure = report.failure.as_ref().unwrap();
    assert!(failure.cancelled);
    assert_eq!(report.resources.len(), 3);
    assert_eq!(provider.count(Operation::Locate, ResourceKind::LoadBalancer), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_creates_nothing() {
    let provider = Arc::new(SimulatedProvider::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = controller_with_cancel(&provider, config(false), cancel)
        .run()
        .await;

    let failure = report.failure.as_ref().unwrap();
    assert!(failure.cancelled);
    assert_eq!(failure.stage, Stage::Compute);
    assert!(report.resources.is_empty());
    assert_eq!(provider.resource_count(), 0);
    assert_eq!(provider.count(Operation::Create, ResourceKind::KeyPair), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_compute_backoff_stops_before_instance() {
    let provider = Arc::new(SimulatedProvider::new());
    provider.inject(Fault::throttled(Operation::Locate, ResourceKind::ComputeInstance));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let report = controller_with_cancel(&provider, config(false), cancel)
        .run()
        .await;

    let failure = report.failure.as_ref().unwrap();
    assert!(failure.cancelled);
    assert_eq!(failure.stage, Stage::Compute);
    assert_eq!(report.created(), 2);
    assert!(report.find(ResourceKind::SecurityGroup).is_some());
    assert_eq!(provider.count(Operation::Create, ResourceKind::ComputeInstance), 0);
    // Only the first throttled lookup ran; the backoff was cut short.
    assert_eq!(provider.count(Operation::Locate, ResourceKind::ComputeInstance), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_balancer_tier_stops_before_target_groups() {
    let provider = Arc::new(SimulatedProvider::new());
    provider.inject(Fault::throttled(Operation::Locate, ResourceKind::TargetGroup));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    // Past the 300s grace period, inside the first target-group backoff.
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300_500)).await;
        trigger.cancel();
    });

    let report = controller_with_cancel(&provider, config(false), cancel)
        .run()
        .await;

    let failure = report.failure.as_ref().unwrap();
    assert!(failure.cancelled, "{:?}", failure);
    assert_eq!(failure.stage, Stage::Balancer);
    assert!(report.find(ResourceKind::LoadBalancer).is_some());
    assert_eq!(provider.count(Operation::Create, ResourceKind::TargetGroup), 0);
    assert_eq!(provider.count(Operation::Create, ResourceKind::ListenerRule), 0);
    assert!(provider.registrations().is_empty());
    assert!(report.endpoints.load_balancer.is_some());
}

#[tokio::test(start_paused = true)]
async fn teardown_removes_every_instance_sharing_the_name() {
    let provider = Arc::new(SimulatedProvider::new());
    let controller = controller(&provider, config(false));
    let run = controller.run().await;
    assert!(run.is_success(), "{}", run);

    let sg = run.find(ResourceKind::SecurityGroup).unwrap().id.clone();
    let instance_name = run.find(ResourceKind::ComputeInstance).unwrap().name.clone();
    provider.seed_instance(&instance_name, &sg);
    let stopped = provider.seed_instance(&instance_name, &sg);
    provider.stop_instance(&stopped);
    assert_eq!(provider.count_named(ResourceKind::ComputeInstance, &instance_name), 3);

    let first = controller.teardown().await;
    assert!(first.is_clean(), "{}", first);
    assert_eq!(
        first
            .deleted()
            .iter()
            .filter(|e| e.kind == ResourceKind::ComputeInstance)
            .count(),
        3
    );
    assert_eq!(
        first.outcome_of(ResourceKind::SecurityGroup, "newsbuddy-sg"),
        Some(TeardownOutcome::Deleted)
    );
    assert_eq!(provider.resource_count(), 0);

    let second = controller.teardown().await;
    assert_eq!(second.already_absent().len(), 7);
    assert!(second.failed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stopped_instance_is_not_reused() {
    let provider = Arc::new(SimulatedProvider::new());
    let first = controller(&provider, config(false)).run().await;
    let instance = first.find(ResourceKind::ComputeInstance).unwrap().clone();
    provider.stop_instance(&instance.id);

    let second = controller(&provider, config(false)).run().await;

    assert!(second.is_success(), "{}", second);
    let replacement = second.find(ResourceKind::ComputeInstance).unwrap();
    assert_eq!(replacement.action, ReconcileAction::Created);
    assert_ne!(replacement.id, instance.id);
}
