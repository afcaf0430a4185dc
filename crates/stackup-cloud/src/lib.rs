//! stackup cloud orchestration
//!
//! Idempotent provisioning and teardown of one fixed deployment topology:
//! an SSH key pair, a security group, a compute instance, and a load
//! balancer with target groups and a path-routing listener. Every step looks
//! the resource up by its stable name first and reuses it when present, so a
//! run can be repeated safely after any interruption.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   stackup CLI                    │
//! │             (stackup up/down/status)             │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                 stackup-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │              RunController               │   │
//! │  │  teardown ─▶ sequencer ─▶ waiter ─▶ report│   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │  Reconciler  │  │   Locator    │            │
//! │  └──────────────┘  └──────────────┘            │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │     Provider Abstraction                 │   │
//! │  │     trait CloudProvider { ... }          │   │
//! │  └──────────────────────────────────────────┘   │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │      aws      │ │   simulated   │
//! │   provider    │ │   provider    │
//! └───────────────┘ └───────────────┘
//! ```

pub mod controller;
pub mod error;
pub mod locator;
pub mod payload;
pub mod provider;
pub mod reconcile;
pub mod report;
pub mod resource;
pub mod retry;
pub mod sequencer;
pub mod simulated;
pub mod state;
pub mod teardown;
pub mod topology;
pub mod waiter;

// Re-exports
pub use controller::{RunController, StatusEntry, Timing};
pub use error::{CloudError, ErrorClass, Result};
pub use locator::ResourceLocator;
pub use payload::BootPayload;
pub use provider::{
    AuthStatus, CloudProvider, CreateRequest, Dependencies, InstancePhase, InstanceState,
};
pub use reconcile::{ReconcileAction, Reconciled, Reconciler};
pub use report::{
    Endpoints, ResourceRecord, RouteEndpoint, RunFailure, RunReport, Stage, TeardownEntry,
    TeardownOutcome, TeardownReport,
};
pub use resource::{
    ExternalId, HealthCheck, IngressRule, InstanceConfig, Lifecycle, ListenerConfig,
    LoadBalancerConfig, Located, ResourceConfig, ResourceHandle, ResourceKind, ResourceSpec,
    RoutingRule, SecurityGroupConfig, TargetGroupConfig,
};
pub use retry::RetryPolicy;
pub use sequencer::{BalancerOutputs, ComputeOutputs, DependencySequencer};
pub use simulated::SimulatedProvider;
pub use state::{LastRun, RunLock, RunStore, StoredRun};
pub use teardown::{TeardownCoordinator, TeardownTiming};
pub use topology::{
    DeploymentConfig, DeploymentTopology, InstanceSettings, LoadBalancerSettings,
    TargetGroupSettings,
};
pub use waiter::{PollOutcome, Readiness, ReadinessWaiter, WaitConfig, poll_until};
