//! Wiring shared by the mutating commands: provider, payload, cancellation,
//! run store.

use colored::Colorize;
use stackup_cloud::{
    BootPayload, CloudProvider, DeploymentConfig, RunStore, SimulatedProvider, Timing,
};
use stackup_config::LoadedConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct CommandContext {
    pub config: DeploymentConfig,
    pub provider: Arc<dyn CloudProvider>,
    pub cancel: CancellationToken,
    pub store: RunStore,
}

impl CommandContext {
    /// Build the provider and verify its credentials.
    ///
    /// Simulated runs swap in rehearsal timings but keep the configured
    /// switches.
    pub async fn prepare(loaded: LoadedConfig, simulate: bool) -> anyhow::Result<Self> {
        let mut config = loaded.config;
        let project_root = project_root(loaded.source.as_ref())?;

        let provider: Arc<dyn CloudProvider> = if simulate {
            config.timing = Timing {
                pre_clean: config.timing.pre_clean,
                proceed_on_timeout: config.timing.proceed_on_timeout,
                ..Timing::rehearsal()
            };
            Arc::new(SimulatedProvider::new().with_boot_polls(2))
        } else {
            cloud_provider(&config).await?
        };

        let auth = provider.check_auth().await?;
        if !auth.authenticated {
            anyhow::bail!(
                "{} credentials rejected: {}",
                provider.display_name(),
                auth.error.unwrap_or_default()
            );
        }
        if let Some(account) = &auth.account_info {
            eprintln!("{} {}", provider.display_name().cyan(), account.dimmed());
        }

        Ok(Self {
            config,
            provider,
            cancel: cancel_on_ctrl_c(),
            store: RunStore::new(project_root),
        })
    }

    /// Boot script file if configured, otherwise the built-in compose setup
    pub async fn payload(&self) -> anyhow::Result<BootPayload> {
        let instance = &self.config.instance;
        if let Some(path) = &instance.boot_script {
            return Ok(BootPayload::from_file(path).await?);
        }
        Ok(match &instance.repository {
            Some(repository) => BootPayload::compose_app(repository),
            None => BootPayload::empty(),
        })
    }
}

#[cfg(feature = "aws-cloud")]
async fn cloud_provider(config: &DeploymentConfig) -> anyhow::Result<Arc<dyn CloudProvider>> {
    let provider = stackup_cloud_aws::AwsProvider::new(&config.region, config.key_dir.clone()).await;
    Ok(Arc::new(provider))
}

#[cfg(not(feature = "aws-cloud"))]
async fn cloud_provider(_config: &DeploymentConfig) -> anyhow::Result<Arc<dyn CloudProvider>> {
    anyhow::bail!("this build has no AWS support (feature `aws-cloud`); use --simulate")
}

/// The stack file's directory, or the working directory for the built-in
/// deployment
fn project_root(source: Option<&PathBuf>) -> anyhow::Result<PathBuf> {
    match source.and_then(|p| p.parent()) {
        Some(dir) if !dir.as_os_str().is_empty() => Ok(dir.to_path_buf()),
        _ => Ok(std::env::current_dir()?),
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{}",
                "Interrupt received, stopping after the current step...".yellow()
            );
            token.cancel();
        }
    });
    cancel
}
