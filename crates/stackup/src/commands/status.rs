use super::{heading, kind_label};
use crate::context::CommandContext;
use colored::Colorize;
use stackup_cloud::{BootPayload, LastRun, RunController};
use stackup_config::LoadedConfig;

pub async fn handle(loaded: LoadedConfig, simulate: bool, json: bool) -> anyhow::Result<()> {
    let ctx = CommandContext::prepare(loaded, simulate).await?;

    let controller = RunController::new(
        ctx.provider.clone(),
        ctx.config.clone(),
        BootPayload::empty(),
        ctx.cancel.clone(),
    )?;
    let entries = controller.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!(
        "{} {} ({})",
        "Deployment".bold(),
        ctx.config.name.cyan(),
        ctx.config.region
    );

    heading("Resources:");
    for entry in &entries {
        match &entry.id {
            Some(id) => {
                print!(
                    "  {} {} {:<28} {}",
                    "present".green(),
                    kind_label(entry.kind),
                    entry.name.cyan(),
                    id.to_string().dimmed()
                );
                if let Some(endpoint) = &entry.endpoint {
                    print!("  {}", endpoint);
                }
                println!();
            }
            None => println!(
                "  {} {} {}",
                "absent ".dimmed(),
                kind_label(entry.kind),
                entry.name
            ),
        }
    }

    let present = entries.iter().filter(|e| e.id.is_some()).count();
    println!();
    println!("{}/{} resources present", present, entries.len());

    match ctx.store.load().await {
        Ok(Some(stored)) => {
            let summary = match &stored.run {
                LastRun::Up { report } if report.is_success() => "up (succeeded)".to_string(),
                LastRun::Up { report } => match &report.failure {
                    Some(failure) => format!("up (stopped during {})", failure.stage),
                    None => "up".to_string(),
                },
                LastRun::Down { report, .. } => format!("down ({})", report),
            };
            println!(
                "Last run: {} at {}",
                summary,
                stored.recorded_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Could not read the last run record"),
    }

    Ok(())
}
