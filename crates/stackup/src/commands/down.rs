use super::{heading, kind_label};
use crate::context::CommandContext;
use colored::Colorize;
use stackup_cloud::{BootPayload, LastRun, RunController, TeardownOutcome, TeardownReport};
use stackup_config::LoadedConfig;

pub async fn handle(loaded: LoadedConfig, simulate: bool, json: bool) -> anyhow::Result<()> {
    let ctx = CommandContext::prepare(loaded, simulate).await?;

    if !json {
        println!(
            "{} {} ({})",
            "Tearing down".yellow().bold(),
            ctx.config.name.cyan(),
            ctx.config.region
        );
    }

    let lock = ctx.store.acquire_lock(&ctx.config.name).await?;

    let controller = RunController::new(
        ctx.provider.clone(),
        ctx.config.clone(),
        BootPayload::empty(),
        ctx.cancel.clone(),
    )?;
    let report = controller.teardown().await;

    if let Err(e) = ctx
        .store
        .save(LastRun::Down {
            deployment: ctx.config.name.clone(),
            report: report.clone(),
        })
        .await
    {
        tracing::warn!(error = %e, "Could not record the teardown");
    }
    lock.release().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.interrupted {
        anyhow::bail!("teardown interrupted");
    }
    if !report.failed().is_empty() {
        anyhow::bail!("{} resource(s) could not be deleted", report.failed().len());
    }
    Ok(())
}

fn print_report(report: &TeardownReport) {
    heading("Resources:");
    for entry in &report.entries {
        let outcome = match entry.outcome {
            TeardownOutcome::Deleted => "deleted".green(),
            TeardownOutcome::AlreadyAbsent => "absent ".dimmed(),
            TeardownOutcome::Failed => "failed ".red(),
        };
        print!("  {} {} {}", outcome, kind_label(entry.kind), entry.name.cyan());
        if let Some(error) = &entry.error {
            print!("  {}", error.red());
        }
        println!();
    }

    println!();
    if report.is_clean() {
        println!("{} {}", "✓ Done:".green().bold(), report);
    } else {
        eprintln!("{} {}", "✗ Incomplete:".red().bold(), report);
    }
}
