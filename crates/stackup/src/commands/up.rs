use super::{heading, kind_label};
use crate::context::CommandContext;
use colored::Colorize;
use stackup_cloud::{LastRun, Readiness, ReconcileAction, RunController, RunReport};
use stackup_config::LoadedConfig;

pub async fn handle(
    loaded: LoadedConfig,
    simulate: bool,
    json: bool,
    no_pre_clean: bool,
) -> anyhow::Result<()> {
    let mut ctx = CommandContext::prepare(loaded, simulate).await?;
    if no_pre_clean {
        ctx.config.timing.pre_clean = false;
    }

    if !json {
        println!(
            "{} {} ({})",
            "Bringing up".green().bold(),
            ctx.config.name.cyan(),
            ctx.config.region
        );
        if simulate {
            println!("{}", "Rehearsal against the simulated provider".yellow());
        }
        if ctx.config.timing.pre_clean {
            println!("{}", "Pre-clean: existing resources are torn down first".dimmed());
        }
    }

    let payload = ctx.payload().await?;
    let lock = ctx.store.acquire_lock(&ctx.config.name).await?;

    let controller = RunController::new(
        ctx.provider.clone(),
        ctx.config.clone(),
        payload,
        ctx.cancel.clone(),
    )?;
    let report = controller.run().await;

    if let Err(e) = ctx
        .store
        .save(LastRun::Up {
            report: report.clone(),
        })
        .await
    {
        tracing::warn!(error = %e, "Could not record the run");
    }
    lock.release().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    match &report.failure {
        Some(failure) if failure.cancelled => anyhow::bail!("run interrupted during {}", failure.stage),
        Some(failure) => anyhow::bail!("run stopped during {}: {}", failure.stage, failure.message),
        None => Ok(()),
    }
}

fn print_report(report: &RunReport) {
    if let Some(pre_clean) = &report.pre_clean {
        println!("Pre-clean: {}", pre_clean);
    }

    heading("Resources:");
    for record in &report.resources {
        let action = match record.action {
            ReconcileAction::Created => "created".green(),
            ReconcileAction::Reused => "reused ".blue(),
        };
        println!(
            "  {} {} {:<28} {}",
            action,
            kind_label(record.kind),
            record.name.cyan(),
            record.id.to_string().dimmed()
        );
    }

    match &report.instance_readiness {
        Some(Readiness::Ready { .. }) => println!("  {} instance is running", "✓".green()),
        Some(Readiness::TimedOut { waited }) => println!(
            "  {} instance not running after {}s, continued anyway",
            "⚠".yellow(),
            waited.as_secs()
        ),
        None => {}
    }

    let endpoints = &report.endpoints;
    if endpoints.load_balancer.is_some() || endpoints.public_ip.is_some() {
        heading("Endpoints:");
        if let Some(url) = &endpoints.load_balancer {
            println!("  {:<16} {}", "load balancer", url.cyan());
        }
        for route in &endpoints.routes {
            println!("  {:<16} {}", route.target_group, route.url.cyan());
        }
        for direct in &endpoints.direct {
            println!("  {:<16} {}", format!("{} (direct)", direct.target_group), direct.url);
        }
        if let Some(ssh) = &endpoints.ssh {
            println!("  {:<16} {}", "ssh", ssh);
        }
    }

    println!();
    match &report.failure {
        None => println!(
            "{} {} created, {} reused in {:.1}s",
            "✓ Done:".green().bold(),
            report.created(),
            report.reused(),
            report.duration_ms as f64 / 1000.0
        ),
        Some(failure) => {
            eprintln!(
                "{} during {} ({})",
                "✗ Stopped".red().bold(),
                failure.stage,
                failure.class
            );
            eprintln!("  {}", failure.message);
            eprintln!(
                "  {}",
                "Resources above were kept. Run `stackup up` again to resume.".dimmed()
            );
        }
    }
}
