use colored::Colorize;
use stackup_cloud::DeploymentTopology;
use stackup_config::{ConfigError, LoadedConfig};
use std::path::Path;

/// Load the stack file and apply command-line overrides
pub fn load(explicit: Option<&Path>, region: Option<&str>) -> stackup_config::Result<LoadedConfig> {
    let mut loaded = stackup_config::load_config(explicit)?;
    if let Some(region) = region {
        loaded.config.region = region.to_string();
        loaded.config.validate()?;
    }
    Ok(loaded)
}

pub fn report_error(error: &ConfigError) {
    eprintln!();
    eprintln!("{}", "✗ Invalid configuration".red().bold());
    match error {
        ConfigError::Invalid(inner) => {
            // Validation joins every problem with "; "
            let message = inner.to_string();
            let problems = message
                .strip_prefix("Invalid configuration: ")
                .unwrap_or(&message);
            for problem in problems.split("; ") {
                eprintln!("  - {}", problem);
            }
        }
        other => eprintln!("  {}", other),
    }
}

pub fn handle(loaded: &LoadedConfig) {
    let config = &loaded.config;
    match &loaded.source {
        Some(path) => println!("Stack file: {}", path.display().to_string().cyan()),
        None => println!("Stack file: {}", "(none, built-in deployment)".dimmed()),
    }

    let topology = match DeploymentTopology::from_config(config) {
        Ok(topology) => topology,
        Err(e) => {
            report_error(&ConfigError::Invalid(e));
            std::process::exit(1);
        }
    };

    println!("{}", "✓ Configuration is valid".green().bold());
    println!();
    println!("Deployment: {} in {}", config.name.cyan(), config.region);
    println!(
        "Instance:   {} {} ({} GiB)",
        config.instance.instance_type, config.instance.image_id, config.instance.volume_size_gib
    );

    println!();
    println!("Resources ({}):", topology.specs().len());
    for spec in topology.specs() {
        println!("  {:<15} {}", spec.kind().as_str(), spec.name.cyan());
    }

    println!();
    println!("Routing (listener port {}):", config.load_balancer.listener_port);
    for (index, tg) in config.target_groups.iter().enumerate() {
        let routes = if index == 0 {
            "default".to_string()
        } else {
            format!(
                "{} (priority {})",
                tg.routes.join(", "),
                tg.priority.unwrap_or_default()
            )
        };
        println!(
            "  {:<12} port {:<5} health {}:{}  {}",
            tg.name.cyan(),
            tg.port,
            tg.health_check.port,
            tg.health_check.path,
            routes
        );
    }

    println!();
    println!("Ingress:");
    for rule in &config.security_group.ingress {
        println!("  {:<5} {:<18} {}", rule.port, rule.cidr, rule.description.dimmed());
    }
}
