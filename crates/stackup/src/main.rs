mod commands;
mod context;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stackup")]
#[command(
    about = "Brings up a load-balanced EC2 stack, idempotently.",
    long_about = None
)]
struct Cli {
    /// Stack file (otherwise STACKUP_CONFIG_PATH, then stack.local.kdl, stack.kdl, .stackup/stack.kdl)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured region
    #[arg(long, global = true)]
    region: Option<String>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the deployment, reusing whatever already exists
    Up {
        /// Rehearse against an in-memory provider
        #[arg(long)]
        simulate: bool,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
        /// Skip the teardown that normally precedes provisioning
        #[arg(long)]
        no_pre_clean: bool,
    },
    /// Delete every resource of the deployment
    Down {
        /// Rehearse against an in-memory provider
        #[arg(long)]
        simulate: bool,
        /// Print the teardown report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show which resources exist, without changing anything
    Status {
        /// Query an in-memory provider
        #[arg(long)]
        simulate: bool,
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Parse and validate the stack file
    Validate,
    /// Show version information
    Version,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Version needs no stack file
    if matches!(cli.command, Commands::Version) {
        println!("stackup {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    init_logging(cli.verbose);

    let loaded = match commands::validate::load(cli.config.as_deref(), cli.region.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) if matches!(cli.command, Commands::Validate) => {
            commands::validate::report_error(&e);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    match cli.command {
        Commands::Up {
            simulate,
            json,
            no_pre_clean,
        } => {
            commands::up::handle(loaded, simulate, json, no_pre_clean).await?;
        }
        Commands::Down { simulate, json } => {
            commands::down::handle(loaded, simulate, json).await?;
        }
        Commands::Status { simulate, json } => {
            commands::status::handle(loaded, simulate, json).await?;
        }
        Commands::Validate => {
            commands::validate::handle(&loaded);
        }
        Commands::Version => {
            unreachable!("Version is handled before config loading");
        }
    }

    Ok(())
}
