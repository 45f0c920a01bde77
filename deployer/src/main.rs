use clap::{Parser, Subcommand};
use deployer::{provider_config, LocalStackStore, StackName, StackRunner, Unit, ORGANIZATION};
use provider::{PlanProvider, ResourceProvider};
use stack_config::{stack_file_path, ConfigLoader};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "infra")]
#[command(about = "Compose and plan the network, Kubernetes and state stacks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a unit: load its configuration, resolve references, plan resources and publish exports
    Up {
        /// The unit to run
        #[arg(value_enum)]
        unit: Unit,
        /// Stack (environment) name
        #[arg(short, long)]
        stack: String,
        /// Directory holding Stack.<stack>.toml files
        #[arg(long, default_value = ".")]
        config_dir: PathBuf,
        /// Directory where stack outputs are published and read back
        #[arg(long, default_value = ".stacks")]
        state_dir: PathBuf,
        /// Configuration override as key=value (repeatable)
        #[arg(short = 'c', long = "config")]
        overrides: Vec<String>,
        /// Print secret outputs in plain text
        #[arg(long)]
        show_secrets: bool,
        /// Do not publish the exports
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the published outputs of a stack
    Outputs {
        /// The unit whose outputs to show
        #[arg(value_enum)]
        unit: Unit,
        /// Stack (environment) name
        #[arg(short, long)]
        stack: String,
        /// Directory where stack outputs are published
        #[arg(long, default_value = ".stacks")]
        state_dir: PathBuf,
        /// Print secret outputs in plain text
        #[arg(long)]
        show_secrets: bool,
    },
    /// List the available units
    Units,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Up {
            unit,
            stack,
            config_dir,
            state_dir,
            overrides,
            show_secrets,
            dry_run,
        } => {
            if let Err(e) = up(
                unit,
                &stack,
                &config_dir,
                state_dir,
                &overrides,
                show_secrets,
                dry_run,
            )
            .await
            {
                error!("Run of {} stack '{}' failed: {}", unit, stack, e);
                return Err(e);
            }
        }
        Commands::Outputs {
            unit,
            stack,
            state_dir,
            show_secrets,
        } => {
            outputs(unit, &stack, state_dir, show_secrets).await?;
        }
        Commands::Units => {
            list_units();
        }
    }

    Ok(())
}

async fn up(
    unit: Unit,
    stack: &str,
    config_dir: &std::path::Path,
    state_dir: PathBuf,
    overrides: &[String],
    show_secrets: bool,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut loader = ConfigLoader::new(unit.project())
        .with_file(stack_file_path(config_dir, stack))
        .with_env_overrides();
    for raw in overrides {
        loader = loader.with_raw_override(raw)?;
    }
    let config = loader.load()?;

    let provider = Arc::new(PlanProvider::new(provider_config(&config)?)?);
    let store = Arc::new(LocalStackStore::new(state_dir));
    let mut runner = StackRunner::new(provider.clone(), store.clone());

    let result = runner.run(unit, stack, &config).await?;

    let requests = provider.requests().await;
    println!(
        "Planned {} resources for {} ({} provider):",
        requests.len(),
        result.stack,
        provider.provider_name()
    );
    for request in &requests {
        println!("  + {} '{}'", request.kind(), request.name());
    }

    println!("\nOutputs:");
    println!(
        "{}",
        serde_json::to_string_pretty(&result.exports.to_display_json(show_secrets))?
    );

    if dry_run {
        info!("Dry run, outputs of {} were not published", result.stack);
    } else {
        let path = store.save(&result.stack, &result.exports).await?;
        println!("\nPublished outputs to {}", path.display());
    }

    Ok(())
}

async fn outputs(
    unit: Unit,
    stack: &str,
    state_dir: PathBuf,
    show_secrets: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = LocalStackStore::new(state_dir);
    let name = StackName::new(ORGANIZATION, unit.project(), stack);

    match store.load(&name).await? {
        Some(document) => {
            println!("{} (updated {})", document.stack, document.updated_at.to_rfc3339());
            println!(
                "{}",
                serde_json::to_string_pretty(&document.outputs.to_display_json(show_secrets))?
            );
        }
        None => {
            println!("No outputs published for {}", name);
        }
    }

    Ok(())
}

fn list_units() {
    println!("Available units:");
    for unit in Unit::all() {
        println!("  - {} ({}): {}", unit, unit.project(), unit.description());
    }
}
