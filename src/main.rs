//! RepDev - template-driven local development environments
//!
//! This is the main CLI entry point for RepDev.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use repdev::client::{DockerRuntime, RuntimeClient};
use repdev::error::RepdevError;
use repdev::orchestrator::{EnvironmentOrchestrator, OrchestrationOptions};
use repdev::settings::Settings;
use repdev::state::StateStore;
use repdev::teardown::TeardownResolver;
use repdev::template::{EnvironmentConfig, TemplateParser};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// RepDev - local multi-container development environments
#[derive(Parser)]
#[command(name = "repdev")]
#[command(version)]
#[command(about = "Bring template-defined development environments up and down", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Template file (defaults to ./repdev.yml)
    #[arg(short, long, global = true)]
    template: Option<PathBuf>,

    /// Container runtime endpoint (unix://, tcp:// or http://)
    #[arg(long, global = true)]
    host: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and start the environment
    Up {
        /// Recreate containers that are already running
        #[arg(short, long)]
        force: bool,
        /// Show what would happen without touching the runtime
        #[arg(long)]
        dry_run: bool,
        /// Do not wait for services to become ready
        #[arg(long)]
        no_wait: bool,
        /// Only act on these services
        #[arg(short, long = "service")]
        services: Vec<String>,
    },

    /// Stop and remove the environment's containers
    Down {
        /// Remove running containers
        #[arg(short, long)]
        force: bool,
        /// Show what would be removed
        #[arg(long)]
        dry_run: bool,
        /// Only act on these services
        #[arg(short, long = "service")]
        services: Vec<String>,
    },

    /// Show the environment's containers
    Status,

    /// Restart services
    Restart {
        /// Service names
        services: Vec<String>,
        /// Restart every service
        #[arg(short, long)]
        all: bool,
    },

    /// Validate the template
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("REPDEV_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let settings = Settings::from_env().docker_host(cli.host);
    let template = resolve_template(cli.template, &settings)?;

    match cli.command {
        Commands::Validate => return Ok(validate(&template)),

        Commands::Up {
            force,
            dry_run,
            no_wait,
            services,
        } => {
            let config = TemplateParser::parse_file(&template)?;
            let options = OrchestrationOptions::default()
                .force(force)
                .dry_run(dry_run)
                .no_wait(no_wait)
                .only(services);

            let orchestrator = EnvironmentOrchestrator::new(connect(&settings)?, &settings)?;
            let report = orchestrator.up(&config, &options).await?;

            println!();
            println!("{:<20} {}", "SERVICE", "STATUS");
            for (name, outcome) in &report.services {
                println!("{:<20} {}", name, outcome);
            }

            if !dry_run {
                state_store(&config, &settings).record_up(&config, &report);
            }
        }

        Commands::Down {
            force,
            dry_run,
            services,
        } => {
            let config = TemplateParser::parse_file(&template)?;
            let options = OrchestrationOptions::default()
                .force(force)
                .dry_run(dry_run)
                .only(services);

            let resolver = TeardownResolver::new(connect(&settings)?).stop_timeout(settings.stop_timeout_secs);
            let report = resolver.down(&config, &options).await?;

            println!();
            println!("Resolved by {}", report.resolution);
            if !report.containers.is_empty() {
                println!("{:<24} {:<16} {}", "CONTAINER", "SERVICE", "RESULT");
                for c in &report.containers {
                    println!("{:<24} {:<16} {}", c.container, c.service, c.outcome);
                }
            }

            let failures = report.failures().count();
            if failures > 0 {
                eprintln!("{} container(s) could not be removed", failures);
            }

            if !dry_run {
                state_store(&config, &settings).record_down(&report);
            }
        }

        Commands::Status => {
            let config = TemplateParser::parse_file(&template)?;
            let orchestrator = EnvironmentOrchestrator::new(connect(&settings)?, &settings)?;
            let containers = orchestrator.status(&config).await?;

            if containers.is_empty() {
                println!("No containers found for {}", template.display());
            } else {
                println!("{:<24} {:<16} {:<12} {}", "NAME", "SERVICE", "STATE", "IMAGE");
                for c in &containers {
                    let service = c
                        .label(repdev::ownership::SERVICE_LABEL_KEY)
                        .or_else(|| config.service_for_container(c.name()))
                        .unwrap_or("-");
                    println!("{:<24} {:<16} {:<12} {}", c.name(), service, c.state.to_string(), c.image);
                }
            }

            let state = state_store(&config, &settings).load();
            if let Some(updated_at) = state.updated_at {
                println!();
                println!("Last recorded {}", updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
                for (name, record) in &state.services {
                    println!("  {:<20} {}", name, record.status);
                }
            }
        }

        Commands::Restart { services, all } => {
            if services.is_empty() && !all {
                bail!("Name the services to restart, or pass --all");
            }

            let config = TemplateParser::parse_file(&template)?;
            let orchestrator = EnvironmentOrchestrator::new(connect(&settings)?, &settings)?;
            let selected = if all { Vec::new() } else { services };

            for (name, outcome) in orchestrator.restart(&config, &selected).await? {
                println!("{:<20} {}", name, outcome);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn resolve_template(explicit: Option<PathBuf>, settings: &Settings) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }

    let cwd = std::env::current_dir().context("Cannot determine working directory")?;
    Ok(TemplateParser::find_template_file(&cwd).unwrap_or_else(|| cwd.join(&settings.template_file)))
}

fn connect(settings: &Settings) -> anyhow::Result<Arc<dyn RuntimeClient>> {
    let runtime = DockerRuntime::connect(settings)?;
    Ok(Arc::new(runtime))
}

fn state_store(config: &EnvironmentConfig, settings: &Settings) -> StateStore {
    StateStore::new(&config.project_root(), &settings.state_dir)
}

/// Exit 2 when the template is invalid.
fn validate(template: &Path) -> ExitCode {
    let config = match TemplateParser::parse_file(template) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Template is invalid: {}", e);
            return ExitCode::from(2);
        }
    };

    match TemplateParser::validate(&config) {
        Ok(warnings) => {
            for warning in &warnings {
                println!("Warning: {}", warning);
            }
            println!(
                "{} is valid ({} services)",
                template.display(),
                config.services.len()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Template is invalid: {}", e);
            ExitCode::from(2)
        }
    }
}

fn report_error(err: &anyhow::Error) {
    eprintln!("Error: {}", err);

    let Some(repdev_err) = err.downcast_ref::<RepdevError>() else {
        return;
    };

    if let Some(diagnosis) = repdev_err.diagnosis() {
        eprintln!();
        eprintln!("Likely cause: {}", diagnosis);
    }
    eprintln!();
    eprintln!("Suggestions:");
    for hint in repdev_err.hints() {
        eprintln!("  - {}", hint);
    }
}
