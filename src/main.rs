mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands, InfraCommands};
use instance_fleet::{
    ComposeExecutor, DockerClient, Error as FleetError, FileStateStore, InstanceKey,
    LifecycleController, PsqlAdmin, Settings, StateStore, TerminalOperator,
};
use std::sync::Arc;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        if let Some(fleet_error) = e.downcast_ref::<FleetError>() {
            eprintln!("Error: {}", fleet_error);
            if let FleetError::HealthTimeout { service, logs, .. } = fleet_error {
                if !logs.trim().is_empty() {
                    eprintln!("\nLast log lines of '{}':\n{}", service, logs.trim_end());
                }
            }
            if let Some(suggestion) = fleet_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(dir) = cli.state_dir.clone() {
        settings.state_dir = Some(dir);
    }

    let store = Arc::new(FileStateStore::open(settings.resolved_state_dir()?)?);
    let executor = Arc::new(ComposeExecutor::from_settings(&settings)?);

    let mut admin = PsqlAdmin::new(
        DockerClient::new(settings.command_timeout()?),
        &settings.infra_project,
        &settings.database_service,
        &settings.admin_user,
    );
    if let Some(infra) = store.get_infra()? {
        admin = admin.with_password(&infra.admin_password);
    }

    let controller = LifecycleController::new(
        settings,
        store,
        executor,
        Arc::new(admin),
        Arc::new(TerminalOperator),
    );
    let out = output::CliOutput;

    match cli.command {
        Commands::Infra(InfraCommands::Up) => commands::run_infra_up(&controller, &out).await,
        Commands::Infra(InfraCommands::Down { force }) => {
            commands::run_infra_down(&controller, force, &out).await
        }
        Commands::Infra(InfraCommands::Status) => {
            commands::run_infra_status(&controller, &out).await
        }
        Commands::Up {
            server,
            instance,
            port,
            show_secrets,
        } => {
            let key = InstanceKey::new(&server, &instance)?;
            commands::run_up(&controller, &key, port, show_secrets, &out).await
        }
        Commands::Update { server, instance } => {
            let key = InstanceKey::new(&server, &instance)?;
            commands::run_update(&controller, &key, &out).await
        }
        Commands::Down { server, instance } => {
            let key = InstanceKey::new(&server, &instance)?;
            commands::run_down(&controller, &key, &out).await
        }
        Commands::Show {
            server,
            instance,
            show_secrets,
        } => {
            let key = InstanceKey::new(&server, &instance)?;
            commands::run_show(&controller, &key, show_secrets, &out)
        }
        Commands::List { running, json } => {
            commands::run_list(&controller, running, json, &out).await
        }
        Commands::Orphans { dry_run } => commands::run_orphans(&controller, dry_run, &out).await,
    }
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
