mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use courier::db::{connection_repo, job_repo, log_repo, run_repo};
use courier::provider::{ProviderFactory, ProviderRegistry};
use courier::provider::ProviderError;
use courier::{
    load_config, ConfigError, CourierError, Database, DatabaseError, EngineConfig, EngineError,
    JobStatus, LogFormat, RunReport, RunStatus, StorageProvider, TransferEngine,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::cli::{Cli, Command, JobStatusArg, LogFormatArg};

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Courier(#[from] CourierError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("No database path; pass --db or set COURIER_DB")]
    NoDatabase,

    #[error("Failed to write output: {0}")]
    Output(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let format = match cli.log_format {
        LogFormatArg::Text => LogFormat::Text,
        LogFormatArg::Json => LogFormat::Json,
    };
    if let Err(e) = courier::init_logging(format, "info") {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    let db_path = cli
        .db
        .clone()
        .or_else(|| config.resolve_database_path())
        .ok_or(CliError::NoDatabase)?;
    debug!(path = %db_path.display(), "Opening database");
    let db = Arc::new(Database::open(&db_path)?);
    let registry = Arc::new(ProviderRegistry::new(config.clone()));

    match cli.command {
        Command::Run { job } => {
            let engine = TransferEngine::new(db, registry, config);
            match engine.run_job(&job).await? {
                RunReport::AlreadyRunning => {
                    eprintln!("job {} is already running", job);
                    Ok(ExitCode::SUCCESS)
                }
                RunReport::Finished {
                    run_id,
                    status,
                    files_transferred,
                    bytes_transferred,
                    error_message,
                } => {
                    print_json(&serde_json::json!({
                        "runId": run_id,
                        "status": status,
                        "filesTransferred": files_transferred,
                        "bytesTransferred": bytes_transferred,
                        "errorMessage": error_message,
                    }))?;
                    Ok(if status == RunStatus::Success {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::FAILURE
                    })
                }
            }
        }
        Command::DryRun { job } => {
            let engine = TransferEngine::new(db, registry, config);
            let result = engine.dry_run_job(&job).await?;
            print_json(&result)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Jobs { status } => {
            let status = status.map(|s| match s {
                JobStatusArg::Active => JobStatus::Active,
                JobStatusArg::Inactive => JobStatus::Inactive,
                JobStatusArg::Running => JobStatus::Running,
                JobStatusArg::Error => JobStatus::Error,
            });
            print_json(&job_repo::list(&db, status)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Runs { job, limit } => {
            print_json(&run_repo::list_for_job(&db, &job, limit)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Logs { run } => {
            print_json(&log_repo::list_for_run(&db, &run)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Browse { connection, path } => {
            let conn = match connection_repo::find_by_id(&db, &connection)? {
                Some(conn) => Some(conn),
                None => connection_repo::find_by_name(&db, &connection)?,
            }
            .ok_or_else(|| EngineError::ConnectionNotFound(connection.clone()))?;

            let mut provider = registry.create(&conn)?;
            provider.connect().await?;
            let listing = async {
                let dir = match path {
                    Some(path) => path,
                    None => provider
                        .working_directory()
                        .await?
                        .unwrap_or_default(),
                };
                provider.list_directory(&dir).await
            }
            .await;
            if let Err(e) = provider.disconnect().await {
                debug!(error = %e, "Disconnect failed");
            }
            print_json(&listing?)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
