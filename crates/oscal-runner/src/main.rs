use clap::{Parser, Subcommand};
use oscal_runner::{
    ExecutionOutcome, ExecutorKind, FallbackCoordinator, LocalExecutor, Operation, ProcessRunner,
    RunnerConfig, RunnerError, SarifValidator, ServerExecutor, ServiceLifecycleManager,
    ServiceRuntimeContext, StartOutcome, logging,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;

#[derive(Parser)]
#[command(name = "oscal-runner", version, about = "Run OSCAL operations locally or on oscal-server")]
struct Cli {
    /// Backend tried first; a failing server falls back to the local tool
    #[arg(long, global = true, default_value = "local")]
    executor: ExecutorKind,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage the background oscal-server
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },
    /// Validate a document
    Validate {
        document: String,
        /// Additional metaschema constraint files
        #[arg(short = 'c', long = "constraint")]
        constraints: Vec<String>,
        /// Print the SARIF findings log instead of the tool output
        #[arg(long)]
        sarif: bool,
    },
    /// Convert a document to another format
    Convert {
        document: String,
        #[arg(long = "to", default_value = "json")]
        format: String,
    },
    /// Resolve a profile into a catalog
    Resolve {
        document: String,
        #[arg(long = "to", default_value = "json")]
        format: String,
    },
    /// Evaluate a metapath expression against a document
    Query {
        document: String,
        #[arg(short = 'e', long)]
        expression: String,
    },
}

#[derive(Subcommand)]
enum ServerAction {
    Start {
        /// Stay attached and stream the server's output
        #[arg(long)]
        foreground: bool,
    },
    Stop,
    Restart,
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            debug!(error = %e, "Command failed");
            eprintln!("{}", e.diagnostic());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, RunnerError> {
    let config = RunnerConfig::from_env()?;
    let runner = ProcessRunner::new();

    let operation = match cli.command {
        Command::Server { action } => return run_server(action, config, runner).await,
        Command::Validate {
            document,
            constraints,
            sarif,
        } => {
            let operation = constraints
                .into_iter()
                .fold(Operation::validate(document.as_str()), Operation::with_constraint);
            if sarif {
                let coordinator = coordinator(&config, runner)?;
                let log = SarifValidator::new(&coordinator)
                    .validate_with_sarif(&operation, cli.executor)
                    .await?;
                let text = serde_json::to_string_pretty(&log)
                    .map_err(|e| RunnerError::Sarif(e.to_string()))?;
                println!("{text}");
                return Ok(ExitCode::SUCCESS);
            }
            operation
        }
        Command::Convert { document, format } => Operation::convert(document.as_str(), format),
        Command::Resolve { document, format } => Operation::resolve(document.as_str(), format),
        Command::Query {
            document,
            expression,
        } => Operation::query(document.as_str(), expression),
    };

    let outcome = coordinator(&config, runner)?
        .execute_with_fallback(&operation, cli.executor)
        .await;

    match outcome {
        ExecutionOutcome::Success { stdout, stderr } => {
            print!("{stdout}");
            if !stderr.is_empty() {
                eprint!("{stderr}");
            }
            Ok(ExitCode::SUCCESS)
        }
        ExecutionOutcome::Failure(failure) => Err(failure.into()),
    }
}

fn coordinator(
    config: &RunnerConfig,
    runner: ProcessRunner,
) -> Result<FallbackCoordinator, RunnerError> {
    let local = LocalExecutor::new(config, runner).with_loader(true);
    let remote = ServerExecutor::new(config)?;
    Ok(FallbackCoordinator::new(Arc::new(local), Arc::new(remote)))
}

async fn run_server(
    action: ServerAction,
    config: RunnerConfig,
    runner: ProcessRunner,
) -> Result<ExitCode, RunnerError> {
    let manager = ServiceLifecycleManager::new(ServiceRuntimeContext::new(config)?, runner)?;

    match action {
        ServerAction::Start { foreground } => report_start(manager.start(foreground).await?),
        ServerAction::Stop => {
            println!("{}", manager.stop().await?);
            Ok(ExitCode::SUCCESS)
        }
        ServerAction::Restart => {
            let (stopped, started) = manager.restart().await?;
            println!("{stopped}");
            report_start(started)
        }
        ServerAction::Status => {
            let report = manager.status_report().await;
            println!("{report}");
            Ok(if report.health.reachable {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn report_start(outcome: StartOutcome) -> Result<ExitCode, RunnerError> {
    match outcome {
        StartOutcome::Detached(record) => {
            println!("oscal-server started (PID {})", record.pid);
            Ok(ExitCode::SUCCESS)
        }
        StartOutcome::Foreground(ExecutionOutcome::Success { .. }) => Ok(ExitCode::SUCCESS),
        StartOutcome::Foreground(ExecutionOutcome::Failure(failure)) => Err(failure.into()),
    }
}
