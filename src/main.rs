//! bundlerun - run a flow program from a task definition.
//!
//! Usage:
//!   bundlerun run <task.yaml> [-p name=value]...   Run the task once
//!   bundlerun validate <task.yaml>                  Validate a task definition
//!   bundlerun compose <task.yaml> [-p name=value]... Print the command that would run

use bundlerun::{
    CommandComposer, ParamValue, ParameterMap, RunOptions, TaskError, TaskRun, YamlLoader,
    execution::DEFAULT_COMMAND, load_task,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};

/// bundlerun - fetch a flow bundle and run it once
#[derive(Parser)]
#[command(name = "bundlerun")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task once and print its output
    Run {
        /// Path to the task YAML file
        #[arg(value_name = "TASK_FILE")]
        task_file: PathBuf,

        /// Parameter passed to the program as --name=value (repeatable)
        #[arg(
            short = 'p',
            long = "param",
            value_name = "NAME=VALUE",
            value_parser = ParameterMap::parse_pair
        )]
        params: Vec<(String, ParamValue)>,

        /// Archive API token (default: the variable named by github.token_env)
        #[arg(long, env = "BUNDLERUN_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Override the verb passed to the program
        #[arg(long)]
        verb: Option<String>,

        /// Print a JSON report instead of the plain output
        #[arg(long)]
        json: bool,
    },

    /// Validate a task definition without running it
    Validate {
        /// Path to the task YAML file
        #[arg(value_name = "TASK_FILE")]
        task_file: PathBuf,
    },

    /// Print the command a task would run, without running it
    Compose {
        /// Path to the task YAML file
        #[arg(value_name = "TASK_FILE")]
        task_file: PathBuf,

        /// Parameter passed to the program as --name=value (repeatable)
        #[arg(
            short = 'p',
            long = "param",
            value_name = "NAME=VALUE",
            value_parser = ParameterMap::parse_pair
        )]
        params: Vec<(String, ParamValue)>,
    },
}

/// JSON form of a finished run.
#[derive(Serialize)]
struct RunReport<'a> {
    run_id: String,
    state: bundlerun::TaskState,
    started_at: String,
    duration_ms: u128,
    command: Option<&'a str>,
    exit_code: Option<i32>,
    output: Option<&'a bundlerun::TaskOutput>,
    error: Option<ErrorReport<'a>>,
}

#[derive(Serialize)]
struct ErrorReport<'a> {
    kind: &'static str,
    message: String,
    stderr: Option<&'a str>,
}

impl<'a> RunReport<'a> {
    fn new(run: &'a TaskRun) -> Self {
        let (output, error) = match &run.result {
            Ok(output) => (output.as_ref(), None),
            Err(e) => {
                let stderr = match e {
                    TaskError::NonZeroExit { stderr, .. } => stderr.as_deref(),
                    _ => None,
                };
                let report = ErrorReport {
                    kind: e.kind(),
                    message: e.to_string(),
                    stderr,
                };
                (None, Some(report))
            }
        };
        Self {
            run_id: run.run_id.to_string(),
            state: run.state(),
            started_at: run.started_at.to_rfc3339(),
            duration_ms: run.duration.as_millis(),
            command: run.command.as_deref(),
            exit_code: run.exit_code,
            output,
            error,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries the task output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            task_file,
            params,
            token,
            verb,
            json,
        } => run_task(&task_file, params, token.as_deref(), verb, json).await,
        Commands::Validate { task_file } => {
            validate_task(&task_file)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Compose { task_file, params } => {
            compose_task(&task_file, params)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Run a task once and print its output.
async fn run_task(
    task_file: &Path,
    params: Vec<(String, ParamValue)>,
    token: Option<&str>,
    verb: Option<String>,
    json: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let (config, task) = load_task(task_file, token)?;
    let params = config.params.merged_with(&params.into_iter().collect());
    let mut options = RunOptions::new();
    if let Some(verb) = verb {
        options = options.command(verb);
    }

    info!("Running task '{}' from {}", task.name(), task_file.display());

    // Dropping the run on Ctrl+C kills the child process.
    let run = tokio::select! {
        run = task.execute(&params, options) => run,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping task");
            return Ok(ExitCode::from(130));
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&RunReport::new(&run))?);
    }

    match run.result {
        Ok(output) => {
            if !json && let Some(output) = output {
                println!("{}", output);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("Task '{}' failed: {}", task.name(), e);
            if let TaskError::NonZeroExit {
                last_output: Some(line),
                ..
            } = &e
            {
                error!("  last output: {}", line);
            }
            Ok(exit_code_for(&e))
        }
    }
}

/// Child exit codes pass through; everything else exits with 1.
fn exit_code_for(err: &TaskError) -> ExitCode {
    match err.exit_code() {
        Some(code) if (1..=255).contains(&code) => ExitCode::from(code as u8),
        _ => ExitCode::FAILURE,
    }
}

/// Validate a task definition.
fn validate_task(task_file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating task: {}", task_file.display());

    match YamlLoader::load_task_config(task_file) {
        Ok(config) => {
            let source = match &config.repo {
                Some(repo) => format!("bundle {}", repo),
                None => "local".to_string(),
            };
            let name = config.name.as_deref().unwrap_or(&config.flow_path);
            info!("  - {} ({}): OK", name, source);
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// Print the command a task would run.
///
/// For a staged task the flow path is shown relative to the bundle root,
/// since the extracted folder name is only known after download.
fn compose_task(
    task_file: &Path,
    params: Vec<(String, ParamValue)>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = YamlLoader::load_task_config(task_file)?;
    let params = config.params.merged_with(&params.into_iter().collect());

    let composer = match &config.interpreter {
        Some(interpreter) => CommandComposer::new(interpreter),
        None => CommandComposer::default(),
    };
    let verb = config.command.as_deref().unwrap_or(DEFAULT_COMMAND);
    println!("{}", composer.compose(verb, Path::new(&config.flow_path), &params));
    Ok(())
}
