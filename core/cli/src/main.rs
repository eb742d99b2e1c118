use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use fraud_infra::{InfraError, CONFIG_FILE_NAME, DEFAULT_OUT_DIR};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

/// Synthesize, inspect and deploy the fraud-detection stack
#[derive(Parser)]
#[command(name = "fraud-infra")]
#[command(version)]
#[command(about = "Synthesize, inspect and deploy the fraud-detection stack", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Environment override from the configuration's [environments] table
    #[arg(short, long, value_name = "NAME", global = true)]
    env: Option<String>,

    /// Output directory for templates, manifest and logs
    #[arg(short, long, value_name = "DIR", global = true, default_value = DEFAULT_OUT_DIR)]
    out: PathBuf,

    /// Log level or filter directive, e.g. "debug" or "fraud_infra=trace"
    #[arg(long, value_name = "LEVEL", global = true, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the template and manifest to the out directory
    Synth,
    /// Check the configuration and the synthesized template
    Validate {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare the synthesized template with the previous one
    Diff {
        /// Template file to compare against instead of the out directory
        #[arg(long, value_name = "FILE")]
        against: Option<PathBuf>,
    },
    /// List resources in creation order
    List,
    /// Create or update the stack
    Deploy {
        /// Seconds between stack status polls
        #[arg(long, default_value_t = 10)]
        poll_seconds: u64,
    },
    /// Print the deployed stack's outputs
    Outputs,
    /// Delete the stack
    Destroy {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    match cli.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<InfraError>() {
                Some(infra_error) => {
                    eprintln!("{:#}\n", err);
                    eprint!("{}", infra_error.error_report());
                }
                None => eprintln!("Error: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = commands::load_config(&cli)?;

    match cli.command {
        Commands::Synth => commands::synth(&cli, &config),
        Commands::Validate { json } => commands::validate(&cli, &config, json),
        Commands::Diff { ref against } => commands::diff(&cli, &config, against.as_deref()),
        Commands::List => commands::list(&cli, &config),
        Commands::Deploy { poll_seconds } => {
            block_on(commands::deploy(&cli, config, poll_seconds))
        }
        Commands::Outputs => block_on(commands::outputs(&config)),
        Commands::Destroy { yes } => block_on(commands::destroy(&cli, &config, yes)),
    }
}

fn block_on<F: std::future::Future<Output = Result<()>>>(future: F) -> Result<()> {
    use anyhow::Context;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(future)
}
