//! Cogloop CLI — the main entry point.
//!
//! Commands:
//! - `query`        — Run one request through the reasoning loop
//! - `interactive`  — REPL that keeps the model resident between requests
//! - `models`       — Show the configured weights and whether they exist
//! - `config`       — Show, locate or validate the configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "cogloop",
    about = "Cogloop — local plan, execute, reflect reasoning loop",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single request
    Query {
        /// The request text
        query: String,

        /// Input files made available to the tools (repeatable)
        #[arg(short, long = "file")]
        files: Vec<String>,

        /// Print the full run report as JSON instead of a summary
        #[arg(long)]
        json: bool,

        /// Do not stream events while the run is in progress
        #[arg(short, long)]
        quiet: bool,
    },

    /// Interactive mode
    Interactive {
        /// Files loaded before the first request (repeatable)
        #[arg(short, long = "file")]
        files: Vec<String>,
    },

    /// Show configured model weights
    Models,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file path
    Path,
    /// Load and validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Query {
            query,
            files,
            json,
            quiet,
        } => commands::query::run(query, files, json, quiet).await?,
        Commands::Interactive { files } => commands::interactive::run(files).await?,
        Commands::Models => commands::models::run()?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Validate => commands::config_cmd::validate()?,
        },
    }

    Ok(())
}
