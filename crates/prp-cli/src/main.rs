mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "prp",
    about = "Signal-driven PRP orchestrator: parse [XX] signals, inspect them on a worker pool, decide what to run",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: nearest prp.yaml upward from cwd)
    #[arg(long, global = true, env = "PRP_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the signals found in files (stdin when none are given)
    Signals {
        files: Vec<PathBuf>,
    },

    /// Run files through the full pipeline and print the decisions
    Scan {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Processing priority for every signal (1-10)
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
        priority: Option<u8>,
    },

    /// Parse a token limit such as 100k, 1.5M or 250k#team
    Limit {
        spec: String,
    },

    /// Show, validate, or initialize the config file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Scan { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = root::resolve_config(cli.config.as_deref());

    let result = match cli.command {
        Commands::Signals { files } => cmd::signals::run(&config_path, &files, cli.json),
        Commands::Scan { files, priority } => {
            cmd::scan::run(&config_path, &files, priority, cli.json)
        }
        Commands::Limit { spec } => cmd::limit::run(&spec, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&config_path, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
