use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use tickgraph_library::Platform;
use tickgraph_manager::commands::run::{parse_remote, RunOptions};
use tickgraph_manager::{commands, logging};

#[derive(Parser)]
#[command(name = "tickgraph")]
#[command(about = "tickgraph - real-time multi-rate workload orchestration")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a model and tick it until Ctrl+C or a fatal error
    Run {
        /// Built-in topology to run when no model file is given
        #[arg(short = 'p', long = "platform", default_value = "standalone")]
        platform: Platform,
        /// Model file (YAML, TOML or JSON)
        #[arg(short = 'm', long = "model")]
        model: Option<PathBuf>,
        /// Engine config file, replacing the platform preset
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Accept a remote host on this address
        #[arg(long = "serve")]
        serve: Option<String>,
        /// Override an embedded remote model's address (TAG=ADDR, repeatable)
        #[arg(short = 'r', long = "remote", value_parser = parse_remote)]
        remote: Vec<(String, String)>,
        /// Pin the root loop to this CPU core
        #[arg(long = "core")]
        core: Option<usize>,
    },

    /// Validate a model without running it
    Check {
        /// Model file (YAML, TOML or JSON)
        #[arg(short = 'm', long = "model")]
        model: Option<PathBuf>,
        /// Built-in topology to check when no model file is given
        #[arg(short = 'p', long = "platform", default_value = "standalone")]
        platform: Platform,
        /// Only print the verdict
        #[arg(short = 'q', long = "quiet")]
        quiet: bool,
    },

    /// List the registered workload types and their ports
    Types,
}

fn run_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            platform,
            model,
            config,
            serve,
            remote,
            core,
        } => commands::run::execute(RunOptions {
            platform,
            model,
            config,
            serve,
            remotes: remote,
            core,
        }),
        Commands::Check {
            model,
            platform,
            quiet,
        } => commands::check::execute(model.as_deref(), platform, quiet),
        Commands::Types => commands::types::execute(),
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(e) = run_command(cli.command) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
