//! lyncs-provision CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns `Ok(false)` when the command ran but its outcome is a failure.
fn run() -> Result<bool> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("provision=debug,lyncs_provision=debug")
    } else {
        EnvFilter::new("provision=info,lyncs_provision=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!cli.no_color)
        .with_target(false)
        .without_time()
        .init();

    let global = cli.global();
    match cli.command {
        Commands::Provision(args) => commands::provision::execute(&global, args),
        Commands::Plan(args) => commands::plan::execute(&global, args).map(|_| true),
        Commands::Status(args) => commands::status::execute(&global, args).map(|_| true),
        Commands::Init(args) => commands::init::execute(&global, args).map(|_| true),
        Commands::Clean(args) => commands::clean::execute(&global, args).map(|_| true),
        Commands::Completions(args) => commands::completions::execute(args).map(|_| true),
    }
}
