//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use provision::provision::ExportFormat;
use provision::util::GlobalContext;

/// Locate, fetch, patch, build and verify the native libraries of the Lyncs API
#[derive(Parser)]
#[command(name = "lyncs-provision")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Path to Provision.toml (searched upward from the current directory by default)
    #[arg(long, global = true, value_name = "PATH")]
    pub manifest_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Settings shared by every command.
    pub fn global(&self) -> GlobalArgs {
        GlobalArgs {
            verbose: self.verbose,
            color: !self.no_color,
            manifest_path: self.manifest_path.clone(),
        }
    }
}

/// Global flags, detached from the parsed command.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub verbose: bool,
    pub color: bool,
    pub manifest_path: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn context(&self) -> anyhow::Result<GlobalContext> {
        let mut gctx = GlobalContext::new()?.with_manifest_path(self.manifest_path.clone());
        gctx.set_verbose(self.verbose);
        gctx.set_color(self.color);
        Ok(gctx)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision every enabled library (the default workflow)
    Provision(ProvisionArgs),

    /// Show what `provision` would do, without doing it
    Plan(PlanArgs),

    /// Report which libraries are found, without side effects
    Status(StatusArgs),

    /// Write the default Provision.toml
    Init(InitArgs),

    /// Remove scratch trees and/or the install root
    Clean(CleanArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Variables and library selection shared by provision, plan and status.
#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Set a variable, overriding the environment (e.g. -D ENABLE_GPU=ON, -D LIME_PATH=/opt/lime)
    #[arg(short = 'D', long = "define", value_name = "KEY=VALUE")]
    pub defines: Vec<String>,

    /// Only consider these libraries and what they require
    #[arg(long, value_name = "LIBRARY")]
    pub only: Vec<String>,
}

/// Output style for progress and results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MessageFormat {
    #[default]
    Human,
    Json,
}

#[derive(Args)]
pub struct ProvisionArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Number of parallel jobs
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Fail any fetch that needs the network
    #[arg(long)]
    pub offline: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = MessageFormat::Human)]
    pub message_format: MessageFormat,

    /// Format of the exported <LIB>_FOUND / <LIB>_PATH file (env, cmake, json)
    #[arg(long, default_value = "env")]
    pub export_format: ExportFormat,

    /// Where to write the exported variables (default: <install-prefix>/provision.<ext>)
    #[arg(long, value_name = "PATH")]
    pub export_file: Option<PathBuf>,

    /// Do not write the export file
    #[arg(long, conflicts_with = "export_file")]
    pub no_export: bool,
}

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,
}

#[derive(Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Output format
    #[arg(long, value_enum, default_value_t = MessageFormat::Human)]
    pub message_format: MessageFormat,
}

#[derive(Args)]
pub struct InitArgs {
    /// Directory to initialize (defaults to current directory)
    pub path: Option<PathBuf>,

    /// Overwrite an existing Provision.toml
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct CleanArgs {
    /// Also remove the shared install root
    #[arg(long)]
    pub install: bool,

    /// Only clean these libraries' scratch trees
    #[arg(long, value_name = "LIBRARY")]
    pub only: Vec<String>,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}
