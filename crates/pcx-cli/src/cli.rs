use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "pcx",
    about = "PCX persistence contexts: configuration checks and demo sessions",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate a context or store configuration file
    CheckConfig(CheckConfigArgs),
    /// Validate an entity model file
    CheckModel(CheckModelArgs),
    /// Run a scripted edit session against an in-memory store
    Demo(DemoArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigKind {
    Context,
    Store,
}

#[derive(Args)]
pub struct CheckConfigArgs {
    pub path: PathBuf,
    #[arg(long, default_value = "context")]
    pub kind: ConfigKind,
}

#[derive(Args)]
pub struct CheckModelArgs {
    pub path: PathBuf,
}

#[derive(Args)]
pub struct DemoArgs {
    /// Context configuration file
    #[arg(long)]
    pub context_config: Option<PathBuf>,
    /// Store configuration file
    #[arg(long)]
    pub store_config: Option<PathBuf>,
    /// Roll the session back instead of committing it
    #[arg(long)]
    pub rollback: bool,
    /// Number of paintings to create
    #[arg(long, default_value = "2")]
    pub paintings: usize,
}
