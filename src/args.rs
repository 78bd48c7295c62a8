use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "stock",
    version,
    about = "Versioned storage for datasets, model weights and tags"
)]
pub struct Cli {
    /// Run as if started in PATH
    #[arg(short = 'C', global = true, value_name = "PATH")]
    pub path: Option<PathBuf>,
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a stock in the current directory
    Init(InitArgs),
    /// Commit staged changes
    Commit(CommitArgs),
    /// Remove a writer lock left behind by a crashed process
    Liberate,
    /// Show commit history, most recent first
    Log(LogArgs),
    /// Print the digest recorded in head.stock
    Head,
    /// Read and write tags
    #[command(subcommand)]
    Tag(ScalarCommand),
    /// Read and write numeric params
    #[command(subcommand)]
    Param(ScalarCommand),
}

#[derive(Parser, Debug, Clone)]
pub struct InitArgs {
    /// Author name recorded on commits
    #[arg(long)]
    pub name: Option<String>,
    /// Author email recorded on commits
    #[arg(long)]
    pub email: Option<String>,
    /// Replace an existing stock
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct CommitArgs {
    #[arg(short, long)]
    pub message: String,
}

#[derive(Parser, Debug, Clone)]
pub struct LogArgs {
    /// Show at most N commits
    #[arg(short = 'n', long, value_name = "N")]
    pub limit: Option<usize>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ScalarCommand {
    /// Print a value
    Get {
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// Stage a value; ints and floats are detected, anything else is a string
    Set {
        #[arg(value_name = "NAME")]
        name: String,
        #[arg(value_name = "VALUE", allow_hyphen_values = true)]
        value: String,
    },
    /// List stored names
    List,
}
