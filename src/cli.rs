use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Compose slide decks section by section.
#[derive(Parser, Debug)]
#[command(name = "deckwright", about = "Bounded-concurrency deck composition")]
pub struct Cli {
    /// Settings file (defaults to ~/.deckwright/settings.json).
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compose a demo deck with the scripted generator, printing events as JSON lines.
    Compose(ComposeArgs),
    /// Print a stored document.
    Show(ShowArgs),
    /// List stored documents, most recent first.
    List(ListArgs),
}

#[derive(Args, Debug)]
pub struct ComposeArgs {
    #[arg(long, default_value = "Untitled deck")]
    pub title: String,

    /// Number of sections to outline.
    #[arg(long, default_value_t = 6)]
    pub sections: usize,

    /// Maximum sections generating at once (overrides settings).
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Simulated generation time per section, in milliseconds.
    #[arg(long, default_value_t = 250)]
    pub section_ms: u64,

    /// Progress events per section.
    #[arg(long, default_value_t = 2)]
    pub progress_steps: u32,

    /// Make the section at this index fail (repeatable).
    #[arg(long = "fail")]
    pub fail: Vec<usize>,

    /// Keep documents in process memory instead of SQLite.
    #[arg(long, conflicts_with = "db")]
    pub memory: bool,

    #[command(flatten)]
    pub storage: StorageArgs,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Document id (`doc_...`).
    pub id: String,

    #[command(flatten)]
    pub storage: StorageArgs,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long, default_value_t = 20)]
    pub limit: u32,

    #[command(flatten)]
    pub storage: StorageArgs,
}

#[derive(Args, Debug)]
pub struct StorageArgs {
    /// SQLite database path (overrides settings).
    #[arg(long)]
    pub db: Option<PathBuf>,
}
