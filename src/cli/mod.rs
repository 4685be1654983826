mod commands;

pub use commands::{format_hit, format_message, run};

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cintessa",
    version,
    about = "Chat with long-term, semantically searchable memory"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in and chat interactively.
    Chat(UserOpts),
    /// Search a user's memories.
    Search(SearchOpts),
    /// Print a user's stored conversation.
    History(UserOpts),
    /// Embed backed-up messages missing from the memory store.
    Reconcile(UserOpts),
    /// Create the memory schema.
    InitDb(ConfigOnlyOpts),
    Config(ConfigOpts),
    Version,
}

#[derive(clap::Args)]
pub struct ConfigOnlyOpts {
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(clap::Args)]
pub struct UserOpts {
    #[arg(short, long)]
    pub config: Option<String>,
    #[arg(short, long)]
    pub user: String,
}

#[derive(clap::Args)]
pub struct SearchOpts {
    #[arg(short, long)]
    pub config: Option<String>,
    #[arg(short, long)]
    pub user: String,
    #[arg(short, long, allow_negative_numbers = true)]
    pub limit: Option<i64>,
    #[arg(required = true, num_args = 1..)]
    pub query: Vec<String>,
}

#[derive(clap::Args)]
pub struct ConfigOpts {
    #[arg(short, long)]
    pub config: Option<String>,
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    Show,
    Validate,
    Init,
}
