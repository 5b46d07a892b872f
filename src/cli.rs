use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use docchain::query::SortField;

#[derive(Debug, Parser)]
#[command(
    name = "docchain",
    about = "Deduplicating document and attribute index"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Give up after this many seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store a document, unless the entry already has one
    Store(StoreArgs),
    /// Set attributes of an entry
    Attr(AttrArgs),
    /// Show an entry with its attributes
    Get(GetArgs),
    /// Search documents
    Search(SearchArgs),
    /// Delete an entry and all of its attributes
    Delete(EntryArgs),
}

#[derive(Debug, clap::Args)]
pub struct EntryArgs {
    /// Namespace of the entry
    pub namespace: String,
    /// Entry identifier
    pub entry_id: String,
}

#[derive(Debug, clap::Args)]
pub struct StoreArgs {
    #[command(flatten)]
    pub entry: EntryArgs,

    /// Document title
    #[arg(long)]
    pub name: String,

    /// Read content from this file instead of stdin
    #[arg(long)]
    pub file: Option<PathBuf>,

    #[arg(long)]
    pub source: Option<String>,

    /// Page the document came from; relative image links resolve against it
    #[arg(long)]
    pub web_url: Option<String>,

    #[arg(long)]
    pub summary: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, clap::Args)]
pub struct AttrArgs {
    #[command(flatten)]
    pub entry: EntryArgs,

    #[arg(long)]
    pub parent_id: Option<String>,

    #[arg(long)]
    pub mark: Option<bool>,

    #[arg(long)]
    pub unread: Option<bool>,
}

#[derive(Debug, clap::Args)]
pub struct GetArgs {
    #[command(flatten)]
    pub entry: EntryArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SortArg {
    Name,
    Created,
    Updated,
}

impl From<SortArg> for SortField {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Name => SortField::Name,
            SortArg::Created => SortField::CreatedAt,
            SortArg::Updated => SortField::UpdatedAt,
        }
    }
}

#[derive(Debug, clap::Args)]
pub struct SearchArgs {
    /// Namespace to search in
    pub namespace: String,

    /// Free-text query
    pub query: Option<String>,

    #[arg(long)]
    pub parent_id: Option<String>,

    #[arg(long)]
    pub mark: Option<bool>,

    #[arg(long)]
    pub unread: Option<bool>,

    #[arg(long)]
    pub source: Option<String>,

    #[arg(long)]
    pub web_url: Option<String>,

    /// Only documents whose name contains this text, ignoring case
    #[arg(long)]
    pub fuzzy_name: Option<String>,

    /// Page number, starting at 1
    #[arg(long, default_value_t = 1)]
    pub page: usize,

    /// Results per page
    #[arg(long, default_value_t = docchain::query::DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    /// Sort field
    #[arg(long, value_enum)]
    pub sort: Option<SortArg>,

    /// Sort descending
    #[arg(long)]
    pub desc: bool,

    /// Require every attribute filter to match instead of any
    #[arg(long)]
    pub intersect: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
