//! CLI argument parsing.
//!
//! The `search`, `ls`, and `thread` subcommands double as the tool surface
//! the discovery and evaluation agents call back into.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "gleaner",
    about = "Mine structured entries from community discussion threads",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the extraction pipeline for a form
    Run(RunArgs),
    /// Search for posts
    Search(SearchArgs),
    /// List posts from a subreddit
    Ls(LsArgs),
    /// Fetch a complete thread as JSON
    Thread(ThreadArgs),
    /// Inspect extraction runs
    Runs {
        #[command(subcommand)]
        command: RunsCommand,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the form JSON file
    #[arg(short, long)]
    pub form: String,

    /// Search query (defaults to the form's first search hint or title)
    #[arg(short, long, default_value = "")]
    pub query: String,

    /// Comma-separated list of subreddits (skips community discovery)
    #[arg(short = 'r', long, value_delimiter = ',')]
    pub subreddits: Vec<String>,

    /// Target number of extracted threads
    #[arg(short, long, default_value_t = 20)]
    pub limit: usize,

    /// Sort for subreddit listings: hot, new, top, rising
    #[arg(long, default_value = "hot")]
    pub sort: String,

    /// Output directory for sessions
    #[arg(short, long, default_value = "./output")]
    pub output: PathBuf,

    /// Resume an existing session directory
    #[arg(long)]
    pub session: Option<PathBuf>,

    /// Concurrent pipeline workers
    #[arg(short, long, default_value_t = 10)]
    pub workers: usize,

    /// Model for community and thread discovery
    #[arg(long, default_value = "opus")]
    pub discovery_model: String,

    /// Model for thread evaluation
    #[arg(long, default_value = "opus")]
    pub eval_model: String,

    /// Model for field extraction
    #[arg(long, default_value = "haiku")]
    pub extract_model: String,

    /// Model for entry ranking
    #[arg(long, default_value = "haiku")]
    pub rank_model: String,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search query
    pub query: String,

    /// Limit the search to one subreddit
    #[arg(short = 'r', long)]
    pub subreddit: Option<String>,

    /// Number of results
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Exclude NSFW posts
    #[arg(long)]
    pub no_nsfw: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct LsArgs {
    /// Subreddit to list
    pub subreddit: String,

    /// Sort: hot, new, top, rising
    #[arg(short, long, default_value = "hot")]
    pub sort: String,

    /// Number of posts
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Exclude NSFW posts
    #[arg(long)]
    pub no_nsfw: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ThreadArgs {
    /// Thread permalink (full URL or /r/... path)
    pub permalink: String,

    /// Comment fetch limit
    #[arg(short, long, default_value_t = 100)]
    pub comments: usize,
}

#[derive(Subcommand, Debug)]
pub enum RunsCommand {
    /// List sessions in the output directory
    Ls {
        /// Output directory to scan
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,
    },
    /// Show extraction results for a session
    Show {
        /// Session directory, name, or name prefix
        target: String,

        /// Output directory containing sessions
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        /// Show internal fields
        #[arg(short = 'a', long)]
        all: bool,

        /// Maximum number of results to show (0 for all)
        #[arg(short = 'n', long, default_value_t = 10)]
        max_results: usize,
    },
}
