use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Parser)]
#[command(name = "engram")]
#[command(about = "Episodic memory for LLM coding sessions", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Data directory (defaults to ENGRAM_PATH or the OS data dir)
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    #[arg(long, default_value = "plain", global = true)]
    pub format: OutputFormat,

    #[arg(long, default_value = "warn", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Ingest session transcripts from a log root")]
    Ingest {
        /// Directory containing .jsonl transcripts (falls back to
        /// transcript_root from config.toml)
        path: Option<PathBuf>,

        #[arg(long, help = "Force a project tag instead of deriving one")]
        project: Option<String>,
    },

    #[command(about = "Semantic search over stored memory")]
    Search {
        query: String,

        #[arg(long)]
        project: Option<String>,

        #[arg(long, help = "Response token budget")]
        max_tokens: Option<usize>,
    },

    #[command(about = "Recall the chain of events that led to a moment")]
    Recall {
        query: String,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        max_tokens: Option<usize>,
    },

    #[command(about = "Predict what usually follows the given context")]
    Predict {
        context: String,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        max_tokens: Option<usize>,
    },

    #[command(about = "Rebuild a session or time window chronologically")]
    Reconstruct {
        #[arg(long)]
        project: String,

        #[arg(long)]
        session_id: Option<String>,

        #[arg(long, help = "RFC-3339 lower bound")]
        from: Option<String>,

        #[arg(long, help = "RFC-3339 upper bound")]
        to: Option<String>,

        #[arg(long)]
        days_back: Option<f64>,

        #[arg(long, help = "The session before the most recent one")]
        previous_session: bool,

        #[arg(long)]
        max_tokens: Option<usize>,

        #[arg(long, help = "Spend the budget from the oldest chunk forward")]
        keep_oldest: bool,
    },

    #[command(about = "List indexed projects")]
    Projects,

    #[command(about = "List sessions of a project")]
    Sessions {
        #[arg(long)]
        project: String,

        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        to: Option<String>,
    },

    #[command(about = "Delete chunks by time, session or semantic filters")]
    Forget {
        #[arg(long)]
        project: String,

        #[arg(long, help = "Delete chunks ending before this RFC-3339 time")]
        before: Option<String>,

        #[arg(long, help = "Delete chunks starting after this RFC-3339 time")]
        after: Option<String>,

        #[arg(long)]
        session_id: Option<String>,

        #[arg(long, help = "Semantic filter query (requires --threshold)")]
        query: Option<String>,

        #[arg(long, help = "Similarity threshold for --query, in [0.5, 1]")]
        threshold: Option<f64>,

        #[arg(long, help = "Report matches without deleting")]
        dry_run: bool,
    },

    #[command(about = "Store-wide counts")]
    Stats,

    #[command(about = "Rebuild cluster memberships from embeddings")]
    Recluster {
        #[arg(long)]
        project: Option<String>,
    },

    #[command(about = "Measure cluster health, retrieval quality and latency")]
    Bench {
        #[arg(long)]
        project: Option<String>,

        #[arg(long, help = "Write the report as CSV to this path")]
        csv: Option<PathBuf>,
    },

    #[command(about = "Tool capabilities exposed to MCP-style hosts")]
    Tools {
        #[command(subcommand)]
        command: ToolsCommand,
    },
}

#[derive(Subcommand)]
pub enum ToolsCommand {
    #[command(about = "List capability names and schemas")]
    List,

    #[command(about = "Dispatch one capability with JSON arguments")]
    Call {
        name: String,

        #[arg(long, default_value = "{}", help = "JSON object of arguments")]
        args: String,
    },
}
