use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sibyl", about = "Agentic research assistant", version)]
pub struct Cli {
    /// Path to sibyl.toml (defaults to ~/.sibyl/sibyl.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Ask a question (one agentic turn)
    Ask(AskArgs),
    /// Manage conversation sessions
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
    /// Inspect and prune the interaction history
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
    /// Manage cross-session user memories
    Memory {
        #[command(subcommand)]
        command: MemoryCommand,
    },
    /// Run the chat-protocol daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

#[derive(Args)]
pub struct AskArgs {
    /// The question
    pub query: Vec<String>,

    /// Bind (or create) a session with this exact name
    #[arg(long, short = 's')]
    pub session: Option<String>,

    /// Resume a session by id, exact name, or partial name
    #[arg(long, short = 'r')]
    pub resume: Option<String>,

    /// Build context from history ids ("3", "1,4", "2-7", "all")
    #[arg(long = "continue", short = 'c')]
    pub continue_ids: Option<String>,

    /// Summarize the loaded context instead of sending it verbatim
    #[arg(long)]
    pub summarize_context: bool,

    /// Lean mode: no tools, no preload side effects, no memory recall
    #[arg(long)]
    pub lean: bool,

    /// Enable research mode for this turn
    #[arg(long)]
    pub research: bool,

    /// Research source mode: web_only | local_only | mixed
    #[arg(long)]
    pub source_mode: Option<String>,

    /// Additional source pointers (paths or URLs), repeatable
    #[arg(long = "source")]
    pub sources: Vec<String>,

    /// Shortlist override: on | off | auto | reset
    #[arg(long, default_value = "auto")]
    pub shortlist: String,

    /// Do not persist this turn
    #[arg(long)]
    pub no_save: bool,

    /// Model override for this turn
    #[arg(long)]
    pub model: Option<String>,

    /// Max tool-loop iterations for this turn
    #[arg(long)]
    pub max_turns: Option<u32>,
}

#[derive(Subcommand)]
pub enum SessionCommand {
    /// List sessions, most recently used first
    List,
    /// End the shell-sticky binding for this shell
    End,
    /// Delete sessions by selector ("3", "1,4", "2-7", "all")
    Delete { selector: String },
    /// Clear a session's research residue (findings and source links)
    CleanResearch { term: String },
}

#[derive(Subcommand)]
pub enum HistoryCommand {
    /// List recent messages
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one message in full
    Show { id: i64 },
    /// Delete messages by selector
    Delete { selector: String },
}

#[derive(Subcommand)]
pub enum MemoryCommand {
    /// List stored memories
    List,
    /// Store a memory (deduplicated against near-identical entries)
    Add { text: Vec<String> },
    /// Delete one memory by id
    Delete { id: i64 },
}

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon with the plugin-registered transport
    Run,
}
