use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::core::OutputFormat;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Output format (text or json)
    #[arg(short, long, value_enum, global = true)]
    pub format: Option<OutputFormat>,

    /// Enable debug output
    #[arg(short, long, default_value = "false", global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a query to an agent and stream the reply
    Send {
        /// Agent to talk to
        #[arg(short, long)]
        agent: String,

        /// Conversation thread
        #[arg(short, long)]
        thread: String,

        /// Your query to the agent
        #[arg(required = true)]
        query: Vec<String>,
    },

    /// Feed a recorded NDJSON response body through the engine
    Replay {
        /// Recorded body, or `-` for stdin
        input: String,

        /// Prompt the recorded response answers
        #[arg(short, long)]
        prompt: Option<String>,

        /// JSON history to reconcile against once the response finishes
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Print the segmented history of a thread
    History {
        #[arg(short, long)]
        agent: String,

        #[arg(short, long)]
        thread: String,
    },
}
