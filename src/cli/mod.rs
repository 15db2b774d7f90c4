//! Argument parsing (out of scope per spec section 1; given a `clap`
//! derive definition in the teacher's manner of separating the parsed
//! surface from the dispatch logic in `src/bin/fractyl.rs`).

pub mod report;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "fractyl", version, about = "Content-addressed directory snapshotting")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create `.fractyl/` with empty subdirectories. Idempotent.
    Init,

    /// Create a snapshot of the current working tree.
    Snapshot {
        #[arg(short = 'm', long = "message", default_value = "")]
        message: String,
    },

    /// List snapshots on the current branch, newest last.
    List,

    /// Restore the working tree to a given snapshot.
    Restore {
        id_prefix: String,
        /// Also restore file ownership (uid/gid); mode bits always restore.
        #[arg(long)]
        preserve_owner: bool,
    },

    /// Show added/removed/modified paths between two snapshots.
    Diff { a: String, b: String },

    /// Delete a snapshot and garbage-collect now-unreachable objects.
    Delete { id_prefix: String },

    /// Control the background snapshot agent.
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum AgentAction {
    /// Launch the background agent. A no-op if one is already running.
    Start {
        #[arg(short = 'i', long = "interval", default_value_t = 180)]
        interval: u64,
    },
    /// Terminate the running agent.
    Stop,
    /// Print whether the agent is running.
    Status,
    /// Stop then start the agent.
    Restart {
        #[arg(short = 'i', long = "interval", default_value_t = 180)]
        interval: u64,
    },
}
