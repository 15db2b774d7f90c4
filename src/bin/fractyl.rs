//! CLI entry point (out of scope per spec section 1): parses arguments,
//! resolves the repository, acquires the lock around mutating operations,
//! and dispatches to the snapshot engine.

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use fractyl::agent::{self, AgentStatus};
use fractyl::cli::report;
use fractyl::cli::{AgentAction, Cli, Command};
use fractyl::engine::{Engine, SnapshotOutcome};
use fractyl::lock;
use fractyl::repo::Repo;

const LOCK_WAIT: Duration = Duration::from_secs(30);

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.command);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

/// The agent logs to `.fractyl/agent.log` rather than stderr (spec section
/// 4.9), since its stdout/stderr are not attended to once backgrounded.
/// Every other command logs to stderr as usual.
fn init_logging(command: &Command) {
    let env = env_logger::Env::default().default_filter_or("info");

    let is_agent_run = matches!(
        command,
        Command::Agent { action: AgentAction::Start { .. } } | Command::Agent { action: AgentAction::Restart { .. } }
    );

    if is_agent_run {
        if let Ok(cwd) = std::env::current_dir() {
            if let Ok(repo) = Repo::find(&cwd) {
                if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(repo.agent_log_path()) {
                    env_logger::Builder::from_env(env).target(env_logger::Target::Pipe(Box::new(file))).init();
                    return;
                }
            }
        }
    }

    env_logger::Builder::from_env(env).init();
}

fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir()?;

    match cli.command {
        Command::Init => {
            let repo = Repo::init(&cwd)?;
            println!("Initialized fractyl repository at {}", repo.root().display());
            Ok(())
        }
        Command::Snapshot { message } => {
            let repo = Repo::find(&cwd)?;
            let _lock = lock::acquire_wait(&repo.lock_path(), LOCK_WAIT)?;
            let engine = Engine::open(repo);
            match engine.snapshot(&message)? {
                SnapshotOutcome::Created { id, diff } => report::print_snapshot_created(&id, &diff),
                SnapshotOutcome::NoChanges => report::print_no_changes(),
            }
            Ok(())
        }
        Command::List => {
            let repo = Repo::find(&cwd)?;
            let engine = Engine::open(repo);
            let records = engine.list(None)?;
            report::print_snapshot_list(&records);
            Ok(())
        }
        Command::Restore { id_prefix, preserve_owner } => {
            let repo = Repo::find(&cwd)?;
            let _lock = lock::acquire_wait(&repo.lock_path(), LOCK_WAIT)?;
            let engine = Engine::open(repo);
            let stats = engine.restore(&id_prefix, preserve_owner)?;
            report::print_restore_stats(&stats);
            if !stats.failed.is_empty() {
                anyhow::bail!("restore completed with {} failures", stats.failed.len());
            }
            Ok(())
        }
        Command::Diff { a, b } => {
            let repo = Repo::find(&cwd)?;
            let engine = Engine::open(repo);
            run_diff(&engine, &a, &b)
        }
        Command::Delete { id_prefix } => {
            let repo = Repo::find(&cwd)?;
            let _lock = lock::acquire_wait(&repo.lock_path(), LOCK_WAIT)?;
            let engine = Engine::open(repo);
            let stats = engine.delete(&id_prefix)?;
            report::print_delete_stats(&stats);
            Ok(())
        }
        Command::Agent { action } => run_agent(&cwd, action),
    }
}

fn run_diff(engine: &Engine, a: &str, b: &str) -> Result<()> {
    let (_, a_index) = engine.index_for(a)?;
    let (_, b_index) = engine.index_for(b)?;
    let diff = b_index.diff(&a_index);

    for path in &diff.added {
        println!("A {}", path);
    }
    for path in &diff.removed {
        println!("D {}", path);
    }
    for path in &diff.modified {
        println!("M {}", path);
        let before = engine.blob_for(&a_index, path)?.unwrap_or_default();
        let after = engine.blob_for(&b_index, path)?.unwrap_or_default();
        report::print_text_diff(path, &before, &after);
    }
    Ok(())
}

fn run_agent(cwd: &Path, action: AgentAction) -> Result<()> {
    let repo = Repo::find(cwd)?;

    match action {
        AgentAction::Start { interval } => {
            if let AgentStatus::Running(pid, _) = agent::status(&repo)? {
                println!("agent already running (pid={})", pid);
                return Ok(());
            }
            agent::run_foreground(repo, Duration::from_secs(interval))
        }
        AgentAction::Stop => match agent::stop(&repo)? {
            AgentStatus::Running(pid, _) => {
                println!("stopping agent (pid={})", pid);
                Ok(())
            }
            AgentStatus::Stopped => {
                println!("not running");
                Ok(())
            }
        },
        AgentAction::Status => match agent::status(&repo)? {
            AgentStatus::Running(pid, Some(interval)) => {
                println!("running (pid={}, interval={})", pid, interval);
                Ok(())
            }
            AgentStatus::Running(pid, None) => {
                println!("running (pid={})", pid);
                Ok(())
            }
            AgentStatus::Stopped => {
                println!("not running");
                Ok(())
            }
        },
        AgentAction::Restart { interval } => {
            agent::stop(&repo)?;
            agent::run_foreground(repo, Duration::from_secs(interval))
        }
    }
}
