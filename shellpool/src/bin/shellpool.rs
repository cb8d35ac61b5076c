// shellpool: run commands in reusable shell sessions
//
// Commands:
//   shellpool run [--cwd <dir>] [--timeout-ms <ms>] [--json] -- <command...>
//   shellpool batch [--cwd <dir>] [--timeout-ms <ms>] [--json]   (one command per stdin line)

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use shellpool::{ExecutionError, ExecutionEvent, PoolConfig, SessionId, SessionPool, SessionSummary};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "shellpool", version, about = "Run commands in reusable shell sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one command and stream its output
    Run {
        #[command(flatten)]
        options: CommonOptions,
        /// Command to run, passed to the shell as one line
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Run commands read from stdin, one per line, reusing sessions
    Batch {
        #[command(flatten)]
        options: CommonOptions,
    },
}

#[derive(Args, Debug)]
struct CommonOptions {
    /// Working directory for the session (defaults to the current directory)
    #[arg(long)]
    cwd: Option<PathBuf>,
    /// Per-command timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Output in JSON format
    #[arg(long)]
    json: bool,
}

impl CommonOptions {
    fn config(&self) -> PoolConfig {
        let mut config = PoolConfig::from_env();
        if let Some(ms) = self.timeout_ms.filter(|ms| *ms > 0) {
            config.command_timeout = Duration::from_millis(ms);
        }
        config
    }

    fn working_directory(&self) -> Result<PathBuf> {
        match &self.cwd {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir().context("Failed to read current directory"),
        }
    }
}

/// Result of one command, as printed with `--json`
#[derive(Debug, Serialize)]
struct CommandReport {
    session_id: SessionId,
    command: String,
    ok: bool,
    lines: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ExecutionError>,
}

#[derive(Debug, Serialize)]
struct BatchReport {
    commands: Vec<CommandReport>,
    idle_sessions: Vec<SessionSummary>,
    busy_sessions: Vec<SessionSummary>,
}

/// Run `command` in a session for `dir`, echoing lines as they arrive unless `quiet`
async fn run_command(pool: &SessionPool, dir: &Path, command: &str, quiet: bool) -> Result<CommandReport> {
    let session = pool.acquire_session(dir).await?;
    debug!(session_id = session.id(), command, "submitting");

    let handle = pool.submit_command(&session, command);
    let mut events = handle.subscribe();

    let mut lines = Vec::new();
    while let Some(event) = events.recv().await {
        if let ExecutionEvent::Line(line) = event {
            if !quiet {
                println!("{line}");
            }
            lines.push(line);
        }
    }

    let outcome = handle.await;
    Ok(CommandReport {
        session_id: session.id(),
        command: command.to_string(),
        ok: outcome.is_ok(),
        lines,
        error: outcome.err(),
    })
}

async fn cmd_run(options: CommonOptions, command: Vec<String>) -> Result<bool> {
    let pool = SessionPool::with_pty(options.config());
    let dir = options.working_directory()?;
    let command = command.join(" ");

    let report = run_command(&pool, &dir, &command, options.json).await?;
    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if let Some(error) = &report.error {
        eprintln!("error: {error}");
    }
    Ok(report.ok)
}

/// Run each non-blank, non-comment line of `input` as a command
async fn run_batch<R>(pool: &SessionPool, dir: &Path, input: R, quiet: bool) -> Result<Vec<CommandReport>>
where
    R: AsyncBufRead + Unpin,
{
    let mut reports = Vec::new();
    let mut lines = input.lines();
    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read command from stdin")?
    {
        let command = line.trim();
        if command.is_empty() || command.starts_with('#') {
            continue;
        }

        if !quiet {
            println!("$ {command}");
        }
        let report = run_command(pool, dir, command, quiet).await?;
        if !quiet {
            match &report.error {
                None => println!("[ok] session {}", report.session_id),
                Some(error) => println!("[error] session {}: {error}", report.session_id),
            }
        }
        reports.push(report);
    }
    Ok(reports)
}

async fn cmd_batch(options: CommonOptions) -> Result<bool> {
    let pool = SessionPool::with_pty(options.config());
    let dir = options.working_directory()?;

    let stdin = BufReader::new(tokio::io::stdin());
    let reports = run_batch(&pool, &dir, stdin, options.json).await?;

    let all_ok = reports.iter().all(|report| report.ok);
    let summary = BatchReport {
        commands: reports,
        idle_sessions: pool.list_sessions(false),
        busy_sessions: pool.list_sessions(true),
    };

    if options.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!();
        println!("Sessions:");
        for session in summary.idle_sessions.iter() {
            println!("  {:>4}  idle  {}", session.id, session.last_command);
        }
        for session in summary.busy_sessions.iter() {
            println!("  {:>4}  busy  {}", session.id, session.last_command);
        }
    }
    Ok(all_ok)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { options, command } => cmd_run(options, command).await,
        Commands::Batch { options } => cmd_batch(options).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
