//! Agent session harness CLI.
//!
//! Thin tooling over the library: probe agent availability, run one
//! supervised session, and scan a captured event log with the regression
//! detectors.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use harness::core::detectors;
use harness::core::event::EventLog;
use harness::io::client::{self, Availability, CliAgentClient};
use harness::io::config::load_config;
use harness::session::{SessionConfig, run_session};

#[derive(Parser)]
#[command(name = "harness", version, about = "Supervised agent session harness")]
struct Cli {
    /// Path to the harness configuration file.
    #[arg(long, default_value = "harness.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check whether the configured agent CLI is usable.
    Probe,
    /// Run one supervised session from a prompt.
    Run {
        /// Prompt text to submit.
        #[arg(long)]
        prompt: String,
        /// Tee captured events to this file as JSONL.
        #[arg(long)]
        stream: Option<PathBuf>,
        /// Keep the workspace on disk after the run.
        #[arg(long)]
        preserve: bool,
    },
    /// Run every regression detector over a captured JSONL event log.
    Scan {
        /// Path to an events JSONL file.
        #[arg(long)]
        log: PathBuf,
    },
}

fn main() {
    harness::logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    match cli.command {
        Command::Probe => cmd_probe(config),
        Command::Run {
            prompt,
            stream,
            preserve,
        } => cmd_run(config, prompt, stream, preserve),
        Command::Scan { log } => cmd_scan(&log),
    }
}

fn cmd_probe(config: harness::io::config::HarnessConfig) -> Result<()> {
    match client::probe(&config) {
        Availability::Available => {
            println!("available");
            Ok(())
        }
        Availability::Unavailable { reason } => bail!("agent unavailable: {reason}"),
    }
}

fn cmd_run(
    config: harness::io::config::HarnessConfig,
    prompt: String,
    stream: Option<PathBuf>,
    preserve: bool,
) -> Result<()> {
    let mut session_config = SessionConfig::new(prompt, &config.workspace_base);
    session_config.workspace_prefix = config.workspace_prefix.clone();
    session_config.preserve_workspace = preserve || config.preserve_workspaces;
    session_config.unattended = config.agent.unattended;
    session_config.skill_dir = config.agent.skill_dir.clone();
    session_config.tool_config = config.agent.tool_config.clone();
    session_config.stream_path = stream;

    let client = CliAgentClient::new(config);
    let outcome = run_session(&client, session_config)?;

    println!("events: {}", outcome.events.len());
    println!("early_terminated: {}", outcome.early_terminated);
    if let Some(session_id) = outcome.session_id {
        println!("session_id: {session_id}");
    }
    if let Some(workspace) = outcome.workspace {
        println!("workspace: {}", workspace.display());
    }
    Ok(())
}

fn cmd_scan(log_path: &std::path::Path) -> Result<()> {
    let file =
        File::open(log_path).with_context(|| format!("open log {}", log_path.display()))?;
    let log = EventLog::from_jsonl(BufReader::new(file))
        .with_context(|| format!("parse log {}", log_path.display()))?;

    println!("events: {}", log.len());
    println!("secret_leaks: {}", detectors::count_secret_leaks(&log));
    println!("auth_spirals: {}", detectors::count_auth_spirals(&log));
    println!("port_conflicts: {}", detectors::count_port_conflicts(&log));
    println!("hosting_thrash: {}", detectors::count_hosting_thrash(&log));
    Ok(())
}
