//! Command-line front end for the tool session manager.
//!
//! Every subcommand starts a manager from an `mcpServers` configuration file,
//! does its work through the synchronous API, and ends with a coordinated
//! shutdown. Results go to stdout; logs go to stderr.

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use toolpool::catalog::ROUTE_SEPARATOR;
use toolpool::config::DEFAULT_CALL_TIMEOUT_SECS;
use toolpool::{expand_path, LoadOutcome, ManagerOptions, ServerConfig, ToolManager};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "toolpool", version, about = "Session manager for stateful MCP tool servers")]
struct Cli {
    /// Path to the mcpServers configuration file
    #[arg(long, default_value = "mcp_servers.json")]
    config: String,
    /// Interpreter used to launch .py tool servers
    #[arg(long)]
    python: Option<String>,
    /// Per-call deadline in seconds (0 waits indefinitely)
    #[arg(long, default_value_t = DEFAULT_CALL_TIMEOUT_SECS)]
    timeout_secs: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print function-calling schemas for every configured tool group
    Tools,
    /// Invoke one operation on a session
    Call(CallArgs),
    /// Load a scenario into sessions and print their saved state
    Save(SaveArgs),
}

#[derive(Args)]
struct CallArgs {
    /// Session id, e.g. file_system-1
    session: String,
    /// Operation name, bare or routed (<group>-<operation>)
    tool: String,
    /// Operation arguments as a JSON object
    #[arg(long, default_value = "{}")]
    args: String,
    /// Scenario file to load into the session first
    #[arg(long)]
    scenario: Option<String>,
    /// Read the scenario back after loading and require an exact match
    #[arg(long)]
    verify: bool,
    /// Append the call log to this JSON Lines file
    #[arg(long)]
    log_out: Option<String>,
}

#[derive(Args)]
struct SaveArgs {
    /// Session ids to load and save
    #[arg(required = true)]
    sessions: Vec<String>,
    /// Scenario file loaded into every session first
    #[arg(long)]
    scenario: Option<String>,
    #[arg(long)]
    verify: bool,
}

fn main() -> anyhow::Result<()> {
    // Logs on stderr; stdout carries command output.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("toolpool=info")))
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::from_file(&expand_path(&cli.config))?;
    let mut options = ManagerOptions::default();
    if let Some(python) = cli.python {
        options.python = python;
    }
    options.call_timeout = (cli.timeout_secs > 0).then(|| Duration::from_secs(cli.timeout_secs));
    let shutdown_timeout = options.shutdown_timeout;

    let manager = ToolManager::start(&config, options)?;
    let result = match cli.command {
        Command::Tools => run_tools(&manager),
        Command::Call(args) => run_call(&manager, args),
        Command::Save(args) => run_save(&manager, args),
    };

    let report = manager.shutdown(shutdown_timeout);
    for failure in &report.close.failures {
        warn!(error = %failure, "Session did not close cleanly");
    }
    if !report.worker_terminated {
        warn!("Bridge worker still running at exit");
    }
    info!("Stopped");
    result
}

fn run_tools(manager: &ToolManager) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&manager.tool_schemas())?);
    Ok(())
}

fn run_call(manager: &ToolManager, args: CallArgs) -> anyhow::Result<()> {
    if let Some(path) = args.scenario.as_deref() {
        load_scenario_file(manager, &args.session, path, args.verify)?;
    }

    let tool = if args.tool.contains(ROUTE_SEPARATOR) {
        args.tool
    } else {
        manager
            .catalog()
            .qualify(&args.tool)
            .ok_or_else(|| anyhow::anyhow!("No tool group exposes '{}'", args.tool))?
    };
    let result = manager.invoke(&args.session, &tool, args.args)?;
    println!("{}", serde_json::to_string_pretty(&result.value)?);

    if let Some(path) = args.log_out.as_deref() {
        let lines = manager.dump_log(Some(&expand_path(path)))?;
        info!(path = %path, lines, "Call log written");
    }
    Ok(())
}

fn run_save(manager: &ToolManager, args: SaveArgs) -> anyhow::Result<()> {
    for session in &args.sessions {
        match args.scenario.as_deref() {
            Some(path) => load_scenario_file(manager, session, path, args.verify)?,
            None => {
                manager.registry().get_or_create(session)?;
            }
        }
    }
    let saved = manager.save_all_scenarios();
    println!("{}", serde_json::to_string_pretty(&saved)?);
    Ok(())
}

fn load_scenario_file(
    manager: &ToolManager,
    session: &str,
    path: &str,
    verify: bool,
) -> anyhow::Result<()> {
    let state = read_json(&expand_path(path))?;
    let outcome = manager.load(session, state, verify)?;
    match &outcome {
        LoadOutcome::VerificationMismatch { .. } => {
            anyhow::bail!("{session}: {outcome}");
        }
        _ => info!(session_id = %session, outcome = %outcome, "Scenario applied"),
    }
    Ok(())
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    Ok(serde_json::from_str(&text)?)
}
