//! KOS Terminal CLI - attach the local terminal to a remote agent shell.
//!
//! This is the main binary entry point. See the `kos_terminal` library
//! for the core functionality.

// Rust guideline compliant 2026-02

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossterm::{execute, terminal::disable_raw_mode};
use kos_terminal::api::AgentApi;
use kos_terminal::constants::API_KEY_HEADER;
use kos_terminal::stdio::{RawModeGuard, StdioSink};
use kos_terminal::{
    Config, ReconnectPolicy, SessionIdentity, SessionOptions, SessionState, TerminalSession,
    WsConnector,
};
use mimalloc::MiMalloc;

/// Global allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "kos-terminal")]
#[command(version)]
#[command(about = "Interactive terminal for KOS agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach to an agent's shell. Ctrl+] detaches.
    Attach {
        /// Agent id
        agent: String,
        /// Project id (defaults to the configured project)
        #[arg(long)]
        project: Option<String>,
        /// Server URL override
        #[arg(long)]
        server: Option<String>,
        /// Skip the agent lookup before attaching
        #[arg(long)]
        no_verify: bool,
        /// Reconnect with backoff when the connection drops
        #[arg(long)]
        reconnect: bool,
    },
    /// List the agents of a project
    Agents {
        /// Project id (defaults to the configured project)
        #[arg(long)]
        project: Option<String>,
    },
    /// Show or change configuration
    Config {
        key: Option<String>,
        value: Option<String>,
    },
}

enum Exit {
    Detached,
    Finished(SessionState),
}

fn main() -> Result<()> {
    // File logging so log output never lands in the raw-mode terminal
    let log_path = std::env::var("KOS_LOG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("kos-terminal.log"));
    let log_file = std::fs::File::create(&log_path)
        .with_context(|| format!("Failed to create log file at {}", log_path.display()))?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .format_timestamp_secs()
        .init();

    // Restore the terminal before the default handler prints
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("PANIC: {:?}", panic_info);
        let _ = disable_raw_mode();
        let _ = execute!(std::io::stdout(), crossterm::cursor::Show);
        default_hook(panic_info);
    }));

    let cli = Cli::parse();

    match cli.command {
        Commands::Attach {
            agent,
            project,
            server,
            no_verify,
            reconnect,
        } => {
            let mut config = Config::load()?;
            if let Some(server) = server {
                config.server_url = server;
            }
            if reconnect {
                config.reconnect.enabled = true;
            }
            let identity = SessionIdentity::new(resolve_project(project, &config)?, agent)?;
            runtime()?.block_on(attach(config, identity, !no_verify))?;
        }
        Commands::Agents { project } => {
            let config = Config::load()?;
            let project = resolve_project(project, &config)?;
            runtime()?.block_on(list_agents(&config, &project))?;
        }
        Commands::Config { key, value } => {
            let mut config = Config::load()?;
            match (key, value) {
                (None, _) => println!("{}", serde_json::to_string_pretty(&config)?),
                (Some(k), None) => println!("{}", config_value(&config, &k)?),
                (Some(k), Some(v)) => {
                    set_config_value(&mut config, &k, &v)?;
                    config.save()?;
                    println!("{k} = {v}");
                }
            }
        }
    }

    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")
}

fn resolve_project(project: Option<String>, config: &Config) -> Result<String> {
    project
        .or_else(|| config.project_id.clone())
        .context("No project given: pass --project or set KOS_PROJECT_ID")
}

async fn attach(config: Config, identity: SessionIdentity, verify: bool) -> Result<()> {
    if verify {
        let api = AgentApi::new(&config.server_url, &config.api_key)?;
        let agent = api
            .get_agent(&identity)
            .await
            .with_context(|| format!("Could not resolve agent {identity}"))?;
        println!(
            "Attaching to {} ({}) [{}] - Ctrl+] to detach",
            agent.name,
            agent.id,
            agent.status.as_deref().unwrap_or("unknown")
        );
    }

    let connector = Arc::new(WsConnector::new().with_header(API_KEY_HEADER, config.api_key.clone()));
    let reconnect = config.reconnect.policy();
    if reconnect != ReconnectPolicy::Disabled {
        log::info!("[Attach] Reconnect enabled: {reconnect:?}");
    }
    let options = SessionOptions {
        base_url: config.server_url.clone(),
        reconnect,
        show_ended: true,
    };

    let (sink, mut detach_rx) = StdioSink::new();
    let notifier = sink.resize_notifier();
    let raw_mode = RawModeGuard::enable()?;

    let session = TerminalSession::create(identity, Box::new(sink), connector, options)?;
    log::info!("[Attach] Session {} -> {}", session.id(), session.endpoint());
    let mut state_rx = session.subscribe_state();

    let exit = loop {
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break Exit::Finished(SessionState::Disposed);
                }
                let state = state_rx.borrow_and_update().clone();
                match state {
                    SessionState::Open => {
                        // Size changes before open are dropped; push the current one now
                        notifier.notify();
                    }
                    state if state.is_finished() => break Exit::Finished(state),
                    _ => {}
                }
            }
            _ = &mut detach_rx => break Exit::Detached,
        }
    };

    session.dispose();
    drop(raw_mode);

    match exit {
        Exit::Detached => eprintln!("\r\nDetached from {}", session.identity()),
        Exit::Finished(SessionState::Ended(reason)) => {
            log::info!("[Attach] Session {} ended: {reason}", session.id());
        }
        Exit::Finished(state) => {
            log::info!("[Attach] Session {} finished in {state:?}", session.id());
        }
    }
    Ok(())
}

async fn list_agents(config: &Config, project: &str) -> Result<()> {
    let api = AgentApi::new(&config.server_url, &config.api_key)?;
    let agents = api.list_agents(project).await?;
    if agents.is_empty() {
        println!("No agents in project {project}");
        return Ok(());
    }
    for agent in agents {
        println!(
            "{:<38} {:<24} {}",
            agent.id,
            agent.name,
            agent.status.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn config_value(config: &Config, key: &str) -> Result<String> {
    Ok(match key {
        "server_url" => config.server_url.clone(),
        "project_id" => config.project_id.clone().unwrap_or_default(),
        "reconnect.enabled" => config.reconnect.enabled.to_string(),
        "reconnect.initial_ms" => config.reconnect.initial_ms.to_string(),
        "reconnect.max_ms" => config.reconnect.max_ms.to_string(),
        "reconnect.max_attempts" => config.reconnect.max_attempts.to_string(),
        _ => bail!("Unknown config key '{key}'"),
    })
}

fn set_config_value(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let invalid = || format!("Invalid value '{value}' for {key}");
    match key {
        "server_url" => config.server_url = value.to_string(),
        "project_id" => {
            config.project_id = Some(value.to_string()).filter(|v| !v.is_empty());
        }
        "reconnect.enabled" => config.reconnect.enabled = value.parse().with_context(invalid)?,
        "reconnect.initial_ms" => config.reconnect.initial_ms = value.parse().with_context(invalid)?,
        "reconnect.max_ms" => config.reconnect.max_ms = value.parse().with_context(invalid)?,
        "reconnect.max_attempts" => {
            config.reconnect.max_attempts = value.parse().with_context(invalid)?;
        }
        _ => bail!("Unknown config key '{key}'"),
    }
    Ok(())
}
