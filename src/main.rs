//! Errand daemon entry point

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use errand::agent::Pipeline;
use errand::cli::{Cli, Command, default_socket_path};
use errand::config::{Settings, config_dir, data_dir};
use errand::daemon::DaemonManager;
use errand::external::load_external_tools;
use errand::prompts::PromptSet;
use errand::session::{SessionHandler, cleanup_socket, create_listener_at};
use errand::steplog::StepLogger;
use errand::tools::{ListCommandsTool, SchemaCache, SchemaDiscoveryTool, ShellTool, Tool, ToolRegistry, default_cache_dir};

fn setup_logging(verbose: bool) -> Result<()> {
    let log_path = errand::cli::log_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let settings = Settings::load(cli.config.as_ref()).context("Failed to load settings")?;
    let socket_path = cli.socket.clone().unwrap_or_else(default_socket_path);

    match cli.command {
        Some(Command::Start { foreground }) => cmd_start(settings, socket_path, foreground).await,
        Some(Command::Stop) => cmd_stop(),
        Some(Command::Status) => cmd_status(),
        Some(Command::Tools) => cmd_tools().await,
        Some(Command::RunDaemon) => cmd_run_daemon(settings, socket_path).await,
        None => cmd_status(),
    }
}

/// Start the daemon
async fn cmd_start(settings: Settings, socket_path: PathBuf, foreground: bool) -> Result<()> {
    let daemon = DaemonManager::new();

    if let Some(pid) = daemon.running_pid() {
        println!("Errand is already running (PID: {pid})");
        return Ok(());
    }

    if foreground {
        println!("Starting errand in foreground mode...");
        run_daemon(settings, socket_path).await
    } else {
        let pid = daemon.start()?;
        println!("Errand started (PID: {pid})");
        Ok(())
    }
}

/// Stop the daemon
fn cmd_stop() -> Result<()> {
    let daemon = DaemonManager::new();

    if !daemon.is_running() {
        println!("Errand is not running");
        return Ok(());
    }

    daemon.stop()?;
    println!("Errand stopped");
    Ok(())
}

/// Show daemon status
fn cmd_status() -> Result<()> {
    let daemon = DaemonManager::new();
    let status = daemon.status();

    println!("Errand Status");
    println!("-------------");
    match status.pid {
        Some(pid) => {
            println!("Status: running");
            println!("PID: {pid}");
        }
        None => println!("Status: stopped"),
    }
    println!("PID file: {}", status.pid_file.display());
    println!("Socket: {}", default_socket_path().display());

    Ok(())
}

/// Check declared external tools for availability
async fn cmd_tools() -> Result<()> {
    let tools_dir = config_dir().map(|d| d.join("tools"));
    let tools = match &tools_dir {
        Some(dir) => load_external_tools(dir)?,
        None => Vec::new(),
    };

    if tools.is_empty() {
        println!("No external tools declared.");
        if let Some(dir) = tools_dir {
            println!("Declare tools under: {}", dir.display());
        }
        return Ok(());
    }

    println!("External tools:");
    println!();
    for tool in &tools {
        let available = tool.check_available().await;
        let marker = if available { "ok" } else { "unavailable" };
        println!("  {} [{}]", tool.name, marker);
        println!("    {}", tool.description);
        println!("    command: {}", tool.access.command);
        println!();
    }

    Ok(())
}

/// Run as the daemon process (internal command)
async fn cmd_run_daemon(settings: Settings, socket_path: PathBuf) -> Result<()> {
    let daemon = DaemonManager::new();
    daemon.register_self()?;

    let result = run_daemon(settings, socket_path).await;
    let _ = daemon.remove_pid_file();
    result
}

/// Daemon main loop: wire components and accept connections
async fn run_daemon(settings: Settings, socket_path: PathBuf) -> Result<()> {
    info!("Daemon starting...");
    let settings = Arc::new(settings);

    // External tool declarations and the schema cache live in the config dir
    let external_tools = match config_dir() {
        Some(dir) => load_external_tools(&dir.join("tools"))?,
        None => Vec::new(),
    };
    info!(count = external_tools.len(), "Loaded external tool declarations");

    let cache = match config_dir() {
        Some(dir) => Some(Arc::new(
            SchemaCache::new(default_cache_dir(&dir)).context("Failed to create schema cache")?,
        )),
        None => None,
    };

    let step_logger = Arc::new(StepLogger::new(data_dir().join("logs").join("steps")).context("Failed to create step logger")?);
    if let Err(e) = step_logger.clear() {
        warn!(error = %e, "Failed to clear stale step logs");
    }

    let llm = errand::llm::create_client(&settings.llm).context("Failed to create LM client")?;
    info!(provider = %settings.llm.provider, model = %settings.llm.model, "LM client ready");

    let shell = Arc::new(ShellTool::with_external_tools(Arc::clone(&settings), external_tools.clone()));
    let discovery = Arc::new(SchemaDiscoveryTool::new(
        Arc::clone(&settings),
        external_tools.clone(),
        cache.clone(),
        Arc::clone(&llm),
    ));
    let catalog = Arc::new(ListCommandsTool::new(Arc::clone(&settings), external_tools, cache));

    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::clone(&shell) as Arc<dyn Tool>);
    registry.register(Arc::clone(&discovery) as Arc<dyn Tool>);
    registry.register(catalog as Arc<dyn Tool>);
    info!(tools = registry.len(), "Tool registry ready");

    let prompts = PromptSet::load(config_dir().as_deref(), &settings.variables).context("Failed to load prompts")?;
    let pipeline = Arc::new(Pipeline::new(llm, registry, prompts).with_step_logger(step_logger));

    let (listener, socket_path) = create_listener_at(&socket_path)?;
    info!(socket = %socket_path.display(), "Daemon listening");

    let shutdown = CancellationToken::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Shutdown signal received");
                break;
            }
            accepted = listener.accept() => {
                let (stream, _addr) = accepted.context("Failed to accept connection")?;
                info!("Client connected");

                let handler = SessionHandler::new(Arc::clone(&pipeline), Arc::clone(&shell), Arc::clone(&discovery));
                let connection_shutdown = shutdown.child_token();
                tokio::spawn(async move {
                    if let Err(e) = handler.handle(stream, connection_shutdown).await {
                        error!(error = %e, "Session ended with error");
                    }
                });
            }
        }
    }

    shutdown.cancel();
    cleanup_socket(&socket_path);
    info!("Daemon shut down");
    Ok(())
}
