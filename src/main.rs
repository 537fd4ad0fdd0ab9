use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use mcmmo_launcher::config::LauncherConfig;
use mcmmo_launcher::ipc::client::LauncherClient;
use mcmmo_launcher::ipc::IPCServer;
use mcmmo_launcher::supervisor::error::SupervisorError;
use mcmmo_launcher::supervisor::launch::LaunchCommand;
use mcmmo_launcher::supervisor::monitor::ServerEvent;
use mcmmo_launcher::supervisor::Supervisor;
use mcmmo_launcher::world::properties::ServerProperties;
use mcmmo_launcher::world::ResetReport;

#[derive(Debug, Parser)]
#[command(name = "mcmmo-launcher", version, about = "Start, stop and reset a local Paper server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to launcher.toml (default: $MCMMO_LAUNCHER_CONFIG or ./launcher.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Server directory, overriding `server.working_dir`
    #[arg(long, global = true)]
    working_dir: Option<PathBuf>,
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the server in the foreground. Ctrl+C stops it gracefully.
    Start,
    /// Ask the running launcher to stop its server.
    Stop {
        /// Wait until the server process has exited
        #[arg(long)]
        wait: bool,
    },
    /// Show the server state.
    Status,
    /// Back up the worlds, set a new seed and delete the worlds.
    ResetWorld {
        /// New level-seed; an empty string means a random seed
        #[arg(long, allow_hyphen_values = true)]
        seed: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let config_path = LauncherConfig::resolve_path(cli.config.as_deref());
    let mut cfg = LauncherConfig::load(&config_path)
        .map_err(|e| SupervisorError::InvalidConfig(e.to_string()))?;
    if let Some(dir) = cli.working_dir {
        cfg.server.working_dir = dir;
    }

    match cli.command {
        Commands::Start => start(&cfg).await,
        Commands::Stop { wait } => stop(&cfg, wait).await,
        Commands::Status => status(&cfg).await,
        Commands::ResetWorld { seed } => reset_world(&cfg, &seed).await,
    }
}

async fn start(cfg: &LauncherConfig) -> anyhow::Result<()> {
    let working_dir = cfg.server.working_dir.clone();
    let client = LauncherClient::new(&cfg.ipc_base_url())?;
    if let Some(remote) = client.status_for(&working_dir).await.ok().flatten() {
        if remote.state.is_active() {
            return Err(SupervisorError::AlreadyRunning(PathBuf::from(remote.working_dir)).into());
        }
    }

    let supervisor = Arc::new(Supervisor::from_config(cfg));
    let command = LaunchCommand::from_config(cfg);
    tracing::info!("Launch command: {}", command.display());
    let session = supervisor.start(command, &working_dir)?;
    let mut events = session.subscribe();

    let ipc = IPCServer::new(
        supervisor.clone(),
        working_dir.clone(),
        cfg.properties_path(),
        &cfg.ipc.listen_addr,
    );
    tokio::spawn(async move {
        if let Err(e) = ipc.start().await {
            tracing::warn!("Control endpoint unavailable ({}); use Ctrl+C to stop", e);
        }
    });

    let address = server_address(&cfg.properties_path());
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ServerEvent::Line(line)) => println!("{}", line.content),
                Ok(ServerEvent::ServerReady) => {
                    tracing::info!("Server running at {}; connect from Minecraft to play", address)
                }
                Ok(ServerEvent::ServerStopping) => tracing::info!("Server stopping"),
                Ok(ServerEvent::Exited { code }) => {
                    tracing::debug!("Server exited (code {:?})", code);
                    break;
                }
                Err(RecvError::Lagged(n)) => tracing::warn!("Skipped {} console lines", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let exit = session.exit_handle();
    let result = tokio::select! {
        status = exit.clone().wait() => status,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, stopping server...");
            match supervisor.stop(&working_dir).await {
                Ok(handle) => handle.wait().await,
                // already shutting down on its own
                Err(SupervisorError::NotRunning(_)) => exit.wait().await,
                Err(e) => Err(e),
            }
        }
    };
    let _ = printer.await;

    let status = result?;
    if !status.success() {
        anyhow::bail!("Server exited with {}", status);
    }
    tracing::info!("Server stopped");
    Ok(())
}

async fn stop(cfg: &LauncherConfig, wait: bool) -> anyhow::Result<()> {
    let client = LauncherClient::new(&cfg.ipc_base_url())?;
    let working_dir = &cfg.server.working_dir;
    // 다른 디렉토리를 관리하는 런처에는 보내지 않음
    if client.status_for(working_dir).await?.is_none() {
        return Err(SupervisorError::NotRunning(working_dir.clone()).into());
    }
    let response = match client.stop().await? {
        None => return Err(SupervisorError::NotRunning(cfg.server.working_dir.clone()).into()),
        Some(Err(remote)) => return Err(remote.into()),
        Some(Ok(response)) => response,
    };
    println!("Stop command sent (server is {})", response.state);

    if wait {
        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;
            match client.status_for(working_dir).await {
                Ok(Some(s)) if s.state.is_active() => continue,
                Ok(_) => break,
                Err(e) => {
                    tracing::debug!("Status poll failed: {}", e);
                    break;
                }
            }
        }
        println!("Server stopped");
    }
    Ok(())
}

async fn status(cfg: &LauncherConfig) -> anyhow::Result<()> {
    let client = LauncherClient::new(&cfg.ipc_base_url())?;
    match client.status_for(&cfg.server.working_dir).await? {
        Some(s) if s.state.is_active() => {
            println!("{}", s.state);
            if let Some(pid) = s.pid {
                println!("  pid:     {}", pid);
            }
            println!("  dir:     {}", s.working_dir);
            if let Some(cmd) = s.command {
                println!("  command: {}", cmd);
            }
            if let Some(up) = s.uptime_seconds {
                println!("  uptime:  {}s", up);
            }
        }
        _ => println!("stopped"),
    }
    Ok(())
}

async fn reset_world(cfg: &LauncherConfig, seed: &str) -> anyhow::Result<()> {
    let client = LauncherClient::new(&cfg.ipc_base_url())?;

    // 같은 디렉토리를 관리하는 런처가 있으면 그쪽 세션 상태로 판단하도록 위임
    if client.status_for(&cfg.server.working_dir).await.ok().flatten().is_some() {
        let value = client.reset_world(seed).await??;
        let report: ResetReport = serde_json::from_value(value["report"].clone())
            .map_err(|e| anyhow::anyhow!("Unexpected reset response: {}", e))?;
        print_report(&report);
        return Ok(());
    }

    let supervisor = Supervisor::from_config(cfg);
    let report = supervisor
        .reset_world(&cfg.server.working_dir, &cfg.properties_path(), seed)
        .await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &ResetReport) {
    println!("Backup:  {}", report.snapshot.root.display());
    if report.snapshot.copied.is_empty() {
        println!("  (no world directories found)");
    }
    for name in &report.snapshot.copied {
        println!("  - {}", name);
    }
    if report.seed.is_empty() {
        println!("Seed:    <random>");
    } else {
        println!("Seed:    {}", report.seed);
    }
    if report.delete_failures > 0 {
        println!("Warning: {} entries could not be deleted", report.delete_failures);
    }
    println!("World reset complete. The next start generates a new world.");
}

/// `localhost:<server-port>` from server.properties.
fn server_address(properties: &Path) -> String {
    let port = ServerProperties::load(properties)
        .ok()
        .and_then(|p| p.get("server-port").map(String::from))
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "25565".to_string());
    format!("localhost:{}", port)
}
