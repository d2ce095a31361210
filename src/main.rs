//! CLI for TalonMQ
//!
//! Subcommands:
//! - `server`: run the broker
//! - `inspect`: summarize a snapshot file without starting the broker

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use talonmq::broker::{Broker, lock_broker};
use talonmq::config::{Settings, load_config};
use talonmq::persistence::{self, read_snapshot};
use talonmq::transport::serve_tcp;
use talonmq::utils::logging;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "talonmq", version)]
enum Command {
    /// Start the broker
    Server {
        /// Configuration file layered over `config/default.*`
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// One of error, warn, info, debug, trace
        #[arg(long)]
        log_level: Option<String>,
    },
    /// Print the contents of a snapshot file
    Inspect {
        #[arg(default_value = "talonmq.dat")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    match Command::parse() {
        Command::Server {
            config,
            host,
            port,
            log_level,
        } => {
            if let Err(e) = run_server(config.as_deref(), host, port, log_level).await {
                error!("Server failed: {e}");
                eprintln!("talonmq: {e}");
                std::process::exit(1);
            }
        }
        Command::Inspect { path } => {
            if let Err(e) = inspect(&path) {
                eprintln!("talonmq: {}: {e}", path.display());
                std::process::exit(1);
            }
        }
    }
}

async fn run_server(
    config: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
    log_level: Option<String>,
) -> Result<(), Box<dyn Error>> {
    // a missing .env file is fine
    let _ = dotenvy::dotenv();

    let mut settings = load_config(config)?;
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }
    if let Some(level) = log_level {
        settings.logging.level = level;
    }

    let _log_guard = match &settings.logging.file {
        Some(path) => Some(logging::init_with_file(&settings.logging.level, path)),
        None => {
            logging::init(&settings.logging.level);
            None
        }
    };

    let mut broker = Broker::new(settings.broker_options()?);
    if let Some(path) = broker.options().storage_path.clone() {
        if let Err(e) = persistence::load_into(&mut broker, &path) {
            error!("Failed to load snapshot {}: {e}", path.display());
            return Err(e.into());
        }
    }
    let broker = broker.into_shared();

    if let Some(pid_file) = &settings.server.pid_file {
        fs::write(pid_file, format!("{}\n", std::process::id()))?;
    }

    let result = serve(&settings, broker.clone()).await;

    let pending = lock_broker(&broker).take_background_save();
    if let Some(pending) = pending {
        if let Err(e) = pending.wait().await {
            warn!("Background snapshot failed: {e}");
        }
    }
    {
        let mut guard = lock_broker(&broker);
        if guard.has_storage() && guard.save(false).is_ok() {
            info!("Snapshot written on shutdown");
        }
    }
    if let Some(pid_file) = &settings.server.pid_file {
        if let Err(e) = fs::remove_file(pid_file) {
            warn!("Failed to remove pid file {}: {e}", pid_file.display());
        }
    }

    result
}

async fn serve(settings: &Settings, broker: talonmq::broker::SharedBroker) -> Result<(), Box<dyn Error>> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;
    let max_request = settings.server.max_request_size;

    #[cfg(unix)]
    if let Some(path) = &settings.server.unix_socket {
        // a stale socket from a previous run blocks bind
        let _ = fs::remove_file(path);
        let listener = tokio::net::UnixListener::bind(path)?;
        tokio::spawn(talonmq::transport::serve_unix(listener, broker.clone(), max_request));
    }

    tokio::spawn(Broker::start_updater(broker.clone()));
    tokio::spawn(Broker::start_snapshot_loop(broker.clone(), settings.save_interval()));
    tokio::spawn(Broker::start_memory_check(broker.clone()));
    tokio::spawn(Broker::start_idle_sweep(broker.clone()));

    info!("TalonMQ {} started", env!("CARGO_PKG_VERSION"));

    tokio::select! {
        _ = serve_tcp(listener, broker, max_request) => {
            error!("TCP listener exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    #[cfg(unix)]
    if let Some(path) = &settings.server.unix_socket {
        let _ = fs::remove_file(path);
    }

    Ok(())
}

fn inspect(path: &Path) -> Result<(), Box<dyn Error>> {
    let snapshot = read_snapshot(path)?;

    println!("users:    {}", snapshot.users.len());
    for user in &snapshot.users {
        println!("  {} perm={:#x}", user.name, user.perm);
    }
    println!("queues:   {}", snapshot.queues.len());
    for queue in &snapshot.queues {
        println!(
            "  {} flags={:#x} messages={}",
            queue.name,
            queue.flags,
            queue.messages.len()
        );
    }
    println!("routes:   {}", snapshot.routes.len());
    for route in &snapshot.routes {
        let bindings: usize = route.keys.iter().map(|(_, queues)| queues.len()).sum();
        println!("  {} flags={:#x} bindings={}", route.name, route.flags, bindings);
    }
    println!("channels: {}", snapshot.channels.len());
    for channel in &snapshot.channels {
        println!("  {} flags={:#x}", channel.name, channel.flags);
    }
    Ok(())
}
