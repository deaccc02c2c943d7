//! `peer-balancer` binary.
//!
//! ```text
//! peer-balancer balance [--config FILE] [--servers a:1,b:2]
//! peer-balancer backend [--config FILE] [--port N]
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use peer_balancer::backend::{BackendServer, Responder, SystemSampler};
use peer_balancer::config::loader::read_config;
use peer_balancer::config::validation::{validate_backend_config, validate_config};
use peer_balancer::config::BalancerConfig;
use peer_balancer::lifecycle::signals::spawn_signal_handler;
use peer_balancer::lifecycle::Shutdown;
use peer_balancer::load_balancer::{parse_command, Command, PoolHandle, PoolManager};
use peer_balancer::net::tls::{server_acceptor, ClientTls};
use peer_balancer::net::TcpDialer;
use peer_balancer::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "peer-balancer", version)]
#[command(about = "Health-gated connection pool for protocol backends", long_about = None)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Monitor a pool of backends and broadcast configuration updates
    Balance {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Backend addresses, overriding pool.servers
        #[arg(short, long, value_delimiter = ',')]
        servers: Vec<String>,
    },
    /// Serve the backend side of the protocol
    Backend {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port to listen on, overriding backend.bind_address
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.mode {
        Mode::Balance { config, servers } => {
            let mut config = base_config(config.as_deref())?;
            if !servers.is_empty() {
                config.pool.servers = servers;
            }
            validate_config(&config).map_err(join_errors)?;
            init_observability(&config);
            run_balancer(config).await
        }
        Mode::Backend { config, port } => {
            let mut config = base_config(config.as_deref())?;
            if let Some(port) = port {
                let host = config
                    .backend
                    .bind_address
                    .rsplit_once(':')
                    .map(|(host, _)| host.to_string())
                    .unwrap_or_else(|| "0.0.0.0".to_string());
                config.backend.bind_address = format!("{host}:{port}");
            }
            validate_backend_config(&config).map_err(join_errors)?;
            init_observability(&config);
            run_backend(config).await
        }
    }
}

fn base_config(path: Option<&Path>) -> Result<BalancerConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(read_config(path)?),
        None => Ok(BalancerConfig::default()),
    }
}

fn join_errors<E: std::fmt::Display>(errors: Vec<E>) -> String {
    let joined: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!("invalid configuration: {}", joined.join(", "))
}

fn init_observability(config: &BalancerConfig) {
    logging::init_logging(&config.observability);
    tracing::info!("peer-balancer v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }
}

async fn run_balancer(config: BalancerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let tls = match &config.tls {
        Some(tls) => Some(ClientTls::from_cert_file(
            Path::new(&tls.cert_file),
            &tls.server_name,
        )?),
        None => None,
    };

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let pool = PoolManager::new(
        Arc::new(config),
        Arc::new(TcpDialer::new(tls)),
        shutdown.subscribe(),
    );
    tokio::spawn(operator_loop(pool.handle(), shutdown.clone()));

    pool.run().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Read operator commands from stdin until shutdown.
async fn operator_loop(handle: PoolHandle, shutdown: Shutdown) {
    // Blocking stdin reads live on their own thread so they never hold up
    // runtime shutdown.
    let (tx, mut lines) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("commands: update <metric,metric,...> <interval_secs> | status | quit");
    loop {
        let line = tokio::select! {
            _ = shutdown.triggered() => return,
            line = lines.recv() => match line {
                Some(line) => line,
                None => return,
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Ok(Command::Update(update)) => match handle.broadcast(&update).await {
                Ok(report) => println!(
                    "CONFIG_UPDATE sent to {} backend(s), {} failed",
                    report.delivered.len(),
                    report.failed.len()
                ),
                Err(e) => eprintln!("cannot broadcast: {e}"),
            },
            Ok(Command::Status) => {
                let status = handle.status();
                println!(
                    "{} out of {} servers are healthy",
                    status.healthy, status.configured
                );
                for backend in &status.registry.backends {
                    println!(
                        "  {} {} healthy={} failures={}/{}",
                        backend.identity,
                        backend.addr,
                        backend.healthy,
                        backend.consecutive_failures,
                        backend.max_failures
                    );
                }
                for entry in &status.pending {
                    println!("  pending {} failures={}", entry.addr, entry.failures);
                }
            }
            Ok(Command::Quit) => {
                shutdown.trigger();
                return;
            }
            Err(e) => eprintln!("{e}"),
        }
    }
}

async fn run_backend(config: BalancerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let tls = match &config.tls {
        Some(tls) => {
            let key = tls
                .key_file
                .as_deref()
                .ok_or("tls.key_file is required to serve TLS")?;
            Some(server_acceptor(Path::new(&tls.cert_file), Path::new(key))?)
        }
        None => None,
    };

    let responder = Arc::new(Responder::new(
        config.backend.id_prefix.clone(),
        Arc::new(SystemSampler::new()),
    ));
    let listener = TcpListener::bind(&config.backend.bind_address).await?;

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    BackendServer::new(responder, tls)
        .run(listener, shutdown.subscribe())
        .await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
