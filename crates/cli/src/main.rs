//! Command-line front-end for both backhaul processes.
//!
//! `backhaul server` runs the broker (public HTTP front-end plus the
//! tunnel listener agents dial into); `backhaul client` runs the
//! origin-side agent. Both read the same JSON config file and take the
//! sections they need from it.

mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

use backhaul_broker::{http, socket, Broker};
use backhaul_common::{tls, Config};

#[derive(Parser, Debug)]
#[command(name = "backhaul", about = "Reverse-tunnel HTTP proxy", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the publicly reachable broker.
    Server {
        /// Path to the JSON configuration file.
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
    /// Run the origin-side agent.
    Client {
        /// Path to the JSON configuration file.
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] backhaul_common::ConfigError),

    #[error("failed to bind {listener} listener on {addr}: {source}")]
    Bind {
        listener: &'static str,
        addr: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Agent(#[from] backhaul_agent::AgentError),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config_path = match &args.command {
        Command::Server { config } | Command::Client { config } => config.clone(),
    };

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("backhaul: {e}");
            std::process::exit(1);
        }
    };

    let _guard = logging::init_logging(&config.logging);

    let result = match args.command {
        Command::Server { .. } => run_server(config).await,
        Command::Client { .. } => run_client(config).await,
    };

    if let Err(e) = result {
        error!("{e}");
        eprintln!("backhaul: {e}");
        std::process::exit(1);
    }
}

/// Bind both broker listeners and serve until interrupted.
async fn run_server(config: Config) -> Result<(), CliError> {
    let http_tls = if config.server.http.ssl.enabled {
        Some(tls::tls_acceptor(&config.server.http.ssl)?)
    } else {
        None
    };
    let socket_tls = if config.server.socket.ssl.enabled {
        Some(tls::tls_acceptor(&config.server.socket.ssl)?)
    } else {
        None
    };

    let http_addr = config.server.http.addr();
    let http_listener = TcpListener::bind(&http_addr)
        .await
        .map_err(|source| CliError::Bind {
            listener: "HTTP",
            addr: http_addr.clone(),
            source,
        })?;

    let socket_addr = config.server.socket.addr();
    let socket_listener = TcpListener::bind(&socket_addr)
        .await
        .map_err(|source| CliError::Bind {
            listener: "tunnel",
            addr: socket_addr.clone(),
            source,
        })?;

    let broker = Arc::new(Broker::new(
        Duration::from_millis(config.request_timeout),
        config.max_frame_bytes,
    ));

    info!(
        http = %http_addr,
        tunnel = %socket_addr,
        "broker listening"
    );

    tokio::select! {
        _ = http::serve(http_listener, http_tls, Arc::clone(&broker)) => {}
        _ = socket::serve(socket_listener, socket_tls, broker) => {}
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    Ok(())
}

/// Run the agent's tunnel loop until interrupted.
async fn run_client(config: Config) -> Result<(), CliError> {
    tokio::select! {
        result = backhaul_agent::tunnel::run(&config) => result?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    Ok(())
}
