//! Chat Socket Daemon
//!
//! Holds one persistent chat connection open, acknowledging every request
//! the server pushes.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (config from the user config directory if present)
//! chat-socket --user alice --password s3cret
//!
//! # Explicit config file and host list
//! chat-socket --config /etc/chat-socket.toml --hosts a.chat.example,b.chat.example
//!
//! # JSON logs
//! chat-socket --log-format json --log-level debug
//!
//! # Write the effective config and exit
//! chat-socket --write-config
//! ```

use anyhow::Context;
use clap::Parser;
use chat_socket::{
    logging, AppForeground, BasicCredential, Config, ConnectionSocket, CredentialStore,
    HealthMonitor, HostRotation, NetworkSignal, WsConnector,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "chat-socket")]
#[command(about = "Persistent chat WebSocket with keep-alive and automatic reconnect")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "CHAT_SOCKET_CONFIG")]
    config: Option<PathBuf>,

    /// Candidate chat hosts (comma-separated), overrides the config file
    #[arg(long, env = "CHAT_HOSTS", value_delimiter = ',')]
    hosts: Vec<String>,

    /// Host that last produced a working connection
    #[arg(long, env = "CHAT_PREVIOUS_HOST")]
    previous_host: Option<String>,

    /// WebSocket scheme (wss or ws)
    #[arg(long, env = "CHAT_SCHEME")]
    scheme: Option<String>,

    /// Account user for the Basic credential
    #[arg(long, env = "CHAT_USER")]
    user: Option<String>,

    /// Account password for the Basic credential
    #[arg(long, env = "CHAT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: String,

    /// Write the effective config to the config path and exit
    #[arg(long)]
    write_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logging::init(&args.log_level, args.log_format == "json");

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(chat_socket::config::default_config_path);
    let mut config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // Apply CLI overrides
    if !args.hosts.is_empty() {
        config.hosts = args.hosts.clone();
    }
    if let Some(scheme) = &args.scheme {
        config.scheme = scheme.clone();
    }
    config.validate()?;

    if args.write_config {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Wrote config");
        return Ok(());
    }

    info!(
        hosts = ?config.hosts,
        default_host = %config.default_host,
        scheme = %config.scheme,
        "Starting chat-socket"
    );

    let mut hosts = HostRotation::new(config.hosts.clone(), config.default_host.clone());
    if let Some(previous) = &args.previous_host {
        hosts = hosts.with_previous_success(previous.clone());
    }
    let hosts = Arc::new(hosts);

    let credentials = Arc::new(CredentialStore::new());
    match (&args.user, &args.password) {
        (Some(user), Some(password)) => {
            credentials.set(BasicCredential::new(user.clone(), password.clone()))
        }
        _ => warn!("No credential configured; waiting for login before connecting"),
    }

    let network = Arc::new(NetworkSignal::new(true));
    let probe = network.spawn_probe(
        config.network_probe_addrs.clone(),
        config.network_probe_interval(),
    );

    let foreground = Arc::new(AppForeground::new());
    foreground.enter_foreground();

    let monitor = Arc::new(HealthMonitor::new(
        config.monitor_config(),
        hosts.clone(),
        credentials.clone(),
        network.clone(),
        foreground.clone(),
    ));

    let connector = Arc::new(WsConnector::new(config.connect_timeout())?);
    let url_hosts = Arc::clone(&hosts);
    let scheme = config.scheme.clone();
    let path = config.websocket_path.clone();
    let socket = ConnectionSocket::builder(
        connector,
        Arc::new(move || url_hosts.websocket_url(&scheme, &path)),
        credentials.accessor(),
    )
    .config(config.socket_config())
    .build();

    let mut states = socket.subscribe();
    let state_socket = Arc::clone(&socket);
    let state_task = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            info!(socket = %state_socket.name(), state = %state, "Connection state changed");
        }
    });

    monitor.monitor(&socket);

    let ack_socket = Arc::clone(&socket);
    let ack_task = tokio::spawn(async move {
        loop {
            match ack_socket.read_request().await {
                Ok(request) => {
                    info!(
                        request_id = request.request_id,
                        verb = %request.verb,
                        path = %request.path,
                        body_len = request.body.len(),
                        "Received request"
                    );
                    if let Err(e) = ack_socket.send_ack(request.request_id) {
                        warn!(request_id = request.request_id, error = %e, "Failed to ack request");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Inbound request queue closed");
                    break;
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    monitor.stop_monitoring(Some(&socket));
    probe.abort();
    ack_task.abort();
    state_task.abort();

    info!("Stopped");
    Ok(())
}
