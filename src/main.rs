mod accept_stream;
mod cleanup;
mod config;
mod connector;
mod directory;
mod discovery;
mod handlers;
mod logging;
mod mesh;
mod messaging;
mod node;
mod peers;
mod proto;
mod select_stream_or_shutdown;
mod server_loop;
mod table;
mod types;
mod workers;

use clap::Parser;
use config::{parse_peer_addr, parse_period, NodeConfig};
use directory::PeerDirectory;
use logging::{init_tracing, LogFormat};
use node::Node;
use std::sync::Arc;
use std::time::Duration;
use tokio::{signal, task, task::JoinHandle};
use tracing::{error, info};
use types::{PeerAddress, PeerId};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
struct Args {
    #[arg(long, env = "SERVICE_ID", help = "Identity of this node, e.g. service1")]
    service_id: String,
    #[arg(long, env = "SERVICE_PORT", help = "Port for inbound neighbor streams")]
    service_port: u16,
    #[arg(long, default_value = "0.0.0.0", env = "LISTEN_HOST")]
    listen_host: String,

    /// Discovery interval: seconds, or a value like 500ms, 2s, 1m
    #[arg(long, env = "POLLING_PERIOD_SECONDS", value_parser = parse_period)]
    polling_period: Duration,
    /// Heartbeat interval: seconds, or a value like 500ms, 2s, 1m
    #[arg(long, env = "MESSAGE_PERIOD_SECONDS", value_parser = parse_period)]
    message_period: Duration,

    #[arg(long, default_value = "5", env = "CLUSTER_SIZE")]
    cluster_size: u16,
    #[arg(long, default_value = "service", env = "SERVICE_PREFIX")]
    service_prefix: String,
    #[arg(long, default_value = "5001", env = "DISCOVERY_PORT")]
    discovery_port: u16,
    /// Explicit addresses, e.g. service2=10.0.0.2:5001,service3=10.0.0.3:5001
    #[arg(long, env = "PEER_ADDRS", value_delimiter = ',', value_parser = parse_peer_addr)]
    peer_addrs: Vec<(PeerId, PeerAddress)>,

    #[arg(long, default_value = "500", env = "PROBE_TIMEOUT_MS")]
    probe_timeout_ms: u64,
    #[arg(long, default_value = "2000", env = "CONNECT_TIMEOUT_MS")]
    connect_timeout_ms: u64,
    #[arg(long, default_value = "5", env = "SHUTDOWN_TIMEOUT_SECS")]
    shutdown_timeout_secs: u64,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "LOG_FORMAT")]
    log_format: LogFormat,
}

impl Args {
    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            id: PeerId::new(self.service_id.clone()),
            listen_host: self.listen_host.clone(),
            listen_port: self.service_port,
            discovery_interval: self.polling_period,
            message_interval: self.message_period,
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }

    fn directory(&self) -> PeerDirectory {
        PeerDirectory::new(
            PeerId::new(self.service_id.clone()),
            &self.service_prefix,
            self.cluster_size,
            self.discovery_port,
            self.peer_addrs.clone(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_HASH"),
        "Starting peermesh"
    );

    let config = args.node_config();
    let shutdown_timeout = config.shutdown_timeout;
    let node = Arc::new(Node::bind(config, args.directory()).await?);
    info!("Listening on {}", node.local_addr());

    let runner = task::spawn({
        let node = node.clone();
        async move {
            if let Err(e) = node.start().await {
                error!("Node error: {}", e);
            }
        }
    });

    wait_for_signal().await;
    node.stop(shutdown_timeout).await?;
    join_runner(runner).await;

    Ok(())
}

/// Wait for the node task. A panic or abort is logged, not swallowed.
async fn join_runner(runner: JoinHandle<()>) -> bool {
    match runner.await {
        Ok(()) => true,
        Err(e) => {
            error!("Node task failed: {}", e);
            false
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                if let Err(e) = signal::ctrl_c().await {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                return;
            }
        };
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
            }
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutdown signal received");
}
