//! A running peer: inbound server plus the background workers, tied to one
//! cancellation token.

use crate::config::NodeConfig;
use crate::directory::PeerDirectory;
use crate::handlers::NeighborHandler;
use crate::mesh::Mesh;
use crate::messaging::{LogObserver, Observer, RandomTokens, TokenSource};
use crate::server_loop::serve_inbound;
use crate::table::ConnectionTable;
use crate::workers::run_workers;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::{self, JoinHandle};
use tokio::time;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("listener has no local address: {0}")]
    LocalAddr(#[source] io::Error),
    #[error("node already started")]
    AlreadyStarted,
    #[error("inbound server failed: {0}")]
    Serve(#[from] tonic::transport::Error),
    #[error("shutdown did not finish within {0:?}")]
    ShutdownTimeout(Duration),
}

type ServerHandle = JoinHandle<Result<(), tonic::transport::Error>>;

pub struct Node {
    mesh: Mesh,
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    server: Mutex<Option<ServerHandle>>,
    workers: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Bind the configured listen address with the default observer and
    /// token source.
    pub async fn bind(config: NodeConfig, directory: PeerDirectory) -> Result<Self, NodeError> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| NodeError::Bind { addr, source })?;

        Self::with_listener(
            config,
            directory,
            listener,
            Arc::new(LogObserver),
            Arc::new(RandomTokens::default()),
        )
    }

    pub fn with_listener(
        config: NodeConfig,
        directory: PeerDirectory,
        listener: TcpListener,
        observer: Arc<dyn Observer>,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, NodeError> {
        let local_addr = listener.local_addr().map_err(NodeError::LocalAddr)?;

        Ok(Self {
            mesh: Mesh::new(config, directory, observer, tokens),
            local_addr,
            listener: Mutex::new(Some(listener)),
            server: Mutex::new(None),
            workers: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn table(&self) -> &ConnectionTable {
        &self.mesh.table
    }

    /// Serve and run the workers. Returns once [`Node::stop`] has been
    /// called.
    pub async fn start(&self) -> Result<(), NodeError> {
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or(NodeError::AlreadyStarted)?;

        info!(
            node = %self.mesh.local(),
            address = %self.local_addr,
            candidates = self.mesh.directory.candidates().len(),
            "Node started"
        );

        let handler = NeighborHandler::new(
            self.mesh.local().clone(),
            self.mesh.observer.clone(),
            self.mesh.shutdown.clone(),
        );
        let server = task::spawn(serve_inbound(listener, handler, self.mesh.shutdown.clone()));
        let workers = task::spawn(run_workers(self.mesh.clone()));

        *self.server.lock().await = Some(server);
        *self.workers.lock().await = Some(workers);

        self.mesh.shutdown.cancelled().await;
        Ok(())
    }

    /// Cancel everything, let inbound streams drain, close outbound
    /// transports and wait for background tasks, all within `deadline`.
    pub async fn stop(&self, deadline: Duration) -> Result<(), NodeError> {
        info!(node = %self.mesh.local(), "Shutting down");
        self.mesh.shutdown.cancel();

        let server = self.server.lock().await.take();
        let workers = self.workers.lock().await.take();
        let aborts: Vec<_> = server
            .iter()
            .map(|h| h.abort_handle())
            .chain(workers.iter().map(|h| h.abort_handle()))
            .collect();

        let graceful = async {
            let served = match server {
                Some(server) => server.await.unwrap_or_else(|e| {
                    error!(error = %e, "Inbound server task failed");
                    Ok(())
                }),
                None => Ok(()),
            };

            let mut closed = self.mesh.close_all().await;
            if let Some(workers) = workers {
                if let Err(e) = workers.await {
                    error!(error = %e, "Worker task failed");
                }
            }
            self.mesh.tracker.close();
            self.mesh.tracker.wait().await;
            // Anything a worker recorded while winding down.
            closed += self.mesh.close_all().await;

            (served, closed)
        };

        match time::timeout(deadline, graceful).await {
            Ok((served, closed)) => {
                info!(closed, "Shutdown complete");
                served.map_err(NodeError::from)
            }
            Err(_) => {
                for abort in aborts {
                    abort.abort();
                }
                let closed = self.mesh.close_all().await;
                warn!(closed, deadline = ?deadline, "Shutdown deadline exceeded, tasks aborted");
                Err(NodeError::ShutdownTimeout(deadline))
            }
        }
    }
}
