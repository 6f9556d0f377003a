use crate::mesh::Mesh;
use tokio::task;
use tracing::info;

/// Run the discovery and send loops until the mesh shuts down.
pub async fn run_workers(mesh: Mesh) {
    info!("Worker runtime started");

    let discovery = task::spawn(mesh.clone().run_discovery_loop());
    let sender = task::spawn(mesh.clone().run_send_loop());

    let _ = futures_util::future::join_all(vec![discovery, sender]).await;

    info!("Worker runtime exited");
}
