use std::process::Command;
use tonic_build::manual::{Builder, Method, Service};

fn main() {
    // Get git SHA
    let git_hash = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    // Exposed to the crate as env!("GIT_COMMIT_HASH")
    println!("cargo:rustc-env=GIT_COMMIT_HASH={}", git_hash);

    // If you want to rerun when git HEAD changes:
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
    println!("cargo:rerun-if-changed=build.rs");

    // Stubs for neighbor.NeighborService, declared here instead of a .proto so
    // the build needs no protoc. Message types live in src/proto.rs.
    let neighbor_service = Service::builder()
        .name("NeighborService")
        .package("neighbor")
        .method(
            Method::builder()
                .name("communicate")
                .route_name("Communicate")
                .input_type("crate::proto::Message")
                .output_type("crate::proto::Message")
                .codec_path("tonic::codec::ProstCodec")
                .client_streaming()
                .server_streaming()
                .build(),
        )
        .build();

    Builder::new().compile(&[neighbor_service]);
}
