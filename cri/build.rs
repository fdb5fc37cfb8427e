//! Build script for contivshim-cri
//!
//! Compiles the CRI runtime.v1 proto definitions.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Server side for kubelet, client side for the upstream runtime
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/api.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/api.proto");

    Ok(())
}
