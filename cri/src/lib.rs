//! Contiv CRI shim.
//!
//! Serves the Kubernetes Container Runtime Interface on a Unix socket and
//! forwards every call to a runtime delegate. Pod sandbox creation first
//! records a key in an etcd coordination store.

pub mod coordination;
pub mod delegate;
pub mod error;
pub mod image_service;
pub mod runtime_service;
pub mod server;
pub mod shim;
pub mod upstream;

/// Generated CRI v1 protobuf types.
pub mod cri_api {
    tonic::include_proto!("runtime.v1");
}

pub use coordination::{CoordinationClient, CoordinationRecord, CoordinationSession, EtcdCoordinator};
pub use delegate::{ImageDelegate, RuntimeDelegate};
pub use server::CriServer;
pub use shim::Shim;
pub use upstream::UpstreamRuntime;
