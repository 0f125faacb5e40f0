pub mod config;
pub mod dataplane;
pub mod egress;
pub mod endpoints;
pub mod k8s;
pub mod metrics;
pub mod xds;

mod grpc_access;

pub use dataplane::DataPlane;
