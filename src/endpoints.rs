//! Tag-aware service instances, built from the control plane's subset
//! clusters.

mod cache;
mod listener;
mod pull;
mod subset;

pub use cache::EndpointCache;
pub use listener::EndpointListener;
pub use pull::{endpoint_source, SubsetPull, ENDPOINT_SOURCE_NAME, ENDPOINT_SOURCE_PRIORITY};
pub use subset::{EndpointSubset, ServiceInstance, DEFAULT_PROTOCOL};
