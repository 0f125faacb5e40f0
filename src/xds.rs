mod client;
mod cluster_name;
mod node;
mod resources;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{
    endpoint_addresses, is_original_dst, AdsTransport, Cursor, DiscoveryClient, DiscoveryError,
    NoSubsetTags, SubsetTags, Transport,
};
pub use cluster_name::{Direction, ResourceName};
pub use node::{IdentityError, NodeInfo};
pub use resources::ResourceType;
