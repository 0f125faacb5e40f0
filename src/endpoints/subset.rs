use std::collections::BTreeMap;

pub const DEFAULT_PROTOCOL: &str = "rest";

/// A single addressable instance of a service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceInstance {
    pub instance_id: String,
    /// The name of the cluster the instance was discovered in.
    pub host_name: String,
    pub endpoint_address: String,
    pub protocol: String,
    pub tags: BTreeMap<String, String>,
}

impl ServiceInstance {
    /// Build an instance from an `address:port` endpoint in `cluster_name`.
    pub fn from_endpoint(cluster_name: &str, address: &str, tags: &BTreeMap<String, String>) -> Self {
        Self {
            instance_id: address.replace(':', "_"),
            host_name: cluster_name.to_string(),
            endpoint_address: address.to_string(),
            protocol: DEFAULT_PROTOCOL.to_string(),
            tags: tags.clone(),
        }
    }
}

/// The instances in one tagged subset of a service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointSubset {
    pub subset_name: String,
    pub tags: BTreeMap<String, String>,
    pub instances: Vec<ServiceInstance>,
}

impl EndpointSubset {
    pub fn new(cluster_name: &str, subset_name: &str, tags: BTreeMap<String, String>, addrs: &[String]) -> Self {
        let instances = addrs
            .iter()
            .map(|addr| ServiceInstance::from_endpoint(cluster_name, addr, &tags))
            .collect();

        Self {
            subset_name: subset_name.to_string(),
            tags,
            instances,
        }
    }

    /// `true` if every one of `target`'s tags is also on this subset. This
    /// subset can have more tags than the target, and an empty target matches
    /// everything.
    pub fn matches(&self, target: &BTreeMap<String, String>) -> bool {
        target.iter().all(|(k, v)| self.tags.get(k) == Some(v))
    }
}
