use std::net::IpAddr;

use xds_api::pb::envoy::config::core::v3 as xds_core;

const DEFAULT_POD_NAME: &str = "pod_name_default";
const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("INSTANCE_IP is not set and no local address could be detected: {0}")]
    NoInstanceIp(#[source] local_ip_address::Error),
}

/// Identifies this sidecar to the control plane. Read once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub pod_name: String,
    pub namespace: String,
    pub instance_ip: String,
}

impl NodeInfo {
    /// Build a NodeInfo from the process environment.
    ///
    /// Without an `INSTANCE_IP` this falls back to a local interface
    /// address, preferring IPv4. If there isn't one there is no way to
    /// identify this instance and an error is returned.
    pub fn from_env() -> Result<Self, IdentityError> {
        Self::from_lookup(|key| std::env::var(key).ok(), local_ip)
    }

    pub(crate) fn from_lookup<F, L>(lookup: F, detect_ip: L) -> Result<Self, IdentityError>
    where
        F: Fn(&str) -> Option<String>,
        L: FnOnce() -> Result<IpAddr, local_ip_address::Error>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let pod_name = non_empty("POD_NAME").unwrap_or_else(|| DEFAULT_POD_NAME.to_string());
        let namespace = non_empty("POD_NAMESPACE")
            .or_else(|| non_empty("NAMESPACE"))
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let instance_ip = match non_empty("INSTANCE_IP") {
            Some(ip) => ip,
            None => {
                tracing::warn!("INSTANCE_IP is not set, detecting the local address");
                detect_ip().map_err(IdentityError::NoInstanceIp)?.to_string()
            }
        };

        Ok(Self {
            pod_name,
            namespace,
            instance_ip,
        })
    }

    /// The node id, in the `type~ip~id~domain` shape the control plane
    /// expects from sidecars.
    pub fn node_id(&self) -> String {
        format!(
            "sidecar~{}~{}~{}",
            self.instance_ip, self.pod_name, self.namespace
        )
    }

    pub fn to_xds(&self) -> xds_core::Node {
        xds_core::Node {
            id: self.node_id(),
            cluster: self.pod_name.clone(),
            ..Default::default()
        }
    }
}

fn local_ip() -> Result<IpAddr, local_ip_address::Error> {
    local_ip_address::local_ip().or_else(|e| match e {
        local_ip_address::Error::LocalIpAddressNotFound => local_ip_address::local_ipv6(),
        e => Err(e),
    })
}
