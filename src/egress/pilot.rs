use std::sync::Arc;

use tracing::debug;

use crate::config::{ConfigValue, ControlPlaneSource, Pull, RefreshScheduler, Snapshot};
use crate::xds::{is_original_dst, DiscoveryClient, DiscoveryError, Direction, ResourceName};

use super::{EgressPort, EgressRule};

pub const PILOT_EGRESS_KEY: &str = "pilotEgress";
pub const PILOT_SOURCE_NAME: &str = "EgressPilotSource";
pub const PILOT_SOURCE_PRIORITY: i32 = 8;

/// Egress rules derived from the control plane's original-destination
/// clusters. Every outbound one becomes a rule allowing plain http to its
/// host on its port, and all of them are published under a single key.
pub struct EgressPull;

#[tonic::async_trait]
impl Pull for EgressPull {
    async fn pull(
        &self,
        client: &DiscoveryClient,
        _previous: &Snapshot,
    ) -> Result<Snapshot, DiscoveryError> {
        let clusters = client.list_clusters().await?;

        let mut rules = Vec::new();
        for cluster in clusters.iter().filter(|c| is_original_dst(c)) {
            let Some(name) = ResourceName::parse(&cluster.name) else {
                continue;
            };
            if name.direction != Direction::Outbound {
                continue;
            }
            let Ok(port) = name.port.parse::<i32>() else {
                debug!(cluster = cluster.name, "skipping cluster with a non-numeric port");
                continue;
            };

            rules.push(EgressRule {
                hosts: vec![name.fqdn],
                ports: vec![EgressPort::new(port, "http")],
            });
        }

        let mut snapshot = Snapshot::new();
        snapshot.insert(
            PILOT_EGRESS_KEY.to_string(),
            Arc::new(ConfigValue::EgressRules(rules)),
        );
        Ok(snapshot)
    }
}

pub fn pilot_source(
    client: Arc<DiscoveryClient>,
    scheduler: RefreshScheduler,
) -> ControlPlaneSource<EgressPull> {
    ControlPlaneSource::new(
        PILOT_SOURCE_NAME,
        PILOT_SOURCE_PRIORITY,
        client,
        EgressPull,
        scheduler,
    )
}
