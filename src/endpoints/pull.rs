use std::sync::Arc;

use tracing::warn;

use crate::config::{ConfigValue, ControlPlaneSource, Pull, RefreshScheduler, Snapshot};
use crate::xds::{endpoint_addresses, DiscoveryClient, DiscoveryError, ResourceName};

use super::EndpointSubset;

pub const ENDPOINT_SOURCE_NAME: &str = "EndpointSubsetSource";
pub const ENDPOINT_SOURCE_PRIORITY: i32 = 8;

/// Endpoint subsets for every cluster that names a subset, keyed by cluster
/// name. Clusters without a subset carry no tags and are skipped.
///
/// A subset is never published without its tags. If the tags can't be looked
/// up, the cluster keeps whatever it had in the previous snapshot, or is left
/// out if it had nothing.
pub struct SubsetPull;

#[tonic::async_trait]
impl Pull for SubsetPull {
    async fn pull(
        &self,
        client: &DiscoveryClient,
        previous: &Snapshot,
    ) -> Result<Snapshot, DiscoveryError> {
        let clusters = client.list_clusters().await?;

        let mut snapshot = Snapshot::new();
        for cluster in clusters {
            let Some(name) = ResourceName::parse(&cluster.name) else {
                continue;
            };
            if !name.has_subset() {
                continue;
            }

            let tags = match client
                .tags_for_subset(&name.namespace, &name.service, &name.subset)
                .await
            {
                Ok(tags) => tags,
                Err(e) => {
                    let kept = previous.get(&cluster.name).cloned();
                    warn!(
                        cluster = cluster.name,
                        err = %e,
                        kept_previous = kept.is_some(),
                        "failed to fetch subset tags",
                    );
                    if let Some(value) = kept {
                        snapshot.insert(cluster.name, value);
                    }
                    continue;
                }
            };

            let assignment = client.list_endpoints(&cluster.name).await?;
            let addrs = endpoint_addresses(&assignment);

            let subset = EndpointSubset::new(&cluster.name, &name.subset, tags, &addrs);
            snapshot.insert(cluster.name, Arc::new(ConfigValue::EndpointSubset(subset)));
        }

        Ok(snapshot)
    }
}

pub fn endpoint_source(
    client: Arc<DiscoveryClient>,
    scheduler: RefreshScheduler,
) -> ControlPlaneSource<SubsetPull> {
    ControlPlaneSource::new(
        ENDPOINT_SOURCE_NAME,
        ENDPOINT_SOURCE_PRIORITY,
        client,
        SubsetPull,
        scheduler,
    )
}
