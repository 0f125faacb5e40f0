use std::collections::BTreeMap;

use crossbeam_skiplist::SkipMap;

use crate::xds::ResourceName;

use super::{EndpointSubset, ServiceInstance};

struct Indexed {
    // None for cluster names that don't parse. those are never returned by
    // a tagged lookup.
    service: Option<String>,
    subset: EndpointSubset,
}

/// Tagged subsets of every known service, keyed by cluster name.
#[derive(Default)]
pub struct EndpointCache {
    subsets: SkipMap<String, Indexed>,
}

impl EndpointCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, cluster_name: impl Into<String>, subset: EndpointSubset) {
        let cluster_name = cluster_name.into();
        let service = ResourceName::parse(&cluster_name).map(|name| name.service);
        self.subsets.insert(cluster_name, Indexed { service, subset });
        self.update_gauge();
    }

    pub fn delete(&self, cluster_name: &str) -> bool {
        let removed = self.subsets.remove(cluster_name).is_some();
        self.update_gauge();
        removed
    }

    pub fn get(&self, cluster_name: &str) -> Option<EndpointSubset> {
        self.subsets
            .get(cluster_name)
            .map(|e| e.value().subset.clone())
    }

    pub fn len(&self) -> usize {
        self.subsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subsets.is_empty()
    }

    /// The instances of the first subset of `service` whose tags include all
    /// of `tags`, in cluster name order.
    ///
    /// `None` means nothing matched, including when the service has no
    /// subsets at all. Callers that care about the difference should fall
    /// back to an untagged lookup.
    pub fn get_with_tags(
        &self,
        service: &str,
        tags: &BTreeMap<String, String>,
    ) -> Option<Vec<ServiceInstance>> {
        self.subsets.iter().find_map(|entry| {
            let indexed = entry.value();
            if indexed.service.as_deref() != Some(service) || !indexed.subset.matches(tags) {
                return None;
            }

            Some(indexed.subset.instances.clone())
        })
    }

    fn update_gauge(&self) {
        metrics::gauge!("cache.endpoint_subsets").set(self.subsets.len() as f64);
    }
}
