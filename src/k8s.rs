use std::collections::BTreeMap;

use kube::{
    api::{ApiResource, DynamicObject, ListParams},
    core::GroupVersionKind,
    Api,
};
use serde::Deserialize;
use tracing::trace;

use crate::xds::SubsetTags;

/// Subset tags read from the mesh's DestinationRules.
///
/// A DestinationRule names the subsets of a host and the labels that select
/// each one's instances. Rules are listed fresh on every lookup.
#[derive(Clone)]
pub struct DestinationRules {
    client: kube::Client,
    resource: ApiResource,
}

impl DestinationRules {
    pub fn new(client: kube::Client) -> Self {
        let gvk = GroupVersionKind::gvk("networking.istio.io", "v1alpha3", "DestinationRule");
        Self {
            client,
            resource: ApiResource::from_gvk(&gvk),
        }
    }
}

#[tonic::async_trait]
impl SubsetTags for DestinationRules {
    async fn subset_tags(
        &self,
        namespace: &str,
        service: &str,
        subset: &str,
    ) -> anyhow::Result<BTreeMap<String, String>> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &self.resource);
        let rules = api.list(&ListParams::default()).await?;

        trace!(namespace, service, subset, rules = rules.items.len(), "listed destination rules");
        Ok(subset_labels(
            rules.items.iter().map(|r| &r.data),
            namespace,
            service,
            subset,
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
struct RuleSpec {
    #[serde(default)]
    host: String,
    #[serde(default)]
    subsets: Vec<RuleSubset>,
}

#[derive(Debug, Default, Deserialize)]
struct RuleSubset {
    #[serde(default)]
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

/// Find the labels for `subset` in the first rule whose host is `service`.
/// Rules that don't parse are skipped. Returns an empty map if nothing
/// matches.
fn subset_labels<'a>(
    rules: impl IntoIterator<Item = &'a serde_json::Value>,
    namespace: &str,
    service: &str,
    subset: &str,
) -> BTreeMap<String, String> {
    for rule in rules {
        let Some(spec) = rule.get("spec") else {
            continue;
        };
        let Ok(spec) = RuleSpec::deserialize(spec) else {
            continue;
        };
        if !host_matches(&spec.host, namespace, service) {
            continue;
        }

        if let Some(found) = spec.subsets.into_iter().find(|s| s.name == subset) {
            return found.labels;
        }
    }

    BTreeMap::new()
}

// hosts are either a short name or a dotted name that starts with
// `service.namespace`.
fn host_matches(host: &str, namespace: &str, service: &str) -> bool {
    let mut labels = host.split('.');
    if labels.next() != Some(service) {
        return false;
    }

    match labels.next() {
        Some(ns) => ns == namespace,
        None => true,
    }
}
