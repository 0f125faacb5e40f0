use std::{collections::BTreeMap, sync::Arc};

use tracing::trace;

use crate::config::Trigger;
use crate::egress::{EgressConfig, EgressRuleCache};
use crate::endpoints::{EndpointCache, ServiceInstance};

/// Read-only access to published routing data for whatever is proxying
/// requests.
///
/// Nothing in here ever blocks on the control plane. Lookups return the last
/// published data, however stale.
#[derive(Clone)]
pub struct DataPlane {
    egress: Arc<EgressRuleCache>,
    endpoints: Arc<EndpointCache>,
    egress_refresh: Option<Trigger>,
    endpoint_refresh: Option<Trigger>,
}

impl DataPlane {
    pub fn new(egress: Arc<EgressRuleCache>, endpoints: Arc<EndpointCache>) -> Self {
        Self {
            egress,
            endpoints,
            egress_refresh: None,
            endpoint_refresh: None,
        }
    }

    /// Ask for a refresh through `trigger` whenever a host has no egress
    /// rule.
    pub fn with_egress_trigger(mut self, trigger: Trigger) -> Self {
        self.egress_refresh = Some(trigger);
        self
    }

    /// Ask for a refresh through `trigger` whenever a tagged lookup comes up
    /// empty.
    pub fn with_endpoint_trigger(mut self, trigger: Trigger) -> Self {
        self.endpoint_refresh = Some(trigger);
        self
    }

    /// The egress rule for a host, if there is one.
    pub fn match_egress(&self, hostname: &str) -> Option<EgressConfig> {
        let matched = self.egress.match_egress(hostname);

        if matched.is_none() {
            if let Some(trigger) = &self.egress_refresh {
                let sent = trigger.try_send(hostname);
                trace!(hostname, sent, "no egress rule, requested a refresh");
            }
        }
        matched
    }

    /// Instances of a service in a subset whose tags include `tags`. An empty
    /// result means there was no matching subset.
    pub fn instances_with_tags(
        &self,
        service: &str,
        tags: &BTreeMap<String, String>,
    ) -> Vec<ServiceInstance> {
        if let Some(instances) = self.endpoints.get_with_tags(service, tags) {
            return instances;
        }

        if let Some(trigger) = &self.endpoint_refresh {
            let sent = trigger.try_send(service);
            trace!(service, sent, "no matching subset, requested a refresh");
        }
        Vec::new()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::config::{ConfigManager, RefreshScheduler, Wakeup};
    use crate::egress::{EgressListener, EgressPort, FileSource};
    use crate::endpoints::EndpointSubset;
    use crate::xds::fake::labels;

    const EGRESS_YAML: &str = r#"
egressRule:
  google-ext:
    - hosts:
        - "*.yahoo.com"
      ports:
        - port: 80
          protocol: HTTP
"#;

    #[tokio::test]
    async fn test_egress_from_file() {
        let egress = Arc::new(EgressRuleCache::new());
        let data_plane = DataPlane::new(egress.clone(), Arc::new(EndpointCache::new()));

        let manager = ConfigManager::new();
        manager.register_listener("*", Arc::new(EgressListener::new(egress.clone())));
        let source = FileSource::parse("egress.yaml".into(), EGRESS_YAML).unwrap();
        manager.add_source(Arc::new(source)).await;

        let matched = data_plane.match_egress("news.yahoo.com").unwrap();
        assert_eq!(matched.hosts, vec!["*.yahoo.com".to_string()]);
        assert_eq!(matched.ports, vec![EgressPort::new(80, "HTTP")]);

        assert_eq!(data_plane.match_egress("example.com"), None);
    }

    #[tokio::test]
    async fn test_miss_triggers_refresh() {
        let endpoints = Arc::new(EndpointCache::new());
        let (mut scheduler, trigger) = RefreshScheduler::new(Duration::from_secs(30), 1);
        let data_plane = DataPlane::new(Arc::new(EgressRuleCache::new()), endpoints.clone())
            .with_endpoint_trigger(trigger);

        let cluster = "outbound|9080|v1|reviews.default.svc.cluster.local";
        endpoints.set(
            cluster,
            EndpointSubset::new(cluster, "v1", labels(&[("version", "v1")]), &["10.0.0.1:9080".to_string()]),
        );

        let found = data_plane.instances_with_tags("reviews", &labels(&[("version", "v1")]));
        assert_eq!(found.len(), 1);

        // misses never block, even when the queue is full
        assert!(data_plane.instances_with_tags("reviews", &labels(&[("version", "v2")])).is_empty());
        assert!(data_plane.instances_with_tags("ratings", &labels(&[])).is_empty());

        assert_eq!(scheduler.wait().await, Wakeup::Signal("reviews".to_string()));
    }

    #[tokio::test]
    async fn test_egress_miss_triggers_refresh() {
        let egress = Arc::new(EgressRuleCache::new());
        let (mut scheduler, trigger) = RefreshScheduler::new(Duration::from_secs(10), 1);
        let data_plane = DataPlane::new(egress.clone(), Arc::new(EndpointCache::new()))
            .with_egress_trigger(trigger);

        let manager = ConfigManager::new();
        manager.register_listener("*", Arc::new(EgressListener::new(egress)));
        let source = FileSource::parse("egress.yaml".into(), EGRESS_YAML).unwrap();
        manager.add_source(Arc::new(source)).await;

        assert!(data_plane.match_egress("news.yahoo.com").is_some());
        assert_eq!(data_plane.match_egress("example.com"), None);
        assert_eq!(data_plane.match_egress("example.org"), None);

        // only the first miss fit in the queue
        assert_eq!(scheduler.wait().await, Wakeup::Signal("example.com".to_string()));
    }
}
