use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{Change, ConfigValue, Event, EventListener};

use super::EndpointCache;

/// Publishes endpoint subset changes to an [EndpointCache].
///
/// A subset with no instances left is removed instead of being kept around
/// empty, so lookups don't return stale instances.
pub struct EndpointListener {
    cache: Arc<EndpointCache>,
}

impl EndpointListener {
    pub fn new(cache: Arc<EndpointCache>) -> Self {
        Self { cache }
    }

    fn delete(&self, event: &Event) {
        if self.cache.delete(&event.key) {
            info!(source = %event.source, cluster = event.key, "endpoint subset removed");
        }
    }
}

impl EventListener for EndpointListener {
    fn on_event(&self, event: &Event) {
        let value = match &event.change {
            Change::Delete => return self.delete(event),
            Change::Create(value) | Change::Update(value) => value,
        };

        let ConfigValue::EndpointSubset(subset) = value.as_ref() else {
            debug!(key = event.key, "ignoring non-endpoint value");
            return;
        };

        if subset.instances.is_empty() {
            return self.delete(event);
        }

        debug!(
            source = %event.source,
            cluster = event.key,
            subset = subset.subset_name,
            instances = subset.instances.len(),
            "endpoint subset published",
        );
        self.cache.set(event.key.clone(), subset.clone());
    }
}

#[cfg(test)]
mod test {
    use smol_str::SmolStr;

    use super::*;
    use crate::endpoints::EndpointSubset;
    use crate::xds::fake::labels;

    const CLUSTER: &str = "outbound|9080|v1|reviews.default.svc.cluster.local";

    fn event(change: Change) -> Event {
        Event {
            source: SmolStr::new("test"),
            key: CLUSTER.to_string(),
            change,
        }
    }

    fn subset(addrs: &[&str]) -> Arc<ConfigValue> {
        let addrs: Vec<String> = addrs.iter().map(|a| a.to_string()).collect();
        Arc::new(ConfigValue::EndpointSubset(EndpointSubset::new(
            CLUSTER,
            "v1",
            labels(&[("version", "v1")]),
            &addrs,
        )))
    }

    #[test]
    fn test_publish() {
        let cache = Arc::new(EndpointCache::new());
        let listener = EndpointListener::new(cache.clone());

        listener.on_event(&event(Change::Create(subset(&["10.0.0.1:9080"]))));
        assert_eq!(cache.get(CLUSTER).map(|s| s.instances.len()), Some(1));

        listener.on_event(&event(Change::Update(subset(&["10.0.0.1:9080", "10.0.0.2:9080"]))));
        assert_eq!(cache.get(CLUSTER).map(|s| s.instances.len()), Some(2));

        listener.on_event(&event(Change::Delete));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_empty_subset_is_deleted() {
        let cache = Arc::new(EndpointCache::new());
        let listener = EndpointListener::new(cache.clone());

        listener.on_event(&event(Change::Create(subset(&["10.0.0.1:9080"]))));
        listener.on_event(&event(Change::Update(subset(&[]))));

        assert!(cache.get(CLUSTER).is_none());
        assert_eq!(cache.get_with_tags("reviews", &labels(&[])), None);
    }
}
